//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;

static INIT: Once = Once::new();

/// Load .env exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        if dotenv::dotenv().is_err() {
            // Fallback to the crate root so `cargo run` from a subdirectory still finds it.
            let candidate = format!("{}/.env", env!("CARGO_MANIFEST_DIR"));
            let _ = dotenv::from_filename(candidate);
        }
    });
}

/// Get required env var; error if missing.
pub fn env_req(key: &str) -> anyhow::Result<String> {
    init_env();
    env_opt(key).ok_or_else(|| anyhow::anyhow!("missing env var {key}"))
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_parse_opt(key).unwrap_or(default)
}

/// Optional parsed value.
pub fn env_parse_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    init_env();
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Boolean flag; accepts 1/true/on/yes as true and 0/false/off/no as false
/// (case-insensitive). Anything else falls back to `default`.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => true,
            "0" | "false" | "off" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Database URL: `DATABASE_URL`, then `DB_URL`.
pub fn db_url() -> anyhow::Result<String> {
    env_opt("DATABASE_URL")
        .or_else(|| env_opt("DB_URL"))
        .ok_or_else(|| anyhow::anyhow!("Database URL not configured; set DATABASE_URL or DB_URL"))
}

/// Base URL from env with a trailing slash trimmed.
pub fn env_base_url(key: &str, default: &str) -> String {
    env_opt(key)
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_accepts_common_spellings() {
        std::env::set_var("CATALOG_TEST_FLAG_ON", "Yes");
        std::env::set_var("CATALOG_TEST_FLAG_OFF", "off");
        std::env::set_var("CATALOG_TEST_FLAG_JUNK", "maybe");
        assert!(env_flag("CATALOG_TEST_FLAG_ON", false));
        assert!(!env_flag("CATALOG_TEST_FLAG_OFF", true));
        assert!(env_flag("CATALOG_TEST_FLAG_JUNK", true));
        assert!(!env_flag("CATALOG_TEST_FLAG_UNSET", false));
    }

    #[test]
    fn parse_falls_back_on_garbage() {
        std::env::set_var("CATALOG_TEST_BATCH", " 250 ");
        std::env::set_var("CATALOG_TEST_BAD_BATCH", "many");
        assert_eq!(env_parse("CATALOG_TEST_BATCH", 10u32), 250);
        assert_eq!(env_parse("CATALOG_TEST_BAD_BATCH", 10u32), 10);
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        std::env::set_var("CATALOG_TEST_BASE", "http://localhost:9000/");
        assert_eq!(
            env_base_url("CATALOG_TEST_BASE", "https://example.com"),
            "http://localhost:9000"
        );
        assert_eq!(
            env_base_url("CATALOG_TEST_BASE_UNSET", "https://example.com/"),
            "https://example.com"
        );
    }
}
