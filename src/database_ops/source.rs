//! Seams between the jobs and the external sites they read.

use async_trait::async_trait;

use super::error::SourceError;
use super::model::{Fetched, GameRef, GameType, GiftIdEntry, ListingPage, TimelineKind};

#[async_trait]
pub trait DetailSource: Send + Sync {
    async fn fetch_app(&self, app_id: i64) -> Result<Fetched, SourceError>;

    async fn fetch_sub(&self, sub_id: i64) -> Result<Fetched, SourceError>;

    async fn fetch(&self, game: GameRef) -> Result<Fetched, SourceError> {
        match game.game_type {
            GameType::App => self.fetch_app(game.id).await,
            GameType::Sub => self.fetch_sub(game.id).await,
            GameType::Bundle => Err(SourceError::transient(
                "steam",
                format!("no detail endpoint for {game}"),
            )),
        }
    }
}

/// A paginated community listing (pages start at 1).
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Also the checkpoint key.
    fn name(&self) -> &'static str;

    /// Timeline kinds whose `found` flag a full pass maintains. Empty for
    /// sources that only add or refresh entries.
    fn tracked_kinds(&self) -> &'static [TimelineKind];

    /// Ledger rows written when a pass completes.
    fn ledger_keys(&self) -> &'static [&'static str];

    /// Bulk mappings applied once at the start of a full pass.
    async fn seed(&self) -> Result<Vec<GiftIdEntry>, SourceError> {
        Ok(Vec::new())
    }

    async fn fetch_page(&self, page: u32) -> Result<ListingPage, SourceError>;
}

#[async_trait]
pub trait UsernameSource: Send + Sync {
    /// Current SteamGifts username of a Steam account, or `[DELETED]`.
    async fn resolve(&self, steam_id: &str) -> Result<String, SourceError>;
}
