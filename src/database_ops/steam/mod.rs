pub mod parse;
pub mod provider;

pub use provider::SteamStore;
