pub mod checkpoint;
pub mod error;
pub mod http;
pub mod lookup;
pub mod model;
pub mod reconcile;
pub mod refresh;
pub mod sgtools;
pub mod source;
pub mod staleness;
pub mod steam;
pub mod steamgifts;
pub mod store;
pub mod sync;
pub mod user_history;
