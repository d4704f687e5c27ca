//! Offline-first client for the aquarium idea store.
//!
//! - [`cache`]: durable local copy of the current idea set
//! - [`api_client`]: HTTP client for the Keyed Access API
//! - [`session`]: persisted credentials and refresh
//! - [`sync`]: the Sync Coordinator tying them together

pub mod api_client;
pub mod cache;
pub mod config;
pub mod session;
pub mod sync;

pub use api_client::{ApiClient, RemoteError};
pub use cache::{CacheError, LocalCache};
pub use config::ClientConfig;
pub use session::{FileSessionStore, SessionError, SessionProvider};
pub use sync::{IdeaRemote, SyncCoordinator, SyncError, SyncOutcome, SyncState};
