//! HTTP API server for the aquarium idea store.
//!
//! This crate provides the server half of the sync engine:
//! - Keyed Access API over per-user idea records
//! - Account signup, sign-in, refresh and logout
//! - Credential verification middleware

pub mod auth;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod routes;
pub mod state;

pub use auth::{AuthenticatedUser, TraceId};
pub use error::ApiError;
pub use identity::{IdentityError, IdentityProvider, StoreIdentityProvider};
pub use routes::create_router;
pub use state::AppState;
