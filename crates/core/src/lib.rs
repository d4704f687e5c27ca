//! Core domain types and shared logic for the aquarium idea store.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Idea records and drafts
//! - Local id allocation and server/local merge
//! - Users, sessions and credentials exchanged with the identity provider
//! - Server and client configuration

pub mod config;
pub mod error;
pub mod identity;
pub mod idea;
pub mod merge;

pub use error::{Error, Result};
pub use idea::{Idea, IdeaDraft, next_local_id};
pub use identity::{Session, User, UserId};
pub use merge::{Merge, merge_ideas};

/// First id handed out to a fresh local record set.
pub const FIRST_LOCAL_ID: u128 = 1;
