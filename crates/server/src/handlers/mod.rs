//! HTTP request handlers.

pub mod accounts;
pub mod common;
pub mod health;
pub mod ideas;

pub use accounts::*;
pub use common::*;
pub use health::*;
pub use ideas::*;
