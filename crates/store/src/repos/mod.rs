//! Repository traits for store operations.

pub mod records;
pub mod sessions;
pub mod users;

pub use records::RecordRepo;
pub use sessions::SessionRepo;
pub use users::UserRepo;
