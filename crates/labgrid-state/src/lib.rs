//! labgrid-state: server records and their persistent store.
//!
//! Backed by [redb](https://docs.rs/redb). Each user principal owns
//! exactly one [`Server`] record, JSON-serialized into the `servers`
//! table under its principal name.
//!
//! Writers (the lifecycle API and the background reconcilers) do a
//! read-modify-write of the whole record without locking; the last
//! upsert wins. Every store call is a single redb transaction, so a
//! record is never observed half-written.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{ServerStore, StateStore};
pub use types::*;
