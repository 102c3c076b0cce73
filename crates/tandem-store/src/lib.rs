//! # tandem-store
//!
//! Document store used by the Tandem sync client.
//!
//! The crate defines the [`RemoteStore`] contract (per-document and
//! per-collection push subscriptions plus atomic read-modify-write) and ships
//! [`MemoryStore`], an in-process implementation that can persist its
//! documents to SQLite through [`Database`].

pub mod database;
pub mod documents;
pub mod memory;
pub mod migrations;
pub mod remote;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use memory::{MemoryStore, WriteHold};
pub use remote::{
    DocumentSnapshot, Mutation, RemoteStore, Snapshot, Subscription, SubscriptionId, WatchTarget,
};
