//! Offline-first headline cache and sync engine.
//!
//! [`storage::LocalStore`] keeps the last synced generation of scored
//! headlines plus a live-feed snapshot in SQLite. [`sync::SyncCoordinator`]
//! is its only writer: it polls a [`remote::RemoteFeedService`] for new
//! generations and swaps them in atomically. Readers go through
//! [`sync::HeadlineReader`], which answers from the local store and only
//! touches the network when nothing is cached.

pub mod config;
pub mod remote;
pub mod storage;
pub mod sync;
