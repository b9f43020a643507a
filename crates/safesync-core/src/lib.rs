//! SafeSync Core - Domain types and port definitions
//!
//! This crate contains the hexagonal core of the sync engine:
//! - **Domain entities** - `TrackedFile`, `RemoteFile`, `DbProvider`, `SyncLogRecord`
//! - **Port definitions** - `IRemoteStore`, `ISyncDb`, `ICredentialStore`
//! - **Use cases** - `NewAccountTask` (persisting a freshly linked account)
//! - **Configuration** - YAML config with validation
//!
//! # Architecture
//!
//! The domain module holds plain data and the rules attached to it. Ports
//! are the trait seams that the cache, remote and sync crates implement or
//! consume. Nothing here talks to the network, SQLite or the filesystem.

pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
