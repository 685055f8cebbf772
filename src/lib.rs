//! Stevedore - thin adapters for container and key-value infrastructure
//!
//! Each module stands alone and forwards to an existing client, adding
//! logging and a little glue:
//!
//! - Docker daemon access (pull, build, push, run, stop, remove)
//! - etcd v3 access (get, put, delete, watch, transactions)
//! - Line-by-line reading of byte streams

pub mod config;
pub mod docker;
pub mod error;
pub mod etcd;
pub mod lines;

pub use error::{Result, StevedoreError};
