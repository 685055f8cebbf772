//! etcd adapter
//!
//! Get, put, delete, watch and transactions against an etcd v3 cluster
//! through its JSON gateway. Each call runs on its own short-lived session.

pub mod client;
pub mod txn;
pub mod watch;
pub mod wire;


pub use client::EtcdClient;
pub use txn::{Txn, TxnOp};
pub use watch::Watcher;
pub use wire::{
    prefix_range_end, DeleteResponse, EventType, GetResponse, KeyValue, PutResponse,
    ResponseHeader, TxnOpResponse, TxnResponse, WatchEvent,
};
