//! Transactions
//!
//! A [`Txn`] collects puts and deletes and commits them as one atomic batch:
//! either every operation applies or none does.

use super::client::EtcdClient;
use super::wire::{self, DeleteRangeRequest, PutRequest, RequestOp, TxnRequest, TxnResponse};
use crate::error::Result;
use tracing::{debug, info};

/// A pending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: String },
    Delete { key: String, with_prefix: bool },
}

impl TxnOp {
    fn to_request(&self) -> RequestOp {
        match self {
            TxnOp::Put { key, value } => RequestOp::Put(PutRequest {
                key: wire::encode(key.as_bytes()),
                value: wire::encode(value.as_bytes()),
                prev_kv: false,
            }),
            TxnOp::Delete { key, with_prefix } => {
                let (key, range_end) = wire::key_range(key, *with_prefix);
                RequestOp::DeleteRange(DeleteRangeRequest {
                    key,
                    range_end,
                    prev_kv: false,
                })
            }
        }
    }
}

/// Transaction builder
pub struct Txn {
    client: EtcdClient,
    ops: Vec<TxnOp>,
}

impl Txn {
    pub(crate) fn new(client: EtcdClient) -> Self {
        Self {
            client,
            ops: Vec::new(),
        }
    }

    /// Queue a put
    pub fn put(&mut self, key: &str, value: &str) -> &mut Self {
        self.ops.push(TxnOp::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        self
    }

    /// Queue a delete of `key`, or of every key under it
    pub fn delete(&mut self, key: &str, with_prefix: bool) -> &mut Self {
        self.ops.push(TxnOp::Delete {
            key: key.to_string(),
            with_prefix,
        });
        self
    }

    /// Operations queued so far, in order
    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every queued operation atomically on a fresh session
    pub async fn commit(&self) -> Result<TxnResponse> {
        debug!("etcd txn with {} operations", self.ops.len());
        let request = TxnRequest {
            success: self.ops.iter().map(TxnOp::to_request).collect(),
        };

        let response: TxnResponse = self.client.session().await?.call("kv/txn", &request).await?;
        info!(
            "etcd txn committed at revision {}",
            response.header.revision
        );
        Ok(response)
    }
}
