//! etcd v3 JSON gateway messages
//!
//! The gateway speaks the protobuf JSON mapping: byte fields are base64 and
//! 64-bit integers travel as strings. Fields holding their default value are
//! left out, so every response field is optional here.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

pub(crate) fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn de_b64<'de, D>(d: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    STANDARD.decode(s.as_bytes()).map_err(de::Error::custom)
}

fn de_int<'de, D, T>(d: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int<T> {
        Str(String),
        Num(T),
    }

    match Int::<T>::deserialize(d)? {
        Int::Str(s) => s.parse().map_err(de::Error::custom),
        Int::Num(n) => Ok(n),
    }
}

/// End of the key range covering every key that starts with `prefix`
///
/// Increments the last byte below 0xff and drops what follows it. A prefix
/// with no such byte ranges to the end of the keyspace, spelled `"\0"`.
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

/// Key and optional range end for a single-key or prefix request
pub(crate) fn key_range(key: &str, with_prefix: bool) -> (String, Option<String>) {
    if !with_prefix {
        return (encode(key.as_bytes()), None);
    }
    if key.is_empty() {
        // Empty prefix: every key.
        return (encode(&[0]), Some(encode(&[0])));
    }
    (
        encode(key.as_bytes()),
        Some(encode(&prefix_range_end(key.as_bytes()))),
    )
}

#[derive(Debug, Serialize)]
pub(crate) struct RangeRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PutRequest {
    pub key: String,
    pub value: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub prev_kv: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct DeleteRangeRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub prev_kv: bool,
}

#[derive(Debug, Serialize)]
pub(crate) enum RequestOp {
    #[serde(rename = "request_put")]
    Put(PutRequest),
    #[serde(rename = "request_delete_range")]
    DeleteRange(DeleteRangeRequest),
}

#[derive(Debug, Serialize)]
pub(crate) struct TxnRequest {
    pub success: Vec<RequestOp>,
}

#[derive(Debug, Serialize)]
pub(crate) struct WatchCreateRequest {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
    pub prev_kv: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct WatchRequest {
    pub create_request: WatchCreateRequest,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthenticateRequest {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthenticateResponse {
    #[serde(default)]
    pub token: String,
}

/// Error body returned with a non-2xx status
#[derive(Debug, Default, Deserialize)]
pub(crate) struct GatewayError {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: i32,
}

impl GatewayError {
    pub fn text(&self) -> &str {
        if self.message.is_empty() {
            &self.error
        } else {
            &self.message
        }
    }
}

/// Metadata attached to every store response
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResponseHeader {
    #[serde(deserialize_with = "de_int")]
    pub cluster_id: u64,
    #[serde(deserialize_with = "de_int")]
    pub member_id: u64,
    #[serde(deserialize_with = "de_int")]
    pub revision: i64,
    #[serde(deserialize_with = "de_int")]
    pub raft_term: u64,
}

/// A stored key-value pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KeyValue {
    #[serde(deserialize_with = "de_b64")]
    pub key: Vec<u8>,
    #[serde(deserialize_with = "de_b64")]
    pub value: Vec<u8>,
    #[serde(deserialize_with = "de_int")]
    pub create_revision: i64,
    #[serde(deserialize_with = "de_int")]
    pub mod_revision: i64,
    #[serde(deserialize_with = "de_int")]
    pub version: i64,
    #[serde(deserialize_with = "de_int")]
    pub lease: i64,
}

impl KeyValue {
    /// Key as text, replacing invalid UTF-8
    pub fn key_str(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }

    /// Value as text, replacing invalid UTF-8
    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetResponse {
    pub header: ResponseHeader,
    pub kvs: Vec<KeyValue>,
    #[serde(deserialize_with = "de_int")]
    pub count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PutResponse {
    pub header: ResponseHeader,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeleteResponse {
    pub header: ResponseHeader,
    #[serde(deserialize_with = "de_int")]
    pub deleted: i64,
    pub prev_kvs: Vec<KeyValue>,
}

/// Result of one operation inside a committed transaction
#[derive(Debug, Clone, Deserialize)]
pub enum TxnOpResponse {
    #[serde(rename = "response_range")]
    Get(GetResponse),
    #[serde(rename = "response_put")]
    Put(PutResponse),
    #[serde(rename = "response_delete_range")]
    Delete(DeleteResponse),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TxnResponse {
    pub header: ResponseHeader,
    pub succeeded: bool,
    pub responses: Vec<TxnOpResponse>,
}

/// Kind of change reported by a watch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    #[default]
    Put,
    Delete,
}

/// One change to a watched key
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub kv: KeyValue,
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WatchResult {
    pub header: ResponseHeader,
    #[serde(deserialize_with = "de_int")]
    pub watch_id: i64,
    pub created: bool,
    pub canceled: bool,
    pub cancel_reason: String,
    pub events: Vec<WatchEvent>,
}

/// One line of the watch stream
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct WatchLine {
    pub result: Option<WatchResult>,
    pub error: Option<serde_json::Value>,
}
