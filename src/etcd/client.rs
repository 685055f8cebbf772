//! etcd client
//!
//! Every operation opens a brand-new session (fresh HTTP client, fresh
//! connection), issues one request under the request timeout and drops the
//! session again. Nothing is pooled between calls.

use super::txn::Txn;
use super::watch::Watcher;
use super::wire::{
    self, AuthenticateRequest, AuthenticateResponse, DeleteRangeRequest, DeleteResponse,
    GatewayError, GetResponse, PutRequest, PutResponse, RangeRequest,
};
use crate::config::EtcdConfig;
use crate::error::{Result, StevedoreError};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, warn};

/// etcd v3 client speaking the JSON gateway
#[derive(Debug, Clone)]
pub struct EtcdClient {
    dial_timeout: Duration,
    request_timeout: Duration,
    endpoints: Vec<String>,
    credentials: Option<(String, String)>,
}

impl EtcdClient {
    /// Create a client; nothing is contacted until the first call
    pub fn new(dial_timeout: Duration, request_timeout: Duration, endpoints: Vec<String>) -> Self {
        Self {
            dial_timeout,
            request_timeout,
            endpoints,
            credentials: None,
        }
    }

    /// Create a client from configuration
    pub fn from_config(config: &EtcdConfig) -> Self {
        let client = Self::new(
            config.dial_timeout(),
            config.request_timeout(),
            config.endpoints.clone(),
        );
        match (&config.username, &config.password) {
            (Some(user), Some(password)) => client.with_credentials(user, password),
            _ => client,
        }
    }

    /// Authenticate every session with `username` and `password`
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Open a fresh session, authenticating when credentials are set
    pub(crate) async fn session(&self) -> Result<Session> {
        let http = Client::builder()
            .connect_timeout(self.dial_timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| StevedoreError::EtcdConnect(e.to_string()))?;

        let mut session = Session {
            http,
            endpoints: self.endpoints.clone(),
            request_timeout: self.request_timeout,
            token: None,
        };

        if let Some((ref name, ref password)) = self.credentials {
            let request = AuthenticateRequest {
                name: name.clone(),
                password: password.clone(),
            };
            let response: AuthenticateResponse = session.call("auth/authenticate", &request).await?;
            session.token = Some(response.token);
        }

        Ok(session)
    }

    /// Key-value pairs at `key`, or under the `key` prefix
    pub async fn get(&self, key: &str, with_prefix: bool) -> Result<GetResponse> {
        debug!("etcd get {} (prefix: {})", key, with_prefix);
        let (key, range_end) = wire::key_range(key, with_prefix);
        let request = RangeRequest { key, range_end };
        self.session().await?.call("kv/range", &request).await
    }

    /// Write one key-value pair
    pub async fn put(&self, key: &str, value: &str) -> Result<PutResponse> {
        debug!("etcd put {}", key);
        let request = PutRequest {
            key: wire::encode(key.as_bytes()),
            value: wire::encode(value.as_bytes()),
            prev_kv: false,
        };
        self.session().await?.call("kv/put", &request).await
    }

    /// Delete `key`, or every key under the `key` prefix
    ///
    /// The response carries the deleted pairs.
    pub async fn delete(&self, key: &str, with_prefix: bool) -> Result<DeleteResponse> {
        debug!("etcd delete {} (prefix: {})", key, with_prefix);
        let (key, range_end) = wire::key_range(key, with_prefix);
        let request = DeleteRangeRequest {
            key,
            range_end,
            prev_kv: true,
        };
        self.session().await?.call("kv/deleterange", &request).await
    }

    /// Watch every key under `prefix`
    ///
    /// Returns once the store has registered the watch, so changes made
    /// after this call resolves are observed.
    pub async fn watch(&self, prefix: &str) -> Result<Watcher> {
        debug!("etcd watch {}", prefix);
        let session = self.session().await?;
        Watcher::start(session, prefix).await
    }

    /// True when exactly one value is stored at `key`
    ///
    /// Any error reads as `false`: an unreachable store looks the same as a
    /// missing key.
    pub async fn has_entry(&self, key: &str) -> bool {
        match self.get(key, false).await {
            Ok(resp) => resp.kvs.len() == 1,
            Err(e) => {
                warn!("etcd lookup of {} failed, treating as absent: {}", key, e);
                false
            }
        }
    }

    /// Start a transaction
    pub fn txn(&self) -> Txn {
        Txn::new(self.clone())
    }
}

/// One connection's worth of requests
pub(crate) struct Session {
    http: Client,
    endpoints: Vec<String>,
    request_timeout: Duration,
    token: Option<String>,
}

impl Session {
    pub(crate) fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// POST `body` to `/v3/{path}` and decode the response
    pub(crate) async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self.send(path, body, Some(self.request_timeout)).await?;
        let text = response.text().await.map_err(|e| {
            let err = StevedoreError::from(e);
            error!("etcd {} failed: {}", path, err);
            err
        })?;
        serde_json::from_str(&text)
            .map_err(|e| StevedoreError::EtcdProtocol(format!("{}: {}", path, e)))
    }

    /// POST `body` to the first endpoint that accepts a connection
    pub(crate) async fn send<Req>(
        &self,
        path: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> Result<Response>
    where
        Req: Serialize,
    {
        let mut last_err = None;

        for endpoint in &self.endpoints {
            match self.send_to(endpoint, path, body, timeout).await {
                Err(StevedoreError::EtcdConnect(message)) => {
                    debug!("etcd endpoint {} unreachable: {}", endpoint, message);
                    last_err = Some(StevedoreError::EtcdConnect(format!(
                        "{}: {}",
                        endpoint, message
                    )));
                }
                Err(e) => {
                    error!("etcd {} failed: {}", path, e);
                    return Err(e);
                }
                Ok(response) => return Ok(response),
            }
        }

        let err = last_err
            .unwrap_or_else(|| StevedoreError::EtcdConnect("no endpoints configured".to_string()));
        error!("etcd {} failed: {}", path, err);
        Err(err)
    }

    async fn send_to<Req>(
        &self,
        endpoint: &str,
        path: &str,
        body: &Req,
        timeout: Option<Duration>,
    ) -> Result<Response>
    where
        Req: Serialize,
    {
        let url = format!("{}/v3/{}", endpoint_url(endpoint), path);

        let mut request = self.http.post(&url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        if let Some(ref token) = self.token {
            request = request.header("Authorization", token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: GatewayError = serde_json::from_str(&text).unwrap_or_default();
            let message = if body.text().is_empty() {
                format!("{} {}", status, text.trim())
            } else {
                body.text().to_string()
            };
            return Err(StevedoreError::EtcdServer {
                code: body.code,
                message,
            });
        }

        Ok(response)
    }
}

/// Base URL for an endpoint, defaulting to plain HTTP
fn endpoint_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}
