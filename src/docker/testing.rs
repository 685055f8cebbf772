//! In-process stand-in for the Docker Engine API
//!
//! Serves the handful of endpoints the client uses (version, image inspect,
//! create, push, remove, build, container create, start, stop, remove) over a
//! tokio listener and records every request it sees.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

/// One request as the daemon saw it, with the API version prefix removed
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
}

impl Recorded {
    pub fn param(&self, name: &str) -> Option<String> {
        query_param(&self.query, name)
    }
}

struct State {
    images: Mutex<BTreeSet<String>>,
    requests: Mutex<Vec<Recorded>>,
    stream_error: Mutex<Option<String>>,
    fail_start: AtomicBool,
    containers: AtomicUsize,
}

/// Handle to a running fake daemon
pub(crate) struct FakeDocker {
    addr: SocketAddr,
    state: Arc<State>,
}

impl FakeDocker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(State {
            images: Mutex::new(BTreeSet::new()),
            requests: Mutex::new(Vec::new()),
            stream_error: Mutex::new(None),
            fail_start: AtomicBool::new(false),
            containers: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, state).await;
                });
            }
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    /// Make `image` (`name:tag`) known to the daemon
    pub fn add_image(&self, image: &str) {
        self.state.images.lock().unwrap().insert(normalize(image));
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state.images.lock().unwrap().contains(&normalize(image))
    }

    /// End every pull, push and build stream with an error item
    pub fn stream_error(&self, message: &str) {
        *self.state.stream_error.lock().unwrap() = Some(message.to_string());
    }

    /// Refuse to start containers
    pub fn fail_start(&self, on: bool) {
        self.state.fail_start.store(on, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// First recorded request with `method` on `path`
    pub fn find(&self, method: &str, path: &str) -> Option<Recorded> {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path == path)
    }
}

fn normalize(image: &str) -> String {
    let last = image.rsplit('/').next().unwrap_or(image);
    if last.contains(':') || image.contains('@') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| percent_decode(v))
}

/// Drop the `/v1.xx` prefix bollard puts on every path
fn strip_version(path: &str) -> String {
    match path.strip_prefix("/v") {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest
            .find('/')
            .map(|i| rest[i..].to_string())
            .unwrap_or_default(),
        _ => path.to_string(),
    }
}

async fn read_body(
    reader: &mut BufReader<OwnedReadHalf>,
    content_length: usize,
    chunked: bool,
) -> io::Result<Vec<u8>> {
    if !chunked {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        return Ok(body);
    }

    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await?;
        let size = usize::from_str_radix(size_line.trim(), 16).unwrap_or(0);
        let mut chunk = vec![0u8; size + 2];
        reader.read_exact(&mut chunk).await?;
        if size == 0 {
            return Ok(body);
        }
        body.extend_from_slice(&chunk[..size]);
    }
}

async fn handle(stream: TcpStream, state: Arc<State>) -> io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    let mut content_length = 0;
    let mut chunked = false;
    loop {
        let mut header_line = String::new();
        if reader.read_line(&mut header_line).await? == 0 {
            break;
        }
        let header_line = header_line.trim();
        if header_line.is_empty() {
            break;
        }
        if let Some((name, value)) = header_line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("transfer-encoding") {
                chunked = value.trim().eq_ignore_ascii_case("chunked");
            }
        }
    }
    read_body(&mut reader, content_length, chunked).await?;

    let recorded = Recorded {
        method,
        path: strip_version(path),
        query: query.to_string(),
    };
    state.requests.lock().unwrap().push(recorded.clone());

    route(&mut write, &state, &recorded).await
}

async fn route(write: &mut OwnedWriteHalf, state: &State, req: &Recorded) -> io::Result<()> {
    let path = req.path.as_str();
    let stream_error = state.stream_error.lock().unwrap().clone();

    match (req.method.as_str(), path) {
        ("GET", "/version") => {
            respond(write, 200, &json!({ "Version": "27.3.1", "ApiVersion": "1.47" })).await
        }
        ("POST", "/images/create") => {
            let from = req.param("fromImage").unwrap_or_default();
            let tag = req.param("tag").unwrap_or_default();
            let mut items = vec![json!({ "status": format!("Pulling from {}", from) })];
            match stream_error {
                Some(message) => items.push(error_item(&message)),
                None => {
                    let image = if tag.is_empty() { from } else { format!("{}:{}", from, tag) };
                    state.images.lock().unwrap().insert(normalize(&image));
                    items.push(json!({ "status": "Download complete" }));
                }
            }
            respond_stream(write, &items).await
        }
        ("POST", "/build") => {
            let mut items = vec![json!({ "stream": "Step 1/1 : FROM busybox\n" })];
            match stream_error {
                Some(message) => items.push(error_item(&message)),
                None => {
                    if let Some(t) = req.param("t") {
                        state.images.lock().unwrap().insert(normalize(&t));
                    }
                    items.push(json!({ "stream": "Successfully built 0123456789ab\n" }));
                }
            }
            respond_stream(write, &items).await
        }
        ("POST", "/containers/create") => {
            let n = state.containers.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("fake-container-{}", n);
            respond(write, 201, &json!({ "Id": id, "Warnings": [] })).await
        }
        _ => route_named(write, state, req, stream_error).await,
    }
}

async fn route_named(
    write: &mut OwnedWriteHalf,
    state: &State,
    req: &Recorded,
    stream_error: Option<String>,
) -> io::Result<()> {
    let path = req.path.as_str();
    let method = req.method.as_str();

    if let Some(name) = path.strip_prefix("/images/") {
        if let (Some(image), "GET") = (name.strip_suffix("/json"), method) {
            let present = state.images.lock().unwrap().contains(&normalize(image));
            return if present {
                respond(write, 200, &json!({ "Id": "sha256:0123456789ab", "RepoTags": [image] }))
                    .await
            } else {
                not_found(write, &format!("No such image: {}", image)).await
            };
        }
        if let (Some(image), "POST") = (name.strip_suffix("/push"), method) {
            let mut items = vec![json!({ "status": format!("The push refers to repository [{}]", image) })];
            items.push(match stream_error {
                Some(message) => error_item(&message),
                None => json!({ "status": "Pushed", "progress": "[==>] 1/1" }),
            });
            return respond_stream(write, &items).await;
        }
        if method == "DELETE" {
            let removed = state.images.lock().unwrap().remove(&normalize(name));
            return if removed {
                respond(write, 200, &json!([{ "Untagged": name }])).await
            } else {
                not_found(write, &format!("No such image: {}", name)).await
            };
        }
    }

    if let Some(rest) = path.strip_prefix("/containers/") {
        if rest.ends_with("/start") {
            if state.fail_start.load(Ordering::SeqCst) {
                return respond(
                    write,
                    500,
                    &json!({ "message": "failed to create task for container" }),
                )
                .await;
            }
            return no_content(write).await;
        }
        if rest.ends_with("/stop") || method == "DELETE" {
            return no_content(write).await;
        }
    }

    not_found(write, "page not found").await
}

fn error_item(message: &str) -> Value {
    json!({ "errorDetail": { "message": message }, "error": message })
}

async fn not_found(write: &mut OwnedWriteHalf, message: &str) -> io::Result<()> {
    respond(write, 404, &json!({ "message": message })).await
}

async fn no_content(write: &mut OwnedWriteHalf) -> io::Result<()> {
    write
        .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
        .await?;
    write.flush().await
}

async fn respond_stream(write: &mut OwnedWriteHalf, items: &[Value]) -> io::Result<()> {
    let mut body = String::new();
    for item in items {
        body.push_str(&item.to_string());
        body.push('\n');
    }
    send(write, 200, &body).await
}

async fn respond(write: &mut OwnedWriteHalf, status: u16, body: &Value) -> io::Result<()> {
    send(write, status, &body.to_string()).await
}

async fn send(write: &mut OwnedWriteHalf, status: u16, body: &str) -> io::Result<()> {
    let reason = match status {
        200 => "OK",
        201 => "Created",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        reason,
        body.len(),
        body
    );
    write.write_all(response.as_bytes()).await?;
    write.flush().await
}
