//! Web front door.
//!
//! A small blocking HTTP/1.1 server. Plain routes are answered on the accept thread; every
//! `/video-feed` viewer gets a fresh pipeline session on its own thread and receives its chunks
//! until the viewer disconnects, the source ends, or the server shuts down.

use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::pipeline::Pipeline;
use crate::storage::AlertStore;
use crate::stream::STREAM_CONTENT_TYPE;

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_RECENT_LIMIT: usize = 50;
const MAX_RECENT_LIMIT: usize = 1000;
const VIEWER_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds a new pipeline session for one viewer.
pub type SessionFactory = Arc<dyn Fn() -> Result<Pipeline> + Send + Sync>;

type SharedStore = Arc<Mutex<Box<dyn AlertStore>>>;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8780".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting, end every viewer session, and wait for the threads to finish.
    ///
    /// Viewers notice shutdown between frames, so this can wait for one in-flight source read:
    /// at most the source read timeout (`source.timeout_ms`) on a stalled camera.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("front door thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    sessions: SessionFactory,
    alerts: Option<SharedStore>,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, sessions: SessionFactory) -> Self {
        Self {
            cfg,
            sessions,
            alerts: None,
        }
    }

    /// Serve `/alerts` from this store. Without one those routes answer 503.
    pub fn with_alert_store(mut self, store: Box<dyn AlertStore>) -> Self {
        self.alerts = Some(Arc::new(Mutex::new(store)));
        self
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .with_context(|| format!("invalid listen address {}", self.cfg.addr))?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("bind front door on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "front door configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("front-door".to_string())
            .spawn(move || {
                if let Err(err) = run_server(listener, self.sessions, self.alerts, shutdown_thread)
                {
                    log::error!("front door stopped: {:#}", err);
                }
            })
            .context("spawn front door thread")?;

        log::info!("front door listening on http://{}", addr);
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_server(
    listener: TcpListener,
    sessions: SessionFactory,
    alerts: Option<SharedStore>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut viewers: Vec<JoinHandle<()>> = Vec::new();
    let mut viewer_seq = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                match handle_connection(stream, alerts.as_ref()) {
                    Ok(Some(stream)) => {
                        viewer_seq += 1;
                        let sessions = sessions.clone();
                        let shutdown = shutdown.clone();
                        let spawned = std::thread::Builder::new()
                            .name(format!("video-feed-{}", viewer_seq))
                            .spawn(move || serve_viewer(stream, sessions, shutdown));
                        match spawned {
                            Ok(handle) => viewers.push(handle),
                            Err(err) => log::warn!("viewer thread not started: {}", err),
                        }
                    }
                    Ok(None) => {}
                    Err(err) => log::warn!("front door request rejected: {:#}", err),
                }
                viewers.retain(|handle| !handle.is_finished());
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    for handle in viewers {
        if handle.join().is_err() {
            log::warn!("viewer thread panicked");
        }
    }
    Ok(())
}

/// Answer a plain request. Returns the stream back when the caller should start a video feed.
fn handle_connection(
    mut stream: TcpStream,
    alerts: Option<&SharedStore>,
) -> Result<Option<TcpStream>> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(None);
    }

    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(None);
    }

    match Route::parse(&request.path) {
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#)?,
        Route::VideoFeed => return Ok(Some(stream)),
        Route::Alerts => {
            let Some(store) = alerts else {
                write_json_response(&mut stream, 503, r#"{"error":"alerts_unavailable"}"#)?;
                return Ok(None);
            };
            let limit = request.limit().unwrap_or(DEFAULT_RECENT_LIMIT);
            let recent = lock_store(store)?.recent(limit)?;
            let payload = serde_json::to_vec(&serde_json::json!({ "alerts": recent }))?;
            write_response(&mut stream, 200, "application/json", &payload)?;
        }
        Route::AlertImage(id) => {
            let Some(store) = alerts else {
                write_json_response(&mut stream, 503, r#"{"error":"alerts_unavailable"}"#)?;
                return Ok(None);
            };
            let image = lock_store(store)?.image(id)?;
            match image {
                Some(bytes) => write_response(&mut stream, 200, "image/jpeg", &bytes)?,
                None => write_json_response(&mut stream, 404, r#"{"error":"no_such_alert"}"#)?,
            }
        }
        Route::NotFound => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?,
    }
    Ok(None)
}

fn lock_store(store: &SharedStore) -> Result<std::sync::MutexGuard<'_, Box<dyn AlertStore>>> {
    store
        .lock()
        .map_err(|_| anyhow!("alert store lock poisoned"))
}

fn serve_viewer(mut stream: TcpStream, sessions: SessionFactory, shutdown: Arc<AtomicBool>) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut pipeline = match sessions() {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::warn!("video feed for {} not started: {:#}", peer, err);
            if let Err(e) =
                write_json_response(&mut stream, 503, r#"{"error":"source_unavailable"}"#)
            {
                log::debug!("could not tell {} the source is down: {}", peer, e);
            }
            return;
        }
    };

    if let Err(err) = stream
        .set_write_timeout(Some(VIEWER_WRITE_TIMEOUT))
        .map_err(anyhow::Error::from)
        .and_then(|_| write_stream_header(&mut stream))
    {
        log::debug!("video feed for {} not started: {:#}", peer, err);
        return;
    }
    log::info!("video feed started for {}", peer);

    while !shutdown.load(Ordering::SeqCst) {
        let Some(chunk) = pipeline.next() else {
            break;
        };
        if let Err(err) = stream.write_all(&chunk.to_multipart_bytes()) {
            log::debug!("viewer {} went away: {}", peer, err);
            break;
        }
    }
    let stats = pipeline.stats();
    log::info!(
        "video feed for {} closed after {} frames ({} published, {} alerts)",
        peer,
        stats.frames_read,
        stats.published,
        stats.alerts
    );
}

#[derive(Debug, PartialEq, Eq)]
enum Route {
    Health,
    VideoFeed,
    Alerts,
    AlertImage(i64),
    NotFound,
}

impl Route {
    fn parse(path: &str) -> Self {
        match path.trim_end_matches('/') {
            "/health" => Route::Health,
            "/video-feed" => Route::VideoFeed,
            "/alerts" => Route::Alerts,
            other => other
                .strip_prefix("/alerts/")
                .and_then(|rest| rest.strip_suffix("/image"))
                .and_then(|id| id.parse().ok())
                .map(Route::AlertImage)
                .unwrap_or(Route::NotFound),
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text.split("\r\n").next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query: query.to_string(),
    })
}

fn write_stream_header(stream: &mut TcpStream) -> Result<()> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        STREAM_CONTENT_TYPE
    );
    stream.write_all(header.as_bytes())?;
    Ok(())
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: String,
}

impl HttpRequest {
    /// `limit` query parameter, clamped to a sane maximum.
    fn limit(&self) -> Option<usize> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(key, _)| key == "limit")
            .and_then(|(_, value)| value.parse::<usize>().ok())
            .map(|limit| limit.clamp(1, MAX_RECENT_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_are_parsed() {
        assert_eq!(Route::parse("/health"), Route::Health);
        assert_eq!(Route::parse("/video-feed"), Route::VideoFeed);
        assert_eq!(Route::parse("/video-feed/"), Route::VideoFeed);
        assert_eq!(Route::parse("/alerts"), Route::Alerts);
        assert_eq!(Route::parse("/alerts/17/image"), Route::AlertImage(17));
        assert_eq!(Route::parse("/alerts/x/image"), Route::NotFound);
        assert_eq!(Route::parse("/events"), Route::NotFound);
    }

    #[test]
    fn limit_is_clamped() {
        let request = |query: &str| HttpRequest {
            method: "GET".to_string(),
            path: "/alerts".to_string(),
            query: query.to_string(),
        };
        assert_eq!(request("limit=5").limit(), Some(5));
        assert_eq!(request("limit=0").limit(), Some(1));
        assert_eq!(request("limit=999999").limit(), Some(MAX_RECENT_LIMIT));
        assert_eq!(request("limit=abc").limit(), None);
        assert_eq!(request("").limit(), None);
    }
}
