//! Local HTTP server that hands downloaded attachments to the user
//!
//! Serves one flat directory over loopback. The port is negotiated the
//! first time a caller needs it and then reused for the life of the process.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, DeliveryConfig};
use crate::error::{Error, Result};
use crate::local_http::{read_request_line, write_html, write_response, RequestLine};

/// How long a connect probe waits before deciding a port is free
const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Where the delivery server is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    pub is_running: bool,
    pub port: u16,
    pub root: PathBuf,
    pub host: String,
}

impl ServerHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Download link for a file in the served directory
    pub fn url_for(&self, filename: &str) -> String {
        format!("{}/{}", self.base_url(), urlencoding::encode(filename))
    }
}

struct Running {
    handle: ServerHandle,
    task: JoinHandle<()>,
}

/// Process-wide attachment server
pub struct AttachmentDeliveryServer {
    host: String,
    bind_address: String,
    base_port: u16,
    max_attempts: u16,
    reserved_ports: Vec<u16>,
    state: Mutex<Option<Running>>,
}

impl AttachmentDeliveryServer {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            host: config.host.clone(),
            bind_address: config.bind_address.clone(),
            base_port: config.base_port,
            max_attempts: config.max_attempts,
            reserved_ports: Vec::new(),
            state: Mutex::new(None),
        }
    }

    /// Server that never takes the OAuth callback port
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.delivery).with_reserved_port(config.oauth.callback_port)
    }

    /// Never negotiate `port`
    pub fn with_reserved_port(mut self, port: u16) -> Self {
        self.reserved_ports.push(port);
        self
    }

    /// Start serving `root` if needed and return where it is served.
    ///
    /// Concurrent callers share one negotiation and observe the same port.
    /// Asking for a different root stops the old listener and negotiates again.
    pub async fn ensure_running(&self, root: &Path) -> Result<ServerHandle> {
        let mut state = self.state.lock().await;

        if let Some(running) = state.as_ref() {
            if running.handle.root == root && !running.task.is_finished() {
                return Ok(running.handle.clone());
            }
        }

        if let Some(old) = state.take() {
            if old.handle.root != root {
                info!(
                    "Delivery root changed from {:?} to {:?}, restarting server",
                    old.handle.root, root
                );
            } else {
                warn!("Delivery server on port {} stopped, restarting", old.handle.port);
            }
            old.task.abort();
        }

        tokio::fs::create_dir_all(root).await?;
        let (listener, port) = self.negotiate_port().await?;

        let handle = ServerHandle {
            is_running: true,
            port,
            root: root.to_path_buf(),
            host: self.host.clone(),
        };
        let task = tokio::spawn(serve(listener, root.to_path_buf()));
        info!("Serving {:?} at {}", root, handle.base_url());

        *state = Some(Running {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    /// Current handle, without starting anything
    pub async fn current(&self) -> Option<ServerHandle> {
        let state = self.state.lock().await;
        state
            .as_ref()
            .filter(|r| !r.task.is_finished())
            .map(|r| r.handle.clone())
    }

    /// Stop serving
    pub async fn shutdown(&self) {
        if let Some(running) = self.state.lock().await.take() {
            running.task.abort();
            info!("Delivery server on port {} stopped", running.handle.port);
        }
    }

    async fn negotiate_port(&self) -> Result<(TcpListener, u16)> {
        for offset in 0..self.max_attempts {
            let Some(port) = self.base_port.checked_add(offset) else {
                break;
            };
            if self.reserved_ports.contains(&port) {
                debug!("Skipping reserved port {}", port);
                continue;
            }
            if self.port_in_use(port).await {
                debug!("Port {} is in use", port);
                continue;
            }
            match TcpListener::bind((self.bind_address.as_str(), port)).await {
                Ok(listener) => return Ok((listener, port)),
                Err(e) => debug!("Cannot bind port {}: {}", port, e),
            }
        }

        let last = self.base_port.saturating_add(self.max_attempts.saturating_sub(1));
        Err(Error::ResourceExhausted(format!(
            "No free port for the attachment server in {}-{}",
            self.base_port, last
        )))
    }

    /// A port is in use if something accepts a connection on it
    async fn port_in_use(&self, port: u16) -> bool {
        matches!(
            tokio::time::timeout(
                PROBE_TIMEOUT,
                TcpStream::connect((self.bind_address.as_str(), port))
            )
            .await,
            Ok(Ok(_))
        )
    }
}

async fn serve(listener: TcpListener, root: PathBuf) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let root = root.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket, &root).await {
                        debug!("Delivery request from {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                warn!("Delivery server accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream, root: &Path) -> Result<()> {
    let line = read_request_line(&mut socket).await?;
    let Some(request) = RequestLine::parse(&line) else {
        write_html(&mut socket, "400 Bad Request", "<h1>Bad request</h1>").await;
        return Ok(());
    };

    let head_only = match request.method.as_str() {
        "GET" => false,
        "HEAD" => true,
        _ => {
            let allow = [("Allow", "GET, HEAD".to_string())];
            write_response(
                &mut socket,
                "405 Method Not Allowed",
                "text/plain",
                &allow,
                b"Method not allowed",
                true,
            )
            .await?;
            return Ok(());
        }
    };

    if request.path() == "/" {
        let index = render_index(root).await?;
        return write_response(
            &mut socket,
            "200 OK",
            "text/html; charset=utf-8",
            &[],
            index.as_bytes(),
            !head_only,
        )
        .await;
    }

    let Some(name) = served_name(request.path()) else {
        write_html(&mut socket, "400 Bad Request", "<h1>Bad request</h1>").await;
        return Ok(());
    };

    let path = root.join(&name);
    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) if e.kind() == ErrorKind::NotFound || path.is_dir() => {
            write_html(&mut socket, "404 Not Found", "<h1>Not found</h1>").await;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    debug!("Serving {:?} ({} bytes)", path, body.len());
    let disposition = [(
        "Content-Disposition",
        format!("attachment; filename*=UTF-8''{}", urlencoding::encode(&name)),
    )];
    write_response(
        &mut socket,
        "200 OK",
        content_type_for(&name),
        &disposition,
        &body,
        !head_only,
    )
    .await
}

/// Decode a request path into a flat file name, rejecting anything that
/// could leave the served directory
fn served_name(path: &str) -> Option<String> {
    let raw = path.strip_prefix('/')?;
    let name = urlencoding::decode(raw).ok()?.into_owned();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return None;
    }
    Some(name)
}

async fn render_index(root: &Path) -> Result<String> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut html = String::from("<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Attachments</title></head><body>\n<h1>Attachments</h1>\n<ul>\n");
    for name in names {
        html.push_str(&format!(
            "<li><a href=\"/{}\">{}</a></li>\n",
            urlencoding::encode(&name),
            escape_html(&name)
        ));
    }
    html.push_str("</ul>\n</body></html>\n");
    Ok(html)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Content type guessed from the file extension
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain; charset=utf-8",
        "csv" => "text/csv",
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "ics" => "text/calendar",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}
