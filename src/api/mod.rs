//! HTTP boundary for the pipeline.
//!
//! - `GET /health` answers `{"status":"ok"}` without touching the pipeline.
//! - `POST /detect` takes a `multipart/form-data` upload with a `file` part, or a raw
//!   `image/*` / `application/octet-stream` body, and answers with a `ResponseEnvelope`.
//!
//! Every response allows any origin. Each connection is served on its own thread.

pub mod multipart;

use crate::config::ServiceConfig;
use crate::pipeline::Pipeline;
use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEAD_BYTES: usize = 16 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_FIELD: &str = "file";

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Largest accepted request body.
    pub max_upload_bytes: usize,
}

impl From<&ServiceConfig> for ApiConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            addr: config.api_addr.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<Pipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<Pipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let pipeline = self.pipeline;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, pipeline, shutdown_thread) {
                log::error!("barcode api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    pipeline: Arc<Pipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &pipeline, &cfg) {
                        log::warn!("request from {} rejected: {:#}", peer, err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, pipeline: &Pipeline, cfg: &ApiConfig) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let request = read_head(&mut stream)?;
    if request.method == "OPTIONS" {
        return write_response(&mut stream, 204, "text/plain", b"");
    }
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("POST", "/detect") => handle_detect(&mut stream, request, pipeline, cfg),
        (_, "/health") | (_, "/detect") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn handle_detect(
    stream: &mut TcpStream,
    request: HttpRequest,
    pipeline: &Pipeline,
    cfg: &ApiConfig,
) -> Result<()> {
    let content_length = match request.content_length() {
        Ok(Some(len)) => len,
        Ok(None) => return write_json_response(stream, 411, r#"{"error":"length_required"}"#),
        Err(err) => {
            write_json_response(stream, 400, r#"{"error":"bad_request"}"#)?;
            return Err(err);
        }
    };
    if content_length > cfg.max_upload_bytes {
        write_json_response(stream, 413, r#"{"error":"payload_too_large"}"#)?;
        return Err(anyhow!(
            "upload of {} bytes exceeds limit of {}",
            content_length,
            cfg.max_upload_bytes
        ));
    }
    let body = read_body(stream, request.body_prefix.clone(), content_length)?;

    let content_type = request.header("content-type").unwrap_or_default();
    let upload: &[u8] = match multipart::boundary(content_type) {
        Some(boundary) => match multipart::file_field(&body, &boundary, UPLOAD_FIELD) {
            Ok(Some(part)) if part.content_type.as_deref().map_or(true, is_raw_upload) => {
                part.data
            }
            Ok(Some(part)) => {
                log::warn!(
                    "rejecting file part declared as {:?}",
                    part.content_type.unwrap_or_default()
                );
                return write_json_response(stream, 415, r#"{"error":"unsupported_media_type"}"#);
            }
            Ok(None) => {
                return write_json_response(stream, 400, r#"{"error":"missing_file"}"#);
            }
            Err(err) => {
                write_json_response(stream, 400, r#"{"error":"malformed_multipart"}"#)?;
                return Err(err);
            }
        },
        None if is_raw_upload(content_type) => &body,
        None => {
            return write_json_response(stream, 415, r#"{"error":"unsupported_media_type"}"#);
        }
    };

    let digest = upload_digest(upload);
    let image = match crate::decode_upload(upload) {
        Ok(image) => image,
        Err(err) => {
            write_json_response(stream, 400, r#"{"error":"invalid_image"}"#)?;
            return Err(err.context(format!("upload {}", digest)));
        }
    };

    match pipeline.run(&image) {
        Ok(envelope) => {
            log::info!(
                "upload {} ({}x{}): {} barcode regions",
                digest,
                image.width(),
                image.height(),
                envelope.count
            );
            let payload = serde_json::to_vec(&envelope)?;
            write_response(stream, 200, "application/json", &payload)
        }
        Err(err) => {
            log::error!("upload {}: pipeline failed: {:#}", digest, err);
            write_json_response(stream, 500, r#"{"error":"detection_failed"}"#)
        }
    }
}

fn is_raw_upload(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    mime.starts_with("image/") || mime == "application/octet-stream"
}

/// Short content digest used to correlate log lines for one upload.
fn upload_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..6])
}

fn read_head(stream: &mut TcpStream) -> Result<HttpRequest> {
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let head_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request head completed"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = multipart::find(&data, b"\r\n\r\n", 0) {
            break pos;
        }
        if data.len() > MAX_HEAD_BYTES {
            return Err(anyhow!("request head too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..head_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_uppercase(),
        path,
        headers,
        body_prefix: data[head_end + 4..].to_vec(),
    })
}

fn read_body(stream: &mut TcpStream, mut body: Vec<u8>, content_length: usize) -> Result<Vec<u8>> {
    body.truncate(content_length);
    body.reserve(content_length - body.len());
    let mut buf = [0u8; 16 * 1024];
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!(
                "connection closed after {} of {} body bytes",
                body.len(),
                content_length
            ));
        }
        let take = n.min(content_length - body.len());
        body.extend_from_slice(&buf[..take]);
    }
    Ok(body)
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
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        415 => "HTTP/1.1 415 Unsupported Media Type",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {len}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: *\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    /// Body bytes that arrived with the head.
    body_prefix: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    fn content_length(&self) -> Result<Option<usize>> {
        self.header("content-length")
            .map(|value| {
                value
                    .parse::<usize>()
                    .map_err(|_| anyhow!("invalid Content-Length '{}'", value))
            })
            .transpose()
    }
}
