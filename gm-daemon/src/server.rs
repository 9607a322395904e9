//! Unix socket server
//!
//! One JSON request per line, one JSON response per line. Reads are open to
//! any local user; writes (the snapshot push) are accepted from root only.
//!
//! # Limits
//! - Connections: at most `MAX_CONNECTIONS` at once
//! - Messages: `MAX_MESSAGE_SIZE` bytes, enforced before buffering
//! - Timeouts: idle reads and stalled writes drop the connection

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use gm_protocol::{ErrorClass, RequestEnvelope, Response, ResponseEnvelope};
use gpu_mmio_hwmon::HwmonService;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 32;

const MAX_MESSAGE_SIZE: usize = gm_protocol::MAX_MESSAGE_SIZE;

/// Idle time allowed between requests on one connection
const READ_TIMEOUT: Duration = Duration::from_secs(30);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// World read/write; privilege is checked per request from peer credentials
const SOCKET_MODE: u32 = 0o666;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

pub async fn run_server(socket_path: &Path, service: Arc<HwmonService>, shutdown: Arc<Notify>) -> anyhow::Result<()> {
    // Remove a stale socket, but never follow a symlink
    if let Ok(meta) = socket_path.symlink_metadata() {
        if meta.file_type().is_symlink() {
            bail!("socket path {} is a symlink, refusing", socket_path.display());
        }
        std::fs::remove_file(socket_path)
            .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {} (mode {:o})", socket_path.display(), SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            handle_client(stream, service).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                }
            }
            _ = shutdown.notified() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped");
    Ok(())
}

/// Client credentials from the socket peer
#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();

    // SAFETY: ucred is plain data; all-zero is a valid value.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a live socket owned by `stream`, and cred/len describe a
    // writable buffer of the size SO_PEERCRED fills.
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials {
        uid: cred.uid,
        gid: cred.gid,
        pid: cred.pid,
    })
}

async fn handle_client(stream: UnixStream, service: Arc<HwmonService>) {
    let Some(cred) = get_peer_credentials(&stream) else {
        error!("Failed to get peer credentials, rejecting connection");
        return;
    };
    debug!("Connection from uid={}, gid={}, pid={}", cred.uid, cred.gid, cred.pid);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(1024);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        match timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: uid={}, pid={}, requests={}, duration={:?}",
                    cred.uid,
                    cred.pid,
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{} from uid={}: {} bytes", request_count, cred.uid, n);

                let response = match std::str::from_utf8(&line) {
                    Ok(text) => process_line(text, cred.uid, &service),
                    Err(_) => ResponseEnvelope::new(0, Response::error(ErrorClass::InvalidArgument, "invalid encoding")),
                };
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Message too large (>{} bytes) from uid={}, pid={}", MAX_MESSAGE_SIZE, cred.uid, cred.pid);
                let resp = ResponseEnvelope::new(0, Response::error(ErrorClass::InvalidArgument, "message too large"));
                let _ = send_response(&mut writer, &resp).await;
                break;
            }
            Ok(Err(e)) => {
                error!("Read error from uid={}, pid={}: {}", cred.uid, cred.pid, e);
                break;
            }
            Err(_) => {
                debug!("Read timeout for uid={}, pid={}", cred.uid, cred.pid);
                break;
            }
        }
    }
}

/// Parse one request line and answer it
pub fn process_line(line: &str, uid: u32, service: &HwmonService) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON from uid={}: {}", uid, e);
            return ResponseEnvelope::new(0, Response::error(ErrorClass::InvalidArgument, "invalid request format"));
        }
    };

    let request = &envelope.request;
    if request.is_write() {
        info!("{} from uid={}", request.type_name(), uid);
    } else {
        trace!("{} from uid={}", request.type_name(), uid);
    }

    ResponseEnvelope::new(envelope.id, service.handle(request, uid))
}

pub async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(out.len());
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "message too large"));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

async fn send_response(writer: &mut OwnedWriteHalf, response: &ResponseEnvelope) -> Result<(), ()> {
    let json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","kind":"other","message":"serialization error"}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, std::io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gm_protocol::Request;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_line_bounded() {
        let mut reader = BufReader::new(&b"{\"a\":1}\nsecond\n"[..]);
        let mut out = Vec::new();
        assert_eq!(read_line_bounded(&mut reader, &mut out, 64).await.unwrap(), 8);
        assert_eq!(out, b"{\"a\":1}\n");
        assert_eq!(read_line_bounded(&mut reader, &mut out, 64).await.unwrap(), 7);
        assert_eq!(read_line_bounded(&mut reader, &mut out, 64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_line_bounded_rejects_oversize() {
        let big = vec![b'x'; 100];
        let mut reader = BufReader::new(&big[..]);
        let mut out = Vec::new();
        let err = read_line_bounded(&mut reader, &mut out, 32).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(out.len() <= 32);
    }

    #[test]
    fn test_process_line() {
        let service = HwmonService::new();

        let resp = process_line(r#"{"id":5,"cmd":"Ping"}"#, 1000, &service);
        assert_eq!(resp.id, 5);
        assert!(matches!(resp.response, Response::Ok(ref d) if d.value.as_deref() == Some("pong")));

        let bad = process_line("not json", 1000, &service);
        assert_eq!(bad.id, 0);
        assert!(matches!(bad.response, Response::Error { kind: ErrorClass::InvalidArgument, .. }));

        // No device bound in this service
        let missing = process_line(
            r#"{"id":6,"cmd":"ReadAttribute","data":{"chip":"nvidia_mmio","attr":"temp2_input"}}"#,
            0,
            &service,
        );
        assert!(matches!(missing.response, Response::Error { kind: ErrorClass::NotFound, .. }));
    }

    #[tokio::test]
    async fn test_server_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let service = Arc::new(HwmonService::new());
        let shutdown = Arc::new(Notify::new());

        let server = tokio::spawn({
            let path = path.clone();
            let shutdown = Arc::clone(&shutdown);
            async move { run_server(&path, service, shutdown).await }
        });

        let stream = loop {
            match UnixStream::connect(&path).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        let (r, mut w) = stream.into_split();
        let env = RequestEnvelope::with_id(Request::ListChips, 9);
        let mut json = serde_json::to_vec(&env).unwrap();
        json.push(b'\n');
        w.write_all(&json).await.unwrap();

        let mut reader = BufReader::new(r);
        let mut line = Vec::new();
        read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE).await.unwrap();
        let resp: ResponseEnvelope = serde_json::from_slice(&line).unwrap();
        assert_eq!(resp.id, 9);
        assert!(matches!(resp.response, Response::Ok(ref d) if d.chips.as_ref().map(Vec::is_empty) == Some(true)));

        shutdown.notify_one();
        server.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
