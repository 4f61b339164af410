//! Unix socket front end: one JSON request per line, one JSON response
//! per line. Requests run on the blocking pool because every adapter
//! operation shells out and waits.

use crate::dispatch::SecuredDispatcher;
use anyhow::{Context, Result};
use scm_common::errors::{ErrorCode, IntegrationError};
use scm_common::protocol::{Envelope, Response};
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Socket file mode: the application server connects as the same user.
const SOCKET_MODE: u32 = 0o600;

pub struct Server {
    dispatcher: Arc<SecuredDispatcher>,
    socket_path: PathBuf,
}

impl Server {
    pub fn new(dispatcher: Arc<SecuredDispatcher>, socket_path: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher,
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one.
    pub fn bind(&self) -> Result<UnixListener> {
        let path = &self.socket_path;
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Failed to remove stale socket {}", path.display()))?;
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let listener = UnixListener::bind(path)
            .with_context(|| format!("Failed to bind {}", path.display()))?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .with_context(|| format!("Failed to restrict {}", path.display()))?;
        info!(socket = %path.display(), "Listening");
        Ok(listener)
    }

    /// Accept connections until `shutdown` resolves, then remove the socket.
    pub async fn serve(
        self,
        listener: UnixListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let dispatcher = self.dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                warn!(error = %e, "Connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept error"),
                },
                () = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(socket = %self.socket_path.display(), error = %e, "Socket already gone");
        }
        Ok(())
    }
}

/// Decode one request line; a malformed line becomes an error response.
pub fn parse_line(line: &str) -> std::result::Result<Envelope, Response> {
    serde_json::from_str(line).map_err(|e| {
        let err = IntegrationError::internal(format!("Malformed request: {}", e))
            .with_code(ErrorCode::InternalDaemonProtocol);
        Response::from(Err(err))
    })
}

pub async fn handle_connection(stream: UnixStream, dispatcher: Arc<SecuredDispatcher>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        let response = match parse_line(&line) {
            Ok(envelope) => {
                let dispatcher = dispatcher.clone();
                tokio::task::spawn_blocking(move || dispatcher.handle(envelope))
                    .await
                    .context("Request handler panicked")?
            }
            Err(response) => response,
        };
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
