//! TCP transport: length-prefixed JSON frames.
//!
//! Each frame is a big-endian `u32` length followed by that many bytes of
//! JSON. A connection carries one request and its reply per round trip.

use crate::error::{MeshError, MeshResult};
use crate::message::{Reply, Request};
use crate::messenger::{Messenger, Transport};
use async_trait::async_trait;
use mapmesh_core::PeerAddress;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Pause after a failed `accept`, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

fn io_err(e: std::io::Error) -> MeshError {
    MeshError::Transport(e.to_string())
}

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> MeshResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(value)?;
    if bytes.len() > MAX_FRAME_LEN {
        return Err(MeshError::Codec(format!("frame of {} bytes too large", bytes.len())));
    }
    writer.write_u32(bytes.len() as u32).await.map_err(io_err)?;
    writer.write_all(&bytes).await.map_err(io_err)?;
    writer.flush().await.map_err(io_err)?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> MeshResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    if len > MAX_FRAME_LEN {
        return Err(MeshError::Codec(format!("frame of {len} bytes too large")));
    }
    // Grows with the bytes that actually arrive.
    let mut buf = Vec::new();
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(io_err)?;
    if buf.len() != len {
        return Err(MeshError::Transport(format!(
            "connection closed after {} of {len} frame bytes",
            buf.len()
        )));
    }
    Ok(Some(serde_json::from_slice(&buf)?))
}

/// Client side: resolves peer addresses through a static table.
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    peers: BTreeMap<PeerAddress, SocketAddr>,
}

impl TcpTransport {
    pub fn new(peers: BTreeMap<PeerAddress, SocketAddr>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn round_trip(&self, to: PeerAddress, request: Request) -> MeshResult<Reply> {
        let addr = self
            .peers
            .get(&to)
            .ok_or_else(|| MeshError::Transport(format!("no address known for {to}")))?;
        let mut stream = TcpStream::connect(*addr).await.map_err(io_err)?;
        write_frame(&mut stream, &request).await?;
        read_frame(&mut stream)
            .await?
            .ok_or_else(|| MeshError::Transport(format!("{to} closed connection before replying")))
    }
}

/// Accept connections and dispatch their requests, one task per connection.
///
/// Every inbound read is bounded by the messenger's timeout. A failed
/// `accept` is logged and the loop keeps serving.
pub async fn serve_tcp(listener: TcpListener, messenger: Arc<Messenger>) -> MeshResult<()> {
    tracing::info!(
        local = %messenger.local(),
        addr = ?listener.local_addr().ok(),
        "listening"
    );
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let messenger = messenger.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, messenger).await {
                tracing::warn!(%remote, error = %e, "connection failed");
            }
        });
    }
}

async fn serve_connection(mut stream: TcpStream, messenger: Arc<Messenger>) -> MeshResult<()> {
    let deadline = messenger.timeout();
    loop {
        let request = match timeout(deadline, read_frame::<_, Request>(&mut stream)).await {
            Ok(read) => read?,
            Err(_) => {
                return Err(MeshError::Transport(format!(
                    "no complete request within {deadline:?}"
                )))
            }
        };
        let Some(request) = request else {
            return Ok(());
        };
        let reply = messenger.dispatch(request).await;
        write_frame(&mut stream, &reply).await?;
    }
}
