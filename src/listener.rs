//! Inbound side: the listening socket and its accept loop.
//!
//! The companion server connects back to us. Every inbound connection gets
//! the greeting and is expected to echo it; anything else ends the loop.

use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Largest reply read from an inbound connection.
pub const RECV_SIZE: usize = 1024;

/// Why the accept loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A peer answered with something other than the greeting.
    Signal,
    /// Accept, send or receive failed.
    Error(String),
}

/// What a single inbound connection sent back.
#[derive(Debug, PartialEq, Eq)]
enum Verdict {
    Echo,
    Stop(Bytes),
}

/// Bind a listener with SO_REUSEADDR and the given backlog.
pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    TcpListener::from_std(socket.into())
}

/// Accept connections until a peer sends a stop signal or I/O fails.
///
/// Every echoed greeting bumps `echoes` as it happens, so the count stays
/// readable even if the task is aborted before it returns.
pub async fn accept_loop(
    listener: TcpListener,
    greeting: Bytes,
    echoes: Arc<AtomicUsize>,
) -> StopReason {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed, stop listening");
                return StopReason::Error(e.to_string());
            }
        };
        info!(peer = %peer, "Accepted one connection");

        match serve_one(stream, &greeting).await {
            Ok(Verdict::Echo) => {
                echoes.fetch_add(1, Ordering::Relaxed);
                info!(
                    peer = %peer,
                    reply = %crate::message::display(&greeting),
                    "Greeting echoed back"
                );
            }
            Ok(Verdict::Stop(reply)) => {
                info!(
                    peer = %peer,
                    reply = %crate::message::display(&reply),
                    "Stop signal from server, stop listening"
                );
                return StopReason::Signal;
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "I/O failure on accepted connection");
                return StopReason::Error(e.to_string());
            }
        }
    }
}

/// Greet one inbound connection, take a single read of its reply and close.
async fn serve_one<S>(mut stream: S, greeting: &[u8]) -> io::Result<Verdict>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(greeting).await?;

    let mut buf = [0u8; RECV_SIZE];
    let n = stream.read(&mut buf).await?;
    debug!(bytes = n, "Reply from accepted connection");

    // The verdict stands even if the peer already hung up.
    let _ = stream.shutdown().await;

    if &buf[..n] == greeting {
        Ok(Verdict::Echo)
    } else {
        Ok(Verdict::Stop(Bytes::copy_from_slice(&buf[..n])))
    }
}
