//! Outbound side: connections to the target server.
//!
//! Failures here never abort the run. A connect that fails is logged and
//! skipped; a write or read that fails is logged and recorded.

use crate::message::{self, Identity};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Largest reply read from an outbound connection.
pub const REPLY_SIZE: usize = 1024;

/// Connections that were established, in connect order.
#[derive(Debug)]
pub struct Connections {
    pub streams: Vec<TcpStream>,
    /// Connect attempts that failed.
    pub failed: usize,
}

/// Result of reading one reply from an outbound connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Data(Bytes),
    /// The server closed the connection without replying.
    Closed,
    TimedOut,
    Failed(String),
}

/// Open `count` connections to `target`, one after another.
pub async fn open_connections(target: SocketAddr, count: usize) -> Connections {
    let mut streams = Vec::with_capacity(count);
    let mut failed = 0;

    for index in 0..count {
        match TcpStream::connect(target).await {
            Ok(stream) => {
                debug!(index, local = ?stream.local_addr().ok(), "Connected");
                streams.push(stream);
            }
            Err(e) => {
                warn!(index, addr = %target, error = %e, "Connect failed");
                failed += 1;
            }
        }
    }

    info!(connected = streams.len(), failed, addr = %target, "Outbound connections opened");
    Connections { streams, failed }
}

/// Write the payload for `round` to every stream. Returns how many writes
/// succeeded.
pub async fn send_round(streams: &mut [TcpStream], identity: &Identity, round: u32) -> usize {
    info!(round, "Sending data round");
    let mut sent = 0;

    for (index, stream) in streams.iter_mut().enumerate() {
        let payload = identity.round_payload(round, index);
        match stream.write_all(&payload).await {
            Ok(()) => sent += 1,
            Err(e) => warn!(round, index, error = %e, "Send failed"),
        }
    }

    sent
}

/// Take one read of up to [`REPLY_SIZE`] bytes from every stream.
pub async fn read_replies(streams: &mut [TcpStream], timeout: Duration) -> Vec<Reply> {
    let mut replies = Vec::with_capacity(streams.len());

    for (index, stream) in streams.iter_mut().enumerate() {
        let reply = read_reply(stream, timeout).await;
        match &reply {
            Reply::Data(buf) => info!(index, reply = %message::display(buf), "Received reply"),
            Reply::Closed => warn!(index, "Connection closed before reply"),
            Reply::TimedOut => warn!(index, ?timeout, "Timed out waiting for reply"),
            Reply::Failed(e) => warn!(index, error = %e, "Receive failed"),
        }
        replies.push(reply);
    }

    replies
}

async fn read_reply(stream: &mut TcpStream, timeout: Duration) -> Reply {
    let mut buf = BytesMut::zeroed(REPLY_SIZE);
    match tokio::time::timeout(timeout, stream.read(&mut buf)).await {
        Err(_) => Reply::TimedOut,
        Ok(Err(e)) => Reply::Failed(e.to_string()),
        Ok(Ok(0)) => Reply::Closed,
        Ok(Ok(n)) => {
            buf.truncate(n);
            Reply::Data(buf.freeze())
        }
    }
}

/// Send the stop sentinel on the first stream. Returns whether it went out.
pub async fn send_stop(streams: &mut [TcpStream], identity: &Identity) -> bool {
    let Some(first) = streams.first_mut() else {
        warn!("No outbound connection to carry the stop message");
        return false;
    };

    match first.write_all(&identity.stop_payload()).await {
        Ok(()) => {
            info!("Stop message sent");
            true
        }
        Err(e) => {
            warn!(error = %e, "Failed to send stop message");
            false
        }
    }
}
