//! Test payloads exchanged with the companion server.
//!
//! There is no framing: every payload is a plain text string terminated by a
//! single NUL byte, with the test id embedded so the server can attribute it.
//!
//! ```text
//! greeting: <tag> server got you! welcome!(testId:<id>)\0
//! round:    <tag> test client:<host>:<port>:<round>:data from socket client:<index>, testID(<id>)\0
//! stop:     <tag> test client:<host>:<port>:no connect:testID(<id>)\0
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// Identity of this client as it appears in outgoing payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Short prefix naming the client implementation.
    pub tag: String,
    /// Host the server is told to reach us on.
    pub advertise_host: String,
    /// Port our listener is bound to.
    pub listen_port: u16,
    pub test_id: u32,
}

impl Identity {
    /// Greeting the accept loop sends to every inbound connection.
    pub fn greeting(&self) -> Bytes {
        terminated(format!(
            "{} server got you! welcome!(testId:{})",
            self.tag, self.test_id
        ))
    }

    /// Payload written to outbound socket `index` during `round` (1-based).
    pub fn round_payload(&self, round: u32, index: usize) -> Bytes {
        terminated(format!(
            "{}:{}:data from socket client:{}, testID({})",
            self.client_prefix(),
            round,
            index,
            self.test_id
        ))
    }

    /// Sentinel asking the server to connect back with a non-greeting reply.
    pub fn stop_payload(&self) -> Bytes {
        terminated(format!(
            "{}:no connect:testID({})",
            self.client_prefix(),
            self.test_id
        ))
    }

    fn client_prefix(&self) -> String {
        format!(
            "{} test client:{}:{}",
            self.tag, self.advertise_host, self.listen_port
        )
    }
}

fn terminated(text: String) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    buf.put_u8(0);
    buf.freeze()
}

/// Render received bytes for logging: trailing NULs dropped, invalid UTF-8
/// replaced.
pub fn display(buf: &[u8]) -> String {
    let end = buf.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
