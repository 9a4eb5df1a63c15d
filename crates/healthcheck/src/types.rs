//! Probe protocols, request payloads and reply classification.

use serde::{Deserialize, Serialize};

/// Application-layer handshake spoken by a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckProtocol {
    /// Bare TCP probe; a completed connect is the whole answer.
    Tcp,
    /// Send a pre-rendered HTTP request, accept 2xx/3xx status lines.
    Http,
    /// Send an SSLv3 CLIENT HELLO, accept any alert or handshake record.
    Ssl3,
    /// Expect a 2xx banner after sending the hello line.
    Smtp,
}

/// Default HTTP probe request line.
pub const DEF_HTTP_CHECK_REQ: &str = "OPTIONS / HTTP/1.0\r\n\r\n";

/// Default SMTP probe request.
pub const DEF_SMTP_CHECK_REQ: &str = "HELO localhost\r\n";

/// Offset of the 4-byte big-endian GMT timestamp inside the SSLv3 hello.
pub const SSL3_TIMESTAMP_OFFSET: usize = 11;

/// SSLv3 CLIENT HELLO probe packet.
///
/// Bytes 11..15 carry the Unix time and are patched before each send. The
/// cipher list covers the 39 common RSA/DH suites so any SSLv3-capable peer
/// answers with either a handshake record or an alert.
pub const SSL3_CLIENT_HELLO: [u8; 126] = [
    0x16, // record type: handshake
    0x03, 0x00, // record version: SSLv3
    0x00, 0x79, // record length
    0x01, // handshake type: client hello
    0x00, 0x00, 0x75, // handshake length
    0x03, 0x00, // hello version
    0x00, 0x00, 0x00, 0x00, // gmt unix time, patched per probe
    // 28 bytes of client random
    b'C', b'H', b'E', b'C', b'K', b'D', b'S', b'S', b'L', b'P', b'R', b'O', b'B', b'E',
    b'C', b'H', b'E', b'C', b'K', b'D', b'S', b'S', b'L', b'P', b'R', b'O', b'B', b'E',
    0x00, // session id length: none
    0x00, 0x4e, // cipher suite bytes
    0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04, 0x00, 0x05, 0x00, 0x06, 0x00, 0x07,
    0x00, 0x08, 0x00, 0x09, 0x00, 0x0a, 0x00, 0x0b, 0x00, 0x0c, 0x00, 0x0d, 0x00, 0x0e,
    0x00, 0x0f, 0x00, 0x10, 0x00, 0x11, 0x00, 0x12, 0x00, 0x13, 0x00, 0x14, 0x00, 0x15,
    0x00, 0x16, 0x00, 0x17, 0x00, 0x18, 0x00, 0x19, 0x00, 0x1a, 0x00, 0x1b, 0x00, 0x2f,
    0x00, 0x30, 0x00, 0x31, 0x00, 0x32, 0x00, 0x33, 0x00, 0x34, 0x00, 0x35, 0x00, 0x36,
    0x00, 0x37, 0x00, 0x38, 0x00, 0x39, 0x00, 0x3a,
    0x01, // compression methods length
    0x00, // null compression
];

/// Probe specification shared by every server of one backend: the protocol
/// and the pre-rendered request bytes (empty for bare TCP probes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub protocol: CheckProtocol,
    pub request: Vec<u8>,
}

impl CheckSpec {
    /// Bare TCP connect probe.
    pub fn tcp() -> Self {
        Self {
            protocol: CheckProtocol::Tcp,
            request: Vec::new(),
        }
    }

    /// HTTP probe with an OPTIONS request for `uri` at `version`
    /// (e.g. "HTTP/1.0").
    pub fn http(uri: &str, version: &str) -> Self {
        Self {
            protocol: CheckProtocol::Http,
            request: format!("OPTIONS {uri} {version}\r\n\r\n").into_bytes(),
        }
    }

    /// SSLv3 CLIENT HELLO probe.
    pub fn ssl3() -> Self {
        Self {
            protocol: CheckProtocol::Ssl3,
            request: SSL3_CLIENT_HELLO.to_vec(),
        }
    }

    /// SMTP probe sending `hello` (e.g. "HELO localhost").
    pub fn smtp(hello: &str) -> Self {
        Self {
            protocol: CheckProtocol::Smtp,
            request: format!("{hello}\r\n").into_bytes(),
        }
    }
}

/// Terminal outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The probe completed and the server passed.
    Success,
    /// The probe completed and the server failed.
    Failed(ProbeFailure),
    /// No probe could be started this tick (socket creation or cap).
    /// Liveness is untouched; the scheduler retries next interval.
    Skipped,
}

impl ProbeOutcome {
    pub fn is_success(self) -> bool {
        matches!(self, ProbeOutcome::Success)
    }

    /// Stable label for metrics and logs.
    pub fn label(self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::Failed(ProbeFailure::Timeout) => "timeout",
            ProbeOutcome::Failed(_) => "failure",
            ProbeOutcome::Skipped => "skipped",
        }
    }
}

/// Why a probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Source binding or transparent setup was refused.
    Bind,
    /// TCP connect was refused or errored.
    Connect,
    /// The request could not be written in full.
    Send,
    /// The reply did not match the protocol acceptance rules.
    Reply,
    /// The probe deadline passed before completion.
    Timeout,
}

/// Shortest HTTP reply that can be classified ("HTTP/1.0 000").
const MIN_HTTP_REPLY: usize = 12;

/// Classify a reply prefix against the protocol acceptance rules.
///
/// Rules are byte-exact: HTTP wants an "HTTP/1." prefix with a '2' or '3'
/// status class at offset 9, SSLv3 wants at least 5 bytes starting with an
/// alert (0x15) or handshake (0x16) record, SMTP wants at least 3 bytes
/// starting with '2'. Anything else, including an empty reply, fails.
///
/// Bare TCP probes classify on connect completion and never reach the
/// reply phase.
pub fn classify_reply(protocol: CheckProtocol, reply: &[u8]) -> bool {
    match protocol {
        CheckProtocol::Tcp => true,
        CheckProtocol::Http => {
            reply.len() >= MIN_HTTP_REPLY
                && reply.starts_with(b"HTTP/1.")
                && (reply[9] == b'2' || reply[9] == b'3')
        }
        CheckProtocol::Ssl3 => reply.len() >= 5 && (reply[0] == 0x15 || reply[0] == 0x16),
        CheckProtocol::Smtp => reply.len() >= 3 && reply[0] == b'2',
    }
}
