//! Probe driver: socket setup, connect, request send and reply read.
//!
//! One call to [`run_probe`] is one complete probe over a fresh AF_INET
//! connection. Failures never propagate as errors; they are folded into the
//! returned [`ProbeOutcome`] for the scheduler to consume.

use crate::types::{
    classify_reply, CheckProtocol, CheckSpec, ProbeFailure, ProbeOutcome, SSL3_TIMESTAMP_OFFSET,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpSocket;
use tokio::time::Instant;
use tracing::debug;

/// Reply bytes examined per probe; anything beyond this is ignored.
const REPLY_BUF: usize = 64;

/// Outbound binding applied to the probe socket before connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    pub addr: SocketAddrV4,
    /// Spoofed source for transparent-proxy mode; bound instead of `addr`
    /// with IP_TRANSPARENT set.
    pub transparent: Option<SocketAddrV4>,
}

/// Where a probe connects and how it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub dest: SocketAddrV4,
    pub source: Option<SourceBinding>,
}

enum SetupFailure {
    Create(std::io::Error),
    Bind(std::io::Error),
}

/// One complete probe against `target`, bounded by `deadline`.
///
/// The deadline covers connect, send and reply together; crossing it yields
/// a timeout failure. The socket is owned by this future and closed on every
/// exit path.
pub async fn run_probe(target: &ProbeTarget, spec: &CheckSpec, deadline: Instant) -> ProbeOutcome {
    match tokio::time::timeout_at(deadline, probe_inner(target, spec)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::Failed(ProbeFailure::Timeout),
    }
}

async fn probe_inner(target: &ProbeTarget, spec: &CheckSpec) -> ProbeOutcome {
    let sock = match open_socket(target) {
        Ok(sock) => sock,
        Err(SetupFailure::Create(err)) => {
            debug!(error = %err, dest = %target.dest, "probe socket creation failed, skipping this tick");
            return ProbeOutcome::Skipped;
        }
        Err(SetupFailure::Bind(err)) => {
            debug!(error = %err, dest = %target.dest, "probe source binding failed");
            return ProbeOutcome::Failed(ProbeFailure::Bind);
        }
    };

    let mut stream = match sock.connect(SocketAddr::V4(target.dest)).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(error = %err, dest = %target.dest, "probe connect failed");
            return ProbeOutcome::Failed(ProbeFailure::Connect);
        }
    };

    if spec.protocol == CheckProtocol::Tcp {
        // a completed handshake is the whole answer for bare TCP probes
        return ProbeOutcome::Success;
    }

    let request = render_request(spec);
    if let Err(err) = stream.write_all(&request).await {
        debug!(error = %err, dest = %target.dest, "probe request send failed");
        return ProbeOutcome::Failed(ProbeFailure::Send);
    }

    let mut reply = [0u8; REPLY_BUF];
    match stream.read(&mut reply).await {
        Ok(n) if classify_reply(spec.protocol, &reply[..n]) => ProbeOutcome::Success,
        Ok(_) => ProbeOutcome::Failed(ProbeFailure::Reply),
        Err(err) => {
            debug!(error = %err, dest = %target.dest, "probe reply read failed");
            ProbeOutcome::Failed(ProbeFailure::Reply)
        }
    }
}

/// Create the non-blocking AF_INET probe socket with TCP_NODELAY and apply
/// the outbound binding, server- or backend-level.
fn open_socket(target: &ProbeTarget) -> Result<TcpSocket, SetupFailure> {
    let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(SetupFailure::Create)?;
    sock.set_nonblocking(true).map_err(SetupFailure::Create)?;
    sock.set_nodelay(true).map_err(SetupFailure::Create)?;

    if let Some(src) = &target.source {
        bind_source(&sock, src).map_err(SetupFailure::Bind)?;
    }

    Ok(TcpSocket::from_std_stream(std::net::TcpStream::from(sock)))
}

fn bind_source(sock: &Socket, src: &SourceBinding) -> std::io::Result<()> {
    sock.set_reuse_address(true)?;
    match src.transparent {
        Some(spoof) => {
            // non-local bind: the probe carries the spoofed client source
            set_transparent(sock)?;
            sock.bind(&SocketAddr::V4(spoof).into())
        }
        None => sock.bind(&SocketAddr::V4(src.addr).into()),
    }
}

#[cfg(target_os = "linux")]
fn set_transparent(sock: &Socket) -> std::io::Result<()> {
    sock.set_ip_transparent(true)
}

#[cfg(not(target_os = "linux"))]
fn set_transparent(_sock: &Socket) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "transparent probing requires IP_TRANSPARENT",
    ))
}

/// Copy the request bytes, patching the SSLv3 GMT timestamp when the payload
/// is long enough to carry one. Other protocols are sent verbatim.
pub(crate) fn render_request(spec: &CheckSpec) -> Vec<u8> {
    let mut request = spec.request.clone();
    if spec.protocol == CheckProtocol::Ssl3 && request.len() >= SSL3_TIMESTAMP_OFFSET + 4 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;
        request[SSL3_TIMESTAMP_OFFSET..SSL3_TIMESTAMP_OFFSET + 4]
            .copy_from_slice(&now.to_be_bytes());
    }
    request
}
