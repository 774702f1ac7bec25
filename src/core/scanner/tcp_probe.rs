// src/core/scanner/tcp_probe.rs

use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr};

use hickory_resolver::TokioAsyncResolver;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::core::models::TcpConnect;
use crate::core::target::Target;

/// Result of the TCP leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub outcome: TcpConnect,
    /// Set for anything but `open`.
    pub error: Option<String>,
    /// The address that accepted the connection.
    pub peer: Option<SocketAddr>,
}

impl Connection {
    fn failed(outcome: TcpConnect, error: Option<String>) -> Self {
        Self { outcome, error, peer: None }
    }
}

/// Attempts one TCP connection to `target:port`, giving up at `deadline`.
///
/// Hostnames are resolved first; a failed lookup is reported as `error`.
pub async fn connect(resolver: &TokioAsyncResolver, target: &Target, port: u16, deadline: Instant) -> Connection {
    let addrs = match resolve(resolver, target, port, deadline).await {
        Ok(addrs) => addrs,
        Err(failure) => return failure,
    };

    debug!(target = %target, port, candidates = addrs.len(), "Connecting TCP stream.");
    match timeout_at(deadline, TcpStream::connect(&addrs[..])).await {
        Ok(Ok(stream)) => {
            let peer = stream.peer_addr().ok();
            debug!(target = %target, port, peer = ?peer, "Port open.");
            Connection { outcome: TcpConnect::Open, error: None, peer }
        }
        Ok(Err(e)) => {
            let outcome = classify(e.kind());
            debug!(target = %target, port, outcome = %outcome, error = %e, "TCP connect failed.");
            Connection::failed(outcome, Some(format!("TCP connect failed: {}", e)))
        }
        Err(_elapsed) => Connection::failed(TcpConnect::Timeout, None),
    }
}

async fn resolve(
    resolver: &TokioAsyncResolver,
    target: &Target,
    port: u16,
    deadline: Instant,
) -> Result<Vec<SocketAddr>, Connection> {
    let name = match target {
        Target::Ip(ip) => return Ok(vec![SocketAddr::new(*ip, port)]),
        Target::Host(name) => name,
    };

    match timeout_at(deadline, resolver.lookup_ip(name.as_str())).await {
        Ok(Ok(lookup)) => {
            let addrs: Vec<SocketAddr> = lookup.iter().map(|ip: IpAddr| SocketAddr::new(ip, port)).collect();
            if addrs.is_empty() {
                Err(Connection::failed(TcpConnect::Error, Some(format!("DNS lookup for {} returned no addresses", name))))
            } else {
                Ok(addrs)
            }
        }
        Ok(Err(e)) => {
            debug!(host = %name, error = %e, "DNS lookup failed.");
            Err(Connection::failed(TcpConnect::Error, Some(format!("DNS Error: {}", e))))
        }
        Err(_elapsed) => Err(Connection::failed(TcpConnect::Timeout, Some(format!("DNS lookup for {} timed out", name)))),
    }
}

fn classify(kind: ErrorKind) -> TcpConnect {
    match kind {
        ErrorKind::ConnectionRefused => TcpConnect::Closed,
        ErrorKind::TimedOut => TcpConnect::Timeout,
        _ => TcpConnect::Error,
    }
}
