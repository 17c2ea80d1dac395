pub mod capture;
pub mod quic;
pub mod tls;

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::fingerprint::serverhello::ParseError;
use crate::fingerprint::types::FingerprintResult;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection failed: {0}")]
    ConnectFailure(#[source] std::io::Error),
    #[error("invalid target name: {0}")]
    InvalidTarget(String),
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),
    #[error("no ServerHello in {captured} captured bytes (handshake error: {handshake_error})")]
    InsufficientCapture {
        captured: usize,
        handshake_error: String,
    },
    #[error("malformed ServerHello: {0}")]
    MalformedServerHello(#[from] ParseError),
    #[error("QUIC is not supported on this host: {0}")]
    QuicUnsupported(String),
    #[error("QUIC protocol error: {code} - {reason}")]
    QuicProtocolError { code: String, reason: String },
}

impl From<ProbeError> for FingerprintResult {
    fn from(err: ProbeError) -> Self {
        FingerprintResult::failed(err.to_string())
    }
}

/// Deadlines for the probes. Each attempt applies them independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// TCP connect deadline when the host name still has to be resolved
    pub hostname_connect_timeout: Duration,
    /// TCP connect deadline when a specific address is given
    pub ip_connect_timeout: Duration,
    /// TLS handshake deadline; expiry is treated like a handshake error
    pub handshake_timeout: Duration,
    /// QUIC connection (handshake included) deadline
    pub quic_connect_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            hostname_connect_timeout: Duration::from_secs(5),
            ip_connect_timeout: Duration::from_secs(2),
            handshake_timeout: Duration::from_secs(5),
            quic_connect_timeout: Duration::from_secs(2),
        }
    }
}

/// Host (name or literal address) and port to fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Runs fingerprinting attempts against one target.
///
/// Holds no mutable state: every call opens its own connection and owns its
/// own capture buffers, so calls can run concurrently.
#[derive(Debug, Clone)]
pub struct Ja4Prober {
    target: Target,
    config: ProbeConfig,
}

impl Ja4Prober {
    pub fn new(target: Target, config: ProbeConfig) -> Self {
        Self { target, config }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Resolve the target to all of its addresses, in resolver order.
    pub async fn resolve(&self) -> Result<Vec<IpAddr>, ProbeError> {
        let addrs = tokio::net::lookup_host((self.target.host.as_str(), self.target.port))
            .await
            .map_err(ProbeError::ConnectFailure)?;
        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        debug!("{} resolved to {:?}", self.target.host, ips);
        Ok(ips)
    }
}

/// Split a comma-separated ALPN list ("h2, http/1.1") into wire identifiers.
/// Blank entries are dropped.
pub fn parse_alpn_list(list: &str) -> Vec<Vec<u8>> {
    list.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| p.as_bytes().to_vec())
        .collect()
}
