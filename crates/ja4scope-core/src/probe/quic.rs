use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use quinn::crypto::rustls::{HandshakeData, QuicClientConfig};
use quinn::{ConnectError, ConnectionError, Endpoint, TransportConfig, VarInt};
use rustls::crypto::CryptoProvider;
use rustls::{CipherSuite, ClientConfig, KeyLog};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::fingerprint::ja4s::compute_ja4_quic;
use crate::fingerprint::types::{FingerprintResult, Ja4sResult};
use crate::probe::tls::AcceptAnyCert;
use crate::probe::{Ja4Prober, ProbeError};

/// HTTP/3 plus the draft-29 identifier some servers still answer to.
///
/// The QUIC client offers only TLS_AES_256_GCM_SHA384 and
/// TLS_AES_128_GCM_SHA256 (see [`quic_provider`]), so a server never gets
/// to select TLS_CHACHA20_POLY1305_SHA256 here.
pub const QUIC_ALPN: [&[u8]; 2] = [b"h3", b"h3-29"];

/// quinn reports the negotiated ALPN but not the cipher suite. The width of
/// the handshake traffic secret gives away the suite's hash, and
/// [`quic_provider`] offers only one suite per hash width, so the width
/// identifies the suite.
#[derive(Debug, Default)]
struct SecretWidth(AtomicUsize);

impl KeyLog for SecretWidth {
    fn log(&self, label: &str, _client_random: &[u8], secret: &[u8]) {
        if label == "CLIENT_HANDSHAKE_TRAFFIC_SECRET" {
            self.0.store(secret.len(), Ordering::Relaxed);
        }
    }
}

/// TLS 1.3 suites of the ring provider, keeping the first suite of each
/// hash width (AES-256-GCM/SHA384 and AES-128-GCM/SHA256).
fn quic_provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    let mut widths = Vec::new();
    provider.cipher_suites.retain(|suite| match suite.tls13() {
        Some(s) => {
            let width = s.common.hash_provider.output_len();
            if widths.contains(&width) {
                false
            } else {
                widths.push(width);
                true
            }
        }
        None => false,
    });
    provider
}

fn suite_for_width(provider: &CryptoProvider, width: usize) -> Option<CipherSuite> {
    provider
        .cipher_suites
        .iter()
        .filter_map(|s| s.tls13())
        .find(|s| s.common.hash_provider.output_len() == width)
        .map(|s| s.common.suite)
}

/// 4-hex cipher code for the QUIC fingerprint; "0000" when unknown.
pub fn quic_cipher_code(suite: Option<CipherSuite>) -> String {
    match suite {
        Some(CipherSuite::TLS13_AES_128_GCM_SHA256) => "1301".to_string(),
        Some(CipherSuite::TLS13_AES_256_GCM_SHA384) => "1302".to_string(),
        Some(CipherSuite::TLS13_CHACHA20_POLY1305_SHA256) => "1303".to_string(),
        Some(other) => format!("{:04x}", u16::from(other)),
        None => "0000".to_string(),
    }
}

fn connection_error(err: ConnectionError) -> ProbeError {
    match err {
        ConnectionError::TransportError(e) => ProbeError::QuicProtocolError {
            code: e.code.to_string(),
            reason: e.reason,
        },
        ConnectionError::ConnectionClosed(close) => ProbeError::QuicProtocolError {
            code: close.error_code.to_string(),
            reason: String::from_utf8_lossy(&close.reason).into_owned(),
        },
        ConnectionError::ApplicationClosed(close) => ProbeError::QuicProtocolError {
            code: close.error_code.to_string(),
            reason: String::from_utf8_lossy(&close.reason).into_owned(),
        },
        other => ProbeError::QuicProtocolError {
            code: format!("{:?}", other),
            reason: other.to_string(),
        },
    }
}

/// Everything a successful QUIC attempt produced.
#[derive(Debug, Clone)]
pub struct QuicOutcome {
    pub ja4: Ja4sResult,
    pub negotiated_alpn: Option<String>,
    pub cipher: String,
}

impl QuicOutcome {
    pub fn detail(&self) -> String {
        format!(
            "Ver: 13, Cipher: {}, ALPN: {}, Exts: (not exposed by the QUIC stack)",
            self.cipher,
            self.negotiated_alpn.as_deref().unwrap_or("None")
        )
    }

    /// Successful result plus the raw fingerprint.
    pub fn into_result(self) -> (FingerprintResult, String) {
        let detail = self.detail();
        let result = FingerprintResult::matched(self.ja4.hash, "JA4 (QUIC) calculated", detail);
        (result, self.ja4.raw)
    }
}

impl Ja4Prober {
    /// JA4 over QUIC, to `ip` if given or to the first resolved address
    /// (IPv4 preferred) otherwise.
    pub async fn ja4_quic(&self, ip: Option<IpAddr>) -> FingerprintResult {
        match self.try_ja4_quic(ip).await {
            Ok(outcome) => outcome.into_result().0,
            Err(e) => {
                warn!("QUIC probe of {} failed: {}", self.target(), e);
                e.into()
            }
        }
    }

    pub async fn try_ja4_quic(&self, ip: Option<IpAddr>) -> Result<QuicOutcome, ProbeError> {
        let remote = match ip {
            Some(ip) => SocketAddr::new(ip, self.target().port),
            None => self.resolve_preferring_ipv4().await?,
        };

        let provider = Arc::new(quic_provider());
        let secret_width = Arc::new(SecretWidth::default());

        let mut tls = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider.clone())))
            .with_no_client_auth();
        tls.alpn_protocols = QUIC_ALPN.iter().map(|p| p.to_vec()).collect();
        tls.key_log = secret_width.clone();

        let crypto =
            QuicClientConfig::try_from(tls).map_err(|e| ProbeError::QuicUnsupported(e.to_string()))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        // HTTP/3 servers open control and QPACK streams right after the
        // handshake.
        let mut transport = TransportConfig::default();
        transport
            .max_concurrent_uni_streams(VarInt::from_u32(100))
            .max_concurrent_bidi_streams(VarInt::from_u32(10));
        client_config.transport_config(Arc::new(transport));

        let bind: SocketAddr = if remote.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let mut endpoint =
            Endpoint::client(bind).map_err(|e| ProbeError::QuicUnsupported(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let connecting = endpoint
            .connect(remote, &self.target().host)
            .map_err(|e| match e {
                ConnectError::InvalidServerName(name) => ProbeError::InvalidTarget(name),
                other => ProbeError::QuicUnsupported(other.to_string()),
            })?;

        let deadline = self.config().quic_connect_timeout;
        let connection = match timeout(deadline, connecting).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(connection_error(e)),
            Err(_) => return Err(ProbeError::ConnectTimeout(deadline)),
        };
        debug!("QUIC handshake with {} complete", remote);

        let negotiated_alpn = connection
            .handshake_data()
            .and_then(|data| data.downcast::<HandshakeData>().ok())
            .and_then(|data| data.protocol)
            .map(|p| String::from_utf8_lossy(&p).into_owned());
        let suite = match secret_width.0.load(Ordering::Relaxed) {
            0 => None,
            width => suite_for_width(&provider, width),
        };
        connection.close(VarInt::from_u32(0), b"");

        let cipher = quic_cipher_code(suite);
        let ja4 = compute_ja4_quic(negotiated_alpn.as_deref(), &cipher);
        Ok(QuicOutcome {
            ja4,
            negotiated_alpn,
            cipher,
        })
    }

    async fn resolve_preferring_ipv4(&self) -> Result<SocketAddr, ProbeError> {
        let ips = self.resolve().await?;
        let ip = ips
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| ips.first())
            .copied()
            .ok_or_else(|| {
                ProbeError::ConnectFailure(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{} has no addresses", self.target().host),
                ))
            })?;
        Ok(SocketAddr::new(ip, self.target().port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeConfig, Target};
    use std::time::Duration;

    #[test]
    fn provider_offers_one_suite_per_hash_width() {
        let provider = quic_provider();
        let suites: Vec<CipherSuite> = provider
            .cipher_suites
            .iter()
            .filter_map(|s| s.tls13())
            .map(|s| s.common.suite)
            .collect();
        assert_eq!(suites.len(), provider.cipher_suites.len());
        assert!(suites.contains(&CipherSuite::TLS13_AES_128_GCM_SHA256));
        assert!(suites.contains(&CipherSuite::TLS13_AES_256_GCM_SHA384));
        assert!(!suites.contains(&CipherSuite::TLS13_CHACHA20_POLY1305_SHA256));
    }

    #[test]
    fn secret_width_maps_back_to_suite() {
        let provider = quic_provider();
        assert_eq!(
            suite_for_width(&provider, 32),
            Some(CipherSuite::TLS13_AES_128_GCM_SHA256)
        );
        assert_eq!(
            suite_for_width(&provider, 48),
            Some(CipherSuite::TLS13_AES_256_GCM_SHA384)
        );
        assert_eq!(suite_for_width(&provider, 64), None);
    }

    #[test]
    fn key_log_only_tracks_handshake_secret() {
        let log = SecretWidth::default();
        log.log("CLIENT_TRAFFIC_SECRET_0", &[0; 32], &[0; 32]);
        assert_eq!(log.0.load(Ordering::Relaxed), 0);
        log.log("CLIENT_HANDSHAKE_TRAFFIC_SECRET", &[0; 32], &[0; 48]);
        assert_eq!(log.0.load(Ordering::Relaxed), 48);
    }

    #[test]
    fn cipher_codes() {
        assert_eq!(quic_cipher_code(Some(CipherSuite::TLS13_AES_128_GCM_SHA256)), "1301");
        assert_eq!(quic_cipher_code(Some(CipherSuite::TLS13_AES_256_GCM_SHA384)), "1302");
        assert_eq!(
            quic_cipher_code(Some(CipherSuite::TLS13_CHACHA20_POLY1305_SHA256)),
            "1303"
        );
        assert_eq!(quic_cipher_code(Some(CipherSuite::from(0x1304))), "1304");
        assert_eq!(quic_cipher_code(None), "0000");
    }

    #[tokio::test]
    async fn silent_udp_port_times_out() {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();

        let config = ProbeConfig {
            quic_connect_timeout: Duration::from_millis(300),
            ..ProbeConfig::default()
        };
        let prober = Ja4Prober::new(Target::new("localhost", port), config);
        let err = prober
            .try_ja4_quic(Some("127.0.0.1".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, ProbeError::ConnectTimeout(d) if d == Duration::from_millis(300)),
            "{:?}",
            err
        );

        let result = prober.ja4_quic(Some("127.0.0.1".parse().unwrap())).await;
        assert!(!result.success());
        assert!(result.fingerprint().is_empty());
        assert!(result.message().starts_with("connection timed out"));
        drop(socket);
    }

    #[tokio::test]
    async fn unusable_remote_address_is_unsupported() {
        let prober = Ja4Prober::new(Target::new("localhost", 0), ProbeConfig::default());
        let err = prober
            .try_ja4_quic(Some("127.0.0.1".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::QuicUnsupported(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn invalid_host_name_is_rejected_before_sending() {
        let prober = Ja4Prober::new(Target::new("not a host", 443), ProbeConfig::default());
        let err = prober
            .try_ja4_quic(Some("127.0.0.1".parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidTarget(_)), "{:?}", err);
    }
}
