use std::net::IpAddr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::fingerprint::ja4s::{compute_ja4s, describe};
use crate::fingerprint::serverhello::{find_server_hello, parse_server_hello};
use crate::fingerprint::types::{FingerprintResult, Ja4sResult, ServerHelloInfo};
use crate::probe::capture::CaptureStream;
use crate::probe::{Ja4Prober, ProbeError};

/// Accepts whatever certificate the server presents. Only the handshake
/// bytes matter here; signatures are still checked against the provider.
#[derive(Debug)]
pub(crate) struct AcceptAnyCert(pub(crate) Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>, ProbeError> {
    ServerName::try_from(host.to_owned()).map_err(|_| ProbeError::InvalidTarget(host.to_owned()))
}

/// TLS 1.2 + 1.3 client offering `alpn` and trusting any certificate.
fn client_config(alpn: &[Vec<u8>]) -> Result<ClientConfig, ProbeError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
        .with_no_client_auth();
    config.alpn_protocols = alpn.to_vec();
    Ok(config)
}

/// Everything a successful TCP/TLS attempt produced.
#[derive(Debug, Clone)]
pub struct Ja4sOutcome {
    pub info: ServerHelloInfo,
    pub ja4s: Ja4sResult,
    /// ALPN reported by the completed handshake (None if it did not complete)
    pub negotiated_alpn: Option<String>,
    /// Why the handshake did not complete, if it did not
    pub handshake_error: Option<String>,
}

impl Ja4sOutcome {
    pub fn detail(&self) -> String {
        format!(
            "{}, Negotiated ALPN: {}",
            describe(&self.info),
            self.negotiated_alpn.as_deref().unwrap_or("None")
        )
    }

    /// Successful result plus the raw (unhashed) fingerprint.
    pub fn into_result(self) -> (FingerprintResult, String) {
        let detail = self.detail();
        let result = FingerprintResult::matched(self.ja4s.hash, "JA4S calculated", detail);
        (result, self.ja4s.raw)
    }
}

/// Locate the ServerHello in the bytes read during a handshake and
/// fingerprint it.
///
/// Captures shorter than a record header, or without a ServerHello record,
/// are reported as [`ProbeError::InsufficientCapture`] carrying the
/// handshake error (if any) for diagnostics.
pub fn analyze_capture(
    read: &[u8],
    handshake_error: Option<&str>,
) -> Result<(ServerHelloInfo, Ja4sResult), ProbeError> {
    let insufficient = || ProbeError::InsufficientCapture {
        captured: read.len(),
        handshake_error: handshake_error.unwrap_or("None").to_string(),
    };

    if read.len() < 5 {
        return Err(insufficient());
    }
    let offset = find_server_hello(read).ok_or_else(insufficient)?;
    debug!("ServerHello record at offset {} of {} captured bytes", offset, read.len());

    let info = parse_server_hello(&read[offset..])?;
    let ja4s = compute_ja4s(&info);
    Ok((info, ja4s))
}

impl Ja4Prober {
    /// JA4S over TCP, to `ip` if given or to the target host name otherwise.
    ///
    /// Never fails: errors are folded into an unsuccessful result.
    pub async fn ja4s(&self, ip: Option<IpAddr>, alpn: &[Vec<u8>]) -> FingerprintResult {
        match self.try_ja4s(ip, alpn).await {
            Ok(outcome) => outcome.into_result().0,
            Err(e) => {
                warn!("JA4S probe of {} failed: {}", self.target(), e);
                e.into()
            }
        }
    }

    /// Connect, run a handshake through a capturing stream, then parse
    /// whatever the server sent, whether or not the handshake succeeded.
    pub async fn try_ja4s(
        &self,
        ip: Option<IpAddr>,
        alpn: &[Vec<u8>],
    ) -> Result<Ja4sOutcome, ProbeError> {
        let connector = TlsConnector::from(Arc::new(client_config(alpn)?));
        let name = server_name(&self.target().host)?;

        let stream = self.connect_tcp(ip).await?;
        let mut capture = CaptureStream::new(stream);

        let deadline = self.config().handshake_timeout;
        let (negotiated_alpn, handshake_error) =
            match timeout(deadline, connector.connect(name, &mut capture)).await {
                Ok(Ok(tls)) => {
                    let (_, conn) = tls.get_ref();
                    let alpn = conn
                        .alpn_protocol()
                        .map(|p| String::from_utf8_lossy(p).into_owned());
                    (alpn, None)
                }
                Ok(Err(e)) => (None, Some(e.to_string())),
                Err(_) => (None, Some(format!("handshake timed out after {:?}", deadline))),
            };

        if let Some(err) = &handshake_error {
            debug!("handshake with {} did not complete: {}", self.target(), err);
        }

        let read = capture.read_bytes();
        debug!(
            "{}: captured {} bytes read, {} bytes written",
            self.target(),
            read.len(),
            capture.written_bytes().len()
        );

        let (info, ja4s) = analyze_capture(&read, handshake_error.as_deref())?;
        Ok(Ja4sOutcome {
            info,
            ja4s,
            negotiated_alpn,
            handshake_error,
        })
    }

    async fn connect_tcp(&self, ip: Option<IpAddr>) -> Result<TcpStream, ProbeError> {
        let port = self.target().port;
        let connected = match ip {
            Some(ip) => {
                let deadline = self.config().ip_connect_timeout;
                timeout(deadline, TcpStream::connect((ip, port)))
                    .await
                    .map_err(|_| ProbeError::ConnectTimeout(deadline))?
            }
            None => {
                let deadline = self.config().hostname_connect_timeout;
                timeout(deadline, TcpStream::connect((self.target().host.as_str(), port)))
                    .await
                    .map_err(|_| ProbeError::ConnectTimeout(deadline))?
            }
        };
        connected.map_err(ProbeError::ConnectFailure)
    }
}
