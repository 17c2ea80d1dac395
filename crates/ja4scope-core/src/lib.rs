//! Active server fingerprinting.
//!
//! [`probe`] drives a TLS handshake over TCP (capturing the raw bytes) or a
//! QUIC handshake, and [`fingerprint`] turns the server's answer into a JA4S
//! string (or the QUIC JA4 variant).

pub mod fingerprint;
pub mod probe;

pub use fingerprint::types::{FingerprintResult, ServerHelloInfo, TlsVersion};
pub use probe::{Ja4Prober, ProbeConfig, ProbeError, Target};
