use serde::Serialize;

/// TLS version a server negotiated, as far as the ServerHello reveals it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TlsVersion {
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Two-character version tag used in the first fingerprint segment.
    pub fn tag(self) -> &'static str {
        match self {
            TlsVersion::Tls11 => "11",
            TlsVersion::Tls12 => "12",
            TlsVersion::Tls13 => "13",
        }
    }
}

/// Parsed ServerHello information needed for JA4S fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHelloInfo {
    /// Major byte of the ServerHello `legacy_version` field (3 for any TLS)
    pub record_version_major: u8,
    /// Minor byte of the ServerHello `legacy_version` field
    pub record_version_minor: u8,
    /// Provisional version from `legacy_version`, overridden by `supported_versions`
    pub negotiated_version: TlsVersion,
    /// Selected cipher suite
    pub cipher_suite: u16,
    /// Extension type codes in wire order
    pub extensions: Vec<u16>,
    /// Protocol name selected through the ALPN extension, if any
    pub alpn_selected: Option<String>,
}

/// Result of a JA4S (or QUIC JA4) fingerprint computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ja4sResult {
    /// Full fingerprint: part_a + "_" + part_b + "_" + part_c
    pub hash: String,
    /// Raw form with the sorted extension list instead of its hash
    pub raw: String,
}

/// Outcome of one fingerprinting attempt, as handed back to the caller.
///
/// A successful result always carries a fingerprint; a failed one never does.
/// The fields are private so that invariant cannot be broken after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FingerprintResult {
    success: bool,
    message: String,
    fingerprint: String,
    detail: String,
}

impl FingerprintResult {
    /// Successful result. `fingerprint` must not be empty.
    pub fn matched(
        fingerprint: impl Into<String>,
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let fingerprint = fingerprint.into();
        debug_assert!(!fingerprint.is_empty(), "successful result without a fingerprint");
        Self {
            success: true,
            message: message.into(),
            fingerprint,
            detail: detail.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            fingerprint: String::new(),
            detail: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The fingerprint string; empty for failed attempts.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }
}
