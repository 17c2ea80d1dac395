use crate::fingerprint::hash::{canonical_extensions, extension_hash};
use crate::fingerprint::types::{Ja4sResult, ServerHelloInfo};

/// Extension segment of the QUIC fingerprint. The QUIC stack does not
/// surface the server's extensions, so it is always zero.
pub const QUIC_EXTENSIONS_PLACEHOLDER: &str = "000000000000";

/// Compute the JA4S fingerprint from a parsed ServerHello.
///
/// JA4S format: `{part_a}_{part_b}_{part_c}`
///
/// Part A: `t{ver}{alpn}`
/// Part B: selected cipher suite as 4-char hex
/// Part C: sorted extensions → SHA256 truncated to 12 chars ("0000" if none)
pub fn compute_ja4s(info: &ServerHelloInfo) -> Ja4sResult {
    let part_a = format!(
        "t{}{}",
        info.negotiated_version.tag(),
        alpn_tag(info.alpn_selected.as_deref())
    );
    let part_b = format!("{:04x}", info.cipher_suite);
    let part_c = extension_hash(&info.extensions);

    Ja4sResult {
        hash: format!("{}_{}_{}", part_a, part_b, part_c),
        raw: format!("{}_{}_{}", part_a, part_b, canonical_extensions(&info.extensions)),
    }
}

/// Compute the QUIC variant: `q13{alpn}_{cipher}_000000000000`.
///
/// QUIC always runs TLS 1.3, so the version is fixed.
pub fn compute_ja4_quic(alpn: Option<&str>, cipher: &str) -> Ja4sResult {
    let hash = format!("q13{}_{}_{}", alpn_tag(alpn), cipher, QUIC_EXTENSIONS_PLACEHOLDER);
    Ja4sResult {
        raw: hash.clone(),
        hash,
    }
}

/// Two-character ALPN tag.
///
/// `h2`, `http/1.1` and `h3` have fixed tags; anything else contributes its
/// first two characters, lowercased and right-padded with `0` when shorter.
/// No ALPN → "00".
pub fn alpn_tag(alpn: Option<&str>) -> String {
    match alpn {
        None | Some("") => "00".to_string(),
        Some("h2") => "h2".to_string(),
        Some("http/1.1") => "h1".to_string(),
        Some("h3") => "h3".to_string(),
        Some(other) => {
            let mut tag: String = other
                .chars()
                .take(2)
                .map(|c| c.to_ascii_lowercase())
                .collect();
            while tag.chars().count() < 2 {
                tag.push('0');
            }
            tag
        }
    }
}

/// Human-readable summary of what went into the fingerprint.
pub fn describe(info: &ServerHelloInfo) -> String {
    format!(
        "Ver: {}, Cipher: {:04x}, Exts: {}",
        info.negotiated_version.tag(),
        info.cipher_suite,
        info.extensions.len()
    )
}
