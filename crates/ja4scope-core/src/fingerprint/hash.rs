use sha2::{Digest, Sha256};

/// Hash segment used when the ServerHello carried no extensions.
///
/// Four characters rather than twelve; existing JA4S databases contain this
/// form, so it is kept as is.
pub const EMPTY_EXTENSIONS_HASH: &str = "0000";

/// Canonical, order-independent representation of an extension list:
/// ascending 4-digit lowercase hex values joined with `_`.
pub fn canonical_extensions(extensions: &[u16]) -> String {
    let mut sorted = extensions.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(|e| format!("{:04x}", e))
        .collect::<Vec<_>>()
        .join("_")
}

/// Third JA4S segment: SHA256 of the canonical extension list, truncated to
/// 12 hex characters, or [`EMPTY_EXTENSIONS_HASH`] for an empty list.
pub fn extension_hash(extensions: &[u16]) -> String {
    if extensions.is_empty() {
        return EMPTY_EXTENSIONS_HASH.to_string();
    }
    truncated_sha256(&canonical_extensions(extensions), 12)
}

/// SHA256 hash, lowercase hex, truncated to `len` characters.
fn truncated_sha256(input: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let full = hex::encode(hasher.finalize());
    full[..len].to_string()
}
