use crate::fingerprint::types::{ServerHelloInfo, TlsVersion};

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_SERVER_HELLO: u8 = 0x02;
const EXT_SUPPORTED_VERSIONS: u16 = 0x002b;
const EXT_ALPN: u16 = 0x0010;
const TLS13: u16 = 0x0304;

/// Record header (5) + handshake type (1) + handshake length (3).
const BODY_OFFSET: usize = 9;
const RANDOM_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("not a TLS handshake record")]
    NotAHandshakeRecord,
    #[error("not a ServerHello message")]
    NotAServerHello,
    #[error("truncated ServerHello: need {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
}

/// Find the first handshake record carrying a ServerHello in a captured
/// byte stream.
///
/// Matches content type 0x16, record version major 3 and handshake type
/// 0x02 at byte 5. The capture may start with unrelated records (an alert,
/// for instance), so every offset is tried. A ServerHello split across
/// several records is not reassembled.
pub fn find_server_hello(buf: &[u8]) -> Option<usize> {
    buf.windows(6).position(|w| {
        w[0] == CONTENT_TYPE_HANDSHAKE && w[1] == 0x03 && w[5] == HANDSHAKE_SERVER_HELLO
    })
}

/// Bounds-checked reader over the capture buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.buf.len());
        match end {
            Some(end) => {
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                Ok(bytes)
            }
            None => Err(ParseError::Truncated {
                offset: self.pos,
                needed: n,
            }),
        }
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), ParseError> {
        self.take(n).map(|_| ())
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

/// Extension header seen during the forward scan. Points into the capture
/// buffer; nothing is copied.
#[derive(Debug, Clone, Copy)]
struct Extension {
    ext_type: u16,
    length: u16,
    payload_offset: usize,
}

/// Parse a ServerHello from a buffer that starts at the record header
/// (usually the offset returned by [`find_server_hello`]).
///
/// TLS 1.3 servers put 0x0303 in `legacy_version` and announce the real
/// version in `supported_versions`, so the version read from the body is only
/// provisional until the extension scan is done.
pub fn parse_server_hello(buf: &[u8]) -> Result<ServerHelloInfo, ParseError> {
    match buf.first() {
        None => return Err(ParseError::Truncated { offset: 0, needed: 1 }),
        Some(&b) if b != CONTENT_TYPE_HANDSHAKE => return Err(ParseError::NotAHandshakeRecord),
        Some(_) => {}
    }
    match buf.get(5) {
        None => return Err(ParseError::Truncated { offset: 5, needed: 1 }),
        Some(&b) if b != HANDSHAKE_SERVER_HELLO => return Err(ParseError::NotAServerHello),
        Some(_) => {}
    }

    let mut cur = Cursor::new(buf, BODY_OFFSET);

    let record_version_major = cur.u8()?;
    let record_version_minor = cur.u8()?;
    let mut negotiated_version = if record_version_minor == 3 {
        TlsVersion::Tls12
    } else {
        TlsVersion::Tls11
    };

    cur.skip(RANDOM_LEN)?;
    let session_id_len = cur.u8()? as usize;
    cur.skip(session_id_len)?;

    let cipher_suite = cur.u16()?;
    cur.skip(1)?; // compression method

    let ext_len = cur.u16()? as usize;
    let ext_end = cur.pos + ext_len;

    let mut extensions = Vec::new();
    let mut alpn_selected = None;

    while cur.pos < ext_end && cur.remaining() >= 4 {
        let ext = Extension {
            ext_type: cur.u16()?,
            length: cur.u16()?,
            payload_offset: cur.pos,
        };
        extensions.push(ext.ext_type);

        match ext.ext_type {
            EXT_SUPPORTED_VERSIONS if ext.length >= 2 => {
                if Cursor::new(buf, ext.payload_offset).u16()? == TLS13 {
                    negotiated_version = TlsVersion::Tls13;
                }
            }
            EXT_ALPN if ext.length > 3 => {
                // protocol_name_list length (2), then the single selected name
                let mut payload = Cursor::new(buf, ext.payload_offset + 2);
                let name_len = payload.u8()? as usize;
                let name = payload.take(name_len)?;
                alpn_selected = Some(ascii_lossy(name));
            }
            _ => {}
        }

        // Bodies may run past the end of the capture; the loop condition
        // stops the scan there.
        cur.pos = ext.payload_offset + ext.length as usize;
    }

    Ok(ServerHelloInfo {
        record_version_major,
        record_version_minor,
        negotiated_version,
        cipher_suite,
        extensions,
        alpn_selected,
    })
}

fn ascii_lossy(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a ServerHello record with the given legacy version, cipher and
    /// raw extension block. Record and handshake lengths are left at zero,
    /// the parser never reads them.
    pub(crate) fn server_hello(version: [u8; 2], cipher: u16, extensions: &[u8]) -> Vec<u8> {
        let mut buf = vec![
            0x16, 0x03, 0x03, 0x00, 0x00, // record header
            0x02, 0x00, 0x00, 0x00, // handshake header
        ];
        buf.extend_from_slice(&version);
        buf.extend_from_slice(&[0u8; 32]); // random
        buf.push(0x00); // session id
        buf.extend_from_slice(&cipher.to_be_bytes());
        buf.push(0x00); // compression
        buf.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        buf.extend_from_slice(extensions);
        buf
    }

    pub(crate) fn ext_supported_versions(version: u16) -> Vec<u8> {
        let mut ext = vec![0x00, 0x2b, 0x00, 0x02];
        ext.extend_from_slice(&version.to_be_bytes());
        ext
    }

    pub(crate) fn ext_alpn(proto: &str) -> Vec<u8> {
        let name = proto.as_bytes();
        let list_len = name.len() + 1;
        let mut ext = vec![0x00, 0x10];
        ext.extend_from_slice(&((list_len + 2) as u16).to_be_bytes());
        ext.extend_from_slice(&(list_len as u16).to_be_bytes());
        ext.push(name.len() as u8);
        ext.extend_from_slice(name);
        ext
    }

    pub(crate) fn ext_empty(ext_type: u16) -> Vec<u8> {
        let mut ext = ext_type.to_be_bytes().to_vec();
        ext.extend_from_slice(&[0x00, 0x00]);
        ext
    }

    #[test]
    fn tls13_detected_from_supported_versions() {
        let mut exts = ext_supported_versions(0x0304);
        exts.extend(ext_alpn("h2"));
        let buf = server_hello([0x03, 0x03], 0x1301, &exts);

        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.record_version_major, 3);
        assert_eq!(info.record_version_minor, 3);
        assert_eq!(info.negotiated_version, TlsVersion::Tls13);
        assert_eq!(info.cipher_suite, 0x1301);
        assert_eq!(info.extensions, vec![0x002b, 0x0010]);
        assert_eq!(info.alpn_selected.as_deref(), Some("h2"));
    }

    #[test]
    fn tls13_override_ignores_legacy_version() {
        let exts = ext_supported_versions(0x0304);
        let buf = server_hello([0x03, 0x01], 0x1302, &exts);
        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.negotiated_version, TlsVersion::Tls13);
    }

    #[test]
    fn supported_versions_other_than_tls13_keeps_provisional() {
        let exts = ext_supported_versions(0x0303);
        let buf = server_hello([0x03, 0x03], 0xc02f, &exts);
        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.negotiated_version, TlsVersion::Tls12);
    }

    #[test]
    fn legacy_minor_other_than_3_is_tls11() {
        let buf = server_hello([0x03, 0x02], 0x002f, &[]);
        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.negotiated_version, TlsVersion::Tls11);
        assert!(info.extensions.is_empty());
        assert_eq!(info.alpn_selected, None);
    }

    #[test]
    fn extensions_keep_wire_order() {
        let mut exts = ext_empty(0xff01);
        exts.extend(ext_empty(0x0017));
        exts.extend(ext_alpn("http/1.1"));
        exts.extend(ext_empty(0x000b));
        let buf = server_hello([0x03, 0x03], 0xc02f, &exts);

        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.extensions, vec![0xff01, 0x0017, 0x0010, 0x000b]);
        assert_eq!(info.alpn_selected.as_deref(), Some("http/1.1"));
    }

    #[test]
    fn session_id_is_skipped() {
        let mut buf = server_hello([0x03, 0x03], 0x1301, &ext_supported_versions(0x0304));
        // Replace the empty session id with a 32-byte one.
        let sid_pos = BODY_OFFSET + 2 + RANDOM_LEN;
        buf[sid_pos] = 32;
        buf.splice(sid_pos + 1..sid_pos + 1, [0xAB; 32]);

        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.cipher_suite, 0x1301);
        assert_eq!(info.negotiated_version, TlsVersion::Tls13);
    }

    #[test]
    fn not_a_handshake_record() {
        assert_eq!(
            parse_server_hello(&[0x00, 0x01, 0x02]),
            Err(ParseError::NotAHandshakeRecord)
        );
        assert_eq!(
            parse_server_hello(&[0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28]),
            Err(ParseError::NotAHandshakeRecord)
        );
    }

    #[test]
    fn not_a_server_hello() {
        let mut buf = server_hello([0x03, 0x03], 0x1301, &[]);
        buf[5] = 0x01;
        assert_eq!(parse_server_hello(&buf), Err(ParseError::NotAServerHello));
    }

    #[test]
    fn truncated_inside_random() {
        let buf = server_hello([0x03, 0x03], 0x1301, &[]);
        let err = parse_server_hello(&buf[..20]).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { offset: 11, needed: 32 }));
    }

    #[test]
    fn truncated_at_every_prefix_never_panics() {
        let mut exts = ext_supported_versions(0x0304);
        exts.extend(ext_alpn("h2"));
        let buf = server_hello([0x03, 0x03], 0x1301, &exts);
        for len in 0..buf.len() {
            let _ = parse_server_hello(&buf[..len]);
        }
    }

    #[test]
    fn truncated_alpn_name() {
        let mut exts = ext_alpn("http/1.1");
        exts.truncate(exts.len() - 3);
        // Extension block length still claims the full ALPN body.
        let mut buf = server_hello([0x03, 0x03], 0xc02f, &exts);
        let block_len_pos = buf.len() - exts.len() - 2;
        buf[block_len_pos..block_len_pos + 2].copy_from_slice(&15u16.to_be_bytes());

        let err = parse_server_hello(&buf).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }));
    }

    #[test]
    fn extension_body_past_capture_stops_scan() {
        // Declares a 0x40-byte extension, but the capture ends right after
        // its header.
        let exts = [0x00, 0x17, 0x00, 0x40];
        let buf = server_hello([0x03, 0x03], 0xc02f, &exts);
        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.extensions, vec![0x0017]);
    }

    #[test]
    fn non_ascii_alpn_bytes_are_replaced() {
        let exts = [0x00, 0x10, 0x00, 0x05, 0x00, 0x03, 0x02, b'x', 0xff];
        let buf = server_hello([0x03, 0x03], 0xc02f, &exts);
        let info = parse_server_hello(&buf).unwrap();
        assert_eq!(info.alpn_selected.as_deref(), Some("x?"));
    }

    #[test]
    fn locate_skips_leading_alert() {
        let mut capture = vec![0x15, 0x03, 0x03, 0x00, 0x02, 0x02, 0x28];
        let hello = server_hello([0x03, 0x03], 0x1301, &[]);
        capture.extend_from_slice(&hello);
        assert_eq!(find_server_hello(&capture), Some(7));
    }

    #[test]
    fn locate_requires_major_version_3() {
        let mut hello = server_hello([0x03, 0x03], 0x1301, &[]);
        hello[1] = 0x02;
        assert_eq!(find_server_hello(&hello), None);
    }

    #[test]
    fn locate_short_buffers() {
        assert_eq!(find_server_hello(&[]), None);
        assert_eq!(find_server_hello(&[0x16, 0x03, 0x03, 0x00, 0x50]), None);
        assert_eq!(find_server_hello(&[0x16, 0x03, 0x03, 0x00, 0x50, 0x02]), Some(0));
    }
}
