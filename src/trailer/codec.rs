//! Locating, extracting, and re-encoding the JSON trailer.

use serde::Deserialize;

use crate::cursor::find_pattern;
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::edit::{apply_splices, Splice};
use crate::trailer::document::BoardDocument;
use crate::trailer::errors::TrailerError;

/// Marker bytes shared by both variants; the terminator follows.
pub const MARKER_PREFIX: [u8; 10] = [0x3D, 0x3D, 0x3D, 0x50, 0x43, 0x42, 0xB8, 0xBD, 0xBC, 0xD3];

pub const MARKER_LEN: usize = MARKER_PREFIX.len() + 1;

/// Line terminator closing the marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerVariant {
    /// `... D3 0D`
    #[default]
    Cr,
    /// `... D3 0A`
    Lf,
}

impl MarkerVariant {
    pub const ALL: [MarkerVariant; 2] = [MarkerVariant::Cr, MarkerVariant::Lf];

    pub fn bytes(self) -> [u8; MARKER_LEN] {
        let mut marker = [0u8; MARKER_LEN];
        marker[..MARKER_PREFIX.len()].copy_from_slice(&MARKER_PREFIX);
        marker[MARKER_PREFIX.len()] = match self {
            MarkerVariant::Cr => 0x0D,
            MarkerVariant::Lf => 0x0A,
        };
        marker
    }

    pub fn name(self) -> &'static str {
        match self {
            MarkerVariant::Cr => "0D",
            MarkerVariant::Lf => "0A",
        }
    }
}

/// Lowest-offset marker of either variant.
pub fn find_marker(buf: &[u8]) -> Option<(usize, MarkerVariant)> {
    MarkerVariant::ALL
        .iter()
        .filter_map(|&variant| find_pattern(buf, 0, &variant.bytes()).map(|at| (at, variant)))
        .min_by_key(|&(at, _)| at)
}

/// End offset (exclusive) of the brace-balanced object starting at or after `start`.
///
/// Braces inside string literals are ignored. Before any object opens, a byte
/// outside printable ASCII, TAB, LF, and CR ends the scan at that byte.
/// Without either stop condition the scan runs to the end of the buffer.
pub fn find_json_end(buf: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in buf.iter().enumerate().skip(start) {
        if in_string {
            if !escaped && byte == b'"' {
                in_string = false;
            }
            escaped = !escaped && byte == b'\\';
        } else {
            match byte {
                b'{' => depth += 1,
                b'}' if depth > 0 => {
                    depth -= 1;
                    if depth == 0 {
                        return i + 1;
                    }
                }
                b'"' => in_string = true,
                _ => {}
            }
        }

        if depth == 0 && !is_text_byte(byte) {
            return i;
        }
    }

    buf.len()
}

fn is_text_byte(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\t' | b'\n' | b'\r')
}

/// The decoded trailer and where its payload lives.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonTrailer {
    pub marker: MarkerVariant,
    pub marker_offset: usize,
    /// Always `marker_offset + MARKER_LEN`.
    pub payload_start: usize,
    pub payload_end: usize,
    pub document: BoardDocument,
}

impl JsonTrailer {
    /// Plan the splice replacing the payload with the compact serialization
    /// of the current document. The marker is never touched.
    pub fn encode(&self, buf: &[u8]) -> Result<Splice, TrailerError> {
        let payload = serde_json::to_vec(self.document.as_map())?;
        tracing::debug!(
            original = self.payload_end - self.payload_start,
            new = payload.len(),
            "encoded JSON trailer"
        );
        Ok(Splice::against(buf, self.payload_start, self.payload_end, payload)?)
    }
}

/// Find and parse the trailer.
///
/// A missing marker is not a finding. A marker whose payload does not parse
/// as a JSON object is reported and treated as absent.
pub fn decode_trailer(buf: &[u8], diagnostics: &mut Vec<Diagnostic>) -> Option<JsonTrailer> {
    let Some((marker_offset, marker)) = find_marker(buf) else {
        tracing::debug!("no JSON trailer marker (checked 0D and 0A variants)");
        return None;
    };
    tracing::debug!(
        offset = marker_offset,
        variant = marker.name(),
        "found JSON trailer marker"
    );

    let payload_start = marker_offset + MARKER_LEN;
    let payload_end = find_json_end(buf, payload_start);
    if payload_end <= payload_start {
        diagnostics.push(Diagnostic::warn(
            DiagnosticKind::MalformedJson,
            Some(payload_start),
            "no JSON data after marker",
        ));
        return None;
    }

    let document = std::str::from_utf8(&buf[payload_start..payload_end])
        .map_err(|e| e.to_string())
        .and_then(|text| BoardDocument::parse(text).map_err(|e| e.to_string()));

    match document {
        Ok(document) => {
            tracing::debug!(
                payload_start,
                payload_end,
                parts = document.parts().len(),
                nets = document.nets().len(),
                "parsed JSON trailer"
            );
            Some(JsonTrailer {
                marker,
                marker_offset,
                payload_start,
                payload_end,
                document,
            })
        }
        Err(message) => {
            diagnostics.push(Diagnostic::warn(
                DiagnosticKind::MalformedJson,
                Some(payload_start),
                format!("error parsing JSON: {message}"),
            ));
            None
        }
    }
}

/// Append `marker` and `document` to an image that has no trailer yet.
pub fn append_trailer(
    buf: &[u8],
    document: &BoardDocument,
    marker: MarkerVariant,
    pretty: bool,
) -> Result<Vec<u8>, TrailerError> {
    if let Some((offset, _)) = find_marker(buf) {
        return Err(TrailerError::AlreadyPresent { offset });
    }

    let payload = if pretty {
        serde_json::to_vec_pretty(document.as_map())?
    } else {
        serde_json::to_vec(document.as_map())?
    };
    let mut bytes = Vec::with_capacity(MARKER_LEN + payload.len());
    bytes.extend_from_slice(&marker.bytes());
    bytes.extend_from_slice(&payload);

    tracing::debug!(
        marker_offset = buf.len(),
        payload_len = payload.len(),
        "appending JSON trailer"
    );
    Ok(apply_splices(buf, &[Splice::append(buf, bytes)])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_trailer(prefix: &[u8], variant: MarkerVariant, payload: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut buf = prefix.to_vec();
        buf.extend_from_slice(&variant.bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(suffix);
        buf
    }

    #[test]
    fn test_marker_bytes() {
        assert_eq!(
            MarkerVariant::Cr.bytes(),
            [0x3D, 0x3D, 0x3D, 0x50, 0x43, 0x42, 0xB8, 0xBD, 0xBC, 0xD3, 0x0D]
        );
        assert_eq!(MarkerVariant::Lf.bytes()[10], 0x0A);
    }

    #[test]
    fn test_absent_trailer_is_not_a_finding() {
        let mut diagnostics = Vec::new();
        assert!(decode_trailer(b"no marker here", &mut diagnostics).is_none());
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_lf_variant_found() {
        let buf = with_trailer(b"\x00\x01", MarkerVariant::Lf, br#"{"net":[]}"#, b"");
        let mut diagnostics = Vec::new();
        let trailer = decode_trailer(&buf, &mut diagnostics).unwrap();
        assert_eq!(trailer.marker, MarkerVariant::Lf);
        assert_eq!(trailer.marker_offset, 2);
        assert_eq!(trailer.payload_start, 2 + MARKER_LEN);
    }

    #[test]
    fn test_lower_offset_marker_wins() {
        let mut buf = with_trailer(b"..", MarkerVariant::Lf, br#"{"first":1}"#, b"\x00");
        buf.extend_from_slice(&MarkerVariant::Cr.bytes());
        buf.extend_from_slice(br#"{"second":2}"#);
        let mut diagnostics = Vec::new();
        let trailer = decode_trailer(&buf, &mut diagnostics).unwrap();
        assert_eq!(trailer.marker, MarkerVariant::Lf);
        assert_eq!(trailer.document.to_value(), json!({"first": 1}));
    }

    #[test]
    fn test_brace_inside_string() {
        let payload = br#"{"a":"}"}"#;
        let buf = with_trailer(b"", MarkerVariant::Cr, payload, b"\x00\xff");
        assert_eq!(find_json_end(&buf, MARKER_LEN), MARKER_LEN + 9);
        let mut diagnostics = Vec::new();
        let trailer = decode_trailer(&buf, &mut diagnostics).unwrap();
        assert_eq!(trailer.payload_end - trailer.payload_start, 9);
        assert_eq!(trailer.document.to_value(), json!({"a": "}"}));
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let payload = br#"{"a":"\"}"}"#;
        let buf = with_trailer(b"", MarkerVariant::Cr, payload, b"{junk");
        assert_eq!(find_json_end(&buf, MARKER_LEN), MARKER_LEN + payload.len());
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let payload = br#"{"a":"\\"}"#;
        let buf = with_trailer(b"", MarkerVariant::Cr, payload, b"tail");
        assert_eq!(find_json_end(&buf, MARKER_LEN), MARKER_LEN + payload.len());
    }

    #[test]
    fn test_binary_before_object_stops_scan() {
        assert_eq!(find_json_end(b"  \x00{}", 0), 2);
        // Whitespace and newlines are fine before the object opens
        assert_eq!(find_json_end(b"\r\n\t {}\x00", 0), 6);
    }

    #[test]
    fn test_unterminated_runs_to_end() {
        assert_eq!(find_json_end(br#"{"a":1"#, 0), 6);
    }

    #[test]
    fn test_malformed_json_reported() {
        let buf = with_trailer(b"", MarkerVariant::Cr, br#"{"a":}"#, b"");
        let mut diagnostics = Vec::new();
        assert!(decode_trailer(&buf, &mut diagnostics).is_none());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedJson);
    }

    #[test]
    fn test_non_object_payload_reported() {
        let buf = with_trailer(b"", MarkerVariant::Cr, b"[1,2]", b"\x00");
        let mut diagnostics = Vec::new();
        assert!(decode_trailer(&buf, &mut diagnostics).is_none());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedJson);
    }

    #[test]
    fn test_marker_without_payload_reported() {
        let buf = with_trailer(b"", MarkerVariant::Cr, b"", b"\x00\x00");
        let mut diagnostics = Vec::new();
        assert!(decode_trailer(&buf, &mut diagnostics).is_none());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_encode_compacts_and_keeps_marker() {
        let buf = with_trailer(b"HDR", MarkerVariant::Cr, b"{ \"a\" : [1, 2] }", b"\x00END");
        let mut diagnostics = Vec::new();
        let trailer = decode_trailer(&buf, &mut diagnostics).unwrap();
        let splice = trailer.encode(&buf).unwrap();
        assert_eq!(splice.byte_start, 3 + MARKER_LEN);
        assert_eq!(splice.new_bytes, br#"{"a":[1,2]}"#.to_vec());
        let out = apply_splices(&buf, &[splice]).unwrap();
        assert_eq!(out, with_trailer(b"HDR", MarkerVariant::Cr, br#"{"a":[1,2]}"#, b"\x00END"));
    }

    #[test]
    fn test_unknown_fields_and_order_round_trip() {
        let payload = r#"{"zeta":{"x":[true,null,1.5]},"part":[],"alpha":"é"}"#.as_bytes();
        let buf = with_trailer(b"", MarkerVariant::Cr, payload, b"");
        let mut diagnostics = Vec::new();
        let trailer = decode_trailer(&buf, &mut diagnostics).unwrap();
        let splice = trailer.encode(&buf).unwrap();
        assert_eq!(
            String::from_utf8(splice.new_bytes).unwrap(),
            r#"{"zeta":{"x":[true,null,1.5]},"part":[],"alpha":"é"}"#
        );
    }

    #[test]
    fn test_append_trailer() {
        let doc = BoardDocument::default_board();
        let out = append_trailer(b"IMAGE", &doc, MarkerVariant::Cr, false).unwrap();
        assert!(out.starts_with(b"IMAGE"));
        let mut diagnostics = Vec::new();
        let trailer = decode_trailer(&out, &mut diagnostics).unwrap();
        assert_eq!(trailer.marker_offset, 5);
        assert_eq!(trailer.document, doc);
        assert_eq!(trailer.payload_end, out.len());
    }

    #[test]
    fn test_append_refuses_existing_trailer() {
        let buf = with_trailer(b"", MarkerVariant::Lf, b"{}", b"");
        let doc = BoardDocument::default_board();
        assert!(matches!(
            append_trailer(&buf, &doc, MarkerVariant::Cr, true),
            Err(TrailerError::AlreadyPresent { offset: 0 })
        ));
    }
}
