//! Net block codec.
//!
//! The net block is a 4-byte little-endian size followed by that many bytes of
//! entries. Each entry is `[size:4][index:4][name:size-8]` where `size` counts
//! the whole entry. An optional 11-byte end sentinel may terminate the entries
//! early.

use serde::Deserialize;
use thiserror::Error;

use crate::config::NetlistConfig;
use crate::cursor::{match_pattern, read_u32_le};
use crate::diagnostic::{Diagnostic, DiagnosticKind};
use crate::edit::{PatchError, Splice};
use crate::layout::{resolve_layout, HeaderLayout};

/// Explicit end-of-entries marker.
pub const END_SENTINEL: [u8; 11] = [
    0x76, 0x36, 0x76, 0x36, 0x35, 0x35, 0x35, 0x76, 0x36, 0x76, 0x36,
];

/// Size and index fields preceding every name.
pub const ENTRY_HEADER_LEN: usize = 8;

pub const DEFAULT_MAX_ENTRY_SIZE: u32 = 1000;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// How the declared block size bounds entry decoding.
///
/// The size field does not count itself, so the declared end is measured from
/// the first entry (`start_offset + 4 + total_size`). Format notes that give
/// the bound as `start_offset + total_size` describe the same field measured
/// before the size field is skipped. The bound is only ever a limit on
/// decoding: under `Hint` it is reported, not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockEndPolicy {
    /// Stop once the cursor reaches `entryStart + totalSize`.
    #[default]
    Strict,
    /// Keep decoding past the declared end until a sentinel, a bad entry, or
    /// the end of the buffer.
    Hint,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetlistError {
    #[error("net at position {position} has an empty name")]
    EmptyName { position: usize },

    #[error("net at position {position} would encode to {size} bytes (limit {max})")]
    EntryTooLarge { position: usize, size: usize, max: u32 },

    #[error("net block of {size} bytes does not fit the 32-bit size field")]
    BlockTooLarge { size: usize },

    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// One decoded net entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetRecord {
    pub index: u32,
    pub name: String,
    /// Entry size as written in the file: `8 + utf8 length of name`.
    pub encoded_size: u32,
}

impl NetRecord {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        let encoded_size = encoded_size_for(&name);
        Self {
            index,
            name,
            encoded_size,
        }
    }

    /// Replace the name and recompute the encoded size.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.encoded_size = encoded_size_for(&self.name);
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.encoded_size.to_le_bytes());
        out.extend_from_slice(&self.index.to_le_bytes());
        out.extend_from_slice(self.name.as_bytes());
    }
}

fn encoded_size_for(name: &str) -> u32 {
    u32::try_from(ENTRY_HEADER_LEN + name.len()).unwrap_or(u32::MAX)
}

/// The decoded net block plus the offsets it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetlistBlock {
    pub layout: HeaderLayout,
    /// Absolute offset of the 4-byte size field; entries begin 4 bytes later.
    pub start_offset: usize,
    /// Declared size of the entry data, excluding the size field.
    pub total_size: u32,
    pub records: Vec<NetRecord>,
    /// Offset just past the last entry decoded (dropped entries included).
    pub consumed_end: usize,
    /// Where the end sentinel was found, if decoding stopped at one.
    pub sentinel_offset: Option<usize>,
    /// Entries walked, including ones dropped for an empty name.
    pub entries_scanned: usize,
    /// Whether the declared size fit inside the buffer it was decoded from.
    pub size_in_bounds: bool,
}

impl NetlistBlock {
    pub fn entry_start(&self) -> usize {
        self.start_offset + 4
    }

    /// Recompute every record's encoded size from its current name.
    pub fn refresh_sizes(&mut self) {
        for record in &mut self.records {
            record.encoded_size = encoded_size_for(&record.name);
        }
    }

    /// Concatenated entries in their current order, without the block size field.
    pub fn encode_entries(&mut self, max_entry_size: u32) -> Result<Vec<u8>, NetlistError> {
        self.refresh_sizes();

        let mut out = Vec::with_capacity(
            self.records
                .iter()
                .map(|r| r.encoded_size as usize)
                .sum::<usize>(),
        );
        for (position, record) in self.records.iter().enumerate() {
            if record.name.chars().all(char::is_control) {
                return Err(NetlistError::EmptyName { position });
            }
            let size = ENTRY_HEADER_LEN + record.name.len();
            if size > max_entry_size as usize {
                return Err(NetlistError::EntryTooLarge {
                    position,
                    size,
                    max: max_entry_size,
                });
            }
            record.encode_into(&mut out);
        }
        Ok(out)
    }

    /// Original byte range the re-encoded block replaces.
    ///
    /// Covers the size field and the declared entry data, extended to the last
    /// decoded entry when decoding ran past the declared size, and clamped to
    /// the buffer. A declared size that overruns the buffer is not trusted:
    /// only the entries actually decoded are replaced.
    pub fn replaced_range(&self, buf_len: usize) -> (usize, usize) {
        let end = if self.size_in_bounds {
            let declared_end = self.entry_start().saturating_add(self.total_size as usize);
            declared_end.max(self.consumed_end)
        } else {
            self.consumed_end
        };
        let end = end.min(buf_len);
        (self.start_offset.min(end), end)
    }

    /// Plan the splice that writes `[totalSize][entries...]` over the old block.
    pub fn encode(&mut self, buf: &[u8], max_entry_size: u32) -> Result<Splice, NetlistError> {
        let entries = self.encode_entries(max_entry_size)?;
        let total_size = u32::try_from(entries.len())
            .map_err(|_| NetlistError::BlockTooLarge { size: entries.len() })?;

        let mut block = Vec::with_capacity(4 + entries.len());
        block.extend_from_slice(&total_size.to_le_bytes());
        block.extend_from_slice(&entries);

        let (start, end) = self.replaced_range(buf.len());
        tracing::debug!(
            records = self.records.len(),
            old_total_size = self.total_size,
            new_total_size = total_size,
            start,
            end,
            "encoded net block"
        );
        Ok(Splice::against(buf, start, end, block)?)
    }
}

/// Strip control characters, decoding as UTF-8 when the bytes are valid and
/// keeping only 7-bit ASCII otherwise.
pub fn decode_name(bytes: &[u8]) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes
            .iter()
            .filter(|b| b.is_ascii())
            .map(|&b| char::from(b))
            .collect(),
    };
    text.chars().filter(|c| !c.is_control()).collect()
}

/// Locate and decode the net block.
///
/// Returns `None` when the header cannot be resolved. Problems past that
/// point truncate the record list but keep everything decoded so far.
pub fn decode_netlist(
    buf: &[u8],
    config: &NetlistConfig,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<NetlistBlock> {
    let resolved = match resolve_layout(buf, config.layout, config.min_header_size) {
        Ok(resolved) => resolved,
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            return None;
        }
    };

    let start = resolved.start_offset;
    let entry_start = start + 4;
    let declared_end = entry_start.saturating_add(resolved.total_size as usize);
    if !resolved.size_in_bounds {
        diagnostics.push(Diagnostic::warn(
            DiagnosticKind::BlockSizeOverrun,
            Some(start),
            format!(
                "declared net block size {} runs past end of file ({} bytes)",
                resolved.total_size,
                buf.len()
            ),
        ));
    }
    let scan_end = match config.block_end {
        BlockEndPolicy::Strict => declared_end.min(buf.len()),
        BlockEndPolicy::Hint => buf.len(),
    };

    let mut records = Vec::new();
    let mut cursor = entry_start;
    let mut scanned = 0usize;
    let mut sentinel_offset = None;
    let mut ran_past = false;

    while cursor < scan_end {
        if match_pattern(buf, cursor, &END_SENTINEL) {
            tracing::debug!(offset = cursor, "found end sentinel");
            sentinel_offset = Some(cursor);
            break;
        }

        if scanned == config.max_entries {
            diagnostics.push(Diagnostic::warn(
                DiagnosticKind::EntryLimit,
                Some(cursor),
                format!("reached {scanned} entries, stopping"),
            ));
            break;
        }

        if cursor + ENTRY_HEADER_LEN > buf.len() {
            diagnostics.push(Diagnostic::warn(
                DiagnosticKind::MalformedEntry,
                Some(cursor),
                "truncated entry header",
            ));
            break;
        }

        let entry_size = read_u32_le(buf, cursor);
        if (entry_size as usize) < ENTRY_HEADER_LEN || entry_size > config.max_entry_size {
            diagnostics.push(Diagnostic::warn(
                DiagnosticKind::MalformedEntry,
                Some(cursor),
                format!(
                    "invalid entry size {entry_size} (expected {ENTRY_HEADER_LEN}..={})",
                    config.max_entry_size
                ),
            ));
            break;
        }

        let entry_end = cursor + entry_size as usize;
        if entry_end > buf.len() {
            diagnostics.push(Diagnostic::warn(
                DiagnosticKind::MalformedEntry,
                Some(cursor),
                format!("entry of {entry_size} bytes exceeds file boundary"),
            ));
            break;
        }

        if entry_end > declared_end && config.block_end == BlockEndPolicy::Hint && !ran_past {
            ran_past = true;
            diagnostics.push(Diagnostic::warn(
                DiagnosticKind::RanPastBlockEnd,
                Some(cursor),
                format!("decoding entries past declared block end {declared_end}"),
            ));
        }

        let index = read_u32_le(buf, cursor + 4);
        let name = decode_name(&buf[cursor + ENTRY_HEADER_LEN..entry_end]);
        tracing::debug!(
            entry = scanned,
            offset = cursor,
            size = entry_size,
            index,
            name = %name,
            "decoded net entry"
        );

        cursor = entry_end;
        scanned += 1;

        if name.is_empty() {
            tracing::debug!(index, "dropping entry with empty name");
            continue;
        }
        records.push(NetRecord {
            index,
            name,
            encoded_size: entry_size,
        });
    }

    tracing::debug!(
        scanned,
        kept = records.len(),
        "net block decoded"
    );

    Some(NetlistBlock {
        layout: resolved.layout,
        start_offset: start,
        total_size: resolved.total_size,
        records,
        consumed_end: cursor,
        sentinel_offset,
        entries_scanned: scanned,
        size_in_bounds: resolved.size_in_bounds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::NET_BLOCK_FIELD;

    fn entry(index: u32, name: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + name.len()) as u32).to_le_bytes());
        out.extend_from_slice(&index.to_le_bytes());
        out.extend_from_slice(name);
        out
    }

    /// Header pointing at 0x44, then the block, then `tail`.
    fn image(entries: &[Vec<u8>], total_size: Option<u32>, tail: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 0x44];
        buf[NET_BLOCK_FIELD..NET_BLOCK_FIELD + 4].copy_from_slice(&0x24u32.to_le_bytes());
        let data: Vec<u8> = entries.concat();
        let size = total_size.unwrap_or(data.len() as u32);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&data);
        buf.extend_from_slice(tail);
        buf
    }

    fn decode(buf: &[u8]) -> (Option<NetlistBlock>, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();
        let block = decode_netlist(buf, &NetlistConfig::default(), &mut diagnostics);
        (block, diagnostics)
    }

    #[test]
    fn test_decode_name_strips_controls() {
        assert_eq!(decode_name(b"NET A\0\0"), "NET A");
        assert_eq!(decode_name(b"\x01\x1f\x7f"), "");
        assert_eq!(decode_name("VCC\u{85}".as_bytes()), "VCC");
        assert_eq!(decode_name("Ω1".as_bytes()), "Ω1");
    }

    #[test]
    fn test_decode_name_invalid_utf8_falls_back_to_ascii() {
        assert_eq!(decode_name(b"GND\xff\xfe_1"), "GND_1");
    }

    #[test]
    fn test_decode_basic() {
        let buf = image(&[entry(1, b"GND"), entry(2, b"VCC")], None, b"TAIL");
        let (block, diagnostics) = decode(&buf);
        let block = block.unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(block.start_offset, 0x44);
        assert_eq!(block.total_size, 22);
        assert_eq!(
            block.records,
            vec![NetRecord::new(1, "GND"), NetRecord::new(2, "VCC")]
        );
        assert_eq!(block.consumed_end, 0x44 + 4 + 22);
    }

    #[test]
    fn test_sentinel_stops_before_declared_end() {
        let mut data = entry(3, b"A");
        data.extend_from_slice(&END_SENTINEL);
        data.extend_from_slice(&entry(4, b"HIDDEN"));
        let buf = image(&[data], None, &[]);
        let (block, diagnostics) = decode(&buf);
        let block = block.unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(block.records, vec![NetRecord::new(3, "A")]);
        assert_eq!(block.sentinel_offset, Some(0x48 + 9));
    }

    #[test]
    fn test_empty_name_dropped_without_desync() {
        let buf = image(
            &[entry(1, b"\0\0\0"), entry(2, b"\x7f"), entry(3, b"SIG")],
            None,
            &[],
        );
        let (block, _) = decode(&buf);
        let block = block.unwrap();
        assert_eq!(block.records, vec![NetRecord::new(3, "SIG")]);
        assert_eq!(block.entries_scanned, 3);
    }

    #[test]
    fn test_invalid_entry_size_keeps_prefix() {
        let mut bad = Vec::new();
        bad.extend_from_slice(&4u32.to_le_bytes());
        bad.extend_from_slice(&[0u8; 8]);
        let buf = image(&[entry(1, b"OK"), bad], None, &[]);
        let (block, diagnostics) = decode(&buf);
        assert_eq!(block.unwrap().records, vec![NetRecord::new(1, "OK")]);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedEntry);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let mut big = Vec::new();
        big.extend_from_slice(&1001u32.to_le_bytes());
        big.extend_from_slice(&[b'A'; 1100]);
        let buf = image(&[big], None, &[]);
        let (block, diagnostics) = decode(&buf);
        assert!(block.unwrap().records.is_empty());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedEntry);
    }

    #[test]
    fn test_entry_overrunning_buffer() {
        let mut data = entry(1, b"OK");
        data.extend_from_slice(&200u32.to_le_bytes());
        data.extend_from_slice(&9u32.to_le_bytes());
        // Declared size reaches the buffer end so only the entry overruns
        let len = data.len() as u32;
        let buf = image(&[data], Some(len), &[]);
        let (block, diagnostics) = decode(&buf);
        assert_eq!(block.unwrap().records.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedEntry);
    }

    #[test]
    fn test_entry_limit() {
        let entries: Vec<Vec<u8>> = (0..5).map(|i| entry(i, b"N")).collect();
        let buf = image(&entries, None, &[]);
        let config = NetlistConfig {
            max_entries: 3,
            ..NetlistConfig::default()
        };
        let mut diagnostics = Vec::new();
        let block = decode_netlist(&buf, &config, &mut diagnostics).unwrap();
        assert_eq!(block.records.len(), 3);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::EntryLimit);
    }

    #[test]
    fn test_strict_stops_at_declared_end() {
        let buf = image(&[entry(1, b"IN"), entry(2, b"OUT")], Some(10), &[]);
        let (block, diagnostics) = decode(&buf);
        assert!(diagnostics.is_empty());
        assert_eq!(block.unwrap().records, vec![NetRecord::new(1, "IN")]);
    }

    #[test]
    fn test_hint_decodes_past_declared_end() {
        let buf = image(&[entry(1, b"IN"), entry(2, b"OUT")], Some(10), &[]);
        let config = NetlistConfig {
            block_end: BlockEndPolicy::Hint,
            ..NetlistConfig::default()
        };
        let mut diagnostics = Vec::new();
        let block = decode_netlist(&buf, &config, &mut diagnostics).unwrap();
        assert_eq!(block.records.len(), 2);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::RanPastBlockEnd);
        // Splice must cover both entries so nothing is duplicated
        assert_eq!(block.replaced_range(buf.len()), (0x44, buf.len()));
    }

    #[test]
    fn test_malformed_header() {
        let (block, diagnostics) = decode(&[0u8; 16]);
        assert!(block.is_none());
        assert_eq!(diagnostics[0].kind, DiagnosticKind::MalformedHeader);
    }

    #[test]
    fn test_encode_round_trip_bytes() {
        let buf = image(&[entry(1, b"GND"), entry(7, b"NET_A")], None, b"xyz");
        let (block, _) = decode(&buf);
        let mut block = block.unwrap();
        let entries = block.encode_entries(DEFAULT_MAX_ENTRY_SIZE).unwrap();
        assert_eq!(entries, buf[0x48..buf.len() - 3].to_vec());
        assert_eq!(entries.len() as u32, block.total_size);
    }

    #[test]
    fn test_encode_recomputes_size_from_name() {
        let buf = image(&[entry(1, b"GND")], None, &[]);
        let (block, _) = decode(&buf);
        let mut block = block.unwrap();
        block.records[0].name = "GROUND".to_string();
        let entries = block.encode_entries(DEFAULT_MAX_ENTRY_SIZE).unwrap();
        assert_eq!(read_u32_le(&entries, 0), 14);
        assert_eq!(block.records[0].encoded_size, 14);
    }

    #[test]
    fn test_encode_preserves_order() {
        let buf = image(&[entry(2, b"B"), entry(1, b"A")], None, &[]);
        let (block, _) = decode(&buf);
        let mut block = block.unwrap();
        block.records.swap(0, 1);
        let entries = block.encode_entries(DEFAULT_MAX_ENTRY_SIZE).unwrap();
        assert_eq!(entries, [entry(1, b"A"), entry(2, b"B")].concat());
    }

    #[test]
    fn test_encode_rejects_empty_name() {
        let buf = image(&[entry(1, b"A")], None, &[]);
        let (block, _) = decode(&buf);
        let mut block = block.unwrap();
        block.records[0].name = "\u{1}".to_string();
        assert_eq!(
            block.encode_entries(DEFAULT_MAX_ENTRY_SIZE),
            Err(NetlistError::EmptyName { position: 0 })
        );
    }

    #[test]
    fn test_encode_rejects_oversized_entry() {
        let buf = image(&[entry(1, b"A")], None, &[]);
        let (block, _) = decode(&buf);
        let mut block = block.unwrap();
        block.records[0].rename("X".repeat(993));
        assert!(matches!(
            block.encode_entries(DEFAULT_MAX_ENTRY_SIZE),
            Err(NetlistError::EntryTooLarge { size: 1001, .. })
        ));
    }

    #[test]
    fn test_encode_splice_covers_block() {
        let buf = image(&[entry(1, b"GND")], None, b"after");
        let (block, _) = decode(&buf);
        let mut block = block.unwrap();
        block.records[0].rename("G");
        let splice = block.encode(&buf, DEFAULT_MAX_ENTRY_SIZE).unwrap();
        assert_eq!(splice.byte_start, 0x44);
        assert_eq!(splice.byte_end, 0x44 + 4 + 11);
        assert_eq!(&splice.new_bytes[..4], &9u32.to_le_bytes());
    }

    #[test]
    fn test_overrun_size_replaces_only_decoded_entries() {
        let mut tail = END_SENTINEL.to_vec();
        tail.extend_from_slice(b"PARTS");
        let buf = image(&[entry(1, b"GND")], Some(5000), &tail);
        let (block, diagnostics) = decode(&buf);
        let block = block.unwrap();
        assert_eq!(diagnostics[0].kind, DiagnosticKind::BlockSizeOverrun);
        assert!(!block.size_in_bounds);
        assert_eq!(block.replaced_range(buf.len()), (0x44, 0x48 + 11));
    }
}
