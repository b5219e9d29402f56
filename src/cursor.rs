//! Bounds-safe primitives over an immutable byte buffer.
//!
//! Nothing in here panics on short input. Integer reads that would run past
//! the end degrade to zero and pattern checks degrade to `false`; callers are
//! expected to bounds-check any value before they trust it.

/// Read a little-endian `u32` at `offset`, or 0 if fewer than four bytes remain.
pub fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    match offset.checked_add(4).and_then(|end| buf.get(offset..end)) {
        Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        None => 0,
    }
}

/// Whether `pattern` occurs at exactly `offset`.
pub fn match_pattern(buf: &[u8], offset: usize, pattern: &[u8]) -> bool {
    offset
        .checked_add(pattern.len())
        .and_then(|end| buf.get(offset..end))
        .is_some_and(|window| window == pattern)
}

/// Lowest offset at or after `from` where `pattern` starts.
///
/// Plain linear scan; the patterns this crate looks for are at most 11 bytes.
pub fn find_pattern(buf: &[u8], from: usize, pattern: &[u8]) -> Option<usize> {
    if pattern.is_empty() || from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(pattern.len())
        .position(|window| window == pattern)
        .map(|pos| from + pos)
}

/// Render `count` bytes starting at `offset` as 16-byte rows of uppercase hex.
///
/// The range is clamped to the buffer; an offset past the end yields no rows.
pub fn hex_lines(buf: &[u8], offset: usize, count: usize) -> Vec<String> {
    let start = offset.min(buf.len());
    let end = start.saturating_add(count).min(buf.len());

    buf[start..end]
        .chunks(16)
        .enumerate()
        .map(|(row, chunk)| {
            let bytes: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
            format!("Offset {}: {}", start + row * 16, bytes.join(" "))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_le() {
        let buf = [0x78, 0x56, 0x34, 0x12, 0xFF];
        assert_eq!(read_u32_le(&buf, 0), 0x1234_5678);
        assert_eq!(read_u32_le(&buf, 1), 0xFF12_3456);
    }

    #[test]
    fn test_read_u32_le_short_read_is_zero() {
        let buf = [1, 2, 3, 4, 5];
        assert_eq!(read_u32_le(&buf, 2), 0);
        assert_eq!(read_u32_le(&buf, 5), 0);
        assert_eq!(read_u32_le(&buf, usize::MAX - 1), 0);
        assert_eq!(read_u32_le(&[], 0), 0);
    }

    #[test]
    fn test_match_pattern() {
        let buf = b"xxABCyy";
        assert!(match_pattern(buf, 2, b"ABC"));
        assert!(!match_pattern(buf, 1, b"ABC"));
        // Would read past the end
        assert!(!match_pattern(buf, 5, b"yyz"));
        assert!(!match_pattern(buf, usize::MAX, b"A"));
    }

    #[test]
    fn test_find_pattern() {
        let buf = b"abcabcabc";
        assert_eq!(find_pattern(buf, 0, b"bc"), Some(1));
        assert_eq!(find_pattern(buf, 2, b"bc"), Some(4));
        assert_eq!(find_pattern(buf, 0, b"zz"), None);
        assert_eq!(find_pattern(buf, 9, b"a"), None);
        assert_eq!(find_pattern(buf, 0, b""), None);
        assert_eq!(find_pattern(b"ab", 0, b"abc"), None);
    }

    #[test]
    fn test_hex_lines() {
        let buf: Vec<u8> = (0u8..20).collect();
        let lines = hex_lines(&buf, 0, 50);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Offset 0: 00 01 02 03 04 05 06 07 08 09 0A 0B 0C 0D 0E 0F"
        );
        assert_eq!(lines[1], "Offset 16: 10 11 12 13");

        assert_eq!(hex_lines(&buf, 18, 4), vec!["Offset 18: 12 13".to_string()]);
        assert!(hex_lines(&buf, 40, 4).is_empty());
    }
}
