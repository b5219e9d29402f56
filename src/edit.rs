//! The splice primitive: verified byte-range replacement over a board image.
//!
//! Every re-encode in this crate compiles down to one or more [`Splice`]s.
//! A splice names an original `[byte_start, byte_end)` range, the bytes that
//! replace it, and what the original range is expected to contain. The
//! codecs decide *where* to splice; [`apply_splices`] only checks and copies.

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Verified byte-range replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Splice does nothing until passed to apply_splices()"]
pub struct Splice {
    /// Starting byte offset in the original buffer (inclusive)
    pub byte_start: usize,
    /// Ending byte offset in the original buffer (exclusive)
    pub byte_end: usize,
    /// Bytes written in place of [byte_start, byte_end)
    pub new_bytes: Vec<u8>,
    /// What the original range must contain for the splice to apply
    pub expected_before: SpliceVerification,
}

/// Verification strategy for the bytes a splice replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceVerification {
    /// Exact byte match required
    ExactMatch(Vec<u8>),
    /// xxh3 hash of the expected bytes (used for large ranges)
    Hash(u64),
}

impl SpliceVerification {
    /// Check if the provided bytes match the verification criteria.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            SpliceVerification::ExactMatch(expected) => bytes == expected.as_slice(),
            SpliceVerification::Hash(expected_hash) => xxh3_64(bytes) == *expected_hash,
        }
    }

    /// Create verification from bytes, using a hash above 1 KiB.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() > 1024 {
            SpliceVerification::Hash(xxh3_64(bytes))
        } else {
            SpliceVerification::ExactMatch(bytes.to_vec())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Invalid byte range: [{byte_start}, {byte_end}) in buffer of length {buf_len}")]
    InvalidRange {
        byte_start: usize,
        byte_end: usize,
        buf_len: usize,
    },

    #[error(
        "Splice at {byte_start} overlaps or precedes the previous splice ending at {previous_end}"
    )]
    Overlap { previous_end: usize, byte_start: usize },

    #[error("Original bytes at [{byte_start}, {byte_end}) do not match what the splice expects")]
    BeforeBytesMismatch { byte_start: usize, byte_end: usize },

    #[error("Patched output would exceed its planned size of {planned} bytes (needed {needed})")]
    OutputOverflow { planned: usize, needed: usize },
}

impl Splice {
    /// Create a splice with automatic verification generation.
    pub fn new(
        byte_start: usize,
        byte_end: usize,
        new_bytes: impl Into<Vec<u8>>,
        expected_before: &[u8],
    ) -> Self {
        Self {
            byte_start,
            byte_end,
            new_bytes: new_bytes.into(),
            expected_before: SpliceVerification::from_bytes(expected_before),
        }
    }

    /// Plan a splice against `buf`, capturing the current range contents as
    /// the expected before-bytes.
    pub fn against(
        buf: &[u8],
        byte_start: usize,
        byte_end: usize,
        new_bytes: impl Into<Vec<u8>>,
    ) -> Result<Self, PatchError> {
        let current = checked_range(buf, byte_start, byte_end)?;
        Ok(Self::new(byte_start, byte_end, new_bytes, current))
    }

    /// Zero-length splice inserting `new_bytes` at the end of `buf`.
    pub fn append(buf: &[u8], new_bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(buf.len(), buf.len(), new_bytes, &[])
    }

    /// Length of the original range.
    pub fn original_len(&self) -> usize {
        self.byte_end - self.byte_start
    }

    /// Size change this splice causes; positive when the region grows.
    pub fn delta(&self) -> isize {
        self.new_bytes.len() as isize - self.original_len() as isize
    }

    fn validate(&self, buf: &[u8]) -> Result<(), PatchError> {
        let current = checked_range(buf, self.byte_start, self.byte_end)?;
        if !self.expected_before.matches(current) {
            return Err(PatchError::BeforeBytesMismatch {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
            });
        }
        Ok(())
    }
}

fn checked_range(buf: &[u8], byte_start: usize, byte_end: usize) -> Result<&[u8], PatchError> {
    if byte_start > byte_end || byte_end > buf.len() {
        return Err(PatchError::InvalidRange {
            byte_start,
            byte_end,
            buf_len: buf.len(),
        });
    }
    Ok(&buf[byte_start..byte_end])
}

/// Apply ascending, disjoint splices to `buf`, producing a fresh buffer.
///
/// Output is: bytes before the first splice, then each splice's new bytes
/// followed by the untouched bytes up to the next splice, then the tail. All
/// splices are validated before anything is copied, and the output is never
/// allowed to grow past the size computed up front.
pub fn apply_splices(buf: &[u8], splices: &[Splice]) -> Result<Vec<u8>, PatchError> {
    for splice in splices {
        splice.validate(buf)?;
    }

    // Ascending and non-overlapping; touching ranges are fine
    for window in splices.windows(2) {
        let (earlier, later) = (&window[0], &window[1]);
        if later.byte_start < earlier.byte_end {
            return Err(PatchError::Overlap {
                previous_end: earlier.byte_end,
                byte_start: later.byte_start,
            });
        }
    }

    let removed: usize = splices.iter().map(Splice::original_len).sum();
    let added: usize = splices.iter().map(|s| s.new_bytes.len()).sum();
    let planned = buf.len() - removed + added;

    let mut output = Vec::with_capacity(planned);
    let mut cursor = 0;
    for splice in splices {
        extend_bounded(&mut output, &buf[cursor..splice.byte_start], planned)?;
        extend_bounded(&mut output, &splice.new_bytes, planned)?;
        cursor = splice.byte_end;
    }
    extend_bounded(&mut output, &buf[cursor..], planned)?;

    if output.len() != planned {
        return Err(PatchError::OutputOverflow {
            planned,
            needed: output.len(),
        });
    }

    tracing::debug!(
        splices = splices.len(),
        before = buf.len(),
        after = output.len(),
        "applied splices"
    );
    Ok(output)
}

fn extend_bounded(output: &mut Vec<u8>, bytes: &[u8], planned: usize) -> Result<(), PatchError> {
    let needed = output.len() + bytes.len();
    if needed > planned {
        return Err(PatchError::OutputOverflow { planned, needed });
    }
    output.extend_from_slice(bytes);
    Ok(())
}
