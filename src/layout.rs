//! Header conventions that locate the net block.
//!
//! Two conventions have been observed in board images. Both read a `u32` from
//! the fixed header field at byte 0x28 (40):
//!
//! - [`HeaderLayout::RelativeBase`]: the field is relative to base 0x20.
//! - [`HeaderLayout::FieldSkip`]: the field is an absolute offset and the
//!   block size field sits 32 bytes further on.
//!
//! For every header both arithmetic forms land on the same offset. They are
//! still kept apart so a configuration can pin one of them and so reports say
//! which convention was validated against the buffer.

use serde::Deserialize;

use crate::cursor::read_u32_le;
use crate::diagnostic::{Diagnostic, DiagnosticKind};

/// Offset of the header field that points at the net block.
pub const NET_BLOCK_FIELD: usize = 0x28;

/// Smallest image the original editor would attempt to decode.
pub const DEFAULT_MIN_HEADER_SIZE: usize = 0x44;

const RELATIVE_BASE: usize = 0x20;
const FIELD_SKIP: usize = 32;

/// A header convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderLayout {
    /// `startOffset = 0x20 + u32le[0x28]`
    RelativeBase,
    /// `startOffset = u32le[40] + 32`
    FieldSkip,
}

impl HeaderLayout {
    pub fn name(self) -> &'static str {
        match self {
            HeaderLayout::RelativeBase => "relative-base",
            HeaderLayout::FieldSkip => "field-skip",
        }
    }

    /// Absolute offset of the net block's 4-byte size field under this convention.
    ///
    /// `None` only on arithmetic overflow; bounds are checked by the caller.
    pub fn start_offset(self, buf: &[u8]) -> Option<usize> {
        let field = usize::try_from(read_u32_le(buf, NET_BLOCK_FIELD)).ok()?;
        match self {
            HeaderLayout::RelativeBase => RELATIVE_BASE.checked_add(field),
            HeaderLayout::FieldSkip => field.checked_add(FIELD_SKIP),
        }
    }
}

/// Which conventions to try, as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutChoice {
    /// Try every known convention, first valid one wins.
    #[default]
    Auto,
    RelativeBase,
    FieldSkip,
}

impl LayoutChoice {
    pub fn candidates(self) -> &'static [HeaderLayout] {
        match self {
            LayoutChoice::Auto => &[HeaderLayout::RelativeBase, HeaderLayout::FieldSkip],
            LayoutChoice::RelativeBase => &[HeaderLayout::RelativeBase],
            LayoutChoice::FieldSkip => &[HeaderLayout::FieldSkip],
        }
    }
}

/// Outcome of header resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLayout {
    pub layout: HeaderLayout,
    /// Absolute offset of the block size field.
    pub start_offset: usize,
    /// Declared size of the entry data following the size field.
    pub total_size: u32,
    /// Whether `start_offset + 4 + total_size` fits inside the buffer.
    pub size_in_bounds: bool,
}

/// Pick the first candidate whose start offset and declared size are in bounds.
///
/// A candidate whose start is in bounds but whose size overruns the buffer is
/// used only when no candidate validates completely.
pub fn resolve_layout(
    buf: &[u8],
    choice: LayoutChoice,
    min_header_size: usize,
) -> Result<ResolvedLayout, Diagnostic> {
    if buf.len() < min_header_size {
        return Err(Diagnostic::warn(
            DiagnosticKind::MalformedHeader,
            None,
            format!(
                "file too small: {} bytes, header needs at least {min_header_size}",
                buf.len()
            ),
        ));
    }

    let mut fallback = None;
    for &layout in choice.candidates() {
        let Some(start) = layout.start_offset(buf) else {
            continue;
        };
        // The size field and at least one byte of entry data must be present.
        if !start.checked_add(4).is_some_and(|end| end < buf.len()) {
            tracing::debug!(layout = layout.name(), start, "net block start out of bounds");
            continue;
        }

        let total_size = read_u32_le(buf, start);
        let size_in_bounds = (start + 4)
            .checked_add(total_size as usize)
            .is_some_and(|end| end <= buf.len());
        let resolved = ResolvedLayout {
            layout,
            start_offset: start,
            total_size,
            size_in_bounds,
        };
        tracing::debug!(
            layout = layout.name(),
            start = format_args!("{start:#x}"),
            total_size,
            size_in_bounds,
            "header candidate"
        );

        if size_in_bounds {
            return Ok(resolved);
        }
        fallback.get_or_insert(resolved);
    }

    fallback.ok_or_else(|| {
        let field = read_u32_le(buf, NET_BLOCK_FIELD);
        Diagnostic::warn(
            DiagnosticKind::MalformedHeader,
            Some(NET_BLOCK_FIELD),
            format!(
                "net block start (field {field:#x}) exceeds file size {}",
                buf.len()
            ),
        )
    })
}
