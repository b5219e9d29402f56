//! Non-fatal decode findings.
//!
//! Loading a board image never fails outright. Anything the decoders had to
//! skip, truncate, or give up on is recorded as a [`Diagnostic`] and handed
//! back next to whatever was decoded successfully.

use std::fmt;

/// Category of a decode finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// File too short for the header, or the net block offset is out of bounds.
    MalformedHeader,
    /// An entry size outside the accepted range, or an entry overrunning the buffer.
    MalformedEntry,
    /// The entry-count cap was reached.
    EntryLimit,
    /// The declared net block size runs past the end of the buffer.
    BlockSizeOverrun,
    /// Entries were decoded past the declared block end (hint policy only).
    RanPastBlockEnd,
    /// A trailer marker was found but its payload is not valid JSON.
    MalformedJson,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::MalformedHeader => "malformed-header",
            DiagnosticKind::MalformedEntry => "malformed-entry",
            DiagnosticKind::EntryLimit => "entry-limit",
            DiagnosticKind::BlockSizeOverrun => "block-size-overrun",
            DiagnosticKind::RanPastBlockEnd => "ran-past-block-end",
            DiagnosticKind::MalformedJson => "malformed-json",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finding, with the absolute offset it concerns when there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub offset: Option<usize>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, offset: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            kind,
            offset,
            message: message.into(),
        }
    }

    /// Build a diagnostic and emit it as a `warn` event in one step.
    pub(crate) fn warn(kind: DiagnosticKind, offset: Option<usize>, message: impl Into<String>) -> Self {
        let diagnostic = Self::new(kind, offset, message);
        tracing::warn!(
            kind = diagnostic.kind.as_str(),
            offset = diagnostic.offset,
            "{}",
            diagnostic.message
        );
        diagnostic
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "[{}] at offset {offset}: {}", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_offset() {
        let d = Diagnostic::new(DiagnosticKind::MalformedEntry, Some(0x24), "entry size 3");
        assert_eq!(d.to_string(), "[malformed-entry] at offset 36: entry size 3");
    }

    #[test]
    fn test_display_without_offset() {
        let d = Diagnostic::new(DiagnosticKind::MalformedJson, None, "bad payload");
        assert_eq!(d.to_string(), "[malformed-json] bad payload");
    }
}
