use serde::Deserialize;
use std::fmt;

use crate::layout::{LayoutChoice, DEFAULT_MIN_HEADER_SIZE, NET_BLOCK_FIELD};
use crate::netlist::{BlockEndPolicy, DEFAULT_MAX_ENTRIES, DEFAULT_MAX_ENTRY_SIZE, ENTRY_HEADER_LEN};
use crate::trailer::MarkerVariant;

/// Codec settings. Every field has a default, so an empty file is valid.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CodecConfig {
    #[serde(default)]
    pub netlist: NetlistConfig,
    #[serde(default)]
    pub trailer: TrailerConfig,
}

impl CodecConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if (self.netlist.max_entry_size as usize) < ENTRY_HEADER_LEN {
            issues.push(ValidationIssue::OutOfRange {
                field: "netlist.max_entry_size",
                message: format!(
                    "{} is smaller than the {ENTRY_HEADER_LEN}-byte entry header",
                    self.netlist.max_entry_size
                ),
            });
        }
        if self.netlist.max_entries == 0 {
            issues.push(ValidationIssue::OutOfRange {
                field: "netlist.max_entries",
                message: "must be at least 1".to_string(),
            });
        }
        if self.netlist.min_header_size < NET_BLOCK_FIELD + 4 {
            issues.push(ValidationIssue::OutOfRange {
                field: "netlist.min_header_size",
                message: format!(
                    "{} would not cover the net block field at {NET_BLOCK_FIELD:#x}",
                    self.netlist.min_header_size
                ),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NetlistConfig {
    pub layout: LayoutChoice,
    pub block_end: BlockEndPolicy,
    pub min_header_size: usize,
    pub max_entry_size: u32,
    pub max_entries: usize,
}

impl Default for NetlistConfig {
    fn default() -> Self {
        Self {
            layout: LayoutChoice::Auto,
            block_end: BlockEndPolicy::Strict,
            min_header_size: DEFAULT_MIN_HEADER_SIZE,
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TrailerConfig {
    /// Marker terminator written when a trailer is appended.
    pub marker: MarkerVariant,
    pub pretty_on_append: bool,
}

impl Default for TrailerConfig {
    fn default() -> Self {
        Self {
            marker: MarkerVariant::Cr,
            pretty_on_append: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    OutOfRange { field: &'static str, message: String },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::OutOfRange { field, message } => {
                write!(f, "'{field}' out of range: {message}")
            }
        }
    }
}
