//! Boardpatch: edit the net block and JSON trailer of binary board images
//!
//! A board image carries two editable structures inside otherwise opaque
//! bytes: a length-prefixed block of net entries located through a header
//! field, and an optional JSON document appended after a fixed marker.
//! Everything else in the file is preserved byte-for-byte.
//!
//! # Architecture
//!
//! All writes compile down to a single primitive: [`Splice`], a verified
//! byte-range replacement applied by [`apply_splices`]. The codecs only decide
//! *which* range to replace and with what; the splice layer checks that the
//! replaced bytes are the ones the codec decoded and that the output stays
//! within its planned size.
//!
//! # Safety
//!
//! - Every splice verifies its before-bytes before applying
//! - A failed rebuild leaves the loaded image untouched
//! - Trailer offsets are re-derived from the rebuilt buffer, never shifted
//! - Atomic file writes (tempfile + fsync + rename)
//! - Decode problems are reported as [`Diagnostic`]s, never as panics
//!
//! # Example
//!
//! ```no_run
//! use boardpatch::{CodecConfig, EditSession};
//!
//! let bytes = std::fs::read("board.pcb").unwrap();
//! let (mut session, report) = EditSession::load(bytes, CodecConfig::default());
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//!
//! if let Some(position) = session.find_net("GND") {
//!     session.rename_net(position, "GND_MAIN").unwrap();
//! }
//! let rebuilt = session.rebuild().unwrap();
//! std::fs::write("board.out.pcb", rebuilt).unwrap();
//! ```

pub mod config;
pub mod cursor;
pub mod diagnostic;
pub mod edit;
pub mod layout;
pub mod netlist;
pub mod safety;
pub mod session;
pub mod trailer;

// Re-exports
pub use config::{discover, load_from_path, load_from_str, CodecConfig, ConfigError};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use edit::{apply_splices, PatchError, Splice, SpliceVerification};
pub use layout::{HeaderLayout, LayoutChoice};
pub use netlist::{decode_netlist, BlockEndPolicy, NetRecord, NetlistBlock, NetlistError};
pub use safety::{atomic_write, SafetyError, SourceGuard};
pub use session::{add_json_trailer, EditError, EditSession, LoadReport, RebuildError};
pub use trailer::{
    decode_trailer, diode_reading, BoardDocument, DocumentError, JsonTrailer, MarkerVariant,
    TrailerError,
};
