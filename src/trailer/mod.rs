pub mod codec;
pub mod document;
pub mod errors;

pub use codec::{
    append_trailer, decode_trailer, find_json_end, find_marker, JsonTrailer, MarkerVariant,
    MARKER_LEN, MARKER_PREFIX,
};
pub use document::{diode_reading, field_text, BoardDocument, NetFields, PadFields, PartFields};
pub use errors::{DocumentError, TrailerError};
