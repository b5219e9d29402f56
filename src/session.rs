//! One loaded board image and the structures decoded from it.
//!
//! An [`EditSession`] is created by [`EditSession::load`], mutated through its
//! edit methods, and written back by [`EditSession::rebuild`]. A rebuild works
//! on a scratch buffer and only replaces the session image once every splice
//! has been applied, so a failed rebuild leaves the loaded image authoritative.
//!
//! Rebuilding takes `&mut self`, so at most one rebuild can be in flight for a
//! session.

use thiserror::Error;

use crate::config::CodecConfig;
use crate::diagnostic::Diagnostic;
use crate::edit::{apply_splices, PatchError};
use crate::netlist::{decode_netlist, NetRecord, NetlistBlock, NetlistError, ENTRY_HEADER_LEN};
use crate::trailer::{
    append_trailer, decode_trailer, find_json_end, find_marker, BoardDocument, DocumentError,
    JsonTrailer, TrailerError, MARKER_LEN,
};

/// Failure to turn the edited session back into bytes.
///
/// The session image is unchanged whenever one of these is returned.
#[derive(Error, Debug)]
pub enum RebuildError {
    #[error("failed to encode net block: {0}")]
    Netlist(#[from] NetlistError),

    #[error("failed to encode JSON trailer: {0}")]
    Trailer(#[from] TrailerError),

    #[error("failed to apply splice: {0}")]
    Patch(#[from] PatchError),

    #[error("JSON trailer marker not found after rewriting the net block")]
    TrailerLost,
}

/// A rejected edit. The session is unchanged whenever one of these is returned.
#[derive(Error, Debug)]
pub enum EditError {
    #[error("no net block was decoded from this image")]
    NoNetlist,

    #[error("image has no JSON trailer")]
    NoTrailer,

    #[error("net position {position} out of range (have {len})")]
    PositionOutOfRange { position: usize, len: usize },

    #[error("net name must not be empty")]
    EmptyName,

    #[error("net name {name:?} contains control characters")]
    ControlCharacter { name: String },

    #[error("net name of {len} bytes exceeds the {max}-byte entry limit")]
    NameTooLong { len: usize, max: u32 },

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Trailer(#[from] TrailerError),
}

/// Everything the decoders had to skip while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub warnings: Vec<Diagnostic>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EditSession {
    image: Vec<u8>,
    config: CodecConfig,
    netlist: Option<NetlistBlock>,
    trailer: Option<JsonTrailer>,
}

impl EditSession {
    /// Decode `image`. Never fails: whatever could not be decoded is reported
    /// in the returned [`LoadReport`].
    pub fn load(image: Vec<u8>, config: CodecConfig) -> (Self, LoadReport) {
        let mut warnings = Vec::new();
        let netlist = decode_netlist(&image, &config.netlist, &mut warnings);
        let trailer = decode_trailer(&image, &mut warnings);
        tracing::debug!(
            len = image.len(),
            nets = netlist.as_ref().map_or(0, |block| block.records.len()),
            trailer = trailer.is_some(),
            warnings = warnings.len(),
            "loaded board image"
        );
        (
            Self {
                image,
                config,
                netlist,
                trailer,
            },
            LoadReport { warnings },
        )
    }

    /// Replace the image, discarding every pending edit.
    pub fn reload(&mut self, image: Vec<u8>) -> LoadReport {
        let (session, report) = Self::load(image, self.config.clone());
        *self = session;
        report
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn into_image(self) -> Vec<u8> {
        self.image
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn netlist(&self) -> Option<&NetlistBlock> {
        self.netlist.as_ref()
    }

    /// Direct access to the decoded records. Edits made here bypass name
    /// validation and are checked again when the block is encoded.
    pub fn netlist_mut(&mut self) -> Option<&mut NetlistBlock> {
        self.netlist.as_mut()
    }

    pub fn records(&self) -> &[NetRecord] {
        self.netlist
            .as_ref()
            .map(|block| block.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn trailer(&self) -> Option<&JsonTrailer> {
        self.trailer.as_ref()
    }

    pub fn document(&self) -> Option<&BoardDocument> {
        self.trailer.as_ref().map(|trailer| &trailer.document)
    }

    pub fn document_mut(&mut self) -> Option<&mut BoardDocument> {
        self.trailer.as_mut().map(|trailer| &mut trailer.document)
    }

    /// Position of the first record named exactly `name`.
    pub fn find_net(&self, name: &str) -> Option<usize> {
        self.records().iter().position(|record| record.name == name)
    }

    /// Rename the record at `position`, recomputing its encoded size.
    pub fn rename_net(&mut self, position: usize, name: &str) -> Result<(), EditError> {
        validate_net_name(name, self.config.netlist.max_entry_size)?;
        let block = self.netlist.as_mut().ok_or(EditError::NoNetlist)?;
        let len = block.records.len();
        let record = block
            .records
            .get_mut(position)
            .ok_or(EditError::PositionOutOfRange { position, len })?;
        tracing::debug!(position, from = %record.name, to = name, "renaming net");
        record.rename(name);
        Ok(())
    }

    /// Swap the whole trailer document for the JSON object in `text`.
    pub fn replace_json_text(&mut self, text: &str) -> Result<(), EditError> {
        let trailer = self.trailer.as_mut().ok_or(EditError::NoTrailer)?;
        trailer.document = BoardDocument::parse(text)?;
        Ok(())
    }

    /// Pretty-printed trailer document, if there is one.
    pub fn format_json(&self) -> Option<String> {
        self.document().map(BoardDocument::to_pretty_string)
    }

    /// Append a marker and the default document, then reload.
    ///
    /// Pending edits are discarded, as with any reload.
    pub fn add_json_trailer(&mut self) -> Result<LoadReport, EditError> {
        let image = add_json_trailer(&self.image, &self.config)?;
        Ok(self.reload(image))
    }

    /// Encode the current records and document back into the image.
    ///
    /// The net block is spliced first. The trailer is then located again by
    /// searching the new buffer for its marker before its payload is replaced.
    /// On success the session image is replaced and re-decoded, so offsets
    /// reflect the new layout.
    pub fn rebuild(&mut self) -> Result<&[u8], RebuildError> {
        let before = self.image.len();
        let mut working = match self.netlist.as_mut() {
            Some(block) => {
                let splice = block.encode(&self.image, self.config.netlist.max_entry_size)?;
                tracing::debug!(delta = splice.delta(), "applying net block splice");
                apply_splices(&self.image, &[splice])?
            }
            None => self.image.clone(),
        };

        if let Some(trailer) = &self.trailer {
            let relocated = relocate_trailer(&working, trailer)?;
            let splice = relocated.encode(&working)?;
            working = apply_splices(&working, &[splice])?;
        }

        tracing::debug!(before, after = working.len(), "rebuilt board image");

        let mut warnings = Vec::new();
        let netlist = decode_netlist(&working, &self.config.netlist, &mut warnings);
        let trailer = decode_trailer(&working, &mut warnings);
        for warning in &warnings {
            tracing::debug!(%warning, "finding in rebuilt image");
        }
        self.image = working;
        self.netlist = netlist;
        self.trailer = trailer;
        Ok(&self.image)
    }
}

/// `bytes` with a marker and the default document appended.
pub fn add_json_trailer(bytes: &[u8], config: &CodecConfig) -> Result<Vec<u8>, TrailerError> {
    append_trailer(
        bytes,
        &BoardDocument::default_board(),
        config.trailer.marker,
        config.trailer.pretty_on_append,
    )
}

fn validate_net_name(name: &str, max_entry_size: u32) -> Result<(), EditError> {
    if name.is_empty() {
        return Err(EditError::EmptyName);
    }
    // Control characters are stripped on decode and would desync the record.
    if name.chars().any(char::is_control) {
        return Err(EditError::ControlCharacter {
            name: name.to_string(),
        });
    }
    if ENTRY_HEADER_LEN + name.len() > max_entry_size as usize {
        return Err(EditError::NameTooLong {
            len: name.len(),
            max: max_entry_size,
        });
    }
    Ok(())
}

/// The trailer's current document placed at the marker found in `buf`.
fn relocate_trailer(buf: &[u8], trailer: &JsonTrailer) -> Result<JsonTrailer, RebuildError> {
    let (marker_offset, marker) = find_marker(buf).ok_or(RebuildError::TrailerLost)?;
    let payload_start = marker_offset + MARKER_LEN;
    let payload_end = find_json_end(buf, payload_start);
    tracing::debug!(
        old_offset = trailer.marker_offset,
        new_offset = marker_offset,
        payload_start,
        payload_end,
        "re-derived JSON trailer location"
    );
    Ok(JsonTrailer {
        marker,
        marker_offset,
        payload_start,
        payload_end,
        document: trailer.document.clone(),
    })
}
