//! Reassembly of incoming files from ordered peer-channel frames.
//!
//! The sender serializes files: `file-meta`, then every chunk, then
//! `file-end`, before the next `file-meta`. The table enforces that order
//! and fails loudly on any frame that breaks it instead of guessing which
//! file a chunk belongs to.

use std::collections::{HashMap, HashSet};

use peerdrop_types::{FileId, FileMeta};
use thiserror::Error;

use crate::files::ReceivedFile;

/// Frame-order violations detected while reassembling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// A new file began before the active one ended.
    #[error("file {incoming} began while file {active} is still in progress")]
    Interleaved {
        /// File still in progress.
        active: FileId,
        /// File that tried to begin.
        incoming: FileId,
    },

    /// A file id was announced twice in one session.
    #[error("file {0} announced twice")]
    DuplicateFile(FileId),

    /// A chunk arrived with no file in progress.
    #[error("chunk received with no file in progress")]
    NoActiveFile,

    /// `file-end` for a file that was never announced.
    #[error("end of unknown file {0}")]
    UnknownFile(FileId),

    /// More bytes arrived than the announced size.
    #[error("file {id} exceeded its announced size of {declared} bytes")]
    Oversized {
        /// The file.
        id: FileId,
        /// Announced size.
        declared: u64,
    },

    /// Fewer bytes arrived than the announced size.
    #[error("file {id} ended after {received} of {declared} bytes")]
    SizeMismatch {
        /// The file.
        id: FileId,
        /// Announced size.
        declared: u64,
        /// Bytes received.
        received: u64,
    },
}

#[derive(Debug)]
struct IncomingFile {
    meta: FileMeta,
    fragments: Vec<Vec<u8>>,
    received: u64,
}

/// Owned table of files being received, keyed by file id.
///
/// File ids are unique for the lifetime of the table, finished files
/// included.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    incoming: HashMap<FileId, IncomingFile>,
    finished: HashSet<FileId>,
    active: Option<FileId>,
}

impl ReassemblyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a file announced by `file-meta`.
    pub fn begin(&mut self, meta: FileMeta) -> Result<(), ReassemblyError> {
        if let Some(active) = self.active {
            return Err(ReassemblyError::Interleaved {
                active,
                incoming: meta.id,
            });
        }
        if self.incoming.contains_key(&meta.id) || self.finished.contains(&meta.id) {
            return Err(ReassemblyError::DuplicateFile(meta.id));
        }
        self.active = Some(meta.id);
        self.incoming.insert(
            meta.id,
            IncomingFile {
                meta,
                fragments: Vec::new(),
                received: 0,
            },
        );
        Ok(())
    }

    /// Append a chunk to the active file.
    pub fn append(&mut self, chunk: Vec<u8>) -> Result<(), ReassemblyError> {
        let id = self.active.ok_or(ReassemblyError::NoActiveFile)?;
        let file = self
            .incoming
            .get_mut(&id)
            .ok_or(ReassemblyError::NoActiveFile)?;
        file.received += chunk.len() as u64;
        if file.received > file.meta.size {
            return Err(ReassemblyError::Oversized {
                id,
                declared: file.meta.size,
            });
        }
        file.fragments.push(chunk);
        Ok(())
    }

    /// Complete a file on `file-end` and hand back its contents.
    pub fn finish(&mut self, id: FileId) -> Result<ReceivedFile, ReassemblyError> {
        let file = self
            .incoming
            .remove(&id)
            .ok_or(ReassemblyError::UnknownFile(id))?;
        if self.active == Some(id) {
            self.active = None;
        }
        self.finished.insert(id);
        if file.received != file.meta.size {
            return Err(ReassemblyError::SizeMismatch {
                id,
                declared: file.meta.size,
                received: file.received,
            });
        }
        Ok(ReceivedFile {
            id,
            name: file.meta.name,
            mime: file.meta.mime,
            bytes: file.fragments.concat(),
        })
    }

    /// File currently receiving chunks.
    pub fn active(&self) -> Option<FileId> {
        self.active
    }

    /// Number of files begun but not finished.
    pub fn pending(&self) -> usize {
        self.incoming.len()
    }

    /// Number of files completed.
    pub fn finished(&self) -> usize {
        self.finished.len()
    }

    /// Drop every partial file.
    pub fn clear(&mut self) {
        self.incoming.clear();
        self.active = None;
    }
}
