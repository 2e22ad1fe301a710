//! Files moving through a session.

use std::fmt;
use std::sync::Arc;

use peerdrop_types::{FileId, FileMeta};

/// A file submitted for sending.
#[derive(Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    /// File name announced to the peer.
    pub name: String,
    /// MIME type announced to the peer.
    pub mime: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl OutgoingFile {
    /// Create an outgoing file.
    pub fn new(name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Metadata announced in the `file-meta` frame.
    pub fn meta(&self, id: FileId) -> FileMeta {
        FileMeta {
            id,
            name: self.name.clone(),
            size: self.size(),
            mime: self.mime.clone(),
        }
    }
}

impl fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A fully reassembled incoming file.
#[derive(Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Identifier assigned by the sender.
    pub id: FileId,
    /// File name as announced.
    pub name: String,
    /// MIME type as announced.
    pub mime: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl ReceivedFile {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl fmt::Debug for ReceivedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// Append-only list of files received during the session lifetime.
///
/// Entries are shared, so cloning the list for a snapshot does not copy
/// file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedFiles {
    files: Vec<Arc<ReceivedFile>>,
}

impl SharedFiles {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a completed file.
    pub fn push(&mut self, file: ReceivedFile) -> Arc<ReceivedFile> {
        let file = Arc::new(file);
        self.files.push(Arc::clone(&file));
        file
    }

    /// Number of files received.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// True if nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// File at `index`, in arrival order.
    pub fn get(&self, index: usize) -> Option<&Arc<ReceivedFile>> {
        self.files.get(index)
    }

    /// Iterate in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ReceivedFile>> {
        self.files.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(name: &str, bytes: &[u8]) -> ReceivedFile {
        ReceivedFile {
            id: FileId::new(),
            name: name.into(),
            mime: "application/octet-stream".into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn outgoing_meta_reports_size() {
        let file = OutgoingFile::new("a.bin", "application/octet-stream", vec![0; 40000]);
        let id = FileId::new();
        let meta = file.meta(id);
        assert_eq!(meta.id, id);
        assert_eq!(meta.size, 40000);
        assert_eq!(meta.name, "a.bin");
    }

    #[test]
    fn debug_hides_contents() {
        let file = OutgoingFile::new("a.bin", "text/plain", b"secret".to_vec());
        let debug = format!("{:?}", file);
        assert!(debug.contains("size: 6"));
        assert!(!debug.contains("115"));
    }

    #[test]
    fn shared_files_keep_arrival_order() {
        let mut files = SharedFiles::new();
        files.push(received("first", b"1"));
        files.push(received("second", b""));
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(files.get(1).map(|f| f.size()), Some(0));
    }

    #[test]
    fn snapshots_share_entries() {
        let mut files = SharedFiles::new();
        let first = files.push(received("first", b"abc"));
        let snapshot = files.clone();
        files.push(received("second", b"def"));
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&first, &snapshot.files[0]));
    }
}
