//! Acknowledgement accounting for outgoing batches.
//!
//! A batch is the list of files submitted in one send call. Its outstanding
//! count is fixed at submission and decremented once per `file-received`
//! acknowledgement; the batch completes exactly when the count reaches zero.
//! At most one batch is in flight per session ([`BatchSlot`]).

use std::collections::HashSet;

use peerdrop_types::FileId;
use thiserror::Error;

/// Errors from batch accounting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    /// A batch is already in flight.
    #[error("a batch is already in flight")]
    AlreadyInFlight,

    /// The batch contains no files.
    #[error("cannot send an empty batch")]
    Empty,

    /// No batch is in flight.
    #[error("no batch in flight")]
    NotInFlight,

    /// Acknowledgement for a file that is not part of the batch.
    #[error("acknowledgement for unknown file {0}")]
    UnknownFile(FileId),

    /// Second acknowledgement for the same file.
    #[error("duplicate acknowledgement for file {0}")]
    DuplicateAck(FileId),

    /// Acknowledgement after every file was acknowledged.
    #[error("acknowledgement with nothing outstanding")]
    NothingOutstanding,
}

/// Progress after an acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchProgress {
    /// More acknowledgements are expected.
    Pending {
        /// Files acknowledged so far.
        acknowledged: usize,
        /// Files in the batch.
        total: usize,
    },
    /// Every file was acknowledged.
    Complete {
        /// Files in the batch.
        total: usize,
    },
}

/// Acknowledgement counter for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingBatch {
    files: Vec<FileId>,
    acknowledged: HashSet<FileId>,
    outstanding: usize,
}

impl OutgoingBatch {
    /// Start counting acknowledgements for `files`.
    pub fn new(files: Vec<FileId>) -> Result<Self, BatchError> {
        if files.is_empty() {
            return Err(BatchError::Empty);
        }
        let outstanding = files.len();
        Ok(Self {
            files,
            acknowledged: HashSet::new(),
            outstanding,
        })
    }

    /// Record one acknowledgement.
    ///
    /// `id` is the file echoed by the receiver. Peers that do not echo an id
    /// acknowledge the oldest unacknowledged file.
    pub fn acknowledge(&mut self, id: Option<FileId>) -> Result<BatchProgress, BatchError> {
        if self.outstanding == 0 {
            return Err(BatchError::NothingOutstanding);
        }
        let id = match id {
            Some(id) => {
                if !self.files.contains(&id) {
                    return Err(BatchError::UnknownFile(id));
                }
                if self.acknowledged.contains(&id) {
                    return Err(BatchError::DuplicateAck(id));
                }
                id
            }
            None => self
                .files
                .iter()
                .copied()
                .find(|f| !self.acknowledged.contains(f))
                .ok_or(BatchError::NothingOutstanding)?,
        };
        self.acknowledged.insert(id);
        self.outstanding -= 1;
        Ok(self.progress())
    }

    /// Current progress.
    pub fn progress(&self) -> BatchProgress {
        if self.outstanding == 0 {
            BatchProgress::Complete { total: self.total() }
        } else {
            BatchProgress::Pending {
                acknowledged: self.acknowledged_count(),
                total: self.total(),
            }
        }
    }

    /// Files in the batch.
    pub fn total(&self) -> usize {
        self.files.len()
    }

    /// Files acknowledged so far.
    pub fn acknowledged_count(&self) -> usize {
        self.files.len() - self.outstanding
    }

    /// Files still awaiting acknowledgement.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// True once every file was acknowledged.
    pub fn is_complete(&self) -> bool {
        self.outstanding == 0
    }
}

/// The single batch a session may have in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSlot {
    current: Option<OutgoingBatch>,
}

impl BatchSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new batch.
    pub fn begin(&mut self, files: Vec<FileId>) -> Result<(), BatchError> {
        if self.current.is_some() {
            return Err(BatchError::AlreadyInFlight);
        }
        self.current = Some(OutgoingBatch::new(files)?);
        Ok(())
    }

    /// Record an acknowledgement; the slot frees itself on completion.
    pub fn acknowledge(&mut self, id: Option<FileId>) -> Result<BatchProgress, BatchError> {
        let batch = self.current.as_mut().ok_or(BatchError::NotInFlight)?;
        let progress = batch.acknowledge(id)?;
        if let BatchProgress::Complete { .. } = progress {
            self.current = None;
        }
        Ok(progress)
    }

    /// Free the slot without completing; returns `(acknowledged, total)`.
    pub fn abandon(&mut self) -> Option<(usize, usize)> {
        self.current
            .take()
            .map(|batch| (batch.acknowledged_count(), batch.total()))
    }

    /// True while a batch is in flight.
    pub fn is_in_flight(&self) -> bool {
        self.current.is_some()
    }

    /// The batch in flight, if any.
    pub fn current(&self) -> Option<&OutgoingBatch> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<FileId> {
        (0..n).map(|_| FileId::new()).collect()
    }

    #[test]
    fn empty_batch_rejected() {
        assert_eq!(OutgoingBatch::new(vec![]), Err(BatchError::Empty));
    }

    #[test]
    fn completes_after_every_ack() {
        let files = ids(3);
        let mut batch = OutgoingBatch::new(files.clone()).unwrap();
        assert_eq!(
            batch.acknowledge(Some(files[1])).unwrap(),
            BatchProgress::Pending {
                acknowledged: 1,
                total: 3
            }
        );
        batch.acknowledge(Some(files[0])).unwrap();
        assert_eq!(
            batch.acknowledge(Some(files[2])).unwrap(),
            BatchProgress::Complete { total: 3 }
        );
        assert!(batch.is_complete());
    }

    #[test]
    fn ack_without_id_takes_oldest() {
        let files = ids(2);
        let mut batch = OutgoingBatch::new(files.clone()).unwrap();
        batch.acknowledge(None).unwrap();
        assert_eq!(
            batch.acknowledge(Some(files[0])),
            Err(BatchError::DuplicateAck(files[0]))
        );
        assert!(batch.acknowledge(Some(files[1])).is_ok());
    }

    #[test]
    fn unknown_and_duplicate_acks_do_not_count() {
        let files = ids(2);
        let mut batch = OutgoingBatch::new(files.clone()).unwrap();
        let stranger = FileId::new();
        assert_eq!(
            batch.acknowledge(Some(stranger)),
            Err(BatchError::UnknownFile(stranger))
        );
        batch.acknowledge(Some(files[0])).unwrap();
        assert!(batch.acknowledge(Some(files[0])).is_err());
        assert_eq!(batch.outstanding(), 1);
    }

    #[test]
    fn extra_ack_after_complete_is_rejected() {
        let files = ids(1);
        let mut batch = OutgoingBatch::new(files).unwrap();
        batch.acknowledge(None).unwrap();
        assert_eq!(batch.acknowledge(None), Err(BatchError::NothingOutstanding));
    }

    #[test]
    fn slot_allows_one_batch_at_a_time() {
        let mut slot = BatchSlot::new();
        slot.begin(ids(1)).unwrap();
        assert_eq!(slot.begin(ids(1)), Err(BatchError::AlreadyInFlight));
        assert!(slot.is_in_flight());
    }

    #[test]
    fn slot_frees_on_completion() {
        let files = ids(2);
        let mut slot = BatchSlot::new();
        slot.begin(files.clone()).unwrap();
        slot.acknowledge(Some(files[0])).unwrap();
        assert!(slot.is_in_flight());
        slot.acknowledge(Some(files[1])).unwrap();
        assert!(!slot.is_in_flight());
        assert_eq!(slot.acknowledge(None), Err(BatchError::NotInFlight));
        slot.begin(ids(1)).unwrap();
    }

    #[test]
    fn abandon_reports_progress() {
        let files = ids(3);
        let mut slot = BatchSlot::new();
        slot.begin(files.clone()).unwrap();
        slot.acknowledge(Some(files[2])).unwrap();
        assert_eq!(slot.abandon(), Some((1, 3)));
        assert_eq!(slot.abandon(), None);
        assert!(!slot.is_in_flight());
    }
}
