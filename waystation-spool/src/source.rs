//! The queue-file collaborator the scheduler's ingester reads through.
//!
//! `offset` follows the base spec's `rcpt_offset` convention: `0` means
//! either "nothing read yet" or "fully read" (the two collapse for any
//! message whose recipient list fits in a single batch), and any other
//! value names the index of the next unread recipient.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use waystation_common::Recipient;

use crate::{error::Result, id::QueueId, SpoolError};

/// What became of a message once the scheduler is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Every recipient was delivered (or bounced); the queue file is removed.
    Sent,
    /// The message's envelope could not be parsed; moved aside for
    /// operator inspection rather than retried.
    Corrupt,
}

/// A batch of recipients read from a queue file, and where the next read
/// should resume.
#[derive(Debug, Clone)]
pub struct RecipientBatch {
    pub recipients: Vec<Recipient>,
    /// Next unread record index, or `0` if the file is now fully read.
    pub next_offset: usize,
}

/// An admitted message: its envelope sender and its full recipient list.
///
/// Real deployments would back this with a parsed on-disk envelope record;
/// the format itself is out of scope here, so this is the whole in-memory
/// representation.
#[derive(Debug, Clone)]
pub struct QueueFile {
    pub id: QueueId,
    pub sender: Arc<str>,
    pub recipients: Vec<Recipient>,
}

impl QueueFile {
    #[must_use]
    pub fn new(id: QueueId, sender: impl Into<Arc<str>>, recipients: Vec<Recipient>) -> Self {
        Self {
            id,
            sender: sender.into(),
            recipients,
        }
    }
}

/// Collaborator standing in for "persistence of queue files" (out of scope
/// per the base spec): admits new messages and streams their recipients in
/// caller-chosen batch sizes.
#[async_trait]
pub trait QueueFileSource: Send + Sync + std::fmt::Debug {
    /// Register a newly-admitted message. Errors if `file.id` is already
    /// known.
    async fn admit(&self, file: QueueFile) -> Result<()>;

    /// The envelope sender for an admitted message.
    async fn sender(&self, id: QueueId) -> Result<Arc<str>>;

    /// The total number of recipients in the envelope, regardless of how
    /// many have been streamed out so far.
    async fn total_recipients(&self, id: QueueId) -> Result<usize>;

    /// Read up to `max` recipients starting at `offset` (see module docs for
    /// the `0` sentinel).
    async fn next_batch(&self, id: QueueId, offset: usize, max: usize) -> Result<RecipientBatch>;

    /// The message is done with; remove (or move aside) its queue file.
    async fn finalize(&self, id: QueueId, outcome: FinalizeOutcome) -> Result<()>;
}

/// An in-memory [`QueueFileSource`], used by the reference binary and by
/// tests. No on-disk format is implied or required.
#[derive(Debug, Default)]
pub struct MemoryQueueFileSource {
    files: RwLock<HashMap<QueueId, QueueFile>>,
    finalized: RwLock<HashMap<QueueId, FinalizeOutcome>>,
}

impl MemoryQueueFileSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// For tests: what outcome (if any) a finalized message was given.
    #[must_use]
    pub fn outcome_of(&self, id: QueueId) -> Option<FinalizeOutcome> {
        self.finalized
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    #[must_use]
    pub fn is_admitted(&self, id: QueueId) -> bool {
        self.files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&id)
    }
}

#[async_trait]
impl QueueFileSource for MemoryQueueFileSource {
    async fn admit(&self, file: QueueFile) -> Result<()> {
        let mut files = self
            .files
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if files.contains_key(&file.id) {
            return Err(SpoolError::AlreadyExists(file.id));
        }
        files.insert(file.id, file);
        Ok(())
    }

    async fn sender(&self, id: QueueId) -> Result<Arc<str>> {
        self.files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .map(|f| f.sender.clone())
            .ok_or(SpoolError::NotFound(id))
    }

    async fn total_recipients(&self, id: QueueId) -> Result<usize> {
        self.files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .map(|f| f.recipients.len())
            .ok_or(SpoolError::NotFound(id))
    }

    async fn next_batch(&self, id: QueueId, offset: usize, max: usize) -> Result<RecipientBatch> {
        let files = self
            .files
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let file = files.get(&id).ok_or(SpoolError::NotFound(id))?;

        let start = offset;
        if start > file.recipients.len() {
            return Err(SpoolError::Corrupt(format!(
                "offset {start} beyond {len} recipients",
                len = file.recipients.len()
            )));
        }

        let end = (start + max).min(file.recipients.len());
        let recipients = file.recipients[start..end].to_vec();
        let next_offset = if end >= file.recipients.len() { 0 } else { end };

        Ok(RecipientBatch {
            recipients,
            next_offset,
        })
    }

    async fn finalize(&self, id: QueueId, outcome: FinalizeOutcome) -> Result<()> {
        let mut files = self
            .files
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if files.remove(&id).is_none() {
            return Err(SpoolError::NotFound(id));
        }
        self.finalized
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n)
            .map(|i| Recipient::new(format!("user{i}@example.com"), i as u64))
            .collect()
    }

    #[tokio::test]
    async fn admit_rejects_duplicate_ids() {
        let source = MemoryQueueFileSource::new();
        let id = QueueId::generate();
        source
            .admit(QueueFile::new(id, "sender@example.com", recipients(1)))
            .await
            .unwrap();

        let err = source
            .admit(QueueFile::new(id, "sender@example.com", recipients(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SpoolError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn next_batch_streams_and_terminates_with_zero_offset() {
        let source = MemoryQueueFileSource::new();
        let id = QueueId::generate();
        source
            .admit(QueueFile::new(id, "sender@example.com", recipients(5)))
            .await
            .unwrap();

        let first = source.next_batch(id, 0, 3).await.unwrap();
        assert_eq!(first.recipients.len(), 3);
        assert_eq!(first.next_offset, 3);

        let second = source.next_batch(id, first.next_offset, 3).await.unwrap();
        assert_eq!(second.recipients.len(), 2);
        assert_eq!(second.next_offset, 0);
    }

    #[tokio::test]
    async fn exact_fit_batch_is_immediately_fully_read() {
        let source = MemoryQueueFileSource::new();
        let id = QueueId::generate();
        source
            .admit(QueueFile::new(id, "sender@example.com", recipients(3)))
            .await
            .unwrap();

        let batch = source.next_batch(id, 0, 10).await.unwrap();
        assert_eq!(batch.recipients.len(), 3);
        assert_eq!(batch.next_offset, 0);
    }

    #[tokio::test]
    async fn finalize_removes_the_file_and_records_outcome() {
        let source = MemoryQueueFileSource::new();
        let id = QueueId::generate();
        source
            .admit(QueueFile::new(id, "sender@example.com", recipients(1)))
            .await
            .unwrap();

        source.finalize(id, FinalizeOutcome::Sent).await.unwrap();
        assert!(!source.is_admitted(id));
        assert_eq!(source.outcome_of(id), Some(FinalizeOutcome::Sent));
    }
}
