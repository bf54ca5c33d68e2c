//! The conversation log of a session.

use std::fmt::{self, Display};
use std::slice;
use std::time::Duration;

use converse_model::{Message, Role};
use serde::{Deserialize, Serialize};

/// Identifies an entry, unique within the session that created it.
///
/// Identifiers are assigned in increasing order and never reused, even
/// after the entries are discarded.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct EntryId(u64);

impl Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry:{}", self.0)
    }
}

/// Measurements of one model completion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetrics {
    /// Number of generated tokens.
    pub tokens: u64,
    /// Time from sending the request to the end of the response.
    pub latency: Duration,
    /// Time from sending the request to the first token, if any.
    pub time_to_first_token: Option<Duration>,
    /// The backend's confidence in the response, if reported.
    pub confidence: Option<f64>,
}

/// An entry in the transcript.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranscriptEntry {
    id: EntryId,
    message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<CompletionMetrics>,
}

impl TranscriptEntry {
    /// Returns the identifier of this entry.
    #[inline]
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns the message of this entry.
    #[inline]
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Returns the metrics of the completion that produced this entry.
    ///
    /// Only the assistant entry that ends a turn has metrics, the ones
    /// requesting function calls don't.
    #[inline]
    pub fn metrics(&self) -> Option<&CompletionMetrics> {
        self.metrics.as_ref()
    }
}

/// An ordered log of the conversation.
///
/// Entries are kept in the order they were appended, which is the order of
/// the conversation. The transcript is owned by its session; callers only
/// get snapshots of it.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    #[serde(skip)]
    next_id: u64,
}

impl Transcript {
    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the transcript has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all entries.
    #[inline]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// Returns an iterator over the entries.
    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, TranscriptEntry> {
        self.entries.iter()
    }

    /// Returns the entry with the given identifier.
    pub fn get(&self, id: EntryId) -> Option<&TranscriptEntry> {
        // Identifiers increase along with the entries.
        self.entries
            .binary_search_by_key(&id, TranscriptEntry::id)
            .ok()
            .map(|idx| &self.entries[idx])
    }

    /// Returns the messages of all entries.
    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub(crate) fn push(
        &mut self,
        message: Message,
        metrics: Option<CompletionMetrics>,
    ) -> TranscriptEntry {
        debug_assert!(
            metrics.is_none()
                || (message.role() == Role::Assistant
                    && message.function_calls().is_empty()),
            "only final assistant entries carry metrics"
        );
        let id = EntryId(self.next_id);
        self.next_id += 1;
        let entry = TranscriptEntry {
            id,
            message,
            metrics,
        };
        self.entries.push(entry.clone());
        entry
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<'a> IntoIterator for &'a Transcript {
    type Item = &'a TranscriptEntry;
    type IntoIter = slice::Iter<'a, TranscriptEntry>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
