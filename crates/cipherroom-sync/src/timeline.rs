use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use cipherroom_types::Timestamp;

use crate::pipeline::DecryptedMessage;

/// What an ingest call did to the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

impl IngestOutcome {
    pub fn changed(&self) -> bool {
        self.inserted + self.replaced > 0
    }
}

/// Ordered, de-duplicated view over history pages and live messages.
///
/// Entries are keyed by message id and sorted by `(ordering key, id)`, so
/// the order is total and does not depend on the order of ingestion.
#[derive(Debug, Default)]
pub struct LiveMergeStream {
    ordered: BTreeMap<(Timestamp, String), DecryptedMessage>,
    keys: HashMap<String, Timestamp>,
}

impl LiveMergeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a decrypted history page (older messages, prepended).
    pub fn ingest_history(
        &mut self,
        page: impl IntoIterator<Item = DecryptedMessage>,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        for message in page {
            self.merge(message, &mut outcome);
        }
        outcome
    }

    /// Merge one live message (newest, appended). A message already
    /// delivered by a history page is not duplicated.
    pub fn ingest_live(&mut self, message: DecryptedMessage) -> IngestOutcome {
        let mut outcome = IngestOutcome::default();
        self.merge(message, &mut outcome);
        outcome
    }

    /// Ascending copy of the timeline.
    pub fn snapshot(&self) -> Vec<DecryptedMessage> {
        self.ordered.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecryptedMessage> {
        self.ordered.values()
    }

    pub fn get(&self, id: &str) -> Option<&DecryptedMessage> {
        let key = *self.keys.get(id)?;
        self.ordered.get(&(key, id.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn oldest_key(&self) -> Option<Timestamp> {
        self.ordered.keys().next().map(|(key, _)| *key)
    }

    pub fn newest_key(&self) -> Option<Timestamp> {
        self.ordered.keys().next_back().map(|(key, _)| *key)
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.keys.clear();
    }

    fn merge(&mut self, incoming: DecryptedMessage, outcome: &mut IngestOutcome) {
        let id = incoming.id().to_owned();
        let key = incoming.ordering_key();

        let Some(existing_key) = self.keys.get(&id).copied() else {
            self.keys.insert(id.clone(), key);
            self.ordered.insert((key, id), incoming);
            outcome.inserted += 1;
            return;
        };

        // Never regress to an older version of the record.
        if key < existing_key {
            trace!(message_id = %id, "ignoring older copy of message");
            outcome.unchanged += 1;
            return;
        }

        let slot = (existing_key, id);
        if key == existing_key {
            let keep_current = self
                .ordered
                .get(&slot)
                .is_some_and(|current| precedence(&incoming) <= precedence(current));
            if keep_current {
                outcome.unchanged += 1;
                return;
            }
            self.ordered.insert(slot, incoming);
        } else {
            self.ordered.remove(&slot);
            let (_, id) = slot;
            self.keys.insert(id.clone(), key);
            self.ordered.insert((key, id), incoming);
        }
        outcome.replaced += 1;
    }
}

/// Tie-break between two copies sharing id and ordering key. A decrypted copy
/// beats a failed one; after that the comparison only looks at the wire
/// record, so the winner does not depend on arrival order.
fn precedence(m: &DecryptedMessage) -> (bool, &str, &str, Option<&str>, Timestamp) {
    (
        !m.failed(),
        m.message.ciphertext.as_str(),
        m.message.sender_id.as_str(),
        m.message.sender_name.as_deref(),
        m.message.created_at,
    )
}
