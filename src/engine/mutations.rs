use tracing::{debug, error};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{CONFLICTS_TOTAL, MEETINGS_CREATED_TOTAL};

use super::conflict::{collides, now_ms, validate_meeting};
use super::{Conflict, Engine, EngineError};

impl Engine {
    /// Validate, check for conflicts, stamp and persist one meeting.
    /// Returns the store-assigned document id, not `meeting.id`.
    ///
    /// Participant locks are held from the first conflict read until the
    /// insert completes, so no other creation sharing a participant can slip
    /// in between.
    pub async fn create_meeting(&self, mut meeting: Meeting) -> Result<Ulid, EngineError> {
        validate_meeting(&meeting)?;
        let _guard = self.locks.acquire(&meeting.emails()).await;

        if let Some(conflict) = self.first_conflict(&meeting).await? {
            metrics::counter!(CONFLICTS_TOTAL).increment(1);
            debug!("meeting {} rejected: {conflict}", meeting.id);
            return Err(EngineError::Conflict(conflict));
        }

        meeting.creation_timestamp = now_ms();
        let id = meeting.id;
        let doc_id = self
            .store
            .insert(meeting)
            .await
            .inspect_err(|e| error!("insert of meeting {id} failed: {e}"))?;
        metrics::counter!(MEETINGS_CREATED_TOTAL).increment(1);
        debug!("created meeting {id} as {doc_id}");
        Ok(doc_id)
    }

    /// Create several meetings. Either every meeting passes validation and the
    /// conflict check (against the store and against earlier rows of the
    /// batch) or nothing is inserted. A store failure part-way through leaves
    /// the rows before it committed.
    pub async fn create_meetings(&self, batch: Vec<Meeting>) -> Result<Vec<Ulid>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(EngineError::LimitExceeded("batch too large"));
        }
        for meeting in &batch {
            validate_meeting(meeting)?;
        }

        let mut emails: Vec<String> = batch.iter().flat_map(|m| m.emails()).collect();
        emails.sort();
        emails.dedup();
        let _guard = self.locks.acquire(&emails).await;

        // Phase 1: validate every row before writing any.
        for (i, candidate) in batch.iter().enumerate() {
            if let Some(conflict) = self.first_conflict(candidate).await? {
                metrics::counter!(CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::Conflict(conflict));
            }
            for earlier in &batch[..i] {
                if let Some(email) = collides(self.mode, earlier, candidate) {
                    metrics::counter!(CONFLICTS_TOTAL).increment(1);
                    return Err(EngineError::Conflict(Conflict {
                        email,
                        meeting_id: earlier.id,
                        doc_id: None,
                    }));
                }
            }
        }

        // Phase 2: commit.
        let now = now_ms();
        let mut doc_ids = Vec::with_capacity(batch.len());
        for mut meeting in batch {
            meeting.creation_timestamp = now;
            let doc_id = self.store.insert(meeting).await.inspect_err(|e| {
                error!("batch insert failed after {} rows: {e}", doc_ids.len());
            })?;
            doc_ids.push(doc_id);
        }
        metrics::counter!(MEETINGS_CREATED_TOTAL).increment(doc_ids.len() as u64);
        debug!("created {} meetings in batch", doc_ids.len());
        Ok(doc_ids)
    }
}
