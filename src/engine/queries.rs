use crate::model::*;

use super::conflict::conflict_filter;
use super::store::Filter;
use super::{Conflict, Engine, EngineError};

/// Missing means unlimited; anything present must be positive.
pub(crate) fn check_limit(limit: Option<i64>) -> Result<Option<usize>, EngineError> {
    match limit {
        None => Ok(None),
        Some(n) if n > 0 => Ok(Some(usize::try_from(n).unwrap_or(usize::MAX))),
        Some(n) => Err(EngineError::InvalidLimit(n)),
    }
}

impl Engine {
    /// The first meeting `email` already has that `candidate` would collide with.
    async fn conflict_for(
        &self,
        email: String,
        candidate: &Meeting,
    ) -> Result<Option<Conflict>, EngineError> {
        let filter = conflict_filter(self.mode, &email, candidate);
        let hit = self.store.find(&filter, Some(1)).await?.into_iter().next();
        Ok(hit.map(|existing| Conflict {
            email,
            meeting_id: existing.meeting.id,
            doc_id: Some(existing.doc_id),
        }))
    }

    /// Every participant of `candidate` who is already booked, each with one
    /// conflicting meeting. One store query per distinct email.
    pub async fn conflicts(&self, candidate: &Meeting) -> Result<Vec<Conflict>, EngineError> {
        let mut found = Vec::new();
        for email in candidate.emails() {
            if let Some(conflict) = self.conflict_for(email, candidate).await? {
                found.push(conflict);
            }
        }
        Ok(found)
    }

    /// True when no participant of `candidate` is already booked.
    pub async fn is_valid(&self, candidate: &Meeting) -> Result<bool, EngineError> {
        Ok(self.first_conflict(candidate).await?.is_none())
    }

    /// Like `conflicts`, but stops at the first hit.
    pub(super) async fn first_conflict(
        &self,
        candidate: &Meeting,
    ) -> Result<Option<Conflict>, EngineError> {
        for email in candidate.emails() {
            if let Some(conflict) = self.conflict_for(email, candidate).await? {
                return Ok(Some(conflict));
            }
        }
        Ok(None)
    }

    pub async fn find_by_id(
        &self,
        id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<StoredMeeting>, EngineError> {
        let limit = check_limit(limit)?;
        self.store.find(&Filter::Id(id), limit).await
    }

    pub async fn find_by_participant(
        &self,
        email: &str,
        limit: Option<i64>,
    ) -> Result<Vec<StoredMeeting>, EngineError> {
        let limit = check_limit(limit)?;
        self.store
            .find(&Filter::Participant(email.to_string()), limit)
            .await
    }

    /// Meetings lying entirely within `[start, end]`; merely overlapping
    /// meetings are excluded.
    pub async fn find_by_time_range(
        &self,
        start: Ms,
        end: Ms,
        limit: Option<i64>,
    ) -> Result<Vec<StoredMeeting>, EngineError> {
        let limit = check_limit(limit)?;
        self.store.find(&Filter::TimeRange { start, end }, limit).await
    }
}
