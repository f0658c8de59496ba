use crate::limits::*;
use crate::model::*;

use super::store::Filter;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn validate_meeting(meeting: &Meeting) -> Result<(), EngineError> {
    for t in [meeting.start_time, meeting.end_time] {
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&t) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
    }
    if meeting.start_time > meeting.end_time {
        return Err(EngineError::Validation(format!(
            "start_time {} is after end_time {}",
            meeting.start_time, meeting.end_time
        )));
    }
    if meeting.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if meeting.participants.len() > MAX_PARTICIPANTS {
        return Err(EngineError::LimitExceeded("too many participants"));
    }
    for p in &meeting.participants {
        if p.name.len() > MAX_PARTICIPANT_NAME_LEN {
            return Err(EngineError::LimitExceeded("participant name too long"));
        }
        if p.email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("participant email too long"));
        }
        if p.rsvp.len() > MAX_RSVP_LEN {
            return Err(EngineError::LimitExceeded("rsvp too long"));
        }
    }
    Ok(())
}

/// Store predicate selecting `email`'s meetings that `candidate` would collide with.
pub(crate) fn conflict_filter(mode: ConflictMode, email: &str, candidate: &Meeting) -> Filter {
    match mode {
        ConflictMode::StartInstant => Filter::StartsDuring {
            email: email.to_string(),
            instant: candidate.start_time,
        },
        ConflictMode::Overlap => Filter::Overlaps {
            email: email.to_string(),
            span: candidate.span(),
        },
    }
}

/// Same rule as `conflict_filter`, applied between two candidates of one batch.
/// `earlier` plays the part of the stored meeting.
pub(crate) fn collides(mode: ConflictMode, earlier: &Meeting, candidate: &Meeting) -> Option<String> {
    candidate
        .emails()
        .into_iter()
        .find(|email| conflict_filter(mode, email, candidate).matches(earlier))
}
