use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Closed interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    /// Both endpoints are inclusive.
    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t <= self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Closed-interval intersection: touching endpoints count.
    pub fn intersects(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Email")]
    pub email: String,
    #[serde(alias = "RSVP")]
    pub rsvp: String,
}

impl Participant {
    pub fn new(name: impl Into<String>, email: impl Into<String>, rsvp: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            rsvp: rsvp.into(),
        }
    }
}

/// A meeting as submitted by a caller and as persisted.
///
/// `id` is the caller's own identifier and is not unique. `creation_timestamp`
/// is owned by the engine: whatever the caller sends is overwritten on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: i64,
    pub title: String,
    pub participants: Vec<Participant>,
    pub start_time: Ms,
    pub end_time: Ms,
    pub creation_timestamp: Ms,
}

impl Meeting {
    pub fn new(
        id: i64,
        title: impl Into<String>,
        participants: Vec<Participant>,
        start_time: Ms,
        end_time: Ms,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            participants,
            start_time,
            end_time,
            creation_timestamp: 0,
        }
    }

    pub fn span(&self) -> Span {
        Span {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn has_participant(&self, email: &str) -> bool {
        self.participants.iter().any(|p| p.email == email)
    }

    /// Distinct participant emails, sorted.
    pub fn emails(&self) -> Vec<String> {
        let mut emails: Vec<String> = self.participants.iter().map(|p| p.email.clone()).collect();
        emails.sort();
        emails.dedup();
        emails
    }
}

/// A persisted meeting together with the identifier the store assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMeeting {
    pub doc_id: Ulid,
    pub meeting: Meeting,
}

/// Which existing meetings count as a scheduling conflict for a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictMode {
    /// The candidate's start instant lies inside an existing meeting.
    #[default]
    StartInstant,
    /// The candidate's interval intersects an existing meeting.
    Overlap,
}

impl std::str::FromStr for ConflictMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" | "start_instant" => Ok(ConflictMode::StartInstant),
            "overlap" => Ok(ConflictMode::Overlap),
            other => Err(format!("unknown conflict mode: {other}")),
        }
    }
}

impl std::fmt::Display for ConflictMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictMode::StartInstant => write!(f, "start"),
            ConflictMode::Overlap => write!(f, "overlap"),
        }
    }
}

/// The WAL record format. Meetings are immutable, so insertion is the only event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    MeetingInserted { doc_id: Ulid, meeting: Meeting },
}

impl From<Event> for StoredMeeting {
    fn from(event: Event) -> Self {
        match event {
            Event::MeetingInserted { doc_id, meeting } => StoredMeeting { doc_id, meeting },
        }
    }
}
