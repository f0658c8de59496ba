use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::MAX_MEETINGS_PER_TENANT;
use crate::model::*;

use super::EngineError;

/// A predicate over stored meetings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Caller-supplied meeting id.
    Id(i64),
    /// Any participant has exactly this email.
    Participant(String),
    /// Meeting lies entirely inside `[start, end]`.
    TimeRange { start: Ms, end: Ms },
    /// Meeting lists `email` and its interval contains `instant`.
    StartsDuring { email: String, instant: Ms },
    /// Meeting lists `email` and its interval intersects `span`.
    Overlaps { email: String, span: Span },
}

impl Filter {
    pub fn matches(&self, meeting: &Meeting) -> bool {
        match self {
            Filter::Id(id) => meeting.id == *id,
            Filter::Participant(email) => meeting.has_participant(email),
            Filter::TimeRange { start, end } => Span {
                start: *start,
                end: *end,
            }
            .contains_span(&meeting.span()),
            Filter::StartsDuring { email, instant } => {
                meeting.span().contains_instant(*instant) && meeting.has_participant(email)
            }
            Filter::Overlaps { email, span } => {
                meeting.span().intersects(span) && meeting.has_participant(email)
            }
        }
    }

    fn email(&self) -> Option<&str> {
        match self {
            Filter::Participant(email)
            | Filter::StartsDuring { email, .. }
            | Filter::Overlaps { email, .. } => Some(email),
            Filter::Id(_) | Filter::TimeRange { .. } => None,
        }
    }
}

/// The persistence capability the engine needs: find and insert over the
/// `meetings` collection. Results are returned in insertion order.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn find(&self, filter: &Filter, limit: Option<usize>)
    -> Result<Vec<StoredMeeting>, EngineError>;

    /// Persist `meeting` as a new document and return its store-assigned id.
    async fn insert(&self, meeting: Meeting) -> Result<Ulid, EngineError>;
}

/// Documents in insertion order plus secondary indexes into them.
#[derive(Default)]
pub(super) struct Collection {
    docs: Vec<StoredMeeting>,
    by_id: HashMap<i64, Vec<usize>>,
    by_email: HashMap<String, Vec<usize>>,
    /// `(start_time, position)` sorted by `start_time`.
    by_start: Vec<(Ms, usize)>,
}

impl Collection {
    pub(super) fn len(&self) -> usize {
        self.docs.len()
    }

    pub(super) fn push(&mut self, doc: StoredMeeting) {
        let pos = self.docs.len();
        let meeting = &doc.meeting;

        self.by_id.entry(meeting.id).or_default().push(pos);
        for email in meeting.emails() {
            self.by_email.entry(email).or_default().push(pos);
        }
        // Upper bound keeps equal start times in insertion order.
        let at = self
            .by_start
            .partition_point(|(start, _)| *start <= meeting.start_time);
        self.by_start.insert(at, (meeting.start_time, pos));

        self.docs.push(doc);
    }

    /// Positions worth testing against `filter`, ascending.
    fn candidates(&self, filter: &Filter) -> Vec<usize> {
        if let Some(email) = filter.email() {
            return self.by_email.get(email).cloned().unwrap_or_default();
        }
        match filter {
            Filter::Id(id) => self.by_id.get(id).cloned().unwrap_or_default(),
            Filter::TimeRange { start, end } => {
                if start > end {
                    return Vec::new();
                }
                // A contained meeting starts in [start, end].
                let lo = self.by_start.partition_point(|(s, _)| s < start);
                let hi = self.by_start.partition_point(|(s, _)| s <= end);
                let mut hits: Vec<usize> = self.by_start[lo..hi].iter().map(|(_, pos)| *pos).collect();
                hits.sort_unstable();
                hits
            }
            _ => (0..self.docs.len()).collect(),
        }
    }

    pub(super) fn find(&self, filter: &Filter, limit: Option<usize>) -> Vec<StoredMeeting> {
        self.candidates(filter)
            .into_iter()
            .map(|pos| &self.docs[pos])
            .filter(|doc| filter.matches(&doc.meeting))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Volatile store. Also the in-memory half of the WAL-backed store.
#[derive(Default)]
pub struct InMemoryStore {
    collection: RwLock<Collection>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from documents in their original insertion order.
    pub fn from_documents(docs: impl IntoIterator<Item = StoredMeeting>) -> Self {
        let mut collection = Collection::default();
        for doc in docs {
            collection.push(doc);
        }
        Self {
            collection: RwLock::new(collection),
        }
    }

    pub async fn len(&self) -> usize {
        self.collection.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Fails once the collection is full; callers check this before writing
    /// anything durable.
    pub async fn ensure_capacity(&self) -> Result<(), EngineError> {
        if self.len().await >= MAX_MEETINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many meetings"));
        }
        Ok(())
    }

    pub(super) async fn push(&self, doc: StoredMeeting) {
        self.collection.write().await.push(doc);
    }

    /// Append documents in the given order under one write lock.
    pub(super) async fn push_all(&self, docs: impl IntoIterator<Item = StoredMeeting>) {
        let mut collection = self.collection.write().await;
        for doc in docs {
            collection.push(doc);
        }
    }
}

#[async_trait]
impl MeetingStore for InMemoryStore {
    async fn find(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMeeting>, EngineError> {
        Ok(self.collection.read().await.find(filter, limit))
    }

    async fn insert(&self, meeting: Meeting) -> Result<Ulid, EngineError> {
        self.ensure_capacity().await?;
        let doc_id = Ulid::new();
        self.push(StoredMeeting { doc_id, meeting }).await;
        Ok(doc_id)
    }
}
