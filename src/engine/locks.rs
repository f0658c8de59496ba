use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Advisory locks keyed by participant email.
///
/// Creation holds the locks of every participant across the conflict reads
/// and the insert, so two creations sharing a participant are serialized.
#[derive(Default)]
pub struct ParticipantLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Guards for one set of emails. Releases (and prunes idle entries) on drop.
pub struct ParticipantGuard<'a> {
    table: &'a ParticipantLocks,
    held: Vec<(String, OwnedMutexGuard<()>)>,
}

impl ParticipantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every email in `emails`. Callers pass them sorted and deduplicated;
    /// acquiring in one global order is what rules out deadlock.
    pub async fn acquire<'a>(&'a self, emails: &[String]) -> ParticipantGuard<'a> {
        debug_assert!(emails.windows(2).all(|w| w[0] < w[1]), "emails must be sorted and unique");
        let mut held = Vec::with_capacity(emails.len());
        for email in emails {
            let lock = self.locks.entry(email.clone()).or_default().clone();
            held.push((email.clone(), lock.lock_owned().await));
        }
        ParticipantGuard { table: self, held }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for ParticipantGuard<'_> {
    fn drop(&mut self) {
        for (email, guard) in self.held.drain(..) {
            drop(guard);
            // Only the table's own Arc left: nobody holds or waits on it.
            self.table
                .locks
                .remove_if(&email, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
