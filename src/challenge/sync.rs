use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-user serialization of history persistence.
///
/// At most one save pass runs per user at a time. A request arriving while
/// a pass is in flight is not dropped and not queued as a delta either: it
/// marks the slot dirty, and the worker runs a follow-up pass that re-reads
/// the then-current history, so the save self-corrects to the latest state.
#[derive(Clone, Default)]
pub struct SyncQueue {
    slots: Arc<Mutex<HashMap<Uuid, SyncSlot>>>,
}

#[derive(Default)]
struct SyncSlot {
    in_flight: bool,
    dirty: bool,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a sync for the user. Returns true when the caller should
    /// start a worker; false when an in-flight worker will pick the
    /// request up on its next pass.
    pub async fn begin(&self, user_id: Uuid) -> bool {
        let mut slots = self.slots.lock().await;
        let slot = slots.entry(user_id).or_default();
        if slot.in_flight {
            slot.dirty = true;
            false
        } else {
            slot.in_flight = true;
            true
        }
    }

    /// Record a completed pass. Returns true when requests arrived during
    /// the pass and the worker must run again.
    pub async fn finish(&self, user_id: Uuid) -> bool {
        let mut slots = self.slots.lock().await;
        let run_again = match slots.get_mut(&user_id) {
            Some(slot) if slot.dirty => {
                slot.dirty = false;
                true
            }
            _ => false,
        };
        if !run_again {
            slots.remove(&user_id);
        }
        run_again
    }

    /// Drop the slot after a failed pass. Pending dirtiness is discarded:
    /// the unsynced-delta marker survives in the cache and the next user
    /// action or session load retries with the latest history.
    pub async fn clear(&self, user_id: Uuid) {
        self.slots.lock().await.remove(&user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> Uuid {
        Uuid::from_u128(42)
    }

    #[tokio::test]
    async fn first_begin_starts_a_worker() {
        let queue = SyncQueue::new();
        assert!(queue.begin(user()).await);
        assert!(!queue.finish(user()).await);
    }

    #[tokio::test]
    async fn concurrent_requests_collapse_into_one_followup_pass() {
        let queue = SyncQueue::new();
        assert!(queue.begin(user()).await);

        // Three requests land while the first pass is in flight.
        assert!(!queue.begin(user()).await);
        assert!(!queue.begin(user()).await);
        assert!(!queue.begin(user()).await);

        // One follow-up pass satisfies all of them.
        assert!(queue.finish(user()).await);
        assert!(!queue.finish(user()).await);
    }

    #[tokio::test]
    async fn users_do_not_share_slots() {
        let queue = SyncQueue::new();
        let other = Uuid::from_u128(43);
        assert!(queue.begin(user()).await);
        assert!(queue.begin(other).await);
    }

    #[tokio::test]
    async fn clear_releases_the_slot_for_the_next_action() {
        let queue = SyncQueue::new();
        assert!(queue.begin(user()).await);
        assert!(!queue.begin(user()).await);

        queue.clear(user()).await;
        assert!(queue.begin(user()).await, "next action starts fresh");
    }
}
