use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use trainer_core::model::LearnerId;

/// One async mutex per learner.
///
/// Controller operations hold the guard across their whole read-modify-write.
/// Different learners never contend. A slot lives while a guard or a waiter
/// holds it; idle slots are dropped on the next `acquire`.
#[derive(Debug, Default)]
pub struct LearnerLocks {
    slots: Mutex<HashMap<LearnerId, Arc<AsyncMutex<()>>>>,
}

impl LearnerLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, learner: LearnerId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Guards and waiters each own a clone, so a count of one means idle.
            slots.retain(|id, slot| *id == learner || Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(learner).or_default())
        };
        slot.lock_owned().await
    }

    /// Number of learners with a live slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_learner_serializes() {
        let locks = Arc::new(LearnerLocks::new());
        let guard = locks.acquire(LearnerId::new(1)).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(LearnerId::new(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn idle_slots_are_dropped() {
        let locks = LearnerLocks::new();
        for id in 1..=10 {
            drop(locks.acquire(LearnerId::new(id)).await);
        }
        let held = locks.acquire(LearnerId::new(11)).await;
        assert_eq!(locks.len(), 1);

        let _other = locks.acquire(LearnerId::new(12)).await;
        assert_eq!(locks.len(), 2);
        drop(held);
    }

    #[tokio::test]
    async fn waiting_learner_keeps_its_slot() {
        let locks = Arc::new(LearnerLocks::new());
        let guard = locks.acquire(LearnerId::new(1)).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(LearnerId::new(1)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Another learner's acquire must not evict the contended slot.
        drop(locks.acquire(LearnerId::new(2)).await);
        let again = locks.acquire(LearnerId::new(3));
        drop(again.await);
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_learners_do_not_contend() {
        let locks = LearnerLocks::new();
        let _first = locks.acquire(LearnerId::new(1)).await;
        let _second = locks.acquire(LearnerId::new(2)).await;
    }
}
