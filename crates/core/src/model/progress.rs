use serde::{Deserialize, Serialize};

use crate::model::attempt::AttemptScore;
use crate::model::ids::{LearnerId, ProgressId, TopicId};

/// A learner's completion and lock state for one topic.
///
/// `finished` means "attempted" (theory read and, if present, the quiz taken);
/// `test_complete` carries pass/fail separately. The next topic unlocks on
/// `finished`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerTopicProgress {
    pub id: ProgressId,
    pub learner_id: LearnerId,
    pub topic_id: TopicId,
    pub theory_complete: bool,
    pub test_complete: Option<bool>,
    pub open_answers_reviewed: Option<bool>,
    pub locked: bool,
    pub finished: bool,
}

impl LearnerTopicProgress {
    /// Record created at enrollment. Only the first topic of a curriculum starts
    /// unlocked.
    #[must_use]
    pub fn enrolled(id: ProgressId, learner_id: LearnerId, topic_id: TopicId, first: bool) -> Self {
        Self {
            id,
            learner_id,
            topic_id,
            theory_complete: false,
            test_complete: None,
            open_answers_reviewed: None,
            locked: !first,
            finished: false,
        }
    }

    /// Returns true if the flag changed.
    pub fn mark_theory_complete(&mut self) -> bool {
        let changed = !self.theory_complete;
        self.theory_complete = true;
        changed
    }

    /// Theory-only topics finish themselves once read.
    pub fn finish_theory_only(&mut self) {
        self.theory_complete = true;
        self.finished = true;
    }

    /// Apply the outcome of a finished attempt. Always marks the topic finished.
    pub fn record_test(&mut self, score: &AttemptScore) {
        self.test_complete = Some(score.passed());
        self.finished = true;
        if score.has_open_questions() {
            self.open_answers_reviewed = None;
        }
    }
}

/// Repair pass over a learner's lock flags.
///
/// `curriculum` is the ordered topic list; `records` are the learner's progress
/// records in any order. Returns the records whose `locked` flag must flip to
/// `false`: the first topic, and every topic whose predecessor is `finished`.
/// Locks never flip back to `true`, so running the pass repeatedly is a no-op.
#[must_use]
pub fn reconcile_locks(
    curriculum: &[TopicId],
    records: &[LearnerTopicProgress],
) -> Vec<LearnerTopicProgress> {
    let find = |topic: TopicId| records.iter().find(|r| r.topic_id == topic);
    let mut unlocked = Vec::new();
    let mut predecessor_finished = true;

    for topic in curriculum {
        let Some(record) = find(*topic) else {
            predecessor_finished = false;
            continue;
        };
        if record.locked && predecessor_finished {
            let mut record = record.clone();
            record.locked = false;
            unlocked.push(record);
        }
        predecessor_finished = record.finished;
    }

    unlocked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(flags: &[(bool, bool)]) -> Vec<LearnerTopicProgress> {
        flags
            .iter()
            .enumerate()
            .map(|(i, (locked, finished))| {
                let id = i as u64 + 1;
                let mut r = LearnerTopicProgress::enrolled(
                    ProgressId::new(id),
                    LearnerId::new(1),
                    TopicId::new(id),
                    i == 0,
                );
                r.locked = *locked;
                r.finished = *finished;
                r
            })
            .collect()
    }

    fn curriculum(n: u64) -> Vec<TopicId> {
        (1..=n).map(TopicId::new).collect()
    }

    #[test]
    fn enrollment_unlocks_only_first_topic() {
        let first = LearnerTopicProgress::enrolled(
            ProgressId::new(1),
            LearnerId::new(1),
            TopicId::new(1),
            true,
        );
        let second = LearnerTopicProgress::enrolled(
            ProgressId::new(2),
            LearnerId::new(1),
            TopicId::new(2),
            false,
        );
        assert!(!first.locked);
        assert!(second.locked);
        assert_eq!(second.test_complete, None);
    }

    #[test]
    fn unlocks_successor_of_finished_topic() {
        let records = records(&[(false, true), (true, false), (true, false)]);
        let changed = reconcile_locks(&curriculum(3), &records);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].topic_id, TopicId::new(2));
        assert!(!changed[0].locked);
    }

    #[test]
    fn unfinished_predecessor_keeps_lock() {
        let records = records(&[(false, false), (true, false)]);
        assert!(reconcile_locks(&curriculum(2), &records).is_empty());
    }

    #[test]
    fn pass_is_idempotent() {
        let mut records = records(&[(false, true), (true, true), (true, false)]);
        let changed = reconcile_locks(&curriculum(3), &records);
        assert_eq!(changed.len(), 2);
        for c in changed {
            let slot = records.iter_mut().find(|r| r.id == c.id).unwrap();
            *slot = c;
        }
        assert!(reconcile_locks(&curriculum(3), &records).is_empty());
    }

    #[test]
    fn never_relocks() {
        // Topic 2 was unlocked earlier; topic 1 is (somehow) unfinished now.
        let records = records(&[(false, false), (false, false)]);
        assert!(reconcile_locks(&curriculum(2), &records).is_empty());
    }

    #[test]
    fn first_topic_is_repaired() {
        let records = records(&[(true, false), (true, false)]);
        let changed = reconcile_locks(&curriculum(2), &records);
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].topic_id, TopicId::new(1));
    }

    #[test]
    fn failed_test_still_finishes_topic() {
        let mut record = LearnerTopicProgress::enrolled(
            ProgressId::new(1),
            LearnerId::new(1),
            TopicId::new(1),
            true,
        );
        record.open_answers_reviewed = Some(true);
        let score = AttemptScore::from_persisted(0, 2, 0, 1).unwrap();
        record.record_test(&score);
        assert_eq!(record.test_complete, Some(false));
        assert!(record.finished);
        assert_eq!(record.open_answers_reviewed, None);
    }
}
