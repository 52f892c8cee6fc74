use trainer_core::model::{LearnerTopicProgress, Topic, TopicId, reconcile_locks};

/// A learner's view of their branch curriculum inside one controller operation.
///
/// Tracks which progress records were modified so the commit only writes
/// those.
#[derive(Debug, Clone)]
pub(crate) struct CurriculumSnapshot {
    pub topics: Vec<Topic>,
    pub records: Vec<LearnerTopicProgress>,
    changed: Vec<LearnerTopicProgress>,
}

impl CurriculumSnapshot {
    pub fn new(topics: Vec<Topic>, records: Vec<LearnerTopicProgress>) -> Self {
        Self {
            topics,
            records,
            changed: Vec::new(),
        }
    }

    pub fn record(&self, topic: TopicId) -> Option<&LearnerTopicProgress> {
        self.records.iter().find(|r| r.topic_id == topic)
    }

    pub fn update(&mut self, record: LearnerTopicProgress) {
        match self.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record.clone(),
            None => self.records.push(record.clone()),
        }
        match self.changed.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => self.changed.push(record),
        }
    }

    /// Runs the lock repair pass and folds its unlocks into the snapshot.
    pub fn reconcile(&mut self) {
        let order: Vec<TopicId> = self.topics.iter().map(Topic::id).collect();
        for record in reconcile_locks(&order, &self.records) {
            self.update(record);
        }
    }

    pub fn changed(&self) -> Vec<LearnerTopicProgress> {
        self.changed.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainer_core::model::{BranchId, LearnerId, ProgressId};

    fn topic(id: u64) -> Topic {
        Topic::new(
            TopicId::new(id),
            BranchId::new(1),
            u32::try_from(id).unwrap(),
            format!("T{id}"),
            "",
            Vec::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn reconcile_only_reports_flipped_records() {
        let mut first =
            LearnerTopicProgress::enrolled(ProgressId::new(1), LearnerId::new(1), TopicId::new(1), true);
        first.finished = true;
        let second =
            LearnerTopicProgress::enrolled(ProgressId::new(2), LearnerId::new(1), TopicId::new(2), false);
        let third =
            LearnerTopicProgress::enrolled(ProgressId::new(3), LearnerId::new(1), TopicId::new(3), false);

        let mut snapshot =
            CurriculumSnapshot::new(vec![topic(1), topic(2), topic(3)], vec![first, second, third]);
        snapshot.reconcile();

        let changed = snapshot.changed();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].topic_id, TopicId::new(2));
        assert!(!snapshot.record(TopicId::new(2)).unwrap().locked);
        assert!(snapshot.record(TopicId::new(3)).unwrap().locked);

        snapshot.reconcile();
        assert_eq!(snapshot.changed().len(), 1);
    }
}
