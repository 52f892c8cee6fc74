use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use storage::repository::{
    AttemptRepository, CurriculumRepository, LearnerRepository, ProgressRepository, Storage,
    StorageError,
};
use trainer_core::model::{
    AttemptScore, BranchId, Learner, LearnerId, LearnerTopicProgress, ProgressId, Topic, TopicId,
};

use crate::error::ReportError;
use crate::sessions::LearnerLocks;

//
// ─── REPORT TYPES ──────────────────────────────────────────────────────────────
//

/// An open question and the learner's submitted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenAnswerReport {
    pub question: String,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicReport {
    pub progress_id: ProgressId,
    pub topic_id: TopicId,
    pub topic_name: String,
    pub theory_complete: bool,
    pub test_complete: Option<bool>,
    pub open_answers_reviewed: Option<bool>,
    pub locked: bool,
    pub finished: bool,
    /// Score of the most recent finished attempt.
    pub score: Option<AttemptScore>,
    /// Open answers of the most recent finished attempt.
    pub open_answers: Vec<OpenAnswerReport>,
}

impl TopicReport {
    /// Finished with open answers that staff have not reviewed yet.
    #[must_use]
    pub fn awaiting_review(&self) -> bool {
        self.finished
            && self.open_answers_reviewed.is_none()
            && self.score.is_some_and(|s| s.has_open_questions())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LearnerReport {
    pub learner_id: LearnerId,
    pub display_name: String,
    pub active: bool,
    pub pending_reviews: usize,
    pub topics: Vec<TopicReport>,
}

impl LearnerReport {
    /// Pretty-printed JSON for staff tooling.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Encode` if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Staff-facing read model over learner progress, plus the review write-back.
#[derive(Clone)]
pub struct ReportService {
    learners: Arc<dyn LearnerRepository>,
    curriculum: Arc<dyn CurriculumRepository>,
    progress: Arc<dyn ProgressRepository>,
    attempts: Arc<dyn AttemptRepository>,
    locks: Arc<LearnerLocks>,
}

impl ReportService {
    /// `locks` must be the controller's, so review writes and learner
    /// operations on the same learner never interleave.
    #[must_use]
    pub fn new(storage: &Storage, locks: Arc<LearnerLocks>) -> Self {
        Self {
            learners: Arc::clone(&storage.learners),
            curriculum: Arc::clone(&storage.curriculum),
            progress: Arc::clone(&storage.progress),
            attempts: Arc::clone(&storage.attempts),
            locks,
        }
    }

    /// # Errors
    ///
    /// Returns `ReportError::Storage` if the learner is missing or storage fails.
    pub async fn learner_report(&self, learner: LearnerId) -> Result<LearnerReport, ReportError> {
        let learner = self.learners.get_learner(learner).await?;
        let topics = self.curriculum.list_topics(learner.branch_id()).await?;
        self.build_report(&learner, &topics).await
    }

    /// Reports for every learner of a branch, ordered by learner id.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Storage` on backend failures.
    pub async fn branch_report(&self, branch: BranchId) -> Result<Vec<LearnerReport>, ReportError> {
        let topics = self.curriculum.list_topics(branch).await?;
        let mut learners = self.learners.list_learners(branch).await?;
        learners.sort_by_key(Learner::id);

        let mut reports = Vec::with_capacity(learners.len());
        for learner in &learners {
            reports.push(self.build_report(learner, &topics).await?);
        }
        Ok(reports)
    }

    /// # Errors
    ///
    /// Returns `ReportError::Storage` on backend failures.
    pub async fn pending_review_count(&self, learner: LearnerId) -> Result<usize, ReportError> {
        Ok(self.learner_report(learner).await?.pending_reviews)
    }

    /// Record the staff verdict on a topic's open answers. `None` resets it to
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Storage` (`NotFound` for unknown records).
    pub async fn set_review_status(
        &self,
        progress: ProgressId,
        reviewed: Option<bool>,
    ) -> Result<(), ReportError> {
        let record = self.progress.get_progress(progress).await?;
        let _guard = self.locks.acquire(record.learner_id).await;
        self.progress.set_review_status(progress, reviewed).await?;
        info!(
            learner = %record.learner_id,
            topic = %record.topic_id,
            reviewed = ?reviewed,
            "open answers review updated"
        );
        Ok(())
    }

    async fn build_report(
        &self,
        learner: &Learner,
        topics: &[Topic],
    ) -> Result<LearnerReport, ReportError> {
        let records = self.progress.progress_for_learner(learner.id()).await?;
        let mut rows = Vec::with_capacity(topics.len());
        for topic in topics {
            let Some(record) = records.iter().find(|r| r.topic_id == topic.id()) else {
                continue;
            };
            rows.push(self.topic_report(learner.id(), topic, record).await?);
        }

        Ok(LearnerReport {
            learner_id: learner.id(),
            display_name: learner.display_name().to_owned(),
            active: learner.is_active(),
            pending_reviews: rows.iter().filter(|r| r.awaiting_review()).count(),
            topics: rows,
        })
    }

    async fn topic_report(
        &self,
        learner: LearnerId,
        topic: &Topic,
        record: &LearnerTopicProgress,
    ) -> Result<TopicReport, ReportError> {
        let mut report = TopicReport {
            progress_id: record.id,
            topic_id: topic.id(),
            topic_name: topic.name().to_owned(),
            theory_complete: record.theory_complete,
            test_complete: record.test_complete,
            open_answers_reviewed: record.open_answers_reviewed,
            locked: record.locked,
            finished: record.finished,
            score: None,
            open_answers: Vec::new(),
        };

        let Some(quiz_id) = topic.quiz_id() else {
            return Ok(report);
        };
        let quiz = match self.curriculum.get_quiz(quiz_id).await {
            Ok(quiz) => quiz,
            Err(StorageError::NotFound) => return Ok(report),
            Err(err) => return Err(err.into()),
        };
        let Some(attempt) = self
            .attempts
            .latest_finished_attempt(learner, quiz_id)
            .await?
        else {
            return Ok(report);
        };

        let answers = self.attempts.answers_for_attempt(attempt.id()).await?;
        report.score = attempt.score();
        report.open_answers = quiz
            .questions()
            .iter()
            .filter(|q| q.is_open())
            .map(|question| OpenAnswerReport {
                question: question.prompt().to_owned(),
                answer: answers
                    .iter()
                    .find(|a| a.question_id == question.id())
                    .and_then(|a| a.text())
                    .map(str::to_owned),
            })
            .collect();
        Ok(report)
    }
}
