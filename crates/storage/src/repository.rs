use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use trainer_core::model::{
    AnswerId, AnswerSelection, Attempt, AttemptId, BranchId, ChannelAddress, CredentialToken,
    Learner, LearnerId, LearnerTopicProgress, OptionId, ProgressId, QuestionId, Quiz, QuizId,
    RecordedAnswer, Topic, TopicId, sort_curriculum,
};

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── REPOSITORY CONTRACTS ──────────────────────────────────────────────────────
//

#[async_trait]
pub trait LearnerRepository: Send + Sync {
    /// Enroll a learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the id, token or channel is taken.
    async fn insert_learner(&self, learner: &Learner) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing, or other storage errors.
    async fn get_learner(&self, id: LearnerId) -> Result<Learner, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn find_by_token(&self, token: &CredentialToken)
    -> Result<Option<Learner>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn find_by_channel(
        &self,
        channel: &ChannelAddress,
    ) -> Result<Option<Learner>, StorageError>;

    /// Learners of a branch ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_learners(&self, branch: BranchId) -> Result<Vec<Learner>, StorageError>;
}

/// Read access to topics and quizzes, plus the upserts used for seeding.
#[async_trait]
pub trait CurriculumRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the topic cannot be stored.
    async fn upsert_topic(&self, topic: &Topic) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the owning topic is missing.
    async fn upsert_quiz(&self, quiz: &Quiz) -> Result<(), StorageError>;

    /// Topics of a branch in curriculum order (`position`, then id).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_topics(&self, branch: BranchId) -> Result<Vec<Topic>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_topic(&self, id: TopicId) -> Result<Topic, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError>;
}

#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Create the missing progress records for `topics` (curriculum order).
    /// Existing records are left untouched; a new record for the first topic
    /// starts unlocked. Returns every record of the learner.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn enroll(
        &self,
        learner: LearnerId,
        topics: &[TopicId],
    ) -> Result<Vec<LearnerTopicProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn progress_for_learner(
        &self,
        learner: LearnerId,
    ) -> Result<Vec<LearnerTopicProgress>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_progress(&self, id: ProgressId) -> Result<LearnerTopicProgress, StorageError>;

    /// Staff review write-back; the only external mutation of progress.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the record does not exist.
    async fn set_review_status(
        &self,
        id: ProgressId,
        reviewed: Option<bool>,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Return the unfinished attempt for (learner, quiz), creating it if none
    /// exists. Never yields two unfinished attempts for the same pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn open_attempt(
        &self,
        learner: LearnerId,
        quiz: QuizId,
        at: DateTime<Utc>,
    ) -> Result<Attempt, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt, StorageError>;

    /// Recorded answers of an attempt in stored order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn answers_for_attempt(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<RecordedAnswer>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if missing.
    async fn get_answer(&self, id: AnswerId) -> Result<RecordedAnswer, StorageError>;

    /// Return the free-text slot for (attempt, question), creating an empty one
    /// on first visit.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the attempt is finished or the
    /// question already holds a closed selection.
    async fn ensure_open_slot(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        at: DateTime<Utc>,
    ) -> Result<RecordedAnswer, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn latest_finished_attempt(
        &self,
        learner: LearnerId,
        quiz: QuizId,
    ) -> Result<Option<Attempt>, StorageError>;
}

//
// ─── SESSION COMMIT ────────────────────────────────────────────────────────────
//

/// The single answer mutation a controller step may perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerWrite {
    /// Replace the (attempt, question) answer with this option.
    SelectOption {
        attempt_id: AttemptId,
        question_id: QuestionId,
        option_id: OptionId,
        at: DateTime<Utc>,
    },
    /// Write text into an existing open slot.
    OpenText {
        answer_id: AnswerId,
        text: String,
        at: DateTime<Utc>,
    },
}

/// State-bearing writes of one controller step, applied all-or-nothing.
#[derive(Debug, Clone)]
pub struct SessionCommit {
    pub learner: Learner,
    pub progress: Vec<LearnerTopicProgress>,
    pub answer: Option<AnswerWrite>,
    pub finished_attempt: Option<Attempt>,
}

impl SessionCommit {
    #[must_use]
    pub fn learner(learner: Learner) -> Self {
        Self {
            learner,
            progress: Vec::new(),
            answer: None,
            finished_attempt: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Vec<LearnerTopicProgress>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_answer(mut self, answer: AnswerWrite) -> Self {
        self.answer = Some(answer);
        self
    }

    #[must_use]
    pub fn with_finished_attempt(mut self, attempt: Attempt) -> Self {
        self.finished_attempt = Some(attempt);
        self
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Apply the commit atomically. Progress `locked` flags only ever move
    /// towards `false`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if an attempt in the commit is already
    /// finished or the learner's channel belongs to someone else;
    /// `StorageError::NotFound` if a referenced row is missing. Nothing is
    /// written on error.
    async fn commit(&self, commit: &SessionCommit) -> Result<(), StorageError>;
}

//
// ─── IN-MEMORY BACKEND ─────────────────────────────────────────────────────────
//

#[derive(Clone, Default)]
struct MemoryState {
    learners: BTreeMap<LearnerId, Learner>,
    topics: HashMap<TopicId, Topic>,
    quizzes: HashMap<QuizId, Quiz>,
    progress: BTreeMap<ProgressId, LearnerTopicProgress>,
    attempts: BTreeMap<AttemptId, Attempt>,
    answers: BTreeMap<AnswerId, RecordedAnswer>,
    next_progress: u64,
    next_attempt: u64,
    next_answer: u64,
}

impl MemoryState {
    fn channel_taken(&self, channel: &ChannelAddress, by: LearnerId) -> bool {
        self.learners
            .values()
            .any(|l| l.id() != by && l.channel() == Some(channel))
    }

    fn open_attempt_for(&self, id: AttemptId) -> Result<&Attempt, StorageError> {
        let attempt = self.attempts.get(&id).ok_or(StorageError::NotFound)?;
        if attempt.is_finished() {
            return Err(StorageError::Conflict);
        }
        Ok(attempt)
    }

    fn answer_for(&self, attempt: AttemptId, question: QuestionId) -> Option<AnswerId> {
        self.answers
            .values()
            .find(|a| a.attempt_id == attempt && a.question_id == question)
            .map(|a| a.id)
    }

    fn apply_answer(&mut self, write: &AnswerWrite) -> Result<(), StorageError> {
        match write {
            AnswerWrite::SelectOption {
                attempt_id,
                question_id,
                option_id,
                at,
            } => {
                self.open_attempt_for(*attempt_id)?;
                let selection = AnswerSelection::Choice(*option_id);
                if let Some(id) = self.answer_for(*attempt_id, *question_id) {
                    let answer = self.answers.get_mut(&id).ok_or(StorageError::NotFound)?;
                    answer.selection = selection;
                    answer.answered_at = *at;
                } else {
                    self.next_answer += 1;
                    let id = AnswerId::new(self.next_answer);
                    self.answers.insert(
                        id,
                        RecordedAnswer {
                            id,
                            attempt_id: *attempt_id,
                            question_id: *question_id,
                            selection,
                            answered_at: *at,
                        },
                    );
                }
            }
            AnswerWrite::OpenText {
                answer_id,
                text,
                at,
            } => {
                let attempt_id = self
                    .answers
                    .get(answer_id)
                    .ok_or(StorageError::NotFound)?
                    .attempt_id;
                self.open_attempt_for(attempt_id)?;
                let answer = self
                    .answers
                    .get_mut(answer_id)
                    .ok_or(StorageError::NotFound)?;
                answer.selection = AnswerSelection::Text(Some(text.clone()));
                answer.answered_at = *at;
            }
        }
        Ok(())
    }

    fn apply(&mut self, commit: &SessionCommit) -> Result<(), StorageError> {
        if let Some(write) = &commit.answer {
            self.apply_answer(write)?;
        }

        if let Some(finished) = &commit.finished_attempt {
            self.open_attempt_for(finished.id())?;
            self.attempts.insert(finished.id(), finished.clone());
        }

        for record in &commit.progress {
            let stored = self
                .progress
                .get_mut(&record.id)
                .ok_or(StorageError::NotFound)?;
            let locked = stored.locked && record.locked;
            *stored = record.clone();
            stored.locked = locked;
        }

        let learner = &commit.learner;
        if !self.learners.contains_key(&learner.id()) {
            return Err(StorageError::NotFound);
        }
        if let Some(channel) = learner.channel()
            && self.channel_taken(channel, learner.id())
        {
            return Err(StorageError::Conflict);
        }
        self.learners.insert(learner.id(), learner.clone());
        Ok(())
    }
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All maps sit behind one mutex so a `SessionCommit` is a single critical
/// section.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl LearnerRepository for InMemoryRepository {
    async fn insert_learner(&self, learner: &Learner) -> Result<(), StorageError> {
        let mut guard = self.state()?;
        let token_taken = guard.learners.values().any(|l| l.token() == learner.token());
        let channel_taken = learner
            .channel()
            .is_some_and(|c| guard.channel_taken(c, learner.id()));
        if guard.learners.contains_key(&learner.id()) || token_taken || channel_taken {
            return Err(StorageError::Conflict);
        }
        guard.learners.insert(learner.id(), learner.clone());
        Ok(())
    }

    async fn get_learner(&self, id: LearnerId) -> Result<Learner, StorageError> {
        let guard = self.state()?;
        guard.learners.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn find_by_token(
        &self,
        token: &CredentialToken,
    ) -> Result<Option<Learner>, StorageError> {
        let guard = self.state()?;
        Ok(guard.learners.values().find(|l| l.token() == token).cloned())
    }

    async fn find_by_channel(
        &self,
        channel: &ChannelAddress,
    ) -> Result<Option<Learner>, StorageError> {
        let guard = self.state()?;
        Ok(guard
            .learners
            .values()
            .find(|l| l.channel() == Some(channel))
            .cloned())
    }

    async fn list_learners(&self, branch: BranchId) -> Result<Vec<Learner>, StorageError> {
        let guard = self.state()?;
        Ok(guard
            .learners
            .values()
            .filter(|l| l.branch_id() == branch)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CurriculumRepository for InMemoryRepository {
    async fn upsert_topic(&self, topic: &Topic) -> Result<(), StorageError> {
        let mut guard = self.state()?;
        guard.topics.insert(topic.id(), topic.clone());
        Ok(())
    }

    async fn upsert_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let mut guard = self.state()?;
        if !guard.topics.contains_key(&quiz.topic_id()) {
            return Err(StorageError::NotFound);
        }
        guard.quizzes.insert(quiz.id(), quiz.clone());
        Ok(())
    }

    async fn list_topics(&self, branch: BranchId) -> Result<Vec<Topic>, StorageError> {
        let guard = self.state()?;
        let mut topics: Vec<Topic> = guard
            .topics
            .values()
            .filter(|t| t.branch_id() == branch)
            .cloned()
            .collect();
        sort_curriculum(&mut topics);
        Ok(topics)
    }

    async fn get_topic(&self, id: TopicId) -> Result<Topic, StorageError> {
        let guard = self.state()?;
        guard.topics.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError> {
        let guard = self.state()?;
        guard.quizzes.get(&id).cloned().ok_or(StorageError::NotFound)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn enroll(
        &self,
        learner: LearnerId,
        topics: &[TopicId],
    ) -> Result<Vec<LearnerTopicProgress>, StorageError> {
        let mut guard = self.state()?;
        for (index, topic) in topics.iter().enumerate() {
            let exists = guard
                .progress
                .values()
                .any(|p| p.learner_id == learner && p.topic_id == *topic);
            if exists {
                continue;
            }
            guard.next_progress += 1;
            let id = ProgressId::new(guard.next_progress);
            guard.progress.insert(
                id,
                LearnerTopicProgress::enrolled(id, learner, *topic, index == 0),
            );
        }
        Ok(guard
            .progress
            .values()
            .filter(|p| p.learner_id == learner)
            .cloned()
            .collect())
    }

    async fn progress_for_learner(
        &self,
        learner: LearnerId,
    ) -> Result<Vec<LearnerTopicProgress>, StorageError> {
        let guard = self.state()?;
        Ok(guard
            .progress
            .values()
            .filter(|p| p.learner_id == learner)
            .cloned()
            .collect())
    }

    async fn get_progress(&self, id: ProgressId) -> Result<LearnerTopicProgress, StorageError> {
        let guard = self.state()?;
        guard.progress.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn set_review_status(
        &self,
        id: ProgressId,
        reviewed: Option<bool>,
    ) -> Result<(), StorageError> {
        let mut guard = self.state()?;
        let record = guard.progress.get_mut(&id).ok_or(StorageError::NotFound)?;
        record.open_answers_reviewed = reviewed;
        Ok(())
    }
}

#[async_trait]
impl AttemptRepository for InMemoryRepository {
    async fn open_attempt(
        &self,
        learner: LearnerId,
        quiz: QuizId,
        at: DateTime<Utc>,
    ) -> Result<Attempt, StorageError> {
        let mut guard = self.state()?;
        let open = guard.attempts.values().find(|a| {
            a.learner_id() == learner && a.quiz_id() == quiz && !a.is_finished()
        });
        if let Some(attempt) = open {
            return Ok(attempt.clone());
        }
        guard.next_attempt += 1;
        let attempt = Attempt::started(AttemptId::new(guard.next_attempt), learner, quiz, at);
        guard.attempts.insert(attempt.id(), attempt.clone());
        Ok(attempt)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt, StorageError> {
        let guard = self.state()?;
        guard.attempts.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn answers_for_attempt(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<RecordedAnswer>, StorageError> {
        let guard = self.state()?;
        Ok(guard
            .answers
            .values()
            .filter(|a| a.attempt_id == attempt)
            .cloned()
            .collect())
    }

    async fn get_answer(&self, id: AnswerId) -> Result<RecordedAnswer, StorageError> {
        let guard = self.state()?;
        guard.answers.get(&id).cloned().ok_or(StorageError::NotFound)
    }

    async fn ensure_open_slot(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        at: DateTime<Utc>,
    ) -> Result<RecordedAnswer, StorageError> {
        let mut guard = self.state()?;
        guard.open_attempt_for(attempt)?;
        if let Some(id) = guard.answer_for(attempt, question) {
            let existing = guard.answers.get(&id).ok_or(StorageError::NotFound)?;
            return match existing.selection {
                AnswerSelection::Text(_) => Ok(existing.clone()),
                AnswerSelection::Choice(_) => Err(StorageError::Conflict),
            };
        }
        guard.next_answer += 1;
        let slot = RecordedAnswer {
            id: AnswerId::new(guard.next_answer),
            attempt_id: attempt,
            question_id: question,
            selection: AnswerSelection::Text(None),
            answered_at: at,
        };
        guard.answers.insert(slot.id, slot.clone());
        Ok(slot)
    }

    async fn latest_finished_attempt(
        &self,
        learner: LearnerId,
        quiz: QuizId,
    ) -> Result<Option<Attempt>, StorageError> {
        let guard = self.state()?;
        Ok(guard
            .attempts
            .values()
            .filter(|a| a.learner_id() == learner && a.quiz_id() == quiz && a.is_finished())
            .max_by_key(|a| (a.finished_at(), a.id()))
            .cloned())
    }
}

#[async_trait]
impl SessionStore for InMemoryRepository {
    async fn commit(&self, commit: &SessionCommit) -> Result<(), StorageError> {
        let mut guard = self.state()?;
        let mut next = guard.clone();
        next.apply(commit)?;
        *guard = next;
        Ok(())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub learners: Arc<dyn LearnerRepository>,
    pub curriculum: Arc<dyn CurriculumRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        Self {
            learners: Arc::new(repo.clone()),
            curriculum: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            attempts: Arc::new(repo.clone()),
            sessions: Arc::new(repo),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainer_core::model::{
        AnswerOption, AttemptScore, ContentBlock, Question, SessionState,
    };
    use trainer_core::time::fixed_now;

    fn learner(id: u64, token: &str) -> Learner {
        Learner::new(
            LearnerId::new(id),
            BranchId::new(1),
            format!("Learner {id}"),
            CredentialToken::new(token).unwrap(),
        )
        .unwrap()
    }

    async fn seeded() -> InMemoryRepository {
        let repo = InMemoryRepository::new();
        let topic = Topic::new(
            TopicId::new(1),
            BranchId::new(1),
            1,
            "Greeting",
            "Intro",
            vec![ContentBlock::new("Smile", "Always smile")],
            Some(QuizId::new(1)),
        )
        .unwrap();
        repo.upsert_topic(&topic).await.unwrap();
        let question = Question::closed(
            QuestionId::new(1),
            "Say?",
            vec![
                AnswerOption::new(OptionId::new(1), "Hello", true),
                AnswerOption::new(OptionId::new(2), "Bye", false),
            ],
        )
        .unwrap();
        let quiz = Quiz::new(QuizId::new(1), TopicId::new(1), "Greeting quiz", vec![question])
            .unwrap();
        repo.upsert_quiz(&quiz).await.unwrap();
        repo.insert_learner(&learner(1, "key-1")).await.unwrap();
        repo
    }

    #[tokio::test]
    async fn duplicate_token_conflicts() {
        let repo = seeded().await;
        let err = repo.insert_learner(&learner(2, "key-1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn enroll_is_idempotent_and_unlocks_first() {
        let repo = seeded().await;
        let topics = [TopicId::new(1), TopicId::new(2)];
        let first = repo.enroll(LearnerId::new(1), &topics).await.unwrap();
        let second = repo.enroll(LearnerId::new(1), &topics).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(!first[0].locked);
        assert!(first[1].locked);
    }

    #[tokio::test]
    async fn open_attempt_reuses_unfinished() {
        let repo = seeded().await;
        let a = repo
            .open_attempt(LearnerId::new(1), QuizId::new(1), fixed_now())
            .await
            .unwrap();
        let b = repo
            .open_attempt(LearnerId::new(1), QuizId::new(1), fixed_now())
            .await
            .unwrap();
        assert_eq!(a.id(), b.id());
    }

    #[tokio::test]
    async fn selection_replaces_previous_answer() {
        let repo = seeded().await;
        let attempt = repo
            .open_attempt(LearnerId::new(1), QuizId::new(1), fixed_now())
            .await
            .unwrap();
        let learner = repo.get_learner(LearnerId::new(1)).await.unwrap();
        for option in [1, 2] {
            let commit = SessionCommit::learner(learner.clone()).with_answer(
                AnswerWrite::SelectOption {
                    attempt_id: attempt.id(),
                    question_id: QuestionId::new(1),
                    option_id: OptionId::new(option),
                    at: fixed_now(),
                },
            );
            repo.commit(&commit).await.unwrap();
        }
        let answers = repo.answers_for_attempt(attempt.id()).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].selected_option(), Some(OptionId::new(2)));
    }

    #[tokio::test]
    async fn failed_commit_writes_nothing() {
        let repo = seeded().await;
        let mut attempt = repo
            .open_attempt(LearnerId::new(1), QuizId::new(1), fixed_now())
            .await
            .unwrap();
        attempt
            .finish(AttemptScore::from_persisted(1, 1, 0, 0).unwrap(), fixed_now())
            .unwrap();
        let learner = repo.get_learner(LearnerId::new(1)).await.unwrap();
        repo.commit(&SessionCommit::learner(learner.clone()).with_finished_attempt(attempt.clone()))
            .await
            .unwrap();

        // Second finish conflicts; the learner change riding along is dropped.
        let mut moved = learner;
        moved.leave_quiz(SessionState::MainMenu);
        let err = repo
            .commit(&SessionCommit::learner(moved).with_finished_attempt(attempt))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        let stored = repo.get_learner(LearnerId::new(1)).await.unwrap();
        assert_eq!(stored.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn commit_never_relocks_progress() {
        let repo = seeded().await;
        let records = repo
            .enroll(LearnerId::new(1), &[TopicId::new(1)])
            .await
            .unwrap();
        let mut record = records[0].clone();
        record.locked = true;
        let learner = repo.get_learner(LearnerId::new(1)).await.unwrap();
        repo.commit(&SessionCommit::learner(learner).with_progress(vec![record.clone()]))
            .await
            .unwrap();
        assert!(!repo.get_progress(record.id).await.unwrap().locked);
    }

    #[tokio::test]
    async fn channel_cannot_be_shared() {
        let repo = seeded().await;
        repo.insert_learner(&learner(2, "key-2")).await.unwrap();
        let channel = ChannelAddress::new("chat-1").unwrap();

        let mut first = repo.get_learner(LearnerId::new(1)).await.unwrap();
        first.bind_channel(channel.clone());
        repo.commit(&SessionCommit::learner(first)).await.unwrap();

        let mut second = repo.get_learner(LearnerId::new(2)).await.unwrap();
        second.bind_channel(channel.clone());
        let err = repo.commit(&SessionCommit::learner(second)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
        let found = repo.find_by_channel(&channel).await.unwrap().unwrap();
        assert_eq!(found.id(), LearnerId::new(1));
    }

    #[tokio::test]
    async fn open_slot_is_created_once() {
        let repo = seeded().await;
        let attempt = repo
            .open_attempt(LearnerId::new(1), QuizId::new(1), fixed_now())
            .await
            .unwrap();
        let a = repo
            .ensure_open_slot(attempt.id(), QuestionId::new(9), fixed_now())
            .await
            .unwrap();
        let b = repo
            .ensure_open_slot(attempt.id(), QuestionId::new(9), fixed_now())
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.text(), None);
    }
}
