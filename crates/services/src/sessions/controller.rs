use std::sync::Arc;

use tracing::{debug, info};

use storage::repository::{
    AnswerWrite, AttemptRepository, CurriculumRepository, LearnerRepository, ProgressRepository,
    SessionCommit, SessionStore, Storage, StorageError,
};
use trainer_core::model::{
    ActiveAttempt, Attempt, AttemptId, ChannelAddress, CredentialToken, Learner, LearnerId,
    OptionId, Quiz, QuizId, SessionState, Topic, TopicId, score_attempt,
};

use super::locks::LearnerLocks;
use super::snapshot::CurriculumSnapshot;
use crate::Clock;
use crate::error::SessionError;
use crate::messages::{MessageTag, Messages};
use crate::render::{ProgressRow, Renderer, Screen};

/// Result of a controller operation: the learner's state afterwards and the
/// screens to deliver, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: SessionState,
    pub screens: Vec<Screen>,
}

impl Outcome {
    fn new(state: SessionState, screens: Vec<Screen>) -> Self {
        Self { state, screens }
    }
}

/// Drives a learner through the curriculum.
///
/// Every operation takes the learner's lock, reads what it needs, and writes
/// the resulting session fields, answer, attempt, and progress flags in a
/// single `SessionStore::commit`.
pub struct SessionController {
    clock: Clock,
    learners: Arc<dyn LearnerRepository>,
    curriculum: Arc<dyn CurriculumRepository>,
    progress: Arc<dyn ProgressRepository>,
    attempts: Arc<dyn AttemptRepository>,
    sessions: Arc<dyn SessionStore>,
    renderer: Renderer,
    locks: Arc<LearnerLocks>,
}

impl SessionController {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage, messages: Messages) -> Self {
        Self::with_locks(clock, storage, messages, Arc::new(LearnerLocks::new()))
    }

    /// Share `locks` with other writers of learner-owned rows.
    #[must_use]
    pub fn with_locks(
        clock: Clock,
        storage: &Storage,
        messages: Messages,
        locks: Arc<LearnerLocks>,
    ) -> Self {
        Self {
            clock,
            learners: Arc::clone(&storage.learners),
            curriculum: Arc::clone(&storage.curriculum),
            progress: Arc::clone(&storage.progress),
            attempts: Arc::clone(&storage.attempts),
            sessions: Arc::clone(&storage.sessions),
            renderer: Renderer::new(messages),
            locks,
        }
    }

    #[must_use]
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    #[must_use]
    pub fn locks(&self) -> Arc<LearnerLocks> {
        Arc::clone(&self.locks)
    }

    /// Look up the learner bound to `channel`, if any.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Storage` on backend failures.
    pub async fn learner_for_channel(
        &self,
        channel: &ChannelAddress,
    ) -> Result<Option<Learner>, SessionError> {
        Ok(self.learners.find_by_channel(channel).await?)
    }

    // ─── ENTRY ───────────────────────────────────────────────────────────────

    /// `/start`: key prompt for unknown channels, main menu for bound learners.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Deactivated` for a blocked learner and
    /// `SessionError::Storage` on backend failures.
    pub async fn welcome(&self, channel: &ChannelAddress) -> Result<Outcome, SessionError> {
        let Some(found) = self.learners.find_by_channel(channel).await? else {
            return Ok(Outcome::new(
                SessionState::Unauthenticated,
                vec![self.renderer.key_prompt()],
            ));
        };
        let _guard = self.locks.acquire(found.id()).await;
        let learner = self.load_learner(found.id()).await?;
        if !learner.is_active() {
            return Err(SessionError::Deactivated);
        }
        if learner.is_mid_quiz() {
            return Ok(self.quiz_rejection(&learner));
        }
        self.enter_main_menu(learner).await
    }

    /// Bind `channel` to the learner owning `raw_token` and enroll them into
    /// their branch curriculum.
    ///
    /// # Errors
    ///
    /// Returns `InvalidCredential` for unknown tokens, `Deactivated` for blocked
    /// learners, and `AlreadyBound` when the learner or the channel is already
    /// paired elsewhere.
    pub async fn authenticate(
        &self,
        channel: &ChannelAddress,
        raw_token: &str,
    ) -> Result<Outcome, SessionError> {
        let token =
            CredentialToken::new(raw_token.trim()).map_err(|_| SessionError::InvalidCredential)?;
        let found = self
            .learners
            .find_by_token(&token)
            .await?
            .ok_or(SessionError::InvalidCredential)?;

        let _guard = self.locks.acquire(found.id()).await;
        let mut learner = self.load_learner(found.id()).await?;
        if !learner.is_active() {
            return Err(SessionError::Deactivated);
        }
        if learner.channel().is_some_and(|bound| bound != channel) {
            return Err(SessionError::AlreadyBound);
        }
        let owner = self.learners.find_by_channel(channel).await?;
        if owner.is_some_and(|owner| owner.id() != learner.id()) {
            return Err(SessionError::AlreadyBound);
        }
        if learner.state().is_authenticated() {
            return Err(SessionError::invalid_state(learner.state(), "authenticate"));
        }

        learner.bind_channel(channel.clone());
        learner.leave_quiz(SessionState::MainMenu);
        let curriculum = self.load_curriculum(&learner).await?;
        let greeting = self.renderer.welcome(learner.display_name());
        let id = learner.id();

        let commit = SessionCommit::learner(learner).with_progress(curriculum.changed());
        match self.sessions.commit(&commit).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => return Err(SessionError::AlreadyBound),
            Err(err) => return Err(err.into()),
        }
        info!(learner = %id, channel = %channel, "learner authenticated");

        Ok(Outcome::new(
            SessionState::MainMenu,
            vec![greeting, self.renderer.main_menu()],
        ))
    }

    /// Block the learner and release their channel.
    ///
    /// # Errors
    ///
    /// Returns `LearnerNotFound` or `Storage`.
    pub async fn deactivate(&self, learner: LearnerId) -> Result<(), SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut record = self.load_learner(learner).await?;
        record.deactivate();
        self.sessions.commit(&SessionCommit::learner(record)).await?;
        info!(learner = %learner, "learner deactivated");
        Ok(())
    }

    // ─── MENUS ───────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `InvalidState` while the learner is mid-quiz.
    pub async fn show_main_menu(&self, learner: LearnerId) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let learner = self.load_session(learner, "show_main_menu").await?;
        reject_mid_quiz(&learner, "show_main_menu")?;
        self.enter_main_menu(learner).await
    }

    /// Per-topic flags plus the latest finished score of each quiz.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while the learner is mid-quiz.
    pub async fn show_progress(&self, learner: LearnerId) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "show_progress").await?;
        reject_mid_quiz(&learner, "show_progress")?;

        let curriculum = self.load_curriculum(&learner).await?;
        learner.leave_quiz(SessionState::ProgressView);
        let id = learner.id();
        self.sessions
            .commit(&SessionCommit::learner(learner).with_progress(curriculum.changed()))
            .await?;

        let rows = self.progress_rows(id, &curriculum).await?;
        Ok(Outcome::new(
            SessionState::ProgressView,
            vec![self.renderer.progress_view(&rows)],
        ))
    }

    /// Topic list after enrollment top-up and the lock repair pass.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` while the learner is mid-quiz.
    pub async fn list_topics(&self, learner: LearnerId) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "list_topics").await?;
        reject_mid_quiz(&learner, "list_topics")?;

        let curriculum = self.load_curriculum(&learner).await?;
        learner.leave_quiz(SessionState::TopicList);
        self.sessions
            .commit(&SessionCommit::learner(learner).with_progress(curriculum.changed()))
            .await?;

        Ok(Outcome::new(
            SessionState::TopicList,
            vec![
                self.renderer
                    .topic_list(&curriculum.topics, &curriculum.records),
            ],
        ))
    }

    // ─── READING ─────────────────────────────────────────────────────────────

    /// Show page `block` of a topic. Reaching the last page completes the theory;
    /// stepping past it finishes a topic that has no quiz.
    ///
    /// # Errors
    ///
    /// Returns `TopicNotFound`, `TopicLocked`, or `InvalidState` outside the
    /// topic list, reading, or the splash of this topic's quiz.
    pub async fn open_topic(
        &self,
        learner: LearnerId,
        topic: TopicId,
        block: i64,
    ) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "open_topic").await?;
        match learner.state() {
            SessionState::TopicList | SessionState::Reading => {}
            SessionState::Quiz if self.at_splash_of_topic(&learner, topic).await? => {}
            other => return Err(SessionError::invalid_state(other, "open_topic")),
        }

        let topic = self.load_topic(&learner, topic).await?;
        let mut curriculum = self.load_curriculum(&learner).await?;
        let mut record = curriculum
            .record(topic.id())
            .cloned()
            .ok_or(SessionError::TopicNotFound(topic.id()))?;
        if record.locked {
            return Err(SessionError::TopicLocked(topic.id()));
        }

        let page = topic.clamp_page(block);
        let past_end = usize::try_from(block).is_ok_and(|b| b >= topic.page_count());
        if past_end && topic.quiz_id().is_none() && !record.finished {
            record.finish_theory_only();
            curriculum.update(record);
            curriculum.reconcile();
            info!(learner = %learner.id(), topic = %topic.id(), "topic completed");
        } else if topic.is_last_page(page) && record.mark_theory_complete() {
            debug!(learner = %learner.id(), topic = %topic.id(), "theory complete");
            curriculum.update(record);
        }

        learner.leave_quiz(SessionState::Reading);
        self.sessions
            .commit(&SessionCommit::learner(learner).with_progress(curriculum.changed()))
            .await?;

        Ok(Outcome::new(
            SessionState::Reading,
            vec![self.renderer.reading(&topic, page)],
        ))
    }

    /// Finish a topic without a quiz once its theory has been read.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside reading, for topics that own a quiz, or
    /// before the last page was reached.
    pub async fn complete_topic(
        &self,
        learner: LearnerId,
        topic: TopicId,
    ) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "complete_topic").await?;
        if learner.state() != SessionState::Reading {
            return Err(SessionError::invalid_state(learner.state(), "complete_topic"));
        }

        let topic = self.load_topic(&learner, topic).await?;
        let mut curriculum = self.load_curriculum(&learner).await?;
        let mut record = curriculum
            .record(topic.id())
            .cloned()
            .ok_or(SessionError::TopicNotFound(topic.id()))?;
        if record.locked {
            return Err(SessionError::TopicLocked(topic.id()));
        }
        if topic.quiz_id().is_some() || !record.theory_complete {
            return Err(SessionError::invalid_state(learner.state(), "complete_topic"));
        }

        if !record.finished {
            record.finish_theory_only();
            curriculum.update(record);
            curriculum.reconcile();
            info!(learner = %learner.id(), topic = %topic.id(), "topic completed");
        }

        learner.leave_quiz(SessionState::TopicList);
        self.sessions
            .commit(&SessionCommit::learner(learner).with_progress(curriculum.changed()))
            .await?;

        Ok(Outcome::new(
            SessionState::TopicList,
            vec![
                self.renderer
                    .topic_list(&curriculum.topics, &curriculum.records),
            ],
        ))
    }

    // ─── QUIZ ────────────────────────────────────────────────────────────────

    /// Show the splash (`index == -1`), a question, or finish the attempt
    /// (`index == question_count`). Resumes the learner's unfinished attempt.
    ///
    /// # Errors
    ///
    /// Returns `QuizNotFound`, `QuestionNotFound`, `TopicLocked`, or
    /// `InvalidState` when entered from anywhere but reading or the same quiz.
    pub async fn open_quiz(
        &self,
        learner: LearnerId,
        quiz: QuizId,
        index: i32,
    ) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "open_quiz").await?;
        match learner.state() {
            SessionState::Reading => {}
            SessionState::Quiz
                if learner
                    .active_attempt()
                    .is_some_and(|active| active.quiz_id == quiz) => {}
            other => return Err(SessionError::invalid_state(other, "open_quiz")),
        }

        let quiz = self.load_quiz(quiz).await?;
        let topic = match self.load_topic(&learner, quiz.topic_id()).await {
            Ok(topic) => topic,
            Err(SessionError::TopicNotFound(_)) => {
                return Err(SessionError::QuizNotFound(quiz.id()));
            }
            Err(err) => return Err(err),
        };
        let curriculum = self.load_curriculum(&learner).await?;
        if curriculum.record(topic.id()).is_none_or(|r| r.locked) {
            return Err(SessionError::TopicLocked(topic.id()));
        }

        let count = quiz.question_count();
        let requested = i64::from(index);
        if requested < i64::from(ActiveAttempt::SPLASH)
            || requested > i64::try_from(count).unwrap_or(i64::MAX)
        {
            return Err(SessionError::QuestionNotFound {
                quiz: quiz.id(),
                index: requested,
            });
        }

        let attempt = self
            .attempts
            .open_attempt(learner.id(), quiz.id(), self.clock.now())
            .await?;

        let screen = match usize::try_from(index) {
            Ok(position) if position == count => {
                return self
                    .finish_locked(learner, &quiz, attempt, curriculum, None)
                    .await;
            }
            Ok(position) => {
                self.visit_question(&mut learner, &quiz, attempt.id(), position)
                    .await?
            }
            Err(_) => {
                learner.enter_quiz(ActiveAttempt::new(
                    attempt.id(),
                    quiz.id(),
                    ActiveAttempt::SPLASH,
                ));
                self.renderer.quiz_splash(&topic, &quiz)
            }
        };

        self.sessions
            .commit(&SessionCommit::learner(learner).with_progress(curriculum.changed()))
            .await?;
        Ok(Outcome::new(SessionState::Quiz, vec![screen]))
    }

    /// Record `option` as the answer to question `index`, replacing any earlier
    /// answer to that question. Repeating the same selection changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `AttemptNotFound` for stale or foreign attempts,
    /// `QuestionNotFound`, or `OptionNotFound`.
    pub async fn select_option(
        &self,
        learner: LearnerId,
        attempt: AttemptId,
        index: usize,
        option: OptionId,
    ) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "select_option").await?;
        let active = learner
            .active_attempt()
            .filter(|active| active.attempt_id == attempt)
            .ok_or(SessionError::AttemptNotFound)?;
        let attempt = self.load_open_attempt(&learner, attempt).await?;
        let quiz = self.load_quiz(active.quiz_id).await?;

        let not_found = || SessionError::QuestionNotFound {
            quiz: quiz.id(),
            index: i64::try_from(index).unwrap_or(i64::MAX),
        };
        let question = quiz.question_at(index).ok_or_else(not_found)?;
        let position = i32::try_from(index).map_err(|_| not_found())?;
        let option = question
            .option(option)
            .ok_or(SessionError::OptionNotFound(option))?;

        let write = AnswerWrite::SelectOption {
            attempt_id: attempt.id(),
            question_id: question.id(),
            option_id: option.id,
            at: self.clock.now(),
        };

        learner.enter_quiz(ActiveAttempt::new(attempt.id(), quiz.id(), position));
        let commit = SessionCommit::learner(learner).with_answer(write);
        match self.sessions.commit(&commit).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => return Err(SessionError::AttemptNotFound),
            Err(err) => return Err(err.into()),
        }

        let answers = self.attempts.answers_for_attempt(attempt.id()).await?;
        Ok(Outcome::new(
            SessionState::Quiz,
            vec![
                self.renderer
                    .question(&quiz, attempt.id(), index, question, &answers),
            ],
        ))
    }

    /// Store free text for the pending open question and move on.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for blank text, `InvalidState` without a pending
    /// open question, and `AttemptNotFound` when the slot went stale.
    pub async fn submit_open_answer(
        &self,
        learner: LearnerId,
        text: &str,
    ) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let mut learner = self.load_session(learner, "submit_open_answer").await?;
        let (Some(active), Some(pending)) =
            (learner.active_attempt(), learner.pending_open_answer())
        else {
            return Err(SessionError::invalid_state(
                learner.state(),
                "submit_open_answer",
            ));
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Validation("open answer is empty".into()));
        }

        let slot = match self.attempts.get_answer(pending).await {
            Ok(slot) if slot.attempt_id == active.attempt_id => slot,
            Ok(_) | Err(StorageError::NotFound) => return Err(SessionError::AttemptNotFound),
            Err(err) => return Err(err.into()),
        };
        let attempt = self.load_open_attempt(&learner, slot.attempt_id).await?;
        let quiz = self.load_quiz(active.quiz_id).await?;

        let write = AnswerWrite::OpenText {
            answer_id: slot.id,
            text: text.to_owned(),
            at: self.clock.now(),
        };
        learner.clear_pending_open_answer();
        let saved = self.renderer.notice(MessageTag::AnswerSaved);

        let next = usize::try_from(active.question_index).map_or(0, |i| i + 1);
        if next >= quiz.question_count() {
            let curriculum = self.load_curriculum(&learner).await?;
            let mut outcome = self
                .finish_locked(learner, &quiz, attempt, curriculum, Some(write))
                .await?;
            outcome.screens.insert(0, saved);
            return Ok(outcome);
        }

        let screen = self
            .visit_question(&mut learner, &quiz, attempt.id(), next)
            .await?;
        match self
            .sessions
            .commit(&SessionCommit::learner(learner).with_answer(write))
            .await
        {
            Ok(()) => {}
            Err(StorageError::Conflict) => return Err(SessionError::AttemptNotFound),
            Err(err) => return Err(err.into()),
        }

        Ok(Outcome::new(SessionState::Quiz, vec![saved, screen]))
    }

    /// Score and close the learner's active attempt.
    ///
    /// # Errors
    ///
    /// Returns `AttemptNotFound` for unknown or foreign attempts and
    /// `InvalidState` if the attempt is already finished or not the active one.
    pub async fn finish_attempt(
        &self,
        learner: LearnerId,
        attempt: AttemptId,
    ) -> Result<Outcome, SessionError> {
        let _guard = self.locks.acquire(learner).await;
        let learner = self.load_session(learner, "finish_attempt").await?;
        let attempt = match self.attempts.get_attempt(attempt).await {
            Ok(found) if found.learner_id() == learner.id() => found,
            Ok(_) | Err(StorageError::NotFound) => return Err(SessionError::AttemptNotFound),
            Err(err) => return Err(err.into()),
        };
        let is_active = learner
            .active_attempt()
            .is_some_and(|active| active.attempt_id == attempt.id());
        if attempt.is_finished() || !is_active {
            return Err(SessionError::invalid_state(learner.state(), "finish_attempt"));
        }

        let quiz = self.load_quiz(attempt.quiz_id()).await?;
        let curriculum = self.load_curriculum(&learner).await?;
        self.finish_locked(learner, &quiz, attempt, curriculum, None)
            .await
    }

    /// Rejection notice for input that is not allowed mid-quiz. Writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `LearnerNotFound` or `Storage`.
    pub async fn reject_during_quiz(&self, learner: LearnerId) -> Result<Outcome, SessionError> {
        let learner = self.load_learner(learner).await?;
        Ok(self.quiz_rejection(&learner))
    }

    // ─── INTERNALS ───────────────────────────────────────────────────────────

    async fn finish_locked(
        &self,
        mut learner: Learner,
        quiz: &Quiz,
        mut attempt: Attempt,
        mut curriculum: CurriculumSnapshot,
        answer: Option<AnswerWrite>,
    ) -> Result<Outcome, SessionError> {
        let answers = self.attempts.answers_for_attempt(attempt.id()).await?;
        let score = score_attempt(quiz, &answers);
        attempt.finish(score, self.clock.now())?;

        if let Some(mut record) = curriculum.record(quiz.topic_id()).cloned() {
            record.record_test(&score);
            curriculum.update(record);
            curriculum.reconcile();
        }

        learner.leave_quiz(SessionState::ProgressView);
        let learner_id = learner.id();
        let attempt_id = attempt.id();
        let state = learner.state();

        let mut commit = SessionCommit::learner(learner)
            .with_progress(curriculum.changed())
            .with_finished_attempt(attempt);
        if let Some(write) = answer {
            commit = commit.with_answer(write);
        }
        match self.sessions.commit(&commit).await {
            Ok(()) => {}
            Err(StorageError::Conflict) => {
                return Err(SessionError::invalid_state(state, "finish_attempt"));
            }
            Err(err) => return Err(err.into()),
        }
        info!(
            learner = %learner_id,
            attempt = %attempt_id,
            closed_score = score.closed_score,
            closed_max = score.closed_max,
            passed = score.passed(),
            "attempt finished"
        );

        let rows = self.progress_rows(learner_id, &curriculum).await?;
        Ok(Outcome::new(
            SessionState::ProgressView,
            vec![
                self.renderer.test_finished(&score),
                self.renderer.progress_view(&rows),
            ],
        ))
    }

    /// Move the cursor to question `index` and render it. Open questions get
    /// their answer slot created and marked pending.
    async fn visit_question(
        &self,
        learner: &mut Learner,
        quiz: &Quiz,
        attempt: AttemptId,
        index: usize,
    ) -> Result<Screen, SessionError> {
        let not_found = || SessionError::QuestionNotFound {
            quiz: quiz.id(),
            index: i64::try_from(index).unwrap_or(i64::MAX),
        };
        let question = quiz.question_at(index).ok_or_else(not_found)?;
        let position = i32::try_from(index).map_err(|_| not_found())?;
        learner.enter_quiz(ActiveAttempt::new(attempt, quiz.id(), position));

        let answers = if question.is_open() {
            let slot = self
                .attempts
                .ensure_open_slot(attempt, question.id(), self.clock.now())
                .await?;
            learner.await_open_answer(slot.id)?;
            vec![slot]
        } else {
            self.attempts.answers_for_attempt(attempt).await?
        };
        Ok(self
            .renderer
            .question(quiz, attempt, index, question, &answers))
    }

    async fn enter_main_menu(&self, mut learner: Learner) -> Result<Outcome, SessionError> {
        learner.leave_quiz(SessionState::MainMenu);
        self.sessions.commit(&SessionCommit::learner(learner)).await?;
        Ok(Outcome::new(
            SessionState::MainMenu,
            vec![self.renderer.main_menu()],
        ))
    }

    fn quiz_rejection(&self, learner: &Learner) -> Outcome {
        Outcome::new(
            learner.state(),
            vec![self.renderer.notice(MessageTag::CannotWhileTest)],
        )
    }

    async fn progress_rows(
        &self,
        learner: LearnerId,
        curriculum: &CurriculumSnapshot,
    ) -> Result<Vec<ProgressRow>, SessionError> {
        let mut rows = Vec::with_capacity(curriculum.topics.len());
        for topic in &curriculum.topics {
            let Some(record) = curriculum.record(topic.id()) else {
                continue;
            };
            let score = match topic.quiz_id() {
                Some(quiz) => self
                    .attempts
                    .latest_finished_attempt(learner, quiz)
                    .await?
                    .and_then(|attempt| attempt.score()),
                None => None,
            };
            rows.push(ProgressRow {
                topic_name: topic.name().to_owned(),
                progress: record.clone(),
                score,
            });
        }
        Ok(rows)
    }

    /// Enrollment top-up plus the lock repair pass.
    async fn load_curriculum(&self, learner: &Learner) -> Result<CurriculumSnapshot, SessionError> {
        let topics = self.curriculum.list_topics(learner.branch_id()).await?;
        let order: Vec<TopicId> = topics.iter().map(Topic::id).collect();
        let records = self.progress.enroll(learner.id(), &order).await?;
        let mut snapshot = CurriculumSnapshot::new(topics, records);
        snapshot.reconcile();
        Ok(snapshot)
    }

    async fn at_splash_of_topic(
        &self,
        learner: &Learner,
        topic: TopicId,
    ) -> Result<bool, SessionError> {
        let Some(active) = learner.active_attempt().filter(ActiveAttempt::at_splash) else {
            return Ok(false);
        };
        match self.curriculum.get_quiz(active.quiz_id).await {
            Ok(quiz) => Ok(quiz.topic_id() == topic),
            Err(StorageError::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_learner(&self, id: LearnerId) -> Result<Learner, SessionError> {
        match self.learners.get_learner(id).await {
            Ok(learner) => Ok(learner),
            Err(StorageError::NotFound) => Err(SessionError::LearnerNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    /// Load an authenticated, active learner.
    async fn load_session(
        &self,
        id: LearnerId,
        operation: &'static str,
    ) -> Result<Learner, SessionError> {
        let learner = self.load_learner(id).await?;
        if !learner.is_active() {
            return Err(SessionError::Deactivated);
        }
        if !learner.state().is_authenticated() {
            return Err(SessionError::invalid_state(learner.state(), operation));
        }
        Ok(learner)
    }

    async fn load_topic(&self, learner: &Learner, id: TopicId) -> Result<Topic, SessionError> {
        match self.curriculum.get_topic(id).await {
            Ok(topic) if topic.branch_id() == learner.branch_id() => Ok(topic),
            Ok(_) | Err(StorageError::NotFound) => Err(SessionError::TopicNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_quiz(&self, id: QuizId) -> Result<Quiz, SessionError> {
        match self.curriculum.get_quiz(id).await {
            Ok(quiz) => Ok(quiz),
            Err(StorageError::NotFound) => Err(SessionError::QuizNotFound(id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_open_attempt(
        &self,
        learner: &Learner,
        id: AttemptId,
    ) -> Result<Attempt, SessionError> {
        match self.attempts.get_attempt(id).await {
            Ok(attempt) if attempt.learner_id() == learner.id() && !attempt.is_finished() => {
                Ok(attempt)
            }
            Ok(_) | Err(StorageError::NotFound) => Err(SessionError::AttemptNotFound),
            Err(err) => Err(err.into()),
        }
    }
}

fn reject_mid_quiz(learner: &Learner, operation: &'static str) -> Result<(), SessionError> {
    if learner.is_mid_quiz() {
        return Err(SessionError::invalid_state(learner.state(), operation));
    }
    Ok(())
}
