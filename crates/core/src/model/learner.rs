use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::model::ids::{AnswerId, AttemptId, BranchId, LearnerId, QuizId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LearnerError {
    #[error("learner name cannot be empty")]
    EmptyName,

    #[error("credential token cannot be empty")]
    EmptyToken,

    #[error("channel address cannot be empty")]
    EmptyChannel,

    #[error("invalid session state code: {0}")]
    InvalidStateCode(u8),

    #[error("quiz state requires an active attempt")]
    MissingActiveAttempt,

    #[error("active attempt is only allowed while in a quiz (state {0:?})")]
    UnexpectedActiveAttempt(SessionState),

    #[error("pending open answer requires an active attempt")]
    UnexpectedPendingAnswer,

    #[error("question index {0} is out of range")]
    InvalidQuestionIndex(i32),
}

//
// ─── SESSION STATE ─────────────────────────────────────────────────────────────
//

/// Conversation state of a learner.
///
/// The numeric codes are the persisted representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Unauthenticated,
    MainMenu,
    ProgressView,
    TopicList,
    Reading,
    Quiz,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        SessionState::Unauthenticated,
        SessionState::MainMenu,
        SessionState::ProgressView,
        SessionState::TopicList,
        SessionState::Reading,
        SessionState::Quiz,
    ];

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            SessionState::Unauthenticated => 0,
            SessionState::MainMenu => 1,
            SessionState::ProgressView => 2,
            SessionState::TopicList => 3,
            SessionState::Reading => 4,
            SessionState::Quiz => 5,
        }
    }

    /// Converts a persisted state code back into a `SessionState`.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError::InvalidStateCode` for codes outside `0..=5`.
    pub fn from_code(code: u8) -> Result<Self, LearnerError> {
        Self::ALL
            .into_iter()
            .find(|state| state.code() == code)
            .ok_or(LearnerError::InvalidStateCode(code))
    }

    #[must_use]
    pub fn is_authenticated(self) -> bool {
        self != SessionState::Unauthenticated
    }
}

//
// ─── CHANNEL / CREDENTIALS ─────────────────────────────────────────────────────
//

/// Transport-side address of a learner (e.g. a chat id), opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress(String);

impl ChannelAddress {
    /// # Errors
    ///
    /// Returns `LearnerError::EmptyChannel` for blank addresses.
    pub fn new(raw: impl Into<String>) -> Result<Self, LearnerError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(LearnerError::EmptyChannel);
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enrollment key handed to a staff member; exchanged once for a channel binding.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialToken(String);

impl CredentialToken {
    pub const GENERATED_LEN: usize = 16;

    /// # Errors
    ///
    /// Returns `LearnerError::EmptyToken` for blank tokens.
    pub fn new(raw: impl Into<String>) -> Result<Self, LearnerError> {
        let raw = raw.into().trim().to_owned();
        if raw.is_empty() {
            return Err(LearnerError::EmptyToken);
        }
        Ok(Self(raw))
    }

    /// Random 16 character token.
    #[must_use]
    pub fn generate() -> Self {
        let mut raw = Uuid::new_v4().simple().to_string();
        raw.truncate(Self::GENERATED_LEN);
        Self(raw)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialToken(***)")
    }
}

//
// ─── ACTIVE ATTEMPT ────────────────────────────────────────────────────────────
//

/// Pointer to the attempt a learner is currently working through.
///
/// `question_index == -1` is the quiz splash screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveAttempt {
    pub attempt_id: AttemptId,
    pub quiz_id: QuizId,
    pub question_index: i32,
}

impl ActiveAttempt {
    pub const SPLASH: i32 = -1;

    #[must_use]
    pub fn new(attempt_id: AttemptId, quiz_id: QuizId, question_index: i32) -> Self {
        Self {
            attempt_id,
            quiz_id,
            question_index,
        }
    }

    #[must_use]
    pub fn at_splash(&self) -> bool {
        self.question_index == Self::SPLASH
    }
}

//
// ─── LEARNER ───────────────────────────────────────────────────────────────────
//

/// Enrolled staff member together with their conversation state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Learner {
    id: LearnerId,
    branch_id: BranchId,
    display_name: String,
    token: CredentialToken,
    channel: Option<ChannelAddress>,
    active: bool,
    state: SessionState,
    active_attempt: Option<ActiveAttempt>,
    pending_open_answer: Option<AnswerId>,
}

impl Learner {
    /// Creates a freshly enrolled, unauthenticated learner.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError::EmptyName` if the display name is blank.
    pub fn new(
        id: LearnerId,
        branch_id: BranchId,
        display_name: impl Into<String>,
        token: CredentialToken,
    ) -> Result<Self, LearnerError> {
        let display_name = display_name.into();
        if display_name.trim().is_empty() {
            return Err(LearnerError::EmptyName);
        }
        Ok(Self {
            id,
            branch_id,
            display_name,
            token,
            channel: None,
            active: true,
            state: SessionState::Unauthenticated,
            active_attempt: None,
            pending_open_answer: None,
        })
    }

    /// Rehydrate a learner from storage, re-checking the session invariants.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError` if the persisted state and pointers disagree.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: LearnerId,
        branch_id: BranchId,
        display_name: String,
        token: CredentialToken,
        channel: Option<ChannelAddress>,
        active: bool,
        state: SessionState,
        active_attempt: Option<ActiveAttempt>,
        pending_open_answer: Option<AnswerId>,
    ) -> Result<Self, LearnerError> {
        let learner = Self {
            id,
            branch_id,
            display_name,
            token,
            channel,
            active,
            state,
            active_attempt,
            pending_open_answer,
        };
        learner.check_session()?;
        Ok(learner)
    }

    fn check_session(&self) -> Result<(), LearnerError> {
        match (self.state, self.active_attempt) {
            (SessionState::Quiz, None) => return Err(LearnerError::MissingActiveAttempt),
            (state, Some(_)) if state != SessionState::Quiz => {
                return Err(LearnerError::UnexpectedActiveAttempt(state));
            }
            _ => {}
        }
        if let Some(active) = self.active_attempt
            && active.question_index < ActiveAttempt::SPLASH
        {
            return Err(LearnerError::InvalidQuestionIndex(active.question_index));
        }
        if self.pending_open_answer.is_some() && self.active_attempt.is_none() {
            return Err(LearnerError::UnexpectedPendingAnswer);
        }
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> LearnerId {
        self.id
    }

    #[must_use]
    pub fn branch_id(&self) -> BranchId {
        self.branch_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn token(&self) -> &CredentialToken {
        &self.token
    }

    #[must_use]
    pub fn channel(&self) -> Option<&ChannelAddress> {
        self.channel.as_ref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn active_attempt(&self) -> Option<ActiveAttempt> {
        self.active_attempt
    }

    #[must_use]
    pub fn pending_open_answer(&self) -> Option<AnswerId> {
        self.pending_open_answer
    }

    /// True while the learner is inside a quiz past its splash screen.
    #[must_use]
    pub fn is_mid_quiz(&self) -> bool {
        self.active_attempt.is_some_and(|active| !active.at_splash())
    }

    pub fn bind_channel(&mut self, channel: ChannelAddress) {
        self.channel = Some(channel);
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.channel = None;
        self.leave_quiz(SessionState::Unauthenticated);
    }

    /// Move to a non-quiz state. Clears the quiz pointers.
    ///
    /// Passing `SessionState::Quiz` is a no-op; use `enter_quiz` instead.
    pub fn leave_quiz(&mut self, state: SessionState) {
        if state == SessionState::Quiz {
            return;
        }
        self.state = state;
        self.active_attempt = None;
        self.pending_open_answer = None;
    }

    /// Move into (or within) a quiz. The pending open answer is cleared; callers
    /// set it again when the new position is an open question.
    pub fn enter_quiz(&mut self, active: ActiveAttempt) {
        self.state = SessionState::Quiz;
        self.active_attempt = Some(active);
        self.pending_open_answer = None;
    }

    /// Mark the open answer slot awaiting free text.
    ///
    /// # Errors
    ///
    /// Returns `LearnerError::UnexpectedPendingAnswer` outside of a quiz.
    pub fn await_open_answer(&mut self, answer_id: AnswerId) -> Result<(), LearnerError> {
        if self.state != SessionState::Quiz || self.active_attempt.is_none() {
            return Err(LearnerError::UnexpectedPendingAnswer);
        }
        self.pending_open_answer = Some(answer_id);
        Ok(())
    }

    pub fn clear_pending_open_answer(&mut self) {
        self.pending_open_answer = None;
    }
}
