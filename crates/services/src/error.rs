//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use trainer_core::model::{
    AttemptError, LearnerError, LearnerId, OptionId, QuizId, SessionState, TopicId,
};

use crate::transport::TransportError;

/// How the dispatcher answers a failed controller operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Explain and show the topic list.
    RedirectToTopics,
    /// Explain and show the splash of the learner's active quiz.
    RestartQuiz,
    /// Rejection notice; the learner stays where they are.
    Hold,
    /// Credential notice; the learner stays unauthenticated.
    CredentialNotice,
    /// Log and send nothing.
    Drop,
    /// Propagate to the host.
    Fail,
}

/// Errors emitted by `SessionController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("learner {0} not found")]
    LearnerNotFound(LearnerId),
    #[error("topic {0} not found")]
    TopicNotFound(TopicId),
    #[error("quiz {0} not found")]
    QuizNotFound(QuizId),
    #[error("question {index} not found in quiz {quiz}")]
    QuestionNotFound { quiz: QuizId, index: i64 },
    #[error("answer option {0} not found")]
    OptionNotFound(OptionId),
    #[error("attempt is missing, finished, or not owned by the learner")]
    AttemptNotFound,
    #[error("topic {0} is locked")]
    TopicLocked(TopicId),
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },
    #[error("credential token not recognised")]
    InvalidCredential,
    #[error("learner or channel is already bound elsewhere")]
    AlreadyBound,
    #[error("learner is deactivated")]
    Deactivated,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Learner(#[from] LearnerError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SessionError {
    #[must_use]
    pub fn recovery(&self) -> Recovery {
        match self {
            SessionError::TopicNotFound(_)
            | SessionError::QuizNotFound(_)
            | SessionError::AttemptNotFound
            | SessionError::TopicLocked(_) => Recovery::RedirectToTopics,
            SessionError::QuestionNotFound { .. } | SessionError::OptionNotFound(_) => {
                Recovery::RestartQuiz
            }
            SessionError::InvalidState { .. } => Recovery::Hold,
            SessionError::InvalidCredential
            | SessionError::AlreadyBound
            | SessionError::Deactivated => Recovery::CredentialNotice,
            SessionError::Validation(_) => Recovery::Drop,
            SessionError::LearnerNotFound(_)
            | SessionError::Learner(_)
            | SessionError::Attempt(_)
            | SessionError::Storage(_) => Recovery::Fail,
        }
    }

    pub(crate) fn invalid_state(state: SessionState, operation: &'static str) -> Self {
        SessionError::InvalidState { state, operation }
    }
}

/// Errors emitted by `Dispatcher::handle`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors emitted by `ReportService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_matches_error_class() {
        assert_eq!(
            SessionError::TopicLocked(TopicId::new(2)).recovery(),
            Recovery::RedirectToTopics
        );
        assert_eq!(
            SessionError::OptionNotFound(OptionId::new(9)).recovery(),
            Recovery::RestartQuiz
        );
        assert_eq!(
            SessionError::invalid_state(SessionState::Quiz, "list_topics").recovery(),
            Recovery::Hold
        );
        assert_eq!(
            SessionError::Deactivated.recovery(),
            Recovery::CredentialNotice
        );
        assert_eq!(
            SessionError::Validation("empty".into()).recovery(),
            Recovery::Drop
        );
        assert_eq!(
            SessionError::Storage(StorageError::Conflict).recovery(),
            Recovery::Fail
        );
    }
}
