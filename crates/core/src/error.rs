use thiserror::Error;

use crate::model::{AttemptError, LearnerError, QuizError, TopicError};

/// Any invariant violation raised by the domain model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Learner(#[from] LearnerError),
    #[error(transparent)]
    Topic(#[from] TopicError),
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
}
