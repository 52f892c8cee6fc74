mod attempt;
mod ids;
mod learner;
mod progress;
mod quiz;
mod topic;

pub use ids::{
    AnswerId, AttemptId, BranchId, LearnerId, OptionId, ParseIdError, ProgressId, QuestionId,
    QuizId, TopicId,
};

pub use attempt::{
    AnswerSelection, Attempt, AttemptError, AttemptScore, RecordedAnswer, score_attempt,
};
pub use learner::{
    ActiveAttempt, ChannelAddress, CredentialToken, Learner, LearnerError, SessionState,
};
pub use progress::{LearnerTopicProgress, reconcile_locks};
pub use quiz::{AnswerOption, Question, QuestionKind, Quiz, QuizError};
pub use topic::{ContentBlock, Topic, TopicError, sort_curriculum};
