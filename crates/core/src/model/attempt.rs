use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AnswerId, AttemptId, LearnerId, OptionId, QuestionId, QuizId};
use crate::model::quiz::{Quiz, QuestionKind};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("attempt {0} is already finished")]
    AlreadyFinished(AttemptId),

    #[error("finished attempt {0} has no score")]
    MissingScore(AttemptId),

    #[error("finished_at is before started_at")]
    InvalidTimeRange,

    #[error("score {score} exceeds maximum {max}")]
    ScoreOutOfRange { score: u32, max: u32 },
}

//
// ─── SCORE ─────────────────────────────────────────────────────────────────────
//

/// Points collected in a finished attempt.
///
/// Open questions only count towards `open_max`; `open_score` is filled in by
/// staff review outside the engine and stays zero here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptScore {
    pub closed_score: u32,
    pub closed_max: u32,
    pub open_score: u32,
    pub open_max: u32,
}

impl AttemptScore {
    /// # Errors
    ///
    /// Returns `AttemptError::ScoreOutOfRange` if a score exceeds its maximum.
    pub fn from_persisted(
        closed_score: u32,
        closed_max: u32,
        open_score: u32,
        open_max: u32,
    ) -> Result<Self, AttemptError> {
        if closed_score > closed_max {
            return Err(AttemptError::ScoreOutOfRange {
                score: closed_score,
                max: closed_max,
            });
        }
        if open_score > open_max {
            return Err(AttemptError::ScoreOutOfRange {
                score: open_score,
                max: open_max,
            });
        }
        Ok(Self {
            closed_score,
            closed_max,
            open_score,
            open_max,
        })
    }

    /// Strictly more than half of the closed questions answered correctly.
    /// A quiz without closed questions passes automatically.
    #[must_use]
    pub fn passed(&self) -> bool {
        if self.closed_max == 0 {
            return true;
        }
        u64::from(self.closed_score) * 2 > u64::from(self.closed_max)
    }

    #[must_use]
    pub fn has_open_questions(&self) -> bool {
        self.open_max > 0
    }
}

//
// ─── RECORDED ANSWERS ──────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSelection {
    /// Selected option of a closed question.
    Choice(OptionId),
    /// Free-text slot of an open question; `None` until the learner writes.
    Text(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAnswer {
    pub id: AnswerId,
    pub attempt_id: AttemptId,
    pub question_id: QuestionId,
    pub selection: AnswerSelection,
    pub answered_at: DateTime<Utc>,
}

impl RecordedAnswer {
    #[must_use]
    pub fn selected_option(&self) -> Option<OptionId> {
        match self.selection {
            AnswerSelection::Choice(id) => Some(id),
            AnswerSelection::Text(_) => None,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.selection {
            AnswerSelection::Text(text) => text.as_deref(),
            AnswerSelection::Choice(_) => None,
        }
    }
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

/// One pass of a learner through a quiz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    id: AttemptId,
    learner_id: LearnerId,
    quiz_id: QuizId,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    score: Option<AttemptScore>,
}

impl Attempt {
    #[must_use]
    pub fn started(
        id: AttemptId,
        learner_id: LearnerId,
        quiz_id: QuizId,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            learner_id,
            quiz_id,
            started_at,
            finished_at: None,
            score: None,
        }
    }

    /// # Errors
    ///
    /// Returns `AttemptError` if the finish timestamp precedes the start or a
    /// finished attempt has no score.
    pub fn from_persisted(
        id: AttemptId,
        learner_id: LearnerId,
        quiz_id: QuizId,
        started_at: DateTime<Utc>,
        finished_at: Option<DateTime<Utc>>,
        score: Option<AttemptScore>,
    ) -> Result<Self, AttemptError> {
        if let Some(finished) = finished_at {
            if finished < started_at {
                return Err(AttemptError::InvalidTimeRange);
            }
            if score.is_none() {
                return Err(AttemptError::MissingScore(id));
            }
        }
        Ok(Self {
            id,
            learner_id,
            quiz_id,
            started_at,
            finished_at,
            score,
        })
    }

    #[must_use]
    pub fn id(&self) -> AttemptId {
        self.id
    }

    #[must_use]
    pub fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    #[must_use]
    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    #[must_use]
    pub fn score(&self) -> Option<AttemptScore> {
        self.score
    }

    /// Close the attempt with its final score.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::AlreadyFinished` on a second call; the stored
    /// score is never recomputed.
    pub fn finish(
        &mut self,
        score: AttemptScore,
        finished_at: DateTime<Utc>,
    ) -> Result<(), AttemptError> {
        if self.is_finished() {
            return Err(AttemptError::AlreadyFinished(self.id));
        }
        let finished_at = finished_at.max(self.started_at);
        self.finished_at = Some(finished_at);
        self.score = Some(score);
        Ok(())
    }
}

//
// ─── SCORING ───────────────────────────────────────────────────────────────────
//

/// Score an attempt's answers against its quiz.
///
/// Questions are visited in quiz order. For a closed question the first
/// recorded answer (in stored order) whose option belongs to that question and
/// is correct earns the point; later answers are not examined.
#[must_use]
pub fn score_attempt(quiz: &Quiz, answers: &[RecordedAnswer]) -> AttemptScore {
    let mut score = AttemptScore::default();

    for question in quiz.questions() {
        match question.kind() {
            QuestionKind::Open => score.open_max += 1,
            QuestionKind::Closed { options } => {
                score.closed_max += 1;
                let earned = answers
                    .iter()
                    .filter_map(RecordedAnswer::selected_option)
                    .find(|selected| options.iter().any(|o| o.id == *selected && o.is_right));
                if earned.is_some() {
                    score.closed_score += 1;
                }
            }
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::TopicId;
    use crate::model::quiz::{AnswerOption, Question};
    use crate::time::fixed_now;

    fn two_closed_quiz() -> Quiz {
        let q1 = Question::closed(
            QuestionId::new(1),
            "Greeting?",
            vec![
                AnswerOption::new(OptionId::new(11), "Hello", true),
                AnswerOption::new(OptionId::new(12), "Go away", false),
            ],
        )
        .unwrap();
        let q2 = Question::closed(
            QuestionId::new(2),
            "Serve from?",
            vec![
                AnswerOption::new(OptionId::new(21), "Left", false),
                AnswerOption::new(OptionId::new(22), "Right", true),
            ],
        )
        .unwrap();
        Quiz::new(QuizId::new(1), TopicId::new(1), "Service", vec![q1, q2]).unwrap()
    }

    fn choice(id: u64, question: u64, option: u64) -> RecordedAnswer {
        RecordedAnswer {
            id: AnswerId::new(id),
            attempt_id: AttemptId::new(1),
            question_id: QuestionId::new(question),
            selection: AnswerSelection::Choice(OptionId::new(option)),
            answered_at: fixed_now(),
        }
    }

    #[test]
    fn all_correct_selections_pass() {
        let score = score_attempt(&two_closed_quiz(), &[choice(1, 1, 11), choice(2, 2, 22)]);
        assert_eq!(score.closed_score, 2);
        assert_eq!(score.closed_max, 2);
        assert!(score.passed());
    }

    #[test]
    fn no_correct_selections_fail() {
        let score = score_attempt(&two_closed_quiz(), &[choice(1, 1, 12), choice(2, 2, 21)]);
        assert_eq!(score.closed_score, 0);
        assert_eq!(score.closed_max, 2);
        assert!(!score.passed());
    }

    #[test]
    fn half_is_not_a_pass() {
        let score = score_attempt(&two_closed_quiz(), &[choice(1, 1, 11), choice(2, 2, 21)]);
        assert_eq!(score.closed_score, 1);
        assert!(!score.passed());
    }

    #[test]
    fn open_only_quiz_passes_without_division() {
        let quiz = Quiz::new(
            QuizId::new(2),
            TopicId::new(1),
            "Essay",
            vec![Question::open(QuestionId::new(5), "Describe").unwrap()],
        )
        .unwrap();
        let open = RecordedAnswer {
            id: AnswerId::new(1),
            attempt_id: AttemptId::new(1),
            question_id: QuestionId::new(5),
            selection: AnswerSelection::Text(Some("We smile".into())),
            answered_at: fixed_now(),
        };
        let score = score_attempt(&quiz, &[open]);
        assert_eq!(score.closed_max, 0);
        assert_eq!(score.open_max, 1);
        assert_eq!(score.open_score, 0);
        assert!(score.passed());
    }

    #[test]
    fn a_question_earns_at_most_one_point() {
        let answers = [choice(1, 1, 11), choice(2, 1, 11)];
        let score = score_attempt(&two_closed_quiz(), &answers);
        assert_eq!(score.closed_score, 1);
    }

    #[test]
    fn options_from_other_questions_do_not_count() {
        // Matching is by option membership: option 22 earns question 2's point only.
        let score = score_attempt(&two_closed_quiz(), &[choice(1, 1, 22)]);
        assert_eq!(score.closed_score, 1);
        assert_eq!(score.closed_max, 2);
    }

    #[test]
    fn finishing_twice_is_rejected() {
        let mut attempt =
            Attempt::started(AttemptId::new(4), LearnerId::new(1), QuizId::new(1), fixed_now());
        let first = AttemptScore::from_persisted(1, 2, 0, 0).unwrap();
        attempt.finish(first, fixed_now()).unwrap();

        let err = attempt
            .finish(AttemptScore::default(), fixed_now())
            .unwrap_err();
        assert_eq!(err, AttemptError::AlreadyFinished(AttemptId::new(4)));
        assert_eq!(attempt.score(), Some(first));
    }

    #[test]
    fn persisted_score_bounds_are_checked() {
        assert!(AttemptScore::from_persisted(3, 2, 0, 0).is_err());
        assert!(AttemptScore::from_persisted(0, 0, 2, 1).is_err());
    }
}
