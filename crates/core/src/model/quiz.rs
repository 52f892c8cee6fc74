use thiserror::Error;

use crate::model::ids::{OptionId, QuestionId, QuizId, TopicId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuizError {
    #[error("quiz name cannot be empty")]
    EmptyName,

    #[error("question {0} has an empty prompt")]
    EmptyPrompt(QuestionId),

    #[error("closed question {0} has no options")]
    NoOptions(QuestionId),

    #[error("closed question {0} has no correct option")]
    NoCorrectOption(QuestionId),

    #[error("question {0} appears more than once")]
    DuplicateQuestion(QuestionId),
}

//
// ─── QUESTIONS ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption {
    pub id: OptionId,
    pub label: String,
    pub is_right: bool,
}

impl AnswerOption {
    #[must_use]
    pub fn new(id: OptionId, label: impl Into<String>, is_right: bool) -> Self {
        Self {
            id,
            label: label.into(),
            is_right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionKind {
    /// Fixed options, auto-graded.
    Closed { options: Vec<AnswerOption> },
    /// Free text, graded by staff outside the engine.
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    id: QuestionId,
    prompt: String,
    kind: QuestionKind,
}

impl Question {
    /// # Errors
    ///
    /// Returns `QuizError` if the prompt is blank or a closed question has no
    /// (correct) options.
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        kind: QuestionKind,
    ) -> Result<Self, QuizError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuizError::EmptyPrompt(id));
        }
        if let QuestionKind::Closed { options } = &kind {
            if options.is_empty() {
                return Err(QuizError::NoOptions(id));
            }
            if !options.iter().any(|o| o.is_right) {
                return Err(QuizError::NoCorrectOption(id));
            }
        }
        Ok(Self { id, prompt, kind })
    }

    /// # Errors
    ///
    /// See [`Question::new`].
    pub fn closed(
        id: QuestionId,
        prompt: impl Into<String>,
        options: Vec<AnswerOption>,
    ) -> Result<Self, QuizError> {
        Self::new(id, prompt, QuestionKind::Closed { options })
    }

    /// # Errors
    ///
    /// Returns `QuizError::EmptyPrompt` for a blank prompt.
    pub fn open(id: QuestionId, prompt: impl Into<String>) -> Result<Self, QuizError> {
        Self::new(id, prompt, QuestionKind::Open)
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn kind(&self) -> &QuestionKind {
        &self.kind
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self.kind, QuestionKind::Open)
    }

    /// Options in authored order; empty for open questions.
    #[must_use]
    pub fn options(&self) -> &[AnswerOption] {
        match &self.kind {
            QuestionKind::Closed { options } => options,
            QuestionKind::Open => &[],
        }
    }

    #[must_use]
    pub fn option(&self, id: OptionId) -> Option<&AnswerOption> {
        self.options().iter().find(|o| o.id == id)
    }
}

//
// ─── QUIZ ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quiz {
    id: QuizId,
    topic_id: TopicId,
    name: String,
    questions: Vec<Question>,
}

impl Quiz {
    /// # Errors
    ///
    /// Returns `QuizError::EmptyName` or `QuizError::DuplicateQuestion`.
    pub fn new(
        id: QuizId,
        topic_id: TopicId,
        name: impl Into<String>,
        questions: Vec<Question>,
    ) -> Result<Self, QuizError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QuizError::EmptyName);
        }
        for (i, q) in questions.iter().enumerate() {
            if questions[..i].iter().any(|prev| prev.id == q.id) {
                return Err(QuizError::DuplicateQuestion(q.id));
            }
        }
        Ok(Self {
            id,
            topic_id,
            name,
            questions,
        })
    }

    #[must_use]
    pub fn id(&self) -> QuizId {
        self.id
    }

    #[must_use]
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn question_at(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    #[must_use]
    pub fn position_of(&self, question_id: QuestionId) -> Option<usize> {
        self.questions.iter().position(|q| q.id == question_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_question_needs_a_correct_option() {
        let err = Question::closed(
            QuestionId::new(1),
            "Pick",
            vec![AnswerOption::new(OptionId::new(1), "a", false)],
        )
        .unwrap_err();
        assert_eq!(err, QuizError::NoCorrectOption(QuestionId::new(1)));

        let err = Question::closed(QuestionId::new(2), "Pick", vec![]).unwrap_err();
        assert_eq!(err, QuizError::NoOptions(QuestionId::new(2)));
    }

    #[test]
    fn open_question_has_no_options() {
        let q = Question::open(QuestionId::new(1), "Describe the greeting").unwrap();
        assert!(q.is_open());
        assert!(q.options().is_empty());
    }

    #[test]
    fn duplicate_questions_are_rejected() {
        let q = Question::open(QuestionId::new(1), "Why?").unwrap();
        let err = Quiz::new(QuizId::new(1), TopicId::new(1), "Q", vec![q.clone(), q]).unwrap_err();
        assert_eq!(err, QuizError::DuplicateQuestion(QuestionId::new(1)));
    }

    #[test]
    fn finds_options_and_positions() {
        let q1 = Question::open(QuestionId::new(10), "Why?").unwrap();
        let q2 = Question::closed(
            QuestionId::new(11),
            "Which?",
            vec![
                AnswerOption::new(OptionId::new(1), "a", false),
                AnswerOption::new(OptionId::new(2), "b", true),
            ],
        )
        .unwrap();
        let quiz = Quiz::new(QuizId::new(1), TopicId::new(1), "Q", vec![q1, q2]).unwrap();
        assert_eq!(quiz.position_of(QuestionId::new(11)), Some(1));
        let q = quiz.question_at(1).unwrap();
        assert!(q.option(OptionId::new(2)).unwrap().is_right);
        assert!(q.option(OptionId::new(3)).is_none());
    }
}
