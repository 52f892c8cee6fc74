//! Button action tags.
//!
//! Screens carry actions as short strings; inbound taps are parsed back into
//! [`Action`] before routing. `Display` and [`Action::parse`] are inverses.

use std::fmt;

use thiserror::Error;
use trainer_core::model::{AttemptId, OptionId, QuizId, TopicId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ActionParseError {
    #[error("unknown action tag: {0:?}")]
    Unknown(String),
    #[error("malformed action tag: {0:?}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MainMenu,
    /// Topic list.
    Study,
    Progress,
    OpenTopic { topic: TopicId, block: i64 },
    /// `index == -1` is the splash screen.
    OpenQuiz { quiz: QuizId, index: i32 },
    SelectOption {
        attempt: AttemptId,
        index: usize,
        option: OptionId,
    },
    CompleteTopic { topic: TopicId },
}

impl Action {
    /// Parses an inbound action tag.
    ///
    /// # Errors
    ///
    /// Returns `ActionParseError::Unknown` for an unrecognised prefix and
    /// `ActionParseError::Malformed` when the arguments do not parse.
    pub fn parse(raw: &str) -> Result<Self, ActionParseError> {
        match raw {
            "main_menu" => return Ok(Action::MainMenu),
            "studding" => return Ok(Action::Study),
            "progress" => return Ok(Action::Progress),
            _ => {}
        }

        let (prefix, rest) = raw
            .split_once('_')
            .ok_or_else(|| ActionParseError::Unknown(raw.to_owned()))?;
        let args: Vec<&str> = rest.split('_').collect();
        let malformed = || ActionParseError::Malformed(raw.to_owned());

        match (prefix, args.as_slice()) {
            ("topic", [topic, block]) => Ok(Action::OpenTopic {
                topic: topic.parse().map_err(|_| malformed())?,
                block: block.parse().map_err(|_| malformed())?,
            }),
            ("test", [quiz, index]) => {
                let index: i32 = index.parse().map_err(|_| malformed())?;
                if index < -1 {
                    return Err(malformed());
                }
                Ok(Action::OpenQuiz {
                    quiz: quiz.parse().map_err(|_| malformed())?,
                    index,
                })
            }
            ("answer", [attempt, index, option]) => Ok(Action::SelectOption {
                attempt: attempt.parse().map_err(|_| malformed())?,
                index: index.parse().map_err(|_| malformed())?,
                option: option.parse().map_err(|_| malformed())?,
            }),
            ("completetopic", [topic]) => Ok(Action::CompleteTopic {
                topic: topic.parse().map_err(|_| malformed())?,
            }),
            ("topic" | "test" | "answer" | "completetopic", _) => Err(malformed()),
            _ => Err(ActionParseError::Unknown(raw.to_owned())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::MainMenu => f.write_str("main_menu"),
            Action::Study => f.write_str("studding"),
            Action::Progress => f.write_str("progress"),
            Action::OpenTopic { topic, block } => write!(f, "topic_{topic}_{block}"),
            Action::OpenQuiz { quiz, index } => write!(f, "test_{quiz}_{index}"),
            Action::SelectOption {
                attempt,
                index,
                option,
            } => write!(f, "answer_{attempt}_{index}_{option}"),
            Action::CompleteTopic { topic } => write!(f, "completetopic_{topic}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_tag_shape() {
        assert_eq!(Action::parse("studding"), Ok(Action::Study));
        assert_eq!(
            Action::parse("topic_3_2"),
            Ok(Action::OpenTopic {
                topic: TopicId::new(3),
                block: 2
            })
        );
        assert_eq!(
            Action::parse("test_7_-1"),
            Ok(Action::OpenQuiz {
                quiz: QuizId::new(7),
                index: -1
            })
        );
        assert_eq!(
            Action::parse("answer_10_1_42"),
            Ok(Action::SelectOption {
                attempt: AttemptId::new(10),
                index: 1,
                option: OptionId::new(42)
            })
        );
        assert_eq!(
            Action::parse("completetopic_5"),
            Ok(Action::CompleteTopic {
                topic: TopicId::new(5)
            })
        );
    }

    #[test]
    fn display_is_the_wire_form() {
        let action = Action::OpenQuiz {
            quiz: QuizId::new(4),
            index: -1,
        };
        assert_eq!(action.to_string(), "test_4_-1");
        assert_eq!(Action::parse(&action.to_string()), Ok(action));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            Action::parse("dance"),
            Err(ActionParseError::Unknown(_))
        ));
        assert!(matches!(
            Action::parse("wat_1"),
            Err(ActionParseError::Unknown(_))
        ));
        assert!(matches!(
            Action::parse("topic_x_1"),
            Err(ActionParseError::Malformed(_))
        ));
        assert!(matches!(
            Action::parse("test_1_-2"),
            Err(ActionParseError::Malformed(_))
        ));
        assert!(matches!(
            Action::parse("answer_1_2"),
            Err(ActionParseError::Malformed(_))
        ));
    }
}
