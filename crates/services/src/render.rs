//! Pure screen builders.
//!
//! Every builder is deterministic over its inputs and the message catalog; no
//! storage access happens here.

use serde::Serialize;
use trainer_core::model::{
    AttemptId, AttemptScore, LearnerTopicProgress, Question, Quiz, RecordedAnswer, Topic, TopicId,
};

use crate::action::Action;
use crate::messages::{MessageTag, Messages};

const MARK_FINISHED: &str = "✅";
const MARK_OPEN: &str = "🔓";
const MARK_LOCKED: &str = "🔒";
const MARK_SELECTED: &str = "✔️";
const MARK_UNSELECTED: &str = "🔳";

/// One tappable control. `action` is the wire tag (see [`Action`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenAction {
    pub label: String,
    pub action: String,
}

impl ScreenAction {
    #[must_use]
    pub fn new(label: impl Into<String>, action: Action) -> Self {
        Self {
            label: label.into(),
            action: action.to_string(),
        }
    }
}

/// A message to deliver. Notices are screens without actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Screen {
    pub text: String,
    pub actions: Vec<ScreenAction>,
}

impl Screen {
    #[must_use]
    pub fn notice(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_notice(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions in display order, as wire tags.
    #[must_use]
    pub fn action_tags(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.action.as_str()).collect()
    }
}

/// One line of the progress view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    pub topic_name: String,
    pub progress: LearnerTopicProgress,
    /// Score of the most recent finished attempt, if the topic has a quiz.
    pub score: Option<AttemptScore>,
}

#[derive(Debug, Clone, Default)]
pub struct Renderer {
    messages: Messages,
}

impl Renderer {
    #[must_use]
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }

    #[must_use]
    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    #[must_use]
    pub fn notice(&self, tag: MessageTag) -> Screen {
        Screen::notice(self.messages.text(tag))
    }

    fn button(&self, tag: MessageTag, action: Action) -> ScreenAction {
        ScreenAction::new(self.messages.text(tag), action)
    }

    #[must_use]
    pub fn key_prompt(&self) -> Screen {
        self.notice(MessageTag::KeyPrompt)
    }

    #[must_use]
    pub fn welcome(&self, name: &str) -> Screen {
        Screen::notice(
            self.messages
                .fill(MessageTag::LoginSucceeded, &[("name", &name)]),
        )
    }

    #[must_use]
    pub fn main_menu(&self) -> Screen {
        Screen {
            text: self.messages.text(MessageTag::MainMenu),
            actions: vec![
                self.button(MessageTag::MenuStudy, Action::Study),
                self.button(MessageTag::MenuProgress, Action::Progress),
            ],
        }
    }

    /// Topics in curriculum order. A topic without a progress record renders locked.
    #[must_use]
    pub fn topic_list(&self, topics: &[Topic], records: &[LearnerTopicProgress]) -> Screen {
        let mut actions: Vec<ScreenAction> = topics
            .iter()
            .map(|topic| {
                let record = records.iter().find(|r| r.topic_id == topic.id());
                let marker = match record {
                    Some(r) if r.finished => MARK_FINISHED,
                    Some(r) if !r.locked => MARK_OPEN,
                    _ => MARK_LOCKED,
                };
                ScreenAction::new(
                    format!("{marker} {}", topic.name()),
                    Action::OpenTopic {
                        topic: topic.id(),
                        block: 0,
                    },
                )
            })
            .collect();
        actions.push(self.button(MessageTag::MainMenuButton, Action::MainMenu));

        Screen {
            text: self.messages.text(MessageTag::TopicListHeader),
            actions,
        }
    }

    #[must_use]
    pub fn progress_view(&self, rows: &[ProgressRow]) -> Screen {
        let mut text = self.messages.text(MessageTag::ProgressHeader);
        for row in rows {
            text.push('\n');
            text.push_str(&self.progress_line(row));
        }
        Screen {
            text,
            actions: vec![
                self.button(MessageTag::ToTopics, Action::Study),
                self.button(MessageTag::MainMenuButton, Action::MainMenu),
            ],
        }
    }

    fn progress_line(&self, row: &ProgressRow) -> String {
        let record = &row.progress;
        let (marker, status) = if record.locked {
            (MARK_LOCKED, self.messages.text(MessageTag::ProgressLocked))
        } else if let Some(score) = row.score.filter(|_| record.finished) {
            let tag = if record.test_complete == Some(true) {
                MessageTag::ProgressPassed
            } else {
                MessageTag::ProgressFailed
            };
            let mut status = self.messages.fill(
                tag,
                &[("score", &score.closed_score), ("max", &score.closed_max)],
            );
            if score.has_open_questions() && record.open_answers_reviewed.is_none() {
                status.push_str(", ");
                status.push_str(&self.messages.text(MessageTag::ProgressAwaitingReview));
            }
            (MARK_FINISHED, status)
        } else if record.finished || record.theory_complete {
            let marker = if record.finished { MARK_FINISHED } else { MARK_OPEN };
            (marker, self.messages.text(MessageTag::ProgressTheoryDone))
        } else {
            (MARK_OPEN, self.messages.text(MessageTag::ProgressNotStarted))
        };
        format!("{marker} {}: {status}", row.topic_name)
    }

    /// Reading page `page` of `topic`. The first page carries the intro.
    #[must_use]
    pub fn reading(&self, topic: &Topic, page: usize) -> Screen {
        let mut text = topic.name().to_owned();
        if page == 0 && !topic.intro().is_empty() {
            text.push_str("\n\n");
            text.push_str(topic.intro());
        }
        if let Some(block) = topic.blocks().get(page) {
            text.push_str("\n\n");
            text.push_str(&block.title);
            text.push('\n');
            text.push_str(&block.text);
        }

        let mut actions = Vec::with_capacity(3);
        if page > 0 {
            actions.push(self.button(
                MessageTag::Previous,
                open_topic(topic.id(), page - 1),
            ));
        }
        actions.push(self.button(MessageTag::ToTopics, Action::Study));
        if !topic.is_last_page(page) {
            actions.push(self.button(MessageTag::Next, open_topic(topic.id(), page + 1)));
        } else if let Some(quiz) = topic.quiz_id() {
            actions.push(self.button(
                MessageTag::StartQuiz,
                Action::OpenQuiz { quiz, index: -1 },
            ));
        } else {
            actions.push(self.button(
                MessageTag::CompleteTopic,
                Action::CompleteTopic { topic: topic.id() },
            ));
        }

        Screen { text, actions }
    }

    #[must_use]
    pub fn quiz_splash(&self, topic: &Topic, quiz: &Quiz) -> Screen {
        Screen {
            text: self.messages.fill(
                MessageTag::QuizSplash,
                &[("name", &quiz.name()), ("count", &quiz.question_count())],
            ),
            actions: vec![
                self.button(
                    MessageTag::BackToTheory,
                    open_topic(topic.id(), topic.page_count() - 1),
                ),
                self.button(
                    MessageTag::StartQuiz,
                    Action::OpenQuiz {
                        quiz: quiz.id(),
                        index: 0,
                    },
                ),
            ],
        }
    }

    /// Question `index` of `quiz` with the attempt's current answers.
    ///
    /// Closed questions list their options in authored order with a check
    /// marker; open questions show the text written so far.
    #[must_use]
    pub fn question(
        &self,
        quiz: &Quiz,
        attempt: AttemptId,
        index: usize,
        question: &Question,
        answers: &[RecordedAnswer],
    ) -> Screen {
        let recorded = answers.iter().find(|a| a.question_id == question.id());
        let mut text = self.messages.fill(
            MessageTag::QuestionHeader,
            &[("number", &(index + 1)), ("count", &quiz.question_count())],
        );
        text.push_str("\n\n");
        text.push_str(question.prompt());

        let mut actions = Vec::new();
        if question.is_open() {
            text.push_str("\n\n");
            text.push_str(&self.messages.text(MessageTag::OpenAnswerPrompt));
            if let Some(current) = recorded.and_then(RecordedAnswer::text) {
                text.push_str("\n\n");
                text.push_str(
                    &self
                        .messages
                        .fill(MessageTag::CurrentAnswer, &[("text", &current)]),
                );
            }
        } else {
            let selected = recorded.and_then(RecordedAnswer::selected_option);
            for option in question.options() {
                let marker = if selected == Some(option.id) {
                    MARK_SELECTED
                } else {
                    MARK_UNSELECTED
                };
                actions.push(ScreenAction::new(
                    format!("{marker} {}", option.label),
                    Action::SelectOption {
                        attempt,
                        index,
                        option: option.id,
                    },
                ));
            }
        }

        let position = i32::try_from(index).unwrap_or(i32::MAX - 1);
        if index > 0 {
            actions.push(self.button(
                MessageTag::Previous,
                Action::OpenQuiz {
                    quiz: quiz.id(),
                    index: position - 1,
                },
            ));
        }
        let next_label = if index + 1 >= quiz.question_count() {
            MessageTag::Finish
        } else {
            MessageTag::Next
        };
        actions.push(self.button(
            next_label,
            Action::OpenQuiz {
                quiz: quiz.id(),
                index: position + 1,
            },
        ));

        Screen { text, actions }
    }

    #[must_use]
    pub fn test_finished(&self, score: &AttemptScore) -> Screen {
        Screen::notice(self.messages.fill(
            MessageTag::TestFinished,
            &[("score", &score.closed_score), ("max", &score.closed_max)],
        ))
    }
}

fn open_topic(topic: TopicId, page: usize) -> Action {
    Action::OpenTopic {
        topic,
        block: i64::try_from(page).unwrap_or(i64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trainer_core::model::{
        AnswerId, AnswerOption, AnswerSelection, BranchId, ContentBlock, LearnerId, OptionId,
        ProgressId, QuestionId, QuizId,
    };

    fn topic(blocks: usize, quiz: Option<QuizId>) -> Topic {
        Topic::new(
            TopicId::new(1),
            BranchId::new(1),
            1,
            "Bar",
            "Intro",
            (0..blocks)
                .map(|i| ContentBlock::new(format!("B{i}"), "text"))
                .collect(),
            quiz,
        )
        .unwrap()
    }

    fn quiz() -> Quiz {
        Quiz::new(
            QuizId::new(7),
            TopicId::new(1),
            "Bar quiz",
            vec![
                Question::closed(
                    QuestionId::new(1),
                    "Pick",
                    vec![
                        AnswerOption::new(OptionId::new(11), "A", true),
                        AnswerOption::new(OptionId::new(12), "B", false),
                    ],
                )
                .unwrap(),
                Question::open(QuestionId::new(2), "Explain").unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn reading_controls_follow_page_position() {
        let r = Renderer::default();
        let t = topic(3, Some(QuizId::new(7)));

        assert_eq!(r.reading(&t, 0).action_tags(), vec!["studding", "topic_1_1"]);
        assert_eq!(
            r.reading(&t, 1).action_tags(),
            vec!["topic_1_0", "studding", "topic_1_2"]
        );
        assert_eq!(
            r.reading(&t, 2).action_tags(),
            vec!["topic_1_1", "studding", "test_7_-1"]
        );

        let theory_only = topic(1, None);
        let screen = r.reading(&theory_only, 0);
        assert_eq!(screen.action_tags(), vec!["studding", "completetopic_1"]);
        assert!(screen.text.contains("Intro"));
    }

    #[test]
    fn question_navigation_has_no_previous_on_first_and_finish_on_last() {
        let r = Renderer::default();
        let q = quiz();
        let answers = vec![RecordedAnswer {
            id: AnswerId::new(1),
            attempt_id: AttemptId::new(5),
            question_id: QuestionId::new(1),
            selection: AnswerSelection::Choice(OptionId::new(12)),
            answered_at: Utc::now(),
        }];

        let first = r.question(&q, AttemptId::new(5), 0, &q.questions()[0], &answers);
        assert_eq!(
            first.action_tags(),
            vec!["answer_5_0_11", "answer_5_0_12", "test_7_1"]
        );
        assert!(first.actions[0].label.starts_with(MARK_UNSELECTED));
        assert!(first.actions[1].label.starts_with(MARK_SELECTED));
        assert_eq!(first.actions[2].label, "Next ➡️");

        let last = r.question(&q, AttemptId::new(5), 1, &q.questions()[1], &answers);
        assert_eq!(last.action_tags(), vec!["test_7_0", "test_7_2"]);
        assert_eq!(last.actions[1].label, "Finish ✅");
    }

    #[test]
    fn topic_list_marks_each_topic() {
        let r = Renderer::default();
        let topics = vec![topic(1, None)];
        let mut record =
            LearnerTopicProgress::enrolled(ProgressId::new(1), LearnerId::new(1), TopicId::new(1), true);
        assert!(r.topic_list(&topics, &[record.clone()]).actions[0]
            .label
            .starts_with(MARK_OPEN));
        record.finished = true;
        let screen = r.topic_list(&topics, &[record]);
        assert!(screen.actions[0].label.starts_with(MARK_FINISHED));
        assert_eq!(screen.action_tags(), vec!["topic_1_0", "main_menu"]);
        assert!(r.topic_list(&topics, &[]).actions[0]
            .label
            .starts_with(MARK_LOCKED));
    }

    #[test]
    fn splash_offers_back_to_last_page_and_start() {
        let r = Renderer::default();
        let screen = r.quiz_splash(&topic(3, Some(QuizId::new(7))), &quiz());
        assert_eq!(screen.action_tags(), vec!["topic_1_2", "test_7_0"]);
        assert!(screen.text.contains("Bar quiz"));
    }
}
