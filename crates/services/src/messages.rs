//! User-facing strings.
//!
//! Every label and text the renderer emits goes through a [`MessageCatalog`],
//! keyed by a [`MessageTag`] and falling back to the built-in English text.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

macro_rules! message_tags {
    ($($variant:ident => ($key:literal, $text:literal)),+ $(,)?) => {
        /// Stable identifier of a user-facing string.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum MessageTag {
            $($variant),+
        }

        impl MessageTag {
            pub const ALL: &'static [MessageTag] = &[$(MessageTag::$variant),+];

            /// Key used by override tables.
            #[must_use]
            pub fn key(self) -> &'static str {
                match self {
                    $(MessageTag::$variant => $key),+
                }
            }

            #[must_use]
            pub fn default_text(self) -> &'static str {
                match self {
                    $(MessageTag::$variant => $text),+
                }
            }

            #[must_use]
            pub fn from_key(key: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|tag| tag.key() == key)
            }
        }
    };
}

message_tags! {
    KeyPrompt => ("key_enter", "Please enter your access key."),
    LoginFailed => ("login_failed", "This key was not recognised. Try again."),
    LoginBlocked => ("login_failed_ban", "This account is blocked. Please contact your manager."),
    LoginSucceeded => ("login_succeeded", "Welcome, {name}!"),
    AlreadyBound => ("user_already_authorized", "This key is already linked to another chat."),
    UseStart => ("use_start", "Send /start to begin."),
    MainMenu => ("main_menu", "Main menu"),
    MenuStudy => ("studding", "📚 Study"),
    MenuProgress => ("progress", "📊 My progress"),
    MainMenuButton => ("to_main_menu", "🏠 Main menu"),
    TopicListHeader => ("topic", "Choose a topic:"),
    DoNotUnderstand => ("do_not_understand", "Sorry, I did not understand. Please use the buttons."),
    CannotWhileTest => ("can_not_while_test", "Please finish the test first."),
    CannotDoThat => ("can_not", "That is not possible right now."),
    TopicLocked => ("test_before_next_lesson", "Finish the previous topic's test first."),
    TopicNotFound => ("topic_not_found", "This topic is no longer available."),
    QuizNotFound => ("test_not_found", "This test is no longer available."),
    AnswerNotFound => ("answer_not_found", "This answer option is no longer available."),
    AnswerSaved => ("answer_writen", "Your answer has been saved."),
    ProgressHeader => ("progress_header", "Your progress:"),
    ProgressLocked => ("progress_locked", "locked"),
    ProgressNotStarted => ("progress_not_started", "not started"),
    ProgressTheoryDone => ("progress_theory_done", "theory done"),
    ProgressPassed => ("progress_passed", "test passed ({score}/{max})"),
    ProgressFailed => ("progress_failed", "test not passed ({score}/{max})"),
    ProgressAwaitingReview => ("progress_awaiting_review", "open answers awaiting review"),
    QuizSplash => ("test_open", "Test \"{name}\": {count} question(s). Ready?"),
    QuestionHeader => ("test_question", "Question {number} of {count}"),
    OpenAnswerPrompt => ("test_open_prompt", "Type your answer as a message."),
    CurrentAnswer => ("test_current_answer", "Your answer: {text}"),
    TestFinished => ("test_passed", "Test finished: {score} of {max} correct."),
    TestAlreadyFinished => ("test_already_finished", "This test is already finished."),
    Previous => ("button_previous", "⬅️ Back"),
    Next => ("button_next", "Next ➡️"),
    Finish => ("button_finish", "Finish ✅"),
    ToTopics => ("button_topics", "📚 Topics"),
    StartQuiz => ("button_start_test", "Start test"),
    BackToTheory => ("button_back_to_theory", "⬅️ Back to theory"),
    CompleteTopic => ("button_complete_topic", "✔️ Complete topic"),
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Tag → text lookup supplied by the host.
pub trait MessageCatalog: Send + Sync {
    fn resolve(&self, tag: MessageTag, default: &str) -> String;
}

/// Catalog that always returns the built-in text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessages;

impl MessageCatalog for DefaultMessages {
    fn resolve(&self, _tag: MessageTag, default: &str) -> String {
        default.to_owned()
    }
}

/// Overrides keyed by [`MessageTag::key`]; unknown tags fall back to the default.
#[derive(Debug, Clone, Default)]
pub struct MessageOverrides {
    texts: HashMap<MessageTag, String>,
}

impl MessageOverrides {
    /// Build from raw `key = text` pairs, returning the keys that matched no tag.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut texts = HashMap::new();
        let mut unknown = Vec::new();
        for (key, text) in pairs {
            let key = key.into();
            match MessageTag::from_key(&key) {
                Some(tag) => {
                    texts.insert(tag, text.into());
                }
                None => unknown.push(key),
            }
        }
        (Self { texts }, unknown)
    }

    pub fn set(&mut self, tag: MessageTag, text: impl Into<String>) {
        self.texts.insert(tag, text.into());
    }
}

impl MessageCatalog for MessageOverrides {
    fn resolve(&self, tag: MessageTag, default: &str) -> String {
        self.texts
            .get(&tag)
            .cloned()
            .unwrap_or_else(|| default.to_owned())
    }
}

/// Shared handle the renderer uses: resolves tags and fills `{name}` slots.
#[derive(Clone)]
pub struct Messages {
    catalog: Arc<dyn MessageCatalog>,
}

impl Messages {
    #[must_use]
    pub fn new(catalog: Arc<dyn MessageCatalog>) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn text(&self, tag: MessageTag) -> String {
        self.catalog.resolve(tag, tag.default_text())
    }

    /// Resolve and substitute `{key}` placeholders. Unknown placeholders are left as-is.
    #[must_use]
    pub fn fill(&self, tag: MessageTag, values: &[(&str, &dyn fmt::Display)]) -> String {
        let mut text = self.text(tag);
        for (key, value) in values {
            text = text.replace(&format!("{{{key}}}"), &value.to_string());
        }
        text
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self::new(Arc::new(DefaultMessages))
    }
}

impl fmt::Debug for Messages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Messages")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique() {
        for (i, tag) in MessageTag::ALL.iter().enumerate() {
            assert!(
                MessageTag::ALL[i + 1..].iter().all(|t| t.key() != tag.key()),
                "duplicate key {tag}"
            );
        }
    }

    #[test]
    fn overrides_replace_defaults_and_report_unknown_keys() {
        let (overrides, unknown) =
            MessageOverrides::from_pairs([("main_menu", "Главное меню"), ("nope", "x")]);
        assert_eq!(unknown, vec!["nope".to_owned()]);

        let messages = Messages::new(Arc::new(overrides));
        assert_eq!(messages.text(MessageTag::MainMenu), "Главное меню");
        assert_eq!(messages.text(MessageTag::Next), "Next ➡️");
    }

    #[test]
    fn fill_substitutes_placeholders() {
        let messages = Messages::default();
        let text = messages.fill(MessageTag::TestFinished, &[("score", &1), ("max", &2)]);
        assert_eq!(text, "Test finished: 1 of 2 correct.");
    }
}
