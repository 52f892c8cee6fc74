//! Inbound event routing.
//!
//! The dispatcher is stateless: each event looks the learner up by channel,
//! picks a controller operation, and turns failures into the notice the
//! learner should see.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use trainer_core::model::{ActiveAttempt, ChannelAddress, Learner, SessionState};

use crate::action::Action;
use crate::error::{DispatchError, Recovery, SessionError};
use crate::messages::MessageTag;
use crate::render::Screen;
use crate::sessions::{Outcome, SessionController};
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// `/start`.
    Start,
    /// Free text typed by the learner.
    Text(String),
    /// Button tap carrying an action tag.
    Action(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub channel: ChannelAddress,
    pub event: InboundEvent,
}

impl Inbound {
    #[must_use]
    pub fn start(channel: ChannelAddress) -> Self {
        Self {
            channel,
            event: InboundEvent::Start,
        }
    }

    #[must_use]
    pub fn text(channel: ChannelAddress, text: impl Into<String>) -> Self {
        Self {
            channel,
            event: InboundEvent::Text(text.into()),
        }
    }

    #[must_use]
    pub fn action(channel: ChannelAddress, tag: impl Into<String>) -> Self {
        Self {
            channel,
            event: InboundEvent::Action(tag.into()),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    controller: Arc<SessionController>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(controller: Arc<SessionController>) -> Self {
        Self { controller }
    }

    /// Route one event and deliver the resulting screens, if any.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Session` for failures with no learner-facing
    /// recovery and `DispatchError::Transport` if delivery fails.
    pub async fn handle(
        &self,
        inbound: &Inbound,
        transport: &dyn Transport,
    ) -> Result<(), DispatchError> {
        let screens = self.dispatch(inbound).await?;
        if screens.is_empty() {
            return Ok(());
        }
        transport.deliver(&inbound.channel, &screens).await?;
        Ok(())
    }

    /// Route one event and return the screens to send. An empty list means
    /// the event was dropped.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` only for failures whose recovery is `Fail`.
    pub async fn dispatch(&self, inbound: &Inbound) -> Result<Vec<Screen>, SessionError> {
        let learner = self.controller.learner_for_channel(&inbound.channel).await?;
        match self.route(inbound, learner.as_ref()).await {
            Ok(Some(outcome)) => Ok(outcome.screens),
            Ok(None) => Ok(Vec::new()),
            Err(err) => self.recover(learner.as_ref(), err).await,
        }
    }

    async fn route(
        &self,
        inbound: &Inbound,
        learner: Option<&Learner>,
    ) -> Result<Option<Outcome>, SessionError> {
        let controller = &self.controller;
        let channel = &inbound.channel;

        match &inbound.event {
            InboundEvent::Start => controller.welcome(channel).await.map(Some),
            InboundEvent::Text(text) => {
                let Some(learner) = learner.filter(|l| l.state().is_authenticated()) else {
                    debug!(channel = %channel, "routing text to authentication");
                    return controller.authenticate(channel, text).await.map(Some);
                };
                if learner.state() != SessionState::Quiz {
                    return Ok(Some(self.notice(learner.state(), MessageTag::DoNotUnderstand)));
                }
                if learner.pending_open_answer().is_some() {
                    debug!(learner = %learner.id(), "routing text to open answer");
                    controller.submit_open_answer(learner.id(), text).await.map(Some)
                } else {
                    controller.reject_during_quiz(learner.id()).await.map(Some)
                }
            }
            InboundEvent::Action(raw) => {
                let action = match Action::parse(raw) {
                    Ok(action) => action,
                    Err(err) => {
                        warn!(channel = %channel, error = %err, "dropping malformed action");
                        return Ok(None);
                    }
                };
                let Some(learner) = learner.filter(|l| l.state().is_authenticated()) else {
                    return Ok(Some(
                        self.notice(SessionState::Unauthenticated, MessageTag::UseStart),
                    ));
                };

                let id = learner.id();
                debug!(learner = %id, action = %action, "routing action");
                let outcome = match action {
                    Action::MainMenu => controller.show_main_menu(id).await?,
                    Action::Study => controller.list_topics(id).await?,
                    Action::Progress => controller.show_progress(id).await?,
                    Action::OpenTopic { topic, block } => {
                        controller.open_topic(id, topic, block).await?
                    }
                    Action::OpenQuiz { quiz, index } => controller.open_quiz(id, quiz, index).await?,
                    Action::SelectOption {
                        attempt,
                        index,
                        option,
                    } => controller.select_option(id, attempt, index, option).await?,
                    Action::CompleteTopic { topic } => controller.complete_topic(id, topic).await?,
                };
                Ok(Some(outcome))
            }
        }
    }

    async fn recover(
        &self,
        learner: Option<&Learner>,
        err: SessionError,
    ) -> Result<Vec<Screen>, SessionError> {
        let renderer = self.controller.renderer();
        match err.recovery() {
            Recovery::Fail => {
                error!(error = %err, "session operation failed");
                Err(err)
            }
            Recovery::Drop => {
                warn!(error = %err, "dropping invalid input");
                Ok(Vec::new())
            }
            Recovery::Hold => {
                debug!(error = %err, "holding position");
                let tag = if learner.is_some_and(|l| l.state() == SessionState::Quiz) {
                    MessageTag::CannotWhileTest
                } else {
                    MessageTag::CannotDoThat
                };
                Ok(vec![renderer.notice(tag)])
            }
            Recovery::CredentialNotice => {
                info!(error = %err, "credential rejected");
                let tag = match err {
                    SessionError::AlreadyBound => MessageTag::AlreadyBound,
                    SessionError::Deactivated => MessageTag::LoginBlocked,
                    _ => MessageTag::LoginFailed,
                };
                Ok(vec![renderer.notice(tag)])
            }
            Recovery::RedirectToTopics | Recovery::RestartQuiz => {
                debug!(error = %err, "redirecting");
                let mut screens = vec![renderer.notice(redirect_notice(&err))];
                screens.extend(self.redirect(learner).await?);
                Ok(screens)
            }
        }
    }

    /// Topic list, or the splash of the active quiz while inside one.
    async fn redirect(&self, learner: Option<&Learner>) -> Result<Vec<Screen>, SessionError> {
        let Some(learner) = learner else {
            return Ok(Vec::new());
        };
        let outcome = match learner.active_attempt() {
            Some(active) => {
                self.controller
                    .open_quiz(learner.id(), active.quiz_id, ActiveAttempt::SPLASH)
                    .await
            }
            None => self.controller.list_topics(learner.id()).await,
        };
        match outcome {
            Ok(outcome) => Ok(outcome.screens),
            Err(err) if err.recovery() == Recovery::Fail => Err(err),
            Err(err) => {
                warn!(learner = %learner.id(), error = %err, "redirect failed");
                Ok(Vec::new())
            }
        }
    }

    fn notice(&self, state: SessionState, tag: MessageTag) -> Outcome {
        Outcome {
            state,
            screens: vec![self.controller.renderer().notice(tag)],
        }
    }
}

fn redirect_notice(err: &SessionError) -> MessageTag {
    match err {
        SessionError::TopicLocked(_) => MessageTag::TopicLocked,
        SessionError::QuizNotFound(_) => MessageTag::QuizNotFound,
        SessionError::QuestionNotFound { .. } | SessionError::OptionNotFound(_) => {
            MessageTag::AnswerNotFound
        }
        SessionError::AttemptNotFound => MessageTag::TestAlreadyFinished,
        _ => MessageTag::TopicNotFound,
    }
}
