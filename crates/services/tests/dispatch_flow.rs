use async_trait::async_trait;
use tokio::sync::Mutex;

use services::{AppServices, Inbound, Messages, Screen, Transport, TransportError};
use trainer_core::model::{
    AnswerOption, BranchId, ChannelAddress, ContentBlock, CredentialToken, Learner, LearnerId,
    OptionId, Question, QuestionId, Quiz, QuizId, SessionState, Topic, TopicId,
};
use trainer_core::time::fixed_clock;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(ChannelAddress, Vec<Screen>)>>,
}

impl RecordingTransport {
    async fn take(&self) -> Vec<Screen> {
        let mut sent = self.sent.lock().await;
        sent.drain(..).flat_map(|(_, screens)| screens).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(
        &self,
        channel: &ChannelAddress,
        screens: &[Screen],
    ) -> Result<(), TransportError> {
        self.sent
            .lock()
            .await
            .push((channel.clone(), screens.to_vec()));
        Ok(())
    }
}

async fn app() -> AppServices {
    let app = AppServices::in_memory(fixed_clock(), Messages::default());
    let storage = app.storage();
    for (id, position, quiz) in [(1, 1, Some(QuizId::new(1))), (2, 2, None)] {
        let topic = Topic::new(
            TopicId::new(id),
            BranchId::new(1),
            position,
            format!("Topic {id}"),
            "",
            vec![ContentBlock::new("Only", "One page.")],
            quiz,
        )
        .unwrap();
        storage.curriculum.upsert_topic(&topic).await.unwrap();
    }
    let quiz = Quiz::new(
        QuizId::new(1),
        TopicId::new(1),
        "Quiz",
        vec![
            Question::closed(
                QuestionId::new(1),
                "Pick",
                vec![
                    AnswerOption::new(OptionId::new(11), "Right", true),
                    AnswerOption::new(OptionId::new(12), "Wrong", false),
                ],
            )
            .unwrap(),
        ],
    )
    .unwrap();
    storage.curriculum.upsert_quiz(&quiz).await.unwrap();
    let learner = Learner::new(
        LearnerId::new(1),
        BranchId::new(1),
        "Anna",
        CredentialToken::new("anna-key").unwrap(),
    )
    .unwrap();
    storage.learners.insert_learner(&learner).await.unwrap();
    app
}

fn chat() -> ChannelAddress {
    ChannelAddress::new("chat-1").unwrap()
}

async fn send(app: &AppServices, transport: &RecordingTransport, inbound: Inbound) -> Vec<Screen> {
    app.dispatcher().handle(&inbound, transport).await.unwrap();
    transport.take().await
}

async fn state(app: &AppServices) -> SessionState {
    app.storage()
        .learners
        .get_learner(LearnerId::new(1))
        .await
        .unwrap()
        .state()
}

#[tokio::test]
async fn start_and_login_flow() {
    let app = app().await;
    let transport = RecordingTransport::default();

    let screens = send(&app, &transport, Inbound::start(chat())).await;
    assert_eq!(screens[0].text, "Please enter your access key.");

    let screens = send(&app, &transport, Inbound::action(chat(), "studding")).await;
    assert_eq!(screens[0].text, "Send /start to begin.");

    let screens = send(&app, &transport, Inbound::text(chat(), "wrong")).await;
    assert_eq!(screens[0].text, "This key was not recognised. Try again.");

    let screens = send(&app, &transport, Inbound::text(chat(), "anna-key")).await;
    assert_eq!(screens[0].text, "Welcome, Anna!");
    assert_eq!(screens[1].action_tags(), vec!["studding", "progress"]);

    let screens = send(&app, &transport, Inbound::text(chat(), "hello?")).await;
    assert_eq!(
        screens[0].text,
        "Sorry, I did not understand. Please use the buttons."
    );

    let screens = send(&app, &transport, Inbound::start(chat())).await;
    assert_eq!(screens[0].action_tags(), vec!["studding", "progress"]);
}

#[tokio::test]
async fn malformed_actions_are_dropped() {
    let app = app().await;
    let transport = RecordingTransport::default();
    send(&app, &transport, Inbound::text(chat(), "anna-key")).await;

    for tag in ["topic_x_0", "dance", "answer_1_2"] {
        assert!(send(&app, &transport, Inbound::action(chat(), tag)).await.is_empty());
    }
    assert_eq!(state(&app).await, SessionState::MainMenu);
}

#[tokio::test]
async fn locked_topic_redirects_to_the_topic_list() {
    let app = app().await;
    let transport = RecordingTransport::default();
    send(&app, &transport, Inbound::text(chat(), "anna-key")).await;
    send(&app, &transport, Inbound::action(chat(), "studding")).await;

    let screens = send(&app, &transport, Inbound::action(chat(), "topic_2_0")).await;
    assert_eq!(screens[0].text, "Finish the previous topic's test first.");
    assert_eq!(
        screens[1].action_tags(),
        vec!["topic_1_0", "topic_2_0", "main_menu"]
    );
    assert_eq!(state(&app).await, SessionState::TopicList);
}

#[tokio::test]
async fn quiz_holds_the_learner_until_finished() {
    let app = app().await;
    let transport = RecordingTransport::default();
    send(&app, &transport, Inbound::text(chat(), "anna-key")).await;
    send(&app, &transport, Inbound::action(chat(), "studding")).await;
    send(&app, &transport, Inbound::action(chat(), "topic_1_0")).await;
    send(&app, &transport, Inbound::action(chat(), "test_1_-1")).await;
    let screens = send(&app, &transport, Inbound::action(chat(), "test_1_0")).await;
    let attempt_tag = screens[0].actions[0].action.clone();

    let screens = send(&app, &transport, Inbound::action(chat(), "main_menu")).await;
    assert_eq!(screens[0].text, "Please finish the test first.");
    let screens = send(&app, &transport, Inbound::text(chat(), "let me out")).await;
    assert_eq!(screens[0].text, "Please finish the test first.");
    assert_eq!(state(&app).await, SessionState::Quiz);

    // A tap on an option that does not exist sends the learner to the splash.
    let stale = format!("{}_99", attempt_tag.strip_suffix("_11").unwrap());
    let screens = send(&app, &transport, Inbound::action(chat(), stale)).await;
    assert_eq!(screens[0].text, "This answer option is no longer available.");
    assert_eq!(screens[1].action_tags(), vec!["topic_1_0", "test_1_0"]);

    send(&app, &transport, Inbound::action(chat(), "test_1_0")).await;
    send(&app, &transport, Inbound::action(chat(), attempt_tag)).await;
    let screens = send(&app, &transport, Inbound::action(chat(), "test_1_1")).await;
    assert_eq!(screens[0].text, "Test finished: 1 of 1 correct.");
    assert_eq!(state(&app).await, SessionState::ProgressView);
}
