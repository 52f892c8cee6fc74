use std::sync::Arc;

use services::{AppServices, Messages, SessionController, SessionError};
use storage::repository::Storage;
use trainer_core::model::{
    AnswerOption, AttemptId, BranchId, ChannelAddress, ContentBlock, CredentialToken, Learner,
    LearnerId, OptionId, Question, QuestionId, Quiz, QuizId, SessionState, Topic, TopicId,
};
use trainer_core::time::fixed_clock;

const GREETING: TopicId = TopicId::new(1);
const SERVING: TopicId = TopicId::new(2);
const CLOSING: TopicId = TopicId::new(3);
const GREETING_QUIZ: QuizId = QuizId::new(1);
const SERVING_QUIZ: QuizId = QuizId::new(2);

/// Branch 1: two quizzed topics and a theory-only one. Branch 2: a single topic
/// whose quiz has only an open question.
async fn seed(storage: &Storage) {
    let topics = [
        Topic::new(
            GREETING,
            BranchId::new(1),
            1,
            "Greeting guests",
            "How we meet people",
            vec![
                ContentBlock::new("Smile", "Always smile."),
                ContentBlock::new("Words", "Say hello."),
            ],
            Some(GREETING_QUIZ),
        ),
        Topic::new(
            SERVING,
            BranchId::new(1),
            2,
            "Serving",
            "",
            vec![ContentBlock::new("Side", "Serve from the right.")],
            Some(SERVING_QUIZ),
        ),
        Topic::new(
            CLOSING,
            BranchId::new(1),
            3,
            "Closing",
            "",
            vec![ContentBlock::new("Bill", "Bring the bill.")],
            None,
        ),
        Topic::new(
            TopicId::new(10),
            BranchId::new(2),
            1,
            "Hosting",
            "",
            vec![ContentBlock::new("Door", "Open the door.")],
            Some(QuizId::new(10)),
        ),
    ];
    for topic in topics {
        storage.curriculum.upsert_topic(&topic.unwrap()).await.unwrap();
    }

    let quizzes = [
        Quiz::new(
            GREETING_QUIZ,
            GREETING,
            "Greeting quiz",
            vec![
                Question::closed(
                    QuestionId::new(1),
                    "First words?",
                    vec![
                        AnswerOption::new(OptionId::new(11), "Hello", true),
                        AnswerOption::new(OptionId::new(12), "What?", false),
                    ],
                )
                .unwrap(),
                Question::closed(
                    QuestionId::new(2),
                    "Face?",
                    vec![
                        AnswerOption::new(OptionId::new(21), "Frown", false),
                        AnswerOption::new(OptionId::new(22), "Smile", true),
                    ],
                )
                .unwrap(),
            ],
        ),
        Quiz::new(
            SERVING_QUIZ,
            SERVING,
            "Serving quiz",
            vec![Question::open(QuestionId::new(3), "Which side?").unwrap()],
        ),
        Quiz::new(
            QuizId::new(10),
            TopicId::new(10),
            "Hosting quiz",
            vec![Question::open(QuestionId::new(10), "Describe a warm welcome").unwrap()],
        ),
    ];
    for quiz in quizzes {
        storage.curriculum.upsert_quiz(&quiz.unwrap()).await.unwrap();
    }

    for (id, branch, name, token) in [
        (1, 1, "Anna", "anna-key"),
        (2, 1, "Boris", "boris-key"),
        (3, 2, "Carl", "carl-key"),
    ] {
        let learner = Learner::new(
            LearnerId::new(id),
            BranchId::new(branch),
            name,
            CredentialToken::new(token).unwrap(),
        )
        .unwrap();
        storage.learners.insert_learner(&learner).await.unwrap();
    }
}

async fn app() -> AppServices {
    let app = AppServices::in_memory(fixed_clock(), Messages::default());
    seed(app.storage()).await;
    app
}

async fn login(controller: &SessionController, chat: &str, token: &str) -> LearnerId {
    let channel = ChannelAddress::new(chat).unwrap();
    let outcome = controller.authenticate(&channel, token).await.unwrap();
    assert_eq!(outcome.state, SessionState::MainMenu);
    controller
        .learner_for_channel(&channel)
        .await
        .unwrap()
        .expect("bound learner")
        .id()
}

/// Read the greeting topic to its end and open its quiz; returns the attempt.
async fn start_greeting_quiz(app: &AppServices, learner: LearnerId) -> AttemptId {
    let controller = app.controller();
    controller.list_topics(learner).await.unwrap();
    let reading = controller.open_topic(learner, GREETING, 1).await.unwrap();
    assert_eq!(
        reading.screens[0].action_tags().last().copied(),
        Some("test_1_-1")
    );

    let splash = controller.open_quiz(learner, GREETING_QUIZ, -1).await.unwrap();
    assert_eq!(splash.state, SessionState::Quiz);
    assert_eq!(splash.screens[0].action_tags(), vec!["topic_1_1", "test_1_0"]);

    controller.open_quiz(learner, GREETING_QUIZ, 0).await.unwrap();
    app.storage()
        .learners
        .get_learner(learner)
        .await
        .unwrap()
        .active_attempt()
        .expect("active attempt")
        .attempt_id
}

#[tokio::test]
async fn all_correct_answers_pass_and_unlock_next_topic() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    let attempt = start_greeting_quiz(&app, anna).await;

    controller
        .select_option(anna, attempt, 0, OptionId::new(11))
        .await
        .unwrap();
    let second = controller
        .select_option(anna, attempt, 1, OptionId::new(22))
        .await
        .unwrap();
    assert!(second.screens[0].actions[1].label.starts_with("✔️"));

    let finished = controller.open_quiz(anna, GREETING_QUIZ, 2).await.unwrap();
    assert_eq!(finished.state, SessionState::ProgressView);
    assert_eq!(finished.screens[0].text, "Test finished: 2 of 2 correct.");

    let score = app
        .storage()
        .attempts
        .get_attempt(attempt)
        .await
        .unwrap()
        .score()
        .expect("scored");
    assert_eq!((score.closed_score, score.closed_max), (2, 2));

    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    let greeting = progress.iter().find(|r| r.topic_id == GREETING).unwrap();
    assert!(greeting.theory_complete);
    assert_eq!(greeting.test_complete, Some(true));
    assert!(greeting.finished);
    let serving = progress.iter().find(|r| r.topic_id == SERVING).unwrap();
    assert!(!serving.locked);

    let learner = app.storage().learners.get_learner(anna).await.unwrap();
    assert_eq!(learner.active_attempt(), None);
}

#[tokio::test]
async fn wrong_answers_finish_the_topic_without_passing() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    let attempt = start_greeting_quiz(&app, anna).await;

    controller
        .select_option(anna, attempt, 0, OptionId::new(12))
        .await
        .unwrap();
    controller
        .select_option(anna, attempt, 1, OptionId::new(21))
        .await
        .unwrap();
    controller.open_quiz(anna, GREETING_QUIZ, 2).await.unwrap();

    let score = app
        .storage()
        .attempts
        .get_attempt(attempt)
        .await
        .unwrap()
        .score()
        .unwrap();
    assert_eq!((score.closed_score, score.closed_max), (0, 2));

    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    let greeting = progress.iter().find(|r| r.topic_id == GREETING).unwrap();
    assert_eq!(greeting.test_complete, Some(false));
    assert!(greeting.finished);
    // Unlocking follows `finished`, not the pass mark.
    assert!(!progress.iter().find(|r| r.topic_id == SERVING).unwrap().locked);

    let err = controller.finish_attempt(anna, attempt).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
}

#[tokio::test]
async fn open_only_quiz_passes_and_waits_for_review() {
    let app = app().await;
    let controller = app.controller();
    let carl = login(&controller, "chat-carl", "carl-key").await;

    controller.list_topics(carl).await.unwrap();
    controller.open_topic(carl, TopicId::new(10), 0).await.unwrap();
    controller.open_quiz(carl, QuizId::new(10), -1).await.unwrap();
    let question = controller.open_quiz(carl, QuizId::new(10), 0).await.unwrap();
    assert_eq!(question.screens[0].action_tags(), vec!["test_10_1"]);
    assert!(
        app.storage()
            .learners
            .get_learner(carl)
            .await
            .unwrap()
            .pending_open_answer()
            .is_some()
    );

    let blank = controller.submit_open_answer(carl, "   ").await.unwrap_err();
    assert!(matches!(blank, SessionError::Validation(_)));

    let done = controller
        .submit_open_answer(carl, "  Smile and open the door  ")
        .await
        .unwrap();
    assert_eq!(done.state, SessionState::ProgressView);
    assert_eq!(done.screens[0].text, "Your answer has been saved.");
    assert_eq!(done.screens[1].text, "Test finished: 0 of 0 correct.");

    let record = app
        .storage()
        .progress
        .progress_for_learner(carl)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(record.test_complete, Some(true));
    assert_eq!(record.open_answers_reviewed, None);

    let reports = app.reports();
    let report = reports.learner_report(carl).await.unwrap();
    assert_eq!(report.pending_reviews, 1);
    let json = report.to_json_pretty().unwrap();
    assert!(json.contains("\"pending_reviews\": 1"));
    assert!(json.contains("Smile and open the door"));
    let topic = &report.topics[0];
    assert_eq!(topic.score.map(|s| (s.closed_max, s.open_max)), Some((0, 1)));
    assert_eq!(
        topic.open_answers[0].answer.as_deref(),
        Some("Smile and open the door")
    );

    reports
        .set_review_status(topic.progress_id, Some(true))
        .await
        .unwrap();
    assert_eq!(reports.pending_review_count(carl).await.unwrap(), 0);
}

#[tokio::test]
async fn locked_topic_is_rejected() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;

    let list = controller.list_topics(anna).await.unwrap();
    let labels: Vec<&str> = list.screens[0]
        .actions
        .iter()
        .map(|a| a.label.as_str())
        .collect();
    assert_eq!(
        labels,
        vec![
            "🔓 Greeting guests",
            "🔒 Serving",
            "🔒 Closing",
            "🏠 Main menu"
        ]
    );

    let err = controller.open_topic(anna, SERVING, 0).await.unwrap_err();
    assert!(matches!(err, SessionError::TopicLocked(id) if id == SERVING));

    let err = controller.open_topic(anna, TopicId::new(10), 0).await.unwrap_err();
    assert!(matches!(err, SessionError::TopicNotFound(_)));
}

#[tokio::test]
async fn navigation_is_rejected_mid_quiz_but_allowed_from_the_splash() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    start_greeting_quiz(&app, anna).await;

    for err in [
        controller.show_main_menu(anna).await.unwrap_err(),
        controller.list_topics(anna).await.unwrap_err(),
        controller.show_progress(anna).await.unwrap_err(),
        controller.open_topic(anna, GREETING, 0).await.unwrap_err(),
    ] {
        assert!(matches!(err, SessionError::InvalidState { .. }), "{err}");
    }

    // Back to the splash, then back to theory; the attempt stays resumable.
    controller.open_quiz(anna, GREETING_QUIZ, -1).await.unwrap();
    let reading = controller.open_topic(anna, GREETING, 1).await.unwrap();
    assert_eq!(reading.state, SessionState::Reading);
    let learner = app.storage().learners.get_learner(anna).await.unwrap();
    assert_eq!(learner.active_attempt(), None);
}

#[tokio::test]
async fn reopening_a_quiz_resumes_the_unfinished_attempt() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    let attempt = start_greeting_quiz(&app, anna).await;
    controller
        .select_option(anna, attempt, 0, OptionId::new(11))
        .await
        .unwrap();

    controller.open_quiz(anna, GREETING_QUIZ, -1).await.unwrap();
    controller.open_topic(anna, GREETING, 1).await.unwrap();
    controller.open_quiz(anna, GREETING_QUIZ, -1).await.unwrap();
    let question = controller.open_quiz(anna, GREETING_QUIZ, 0).await.unwrap();
    assert!(question.screens[0].actions[0].label.starts_with("✔️"));

    let resumed = app
        .storage()
        .learners
        .get_learner(anna)
        .await
        .unwrap()
        .active_attempt()
        .unwrap()
        .attempt_id;
    assert_eq!(resumed, attempt);
}

#[tokio::test]
async fn repeating_a_selection_keeps_the_answer() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    let attempt = start_greeting_quiz(&app, anna).await;

    for _ in 0..2 {
        let screen = controller
            .select_option(anna, attempt, 0, OptionId::new(11))
            .await
            .unwrap();
        assert!(screen.screens[0].actions[0].label.starts_with("✔️"));
    }
    let answers = app.storage().attempts.answers_for_attempt(attempt).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].selected_option(), Some(OptionId::new(11)));

    let err = controller
        .select_option(anna, attempt, 0, OptionId::new(99))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::OptionNotFound(_)));
    let err = controller
        .select_option(anna, AttemptId::new(999), 0, OptionId::new(11))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::AttemptNotFound));
}

#[tokio::test]
async fn a_new_selection_replaces_the_previous_one() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    let attempt = start_greeting_quiz(&app, anna).await;

    controller
        .select_option(anna, attempt, 0, OptionId::new(11))
        .await
        .unwrap();
    let screen = controller
        .select_option(anna, attempt, 0, OptionId::new(12))
        .await
        .unwrap();
    assert!(screen.screens[0].actions[0].label.starts_with("🔳"));
    assert!(screen.screens[0].actions[1].label.starts_with("✔️"));

    let answers = app.storage().attempts.answers_for_attempt(attempt).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].selected_option(), Some(OptionId::new(12)));
}

/// Finish both quizzed topics of branch 1 so the closing topic unlocks.
async fn finish_quizzed_topics(app: &AppServices, learner: LearnerId) {
    let controller = app.controller();
    let attempt = start_greeting_quiz(app, learner).await;
    controller
        .select_option(learner, attempt, 0, OptionId::new(11))
        .await
        .unwrap();
    controller.open_quiz(learner, GREETING_QUIZ, 2).await.unwrap();
    controller.list_topics(learner).await.unwrap();
    controller.open_topic(learner, SERVING, 0).await.unwrap();
    controller.open_quiz(learner, SERVING_QUIZ, 0).await.unwrap();
    controller
        .submit_open_answer(learner, "From the right")
        .await
        .unwrap();
    controller.list_topics(learner).await.unwrap();
}

#[tokio::test]
async fn stepping_past_the_last_page_finishes_a_theory_only_topic() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;

    // Greeting has a quiz: stepping past its end only completes the theory.
    controller.list_topics(anna).await.unwrap();
    let reading = controller.open_topic(anna, GREETING, 2).await.unwrap();
    assert_eq!(reading.state, SessionState::Reading);
    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    let greeting = progress.iter().find(|r| r.topic_id == GREETING).unwrap();
    assert!(greeting.theory_complete);
    assert!(!greeting.finished);
    controller.show_main_menu(anna).await.unwrap();

    finish_quizzed_topics(&app, anna).await;
    // Closing has one page, so page 1 is past its end.
    let reading = controller.open_topic(anna, CLOSING, 1).await.unwrap();
    assert_eq!(reading.state, SessionState::Reading);

    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    let closing = progress.iter().find(|r| r.topic_id == CLOSING).unwrap();
    assert!(closing.theory_complete);
    assert!(closing.finished);
    assert!(!closing.locked);

    let list = controller.list_topics(anna).await.unwrap();
    assert!(list.screens[0].actions[2].label.starts_with("✅"));
}

#[tokio::test]
async fn finishing_a_predecessor_unlocks_the_next_topic() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    finish_quizzed_topics(&app, anna).await;

    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    assert!(progress.iter().all(|r| !r.locked));
    assert!(!progress.iter().find(|r| r.topic_id == CLOSING).unwrap().finished);

    // Closing stays unfinished on its last page until stepped past.
    controller.open_topic(anna, CLOSING, 0).await.unwrap();
    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    let closing = progress.iter().find(|r| r.topic_id == CLOSING).unwrap();
    assert!(closing.theory_complete);
    assert!(!closing.finished);
    controller.open_topic(anna, CLOSING, 1).await.unwrap();
    let progress = app.storage().progress.progress_for_learner(anna).await.unwrap();
    assert!(progress.iter().find(|r| r.topic_id == CLOSING).unwrap().finished);
}

#[tokio::test]
async fn theory_only_topic_completes_after_reading() {
    let app = app().await;
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;

    finish_quizzed_topics(&app, anna).await;
    let reading = controller.open_topic(anna, CLOSING, 0).await.unwrap();
    assert_eq!(
        reading.screens[0].action_tags(),
        vec!["studding", "completetopic_3"]
    );
    let list = controller.complete_topic(anna, CLOSING).await.unwrap();
    assert_eq!(list.state, SessionState::TopicList);
    assert!(list.screens[0].actions[2].label.starts_with("✅"));

    let err = controller.complete_topic(anna, CLOSING).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidState { .. }));
}

#[tokio::test]
async fn credentials_bind_one_channel_per_learner() {
    let app = app().await;
    let controller = app.controller();
    let first = ChannelAddress::new("chat-1").unwrap();
    let second = ChannelAddress::new("chat-2").unwrap();

    assert!(matches!(
        controller.authenticate(&first, "nope").await,
        Err(SessionError::InvalidCredential)
    ));
    controller.authenticate(&first, " anna-key ").await.unwrap();
    assert!(matches!(
        controller.authenticate(&second, "anna-key").await,
        Err(SessionError::AlreadyBound)
    ));
    assert!(matches!(
        controller.authenticate(&first, "boris-key").await,
        Err(SessionError::AlreadyBound)
    ));

    controller.deactivate(LearnerId::new(1)).await.unwrap();
    assert!(matches!(
        controller.authenticate(&first, "anna-key").await,
        Err(SessionError::Deactivated)
    ));
    assert!(controller.learner_for_channel(&first).await.unwrap().is_none());
}

async fn race_selections(app: &AppServices) {
    let controller = app.controller();
    let anna = login(&controller, "chat-anna", "anna-key").await;
    let attempt = start_greeting_quiz(app, anna).await;

    for round in 0..25 {
        let order = if round % 2 == 0 { [11, 12] } else { [12, 11] };
        let handles: Vec<_> = order
            .into_iter()
            .map(|option| {
                let controller: Arc<SessionController> = app.controller();
                tokio::spawn(async move {
                    controller
                        .select_option(anna, attempt, 0, OptionId::new(option))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let answers = app
            .storage()
            .attempts
            .answers_for_attempt(attempt)
            .await
            .unwrap();
        assert_eq!(answers.len(), 1);
        let winner = answers[0].selected_option().unwrap();
        assert!(winner == OptionId::new(11) || winner == OptionId::new(12));

        // The rendered marks agree with the stored winner.
        let question = controller
            .select_option(anna, attempt, 0, winner)
            .await
            .unwrap();
        let marked: Vec<_> = question.screens[0].actions[..2]
            .iter()
            .filter(|a| a.label.starts_with("✔️"))
            .collect();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].action.ends_with(&format!("_{winner}")));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selections_leave_a_single_answer() {
    race_selections(&app().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_selections_leave_a_single_answer_in_sqlite() {
    let app = AppServices::new_sqlite(
        "sqlite:file:memdb_services_race?mode=memory&cache=shared",
        fixed_clock(),
        Messages::default(),
    )
    .await
    .unwrap();
    seed(app.storage()).await;
    race_selections(&app).await;
}
