//! Demo curriculum for local runs: a small restaurant onboarding course with
//! a few learners. Ids are derived from the branch so re-seeding is idempotent.

use anyhow::{Context, Result};
use tracing::info;

use storage::repository::{Storage, StorageError};
use trainer_core::model::{
    AnswerOption, BranchId, ContentBlock, CredentialToken, Learner, LearnerId, OptionId,
    Question, QuestionId, Quiz, QuizId, Topic, TopicId,
};

const DEMO_LEARNERS: [&str; 3] = ["Anna", "Boris", "Carl"];

/// A learner created (or found) by [`seed_branch`].
#[derive(Debug, Clone)]
pub struct SeededLearner {
    pub id: LearnerId,
    pub name: String,
    pub token: String,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub topics: usize,
    pub quizzes: usize,
    pub learners: Vec<SeededLearner>,
}

struct Ids {
    base: u64,
}

impl Ids {
    fn new(branch: BranchId) -> Self {
        Self {
            base: branch.value() * 1_000,
        }
    }

    fn topic(&self, n: u64) -> TopicId {
        TopicId::new(self.base + n)
    }

    fn quiz(&self, n: u64) -> QuizId {
        QuizId::new(self.base + n)
    }

    fn question(&self, quiz: u64, n: u64) -> QuestionId {
        QuestionId::new((self.base + quiz) * 100 + n)
    }

    fn option(&self, quiz: u64, question: u64, n: u64) -> OptionId {
        OptionId::new(((self.base + quiz) * 100 + question) * 10 + n)
    }

    fn learner(&self, n: u64) -> LearnerId {
        LearnerId::new(self.base + n)
    }
}

fn curriculum(branch: BranchId) -> Result<(Vec<Topic>, Vec<Quiz>), trainer_core::Error> {
    let ids = Ids::new(branch);

    let topics = vec![
        Topic::new(
            ids.topic(1),
            branch,
            1,
            "Welcome to the team",
            "How the restaurant works and who is who.",
            vec![
                ContentBlock::new(
                    "Our kitchen",
                    "The kitchen opens at 10:00. The chef on shift decides the stop list.",
                ),
                ContentBlock::new(
                    "Your shift",
                    "Arrive fifteen minutes early. Check in with the shift manager.",
                ),
            ],
            Some(ids.quiz(1)),
        )?,
        Topic::new(
            ids.topic(2),
            branch,
            2,
            "Serving guests",
            "Greeting, taking orders and handling complaints.",
            vec![
                ContentBlock::new("Greeting", "Greet every guest within one minute of seating."),
                ContentBlock::new(
                    "Complaints",
                    "Listen, apologise and call the shift manager if the guest is not satisfied.",
                ),
            ],
            Some(ids.quiz(2)),
        )?,
        Topic::new(
            ids.topic(3),
            branch,
            3,
            "Hygiene rules",
            "",
            vec![ContentBlock::new(
                "Hands",
                "Wash your hands before every shift and after handling cash.",
            )],
            None,
        )?,
    ];

    let quizzes = vec![
        Quiz::new(
            ids.quiz(1),
            ids.topic(1),
            "Team basics",
            vec![
                Question::closed(
                    ids.question(1, 1),
                    "When does the kitchen open?",
                    vec![
                        AnswerOption::new(ids.option(1, 1, 1), "09:00", false),
                        AnswerOption::new(ids.option(1, 1, 2), "10:00", true),
                        AnswerOption::new(ids.option(1, 1, 3), "12:00", false),
                    ],
                )?,
                Question::closed(
                    ids.question(1, 2),
                    "Who decides the stop list?",
                    vec![
                        AnswerOption::new(ids.option(1, 2, 1), "The chef on shift", true),
                        AnswerOption::new(ids.option(1, 2, 2), "Any waiter", false),
                    ],
                )?,
            ],
        )?,
        Quiz::new(
            ids.quiz(2),
            ids.topic(2),
            "Guest service",
            vec![
                Question::closed(
                    ids.question(2, 1),
                    "How soon should a seated guest be greeted?",
                    vec![
                        AnswerOption::new(ids.option(2, 1, 1), "Within one minute", true),
                        AnswerOption::new(ids.option(2, 1, 2), "Within ten minutes", false),
                    ],
                )?,
                Question::open(
                    ids.question(2, 2),
                    "Describe how you would handle a guest who found a hair in the soup.",
                )?,
            ],
        )?,
    ];

    Ok((topics, quizzes))
}

/// Write the demo curriculum for `branch` and enroll the demo learners.
/// Existing learners keep their tokens.
///
/// # Errors
///
/// Fails on storage errors.
pub async fn seed_branch(storage: &Storage, branch: BranchId) -> Result<SeedSummary> {
    let (topics, quizzes) = curriculum(branch).context("building demo curriculum")?;
    for topic in &topics {
        storage
            .curriculum
            .upsert_topic(topic)
            .await
            .with_context(|| format!("saving topic {}", topic.id()))?;
    }
    for quiz in &quizzes {
        storage
            .curriculum
            .upsert_quiz(quiz)
            .await
            .with_context(|| format!("saving quiz {}", quiz.id()))?;
    }

    let ids = Ids::new(branch);
    let mut learners = Vec::with_capacity(DEMO_LEARNERS.len());
    for (n, name) in (1..).zip(DEMO_LEARNERS) {
        let id = ids.learner(n);
        let seeded = match storage.learners.get_learner(id).await {
            Ok(existing) => SeededLearner {
                id,
                name: existing.display_name().to_owned(),
                token: existing.token().as_str().to_owned(),
                created: false,
            },
            Err(StorageError::NotFound) => {
                let learner = Learner::new(id, branch, name, CredentialToken::generate())?;
                storage
                    .learners
                    .insert_learner(&learner)
                    .await
                    .with_context(|| format!("enrolling learner {name}"))?;
                SeededLearner {
                    id,
                    name: name.to_owned(),
                    token: learner.token().as_str().to_owned(),
                    created: true,
                }
            }
            Err(err) => return Err(err).with_context(|| format!("loading learner {id}")),
        };
        learners.push(seeded);
    }

    info!(
        branch = %branch,
        topics = topics.len(),
        quizzes = quizzes.len(),
        created = learners.iter().filter(|l| l.created).count(),
        "demo curriculum seeded"
    );

    Ok(SeedSummary {
        topics: topics.len(),
        quizzes: quizzes.len(),
        learners,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seeding_twice_keeps_learner_tokens() {
        let storage = Storage::in_memory();
        let branch = BranchId::new(3);

        let first = seed_branch(&storage, branch).await.unwrap();
        assert_eq!(first.topics, 3);
        assert!(first.learners.iter().all(|l| l.created));

        let second = seed_branch(&storage, branch).await.unwrap();
        assert!(second.learners.iter().all(|l| !l.created));
        let tokens = |s: &SeedSummary| s.learners.iter().map(|l| l.token.clone()).collect::<Vec<_>>();
        assert_eq!(tokens(&first), tokens(&second));

        let topics = storage.curriculum.list_topics(branch).await.unwrap();
        assert_eq!(topics.len(), 3);
    }

    #[tokio::test]
    async fn branches_do_not_share_ids() {
        let storage = Storage::in_memory();
        seed_branch(&storage, BranchId::new(1)).await.unwrap();
        seed_branch(&storage, BranchId::new(2)).await.unwrap();

        assert_eq!(
            storage.curriculum.list_topics(BranchId::new(1)).await.unwrap().len(),
            3
        );
        assert_eq!(
            storage.learners.list_learners(BranchId::new(2)).await.unwrap().len(),
            3
        );
    }
}
