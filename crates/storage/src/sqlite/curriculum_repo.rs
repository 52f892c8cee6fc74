use std::collections::HashMap;

use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use trainer_core::model::{
    AnswerOption, BranchId, ContentBlock, Question, QuestionId, QuestionKind, Quiz, QuizId, Topic,
    TopicId,
};

use super::SqliteRepository;
use super::mapping::{branch_id, db, id_i64, option_id, question_id, quiz_id, ser, topic_id};
use crate::repository::{CurriculumRepository, StorageError};

fn map_topic(row: &SqliteRow, blocks: Vec<ContentBlock>) -> Result<Topic, StorageError> {
    let position: i64 = row.try_get("position").map_err(ser)?;
    let quiz = row
        .try_get::<Option<i64>, _>("quiz_id")
        .map_err(ser)?
        .map(|_| quiz_id(row, "quiz_id"))
        .transpose()?;
    Topic::new(
        topic_id(row, "id")?,
        branch_id(row, "branch_id")?,
        u32::try_from(position).map_err(ser)?,
        row.try_get::<String, _>("name").map_err(ser)?,
        row.try_get::<String, _>("intro").map_err(ser)?,
        blocks,
        quiz,
    )
    .map_err(ser)
}

fn map_block(row: &SqliteRow) -> Result<ContentBlock, StorageError> {
    Ok(ContentBlock::new(
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get::<String, _>("text").map_err(ser)?,
    ))
}

fn position_i64(index: usize) -> Result<i64, StorageError> {
    i64::try_from(index).map_err(ser)
}

#[async_trait::async_trait]
impl CurriculumRepository for SqliteRepository {
    async fn upsert_topic(&self, topic: &Topic) -> Result<(), StorageError> {
        let id = id_i64("topic_id", topic.id().value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;

        sqlx::query(
            r"
            INSERT INTO topics (id, branch_id, position, name, intro, quiz_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                branch_id = excluded.branch_id,
                position = excluded.position,
                name = excluded.name,
                intro = excluded.intro,
                quiz_id = excluded.quiz_id
            ",
        )
        .bind(id)
        .bind(id_i64("branch_id", topic.branch_id().value())?)
        .bind(i64::from(topic.position()))
        .bind(topic.name())
        .bind(topic.intro())
        .bind(
            topic
                .quiz_id()
                .map(|q| id_i64("quiz_id", q.value()))
                .transpose()?,
        )
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        sqlx::query("DELETE FROM content_blocks WHERE topic_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        for (index, block) in topic.blocks().iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO content_blocks (topic_id, position, title, text)
                VALUES (?1, ?2, ?3, ?4)
                ",
            )
            .bind(id)
            .bind(position_i64(index)?)
            .bind(block.title.as_str())
            .bind(block.text.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn upsert_quiz(&self, quiz: &Quiz) -> Result<(), StorageError> {
        let id = id_i64("quiz_id", quiz.id().value())?;
        let topic = id_i64("topic_id", quiz.topic_id().value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;

        let owner = sqlx::query("SELECT 1 FROM topics WHERE id = ?1")
            .bind(topic)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?;
        if owner.is_none() {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
            INSERT INTO quizzes (id, topic_id, name) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET topic_id = excluded.topic_id, name = excluded.name
            ",
        )
        .bind(id)
        .bind(topic)
        .bind(quiz.name())
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        // Questions and options are upserted by id so recorded answers that
        // reference them survive re-authoring.
        let mut kept_questions = Vec::with_capacity(quiz.question_count());
        for (index, question) in quiz.questions().iter().enumerate() {
            let qid = id_i64("question_id", question.id().value())?;
            kept_questions.push(qid);
            let kind = if question.is_open() { "open" } else { "closed" };
            sqlx::query(
                r"
                INSERT INTO questions (id, quiz_id, position, prompt, kind)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    quiz_id = excluded.quiz_id,
                    position = excluded.position,
                    prompt = excluded.prompt,
                    kind = excluded.kind
                ",
            )
            .bind(qid)
            .bind(id)
            .bind(position_i64(index)?)
            .bind(question.prompt())
            .bind(kind)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            let mut kept_options = Vec::with_capacity(question.options().len());
            for (position, option) in question.options().iter().enumerate() {
                let oid = id_i64("option_id", option.id.value())?;
                kept_options.push(oid);
                sqlx::query(
                    r"
                    INSERT INTO answer_options (id, question_id, position, label, is_right)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(id) DO UPDATE SET
                        question_id = excluded.question_id,
                        position = excluded.position,
                        label = excluded.label,
                        is_right = excluded.is_right
                    ",
                )
                .bind(oid)
                .bind(qid)
                .bind(position_i64(position)?)
                .bind(option.label.as_str())
                .bind(option.is_right)
                .execute(&mut *tx)
                .await
                .map_err(db)?;
            }

            let stale: Vec<i64> = sqlx::query_scalar("SELECT id FROM answer_options WHERE question_id = ?1")
                .bind(qid)
                .fetch_all(&mut *tx)
                .await
                .map_err(db)?;
            for oid in stale.into_iter().filter(|o| !kept_options.contains(o)) {
                sqlx::query("DELETE FROM answer_options WHERE id = ?1")
                    .bind(oid)
                    .execute(&mut *tx)
                    .await
                    .map_err(db)?;
            }
        }

        let stale: Vec<i64> = sqlx::query_scalar("SELECT id FROM questions WHERE quiz_id = ?1")
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(db)?;
        for qid in stale.into_iter().filter(|q| !kept_questions.contains(q)) {
            sqlx::query("DELETE FROM questions WHERE id = ?1")
                .bind(qid)
                .execute(&mut *tx)
                .await
                .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(())
    }

    async fn list_topics(&self, branch: BranchId) -> Result<Vec<Topic>, StorageError> {
        let branch = id_i64("branch_id", branch.value())?;

        let block_rows = sqlx::query(
            r"
            SELECT b.topic_id, b.title, b.text
            FROM content_blocks b
            JOIN topics t ON t.id = b.topic_id
            WHERE t.branch_id = ?1
            ORDER BY b.topic_id, b.position
            ",
        )
        .bind(branch)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut blocks: HashMap<TopicId, Vec<ContentBlock>> = HashMap::new();
        for row in &block_rows {
            blocks
                .entry(topic_id(row, "topic_id")?)
                .or_default()
                .push(map_block(row)?);
        }

        let rows = sqlx::query(
            r"
            SELECT id, branch_id, position, name, intro, quiz_id
            FROM topics
            WHERE branch_id = ?1
            ORDER BY position ASC, id ASC
            ",
        )
        .bind(branch)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut topics = Vec::with_capacity(rows.len());
        for row in &rows {
            let id = topic_id(row, "id")?;
            topics.push(map_topic(row, blocks.remove(&id).unwrap_or_default())?);
        }
        Ok(topics)
    }

    async fn get_topic(&self, id: TopicId) -> Result<Topic, StorageError> {
        let tid = id_i64("topic_id", id.value())?;
        let row = sqlx::query(
            "SELECT id, branch_id, position, name, intro, quiz_id FROM topics WHERE id = ?1",
        )
        .bind(tid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?
        .ok_or(StorageError::NotFound)?;

        let block_rows = sqlx::query(
            "SELECT title, text FROM content_blocks WHERE topic_id = ?1 ORDER BY position",
        )
        .bind(tid)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        let blocks = block_rows
            .iter()
            .map(map_block)
            .collect::<Result<Vec<_>, _>>()?;

        map_topic(&row, blocks)
    }

    async fn get_quiz(&self, id: QuizId) -> Result<Quiz, StorageError> {
        let qid = id_i64("quiz_id", id.value())?;
        let quiz_row = sqlx::query("SELECT id, topic_id, name FROM quizzes WHERE id = ?1")
            .bind(qid)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(StorageError::NotFound)?;

        let option_rows = sqlx::query(
            r"
            SELECT o.id, o.question_id, o.label, o.is_right
            FROM answer_options o
            JOIN questions q ON q.id = o.question_id
            WHERE q.quiz_id = ?1
            ORDER BY o.question_id, o.position, o.id
            ",
        )
        .bind(qid)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut options: HashMap<QuestionId, Vec<AnswerOption>> = HashMap::new();
        for row in &option_rows {
            options
                .entry(question_id(row, "question_id")?)
                .or_default()
                .push(AnswerOption::new(
                    option_id(row, "id")?,
                    row.try_get::<String, _>("label").map_err(ser)?,
                    row.try_get::<bool, _>("is_right").map_err(ser)?,
                ));
        }

        let question_rows = sqlx::query(
            r"
            SELECT id, prompt, kind FROM questions
            WHERE quiz_id = ?1
            ORDER BY position, id
            ",
        )
        .bind(qid)
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;

        let mut questions = Vec::with_capacity(question_rows.len());
        for row in &question_rows {
            let id = question_id(row, "id")?;
            let kind: String = row.try_get("kind").map_err(ser)?;
            let kind = match kind.as_str() {
                "open" => QuestionKind::Open,
                "closed" => QuestionKind::Closed {
                    options: options.remove(&id).unwrap_or_default(),
                },
                other => {
                    return Err(StorageError::Serialization(format!(
                        "invalid question kind: {other}"
                    )));
                }
            };
            let prompt: String = row.try_get("prompt").map_err(ser)?;
            questions.push(Question::new(id, prompt, kind).map_err(ser)?);
        }

        Quiz::new(
            quiz_id(&quiz_row, "id")?,
            topic_id(&quiz_row, "topic_id")?,
            quiz_row.try_get::<String, _>("name").map_err(ser)?,
            questions,
        )
        .map_err(ser)
    }
}
