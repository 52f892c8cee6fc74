use chrono::{DateTime, Utc};
use trainer_core::model::{
    AnswerId, AnswerSelection, Attempt, AttemptId, LearnerId, QuestionId, QuizId, RecordedAnswer,
};

use super::SqliteRepository;
use super::mapping::{
    ANSWER_COLUMNS, ATTEMPT_COLUMNS, db, id_i64, map_answer_row, map_attempt_row,
};
use crate::repository::{AttemptRepository, StorageError};

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn open_attempt(
        &self,
        learner: LearnerId,
        quiz: QuizId,
        at: DateTime<Utc>,
    ) -> Result<Attempt, StorageError> {
        let learner = id_i64("learner_id", learner.value())?;
        let quiz = id_i64("quiz_id", quiz.value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;

        // The partial unique index turns a second unfinished insert into a no-op.
        sqlx::query(
            r"
            INSERT OR IGNORE INTO attempts (learner_id, quiz_id, started_at)
            VALUES (?1, ?2, ?3)
            ",
        )
        .bind(learner)
        .bind(quiz)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts \
             WHERE learner_id = ?1 AND quiz_id = ?2 AND finished_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(learner)
            .bind(quiz)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;

        map_attempt_row(&row)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt, StorageError> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("attempt_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(StorageError::NotFound)?;
        map_attempt_row(&row)
    }

    async fn answers_for_attempt(
        &self,
        attempt: AttemptId,
    ) -> Result<Vec<RecordedAnswer>, StorageError> {
        let sql =
            format!("SELECT {ANSWER_COLUMNS} FROM recorded_answers WHERE attempt_id = ?1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(id_i64("attempt_id", attempt.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(map_answer_row).collect()
    }

    async fn get_answer(&self, id: AnswerId) -> Result<RecordedAnswer, StorageError> {
        let sql = format!("SELECT {ANSWER_COLUMNS} FROM recorded_answers WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("answer_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(StorageError::NotFound)?;
        map_answer_row(&row)
    }

    async fn ensure_open_slot(
        &self,
        attempt: AttemptId,
        question: QuestionId,
        at: DateTime<Utc>,
    ) -> Result<RecordedAnswer, StorageError> {
        let attempt = id_i64("attempt_id", attempt.value())?;
        let question = id_i64("question_id", question.value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;

        // Write first so the transaction takes the write lock before reading.
        sqlx::query(
            r"
            INSERT INTO recorded_answers (attempt_id, question_id, answered_at)
            SELECT ?1, ?2, ?3
            WHERE EXISTS (SELECT 1 FROM attempts WHERE id = ?1 AND finished_at IS NULL)
            ON CONFLICT(attempt_id, question_id) DO NOTHING
            ",
        )
        .bind(attempt)
        .bind(question)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(db)?;

        let finished: Option<Option<DateTime<Utc>>> =
            sqlx::query_scalar("SELECT finished_at FROM attempts WHERE id = ?1")
                .bind(attempt)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db)?;
        match finished {
            None => return Err(StorageError::NotFound),
            Some(Some(_)) => return Err(StorageError::Conflict),
            Some(None) => {}
        }

        let sql = format!(
            "SELECT {ANSWER_COLUMNS} FROM recorded_answers WHERE attempt_id = ?1 AND question_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(attempt)
            .bind(question)
            .fetch_one(&mut *tx)
            .await
            .map_err(db)?;
        tx.commit().await.map_err(db)?;

        let slot = map_answer_row(&row)?;
        match slot.selection {
            AnswerSelection::Text(_) => Ok(slot),
            AnswerSelection::Choice(_) => Err(StorageError::Conflict),
        }
    }

    async fn latest_finished_attempt(
        &self,
        learner: LearnerId,
        quiz: QuizId,
    ) -> Result<Option<Attempt>, StorageError> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts \
             WHERE learner_id = ?1 AND quiz_id = ?2 AND finished_at IS NOT NULL \
             ORDER BY finished_at DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("learner_id", learner.value())?)
            .bind(id_i64("quiz_id", quiz.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(map_attempt_row).transpose()
    }
}
