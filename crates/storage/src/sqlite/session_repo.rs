use sqlx::{Sqlite, Transaction};
use trainer_core::model::{Attempt, ChannelAddress, Learner};

use super::SqliteRepository;
use super::mapping::{db, id_i64};
use crate::repository::{AnswerWrite, SessionCommit, SessionStore, StorageError};

type Tx<'a> = Transaction<'a, Sqlite>;

/// Fails with `NotFound`/`Conflict` unless the attempt exists and is unfinished.
async fn require_open_attempt(tx: &mut Tx<'_>, attempt: i64) -> Result<(), StorageError> {
    let finished: Option<Option<String>> =
        sqlx::query_scalar("SELECT finished_at FROM attempts WHERE id = ?1")
            .bind(attempt)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db)?;
    match finished {
        None => Err(StorageError::NotFound),
        Some(Some(_)) => Err(StorageError::Conflict),
        Some(None) => Ok(()),
    }
}

async fn write_answer(tx: &mut Tx<'_>, write: &AnswerWrite) -> Result<(), StorageError> {
    match write {
        AnswerWrite::SelectOption {
            attempt_id,
            question_id,
            option_id,
            at,
        } => {
            let attempt = id_i64("attempt_id", attempt_id.value())?;
            sqlx::query(
                r"
                INSERT INTO recorded_answers (attempt_id, question_id, option_id, text, answered_at)
                VALUES (?1, ?2, ?3, NULL, ?4)
                ON CONFLICT(attempt_id, question_id) DO UPDATE SET
                    option_id = excluded.option_id,
                    text = NULL,
                    answered_at = excluded.answered_at
                ",
            )
            .bind(attempt)
            .bind(id_i64("question_id", question_id.value())?)
            .bind(id_i64("option_id", option_id.value())?)
            .bind(*at)
            .execute(&mut **tx)
            .await
            .map_err(db)?;
            require_open_attempt(tx, attempt).await
        }
        AnswerWrite::OpenText {
            answer_id,
            text,
            at,
        } => {
            let res = sqlx::query(
                r"
                UPDATE recorded_answers SET text = ?1, answered_at = ?2
                WHERE id = ?3 AND option_id IS NULL
                ",
            )
            .bind(text.as_str())
            .bind(*at)
            .bind(id_i64("answer_id", answer_id.value())?)
            .execute(&mut **tx)
            .await
            .map_err(db)?;
            if res.rows_affected() == 0 {
                return Err(StorageError::NotFound);
            }
            let attempt: i64 =
                sqlx::query_scalar("SELECT attempt_id FROM recorded_answers WHERE id = ?1")
                    .bind(id_i64("answer_id", answer_id.value())?)
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(db)?;
            require_open_attempt(tx, attempt).await
        }
    }
}

async fn finish_attempt(tx: &mut Tx<'_>, attempt: &Attempt) -> Result<(), StorageError> {
    let score = attempt
        .score()
        .ok_or_else(|| StorageError::Serialization("finished attempt has no score".into()))?;
    let finished_at = attempt
        .finished_at()
        .ok_or_else(|| StorageError::Serialization("finished attempt has no timestamp".into()))?;

    let res = sqlx::query(
        r"
        UPDATE attempts SET
            finished_at = ?1,
            closed_score = ?2,
            closed_max = ?3,
            open_score = ?4,
            open_max = ?5
        WHERE id = ?6 AND finished_at IS NULL
        ",
    )
    .bind(finished_at)
    .bind(i64::from(score.closed_score))
    .bind(i64::from(score.closed_max))
    .bind(i64::from(score.open_score))
    .bind(i64::from(score.open_max))
    .bind(id_i64("attempt_id", attempt.id().value())?)
    .execute(&mut **tx)
    .await
    .map_err(db)?;

    // Zero rows: already finished (or gone). Never rescore.
    if res.rows_affected() == 0 {
        return Err(StorageError::Conflict);
    }
    Ok(())
}

async fn write_learner(tx: &mut Tx<'_>, learner: &Learner) -> Result<(), StorageError> {
    let active = learner.active_attempt();
    let res = sqlx::query(
        r"
        UPDATE learners SET
            channel_address = ?1,
            active = ?2,
            state = ?3,
            active_attempt_id = ?4,
            active_quiz_id = ?5,
            active_question_index = ?6,
            pending_answer_id = ?7
        WHERE id = ?8
        ",
    )
    .bind(learner.channel().map(ChannelAddress::as_str))
    .bind(learner.is_active())
    .bind(i64::from(learner.state().code()))
    .bind(
        active
            .map(|a| id_i64("attempt_id", a.attempt_id.value()))
            .transpose()?,
    )
    .bind(active.map(|a| id_i64("quiz_id", a.quiz_id.value())).transpose()?)
    .bind(active.map(|a| i64::from(a.question_index)))
    .bind(
        learner
            .pending_open_answer()
            .map(|id| id_i64("answer_id", id.value()))
            .transpose()?,
    )
    .bind(id_i64("learner_id", learner.id().value())?)
    .execute(&mut **tx)
    .await
    .map_err(db)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

#[async_trait::async_trait]
impl SessionStore for SqliteRepository {
    async fn commit(&self, commit: &SessionCommit) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        if let Some(write) = &commit.answer {
            write_answer(&mut tx, write).await?;
        }

        if let Some(attempt) = &commit.finished_attempt {
            finish_attempt(&mut tx, attempt).await?;
        }

        for record in &commit.progress {
            // `locked` is ANDed with the stored value: it never flips back.
            let res = sqlx::query(
                r"
                UPDATE learner_topic_progress SET
                    theory_complete = ?1,
                    test_complete = ?2,
                    open_answers_reviewed = ?3,
                    locked = locked AND ?4,
                    finished = ?5
                WHERE id = ?6 AND learner_id = ?7
                ",
            )
            .bind(record.theory_complete)
            .bind(record.test_complete)
            .bind(record.open_answers_reviewed)
            .bind(record.locked)
            .bind(record.finished)
            .bind(id_i64("progress_id", record.id.value())?)
            .bind(id_i64("learner_id", record.learner_id.value())?)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
            if res.rows_affected() == 0 {
                return Err(StorageError::NotFound);
            }
        }

        write_learner(&mut tx, &commit.learner).await?;

        tx.commit().await.map_err(db)?;
        Ok(())
    }
}
