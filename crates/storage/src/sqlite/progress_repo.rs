use trainer_core::model::{LearnerId, LearnerTopicProgress, ProgressId, TopicId};

use super::SqliteRepository;
use super::mapping::{PROGRESS_COLUMNS, db, id_i64, map_progress_row};
use crate::repository::{ProgressRepository, StorageError};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn enroll(
        &self,
        learner: LearnerId,
        topics: &[TopicId],
    ) -> Result<Vec<LearnerTopicProgress>, StorageError> {
        let learner_i64 = id_i64("learner_id", learner.value())?;
        let mut tx = self.pool.begin().await.map_err(db)?;
        for (index, topic) in topics.iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO learner_topic_progress (learner_id, topic_id, locked)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(learner_id, topic_id) DO NOTHING
                ",
            )
            .bind(learner_i64)
            .bind(id_i64("topic_id", topic.value())?)
            .bind(index != 0)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }
        tx.commit().await.map_err(db)?;

        self.progress_for_learner(learner).await
    }

    async fn progress_for_learner(
        &self,
        learner: LearnerId,
    ) -> Result<Vec<LearnerTopicProgress>, StorageError> {
        let sql = format!(
            "SELECT {PROGRESS_COLUMNS} FROM learner_topic_progress WHERE learner_id = ?1 ORDER BY id"
        );
        let rows = sqlx::query(&sql)
            .bind(id_i64("learner_id", learner.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(map_progress_row).collect()
    }

    async fn get_progress(&self, id: ProgressId) -> Result<LearnerTopicProgress, StorageError> {
        let sql = format!("SELECT {PROGRESS_COLUMNS} FROM learner_topic_progress WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("progress_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(StorageError::NotFound)?;
        map_progress_row(&row)
    }

    async fn set_review_status(
        &self,
        id: ProgressId,
        reviewed: Option<bool>,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            "UPDATE learner_topic_progress SET open_answers_reviewed = ?1 WHERE id = ?2",
        )
        .bind(reviewed)
        .bind(id_i64("progress_id", id.value())?)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
