use trainer_core::model::{BranchId, ChannelAddress, CredentialToken, Learner, LearnerId};

use super::SqliteRepository;
use super::mapping::{LEARNER_COLUMNS, db, id_i64, map_learner_row};
use crate::repository::{LearnerRepository, StorageError};

impl SqliteRepository {
    async fn fetch_learner_by(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<Learner>, StorageError> {
        let sql = format!("SELECT {LEARNER_COLUMNS} FROM learners WHERE {column} = ?1");
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;
        row.as_ref().map(map_learner_row).transpose()
    }
}

#[async_trait::async_trait]
impl LearnerRepository for SqliteRepository {
    async fn insert_learner(&self, learner: &Learner) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO learners (id, branch_id, display_name, token, channel_address, active, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(id_i64("learner_id", learner.id().value())?)
        .bind(id_i64("branch_id", learner.branch_id().value())?)
        .bind(learner.display_name())
        .bind(learner.token().as_str())
        .bind(learner.channel().map(ChannelAddress::as_str))
        .bind(learner.is_active())
        .bind(i64::from(learner.state().code()))
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn get_learner(&self, id: LearnerId) -> Result<Learner, StorageError> {
        let sql = format!("SELECT {LEARNER_COLUMNS} FROM learners WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("learner_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or(StorageError::NotFound)?;
        map_learner_row(&row)
    }

    async fn find_by_token(
        &self,
        token: &CredentialToken,
    ) -> Result<Option<Learner>, StorageError> {
        self.fetch_learner_by("token", token.as_str()).await
    }

    async fn find_by_channel(
        &self,
        channel: &ChannelAddress,
    ) -> Result<Option<Learner>, StorageError> {
        self.fetch_learner_by("channel_address", channel.as_str())
            .await
    }

    async fn list_learners(&self, branch: BranchId) -> Result<Vec<Learner>, StorageError> {
        let sql = format!("SELECT {LEARNER_COLUMNS} FROM learners WHERE branch_id = ?1 ORDER BY id");
        let rows = sqlx::query(&sql)
            .bind(id_i64("branch_id", branch.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
        rows.iter().map(map_learner_row).collect()
    }
}
