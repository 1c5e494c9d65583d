//! Profile repository.

use async_trait::async_trait;
use domain::models::Mentor;
use domain::services::{ProfileStore, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

use super::store_error;
use crate::entities::MentorProfileEntity;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct ProfileRepository {
    pool: PgPool,
}

impl ProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for ProfileRepository {
    async fn find_mentor(&self, mentor_id: Uuid) -> Result<Option<Mentor>, StoreError> {
        let timer = QueryTimer::new("find_mentor");
        let result = sqlx::query_as::<_, MentorProfileEntity>(
            r#"
            SELECT id, email, display_name
            FROM profiles
            WHERE id = $1 AND role = 'mentor'
            "#,
        )
        .bind(mentor_id)
        .fetch_optional(&self.pool)
        .await;
        timer.observe(&result);
        Ok(result.map_err(store_error)?.map(Into::into))
    }

    async fn assign_mentor(
        &self,
        account_id: Uuid,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<(), StoreError> {
        let timer = QueryTimer::new("assign_mentor");
        let result = sqlx::query(
            r#"
            INSERT INTO profiles (id, email, role, mentor_id)
            VALUES ($1, $2, 'client', $3)
            ON CONFLICT (id) DO UPDATE
            SET mentor_id = EXCLUDED.mentor_id, updated_at = NOW()
            "#,
        )
        .bind(account_id)
        .bind(email.trim())
        .bind(mentor_id)
        .execute(&self.pool)
        .await;
        timer.observe(&result);
        result.map_err(store_error)?;
        Ok(())
    }
}
