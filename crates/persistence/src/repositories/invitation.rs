//! Client invitation repository.

use async_trait::async_trait;
use chrono::Duration;
use domain::models::{normalize_invite_code, InvitationRecord, NewInvitation};
use domain::services::{Clock, InvitationStore, IssuedInvitation, StoreError};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use super::store_error;
use crate::entities::{ClientInvitationEntity, IssuedInvitationEntity};
use crate::metrics::QueryTimer;

const COLUMNS: &str =
    "id, code, email, mentor_id, role, invitee_name, is_used, used_by, created_at, expires_at";

/// Repository for the client_invitations table.
///
/// Validity is evaluated against the injected clock, not the database's
/// `NOW()`, so both stores agree on expiry.
#[derive(Clone)]
pub struct InvitationRepository {
    pool: PgPool,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl InvitationRepository {
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { pool, clock, ttl }
    }

    async fn fetch_optional(
        &self,
        name: &'static str,
        query: sqlx::query::QueryAs<'_, sqlx::Postgres, ClientInvitationEntity, sqlx::postgres::PgArguments>,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        let timer = QueryTimer::new(name);
        let result = query.fetch_optional(&self.pool).await;
        timer.observe(&result);
        result.map_err(store_error)?.map(TryInto::try_into).transpose()
    }
}

#[async_trait]
impl InvitationStore for InvitationRepository {
    async fn find_valid_invite(
        &self,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM client_invitations
            WHERE email = $1 AND mentor_id = $2 AND is_used = FALSE AND expires_at > $3
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let query = sqlx::query_as::<_, ClientInvitationEntity>(&sql)
            .bind(email)
            .bind(mentor_id)
            .bind(self.clock.now());
        self.fetch_optional("find_valid_invitation", query).await
    }

    async fn create_invite(
        &self,
        invitation: &NewInvitation,
    ) -> Result<InvitationRecord, StoreError> {
        let now = self.clock.now();
        let timer = QueryTimer::new("create_invitation");
        let result = sqlx::query_as::<_, ClientInvitationEntity>(&format!(
            r#"
            INSERT INTO client_invitations
                (id, code, email, mentor_id, role, invitee_name, is_used, created_at, expires_at)
            VALUES ($1, $2, $3, $4, 'client', $5, FALSE, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(invitation.id)
        .bind(&invitation.code)
        .bind(&invitation.email)
        .bind(invitation.mentor_id)
        .bind(&invitation.invitee_name)
        .bind(now)
        .bind(now + self.ttl)
        .fetch_one(&self.pool)
        .await;
        timer.observe(&result);
        result.map_err(store_error)?.try_into()
    }

    async fn renew_invite(&self, id: Uuid) -> Result<Uuid, StoreError> {
        let timer = QueryTimer::new("renew_invitation");
        let result = sqlx::query_as::<_, (bool,)>(
            r#"
            UPDATE client_invitations
            SET expires_at = CASE WHEN is_used THEN expires_at ELSE $2 END
            WHERE id = $1
            RETURNING is_used
            "#,
        )
        .bind(id)
        .bind(self.clock.now() + self.ttl)
        .fetch_optional(&self.pool)
        .await;
        timer.observe(&result);

        match result.map_err(store_error)? {
            None => Err(StoreError::NotFound(id)),
            Some((true,)) => Err(StoreError::AlreadyUsed { id }),
            Some((false,)) => Ok(id),
        }
    }

    async fn resolve_by_code(
        &self,
        code: &str,
        email: Option<&str>,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM client_invitations
            WHERE code = $1
              AND ($2::TEXT IS NULL OR email = $2)
              AND is_used = FALSE
              AND expires_at > $3
            LIMIT 1
            "#
        );
        let query = sqlx::query_as::<_, ClientInvitationEntity>(&sql)
            .bind(normalize_invite_code(code))
            .bind(email.map(str::trim))
            .bind(self.clock.now());
        self.fetch_optional("resolve_invitation_by_code", query).await
    }

    async fn resolve_by_email(&self, email: &str) -> Result<Option<InvitationRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM client_invitations
            WHERE email = $1 AND is_used = FALSE AND expires_at > $2
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let query = sqlx::query_as::<_, ClientInvitationEntity>(&sql)
            .bind(email.trim())
            .bind(self.clock.now());
        self.fetch_optional("resolve_invitation_by_email", query).await
    }

    async fn mark_used(&self, id: Uuid, consumer_id: Uuid) -> Result<(), StoreError> {
        let timer = QueryTimer::new("mark_invitation_used");
        // Only an unused row, or one already consumed by the same account,
        // is touched; `used_by` is never overwritten.
        let result = sqlx::query_as::<_, (Option<Uuid>,)>(
            r#"
            WITH updated AS (
                UPDATE client_invitations
                SET is_used = TRUE, used_by = $2
                WHERE id = $1 AND is_used = FALSE
                RETURNING used_by
            )
            SELECT used_by FROM updated
            UNION ALL
            SELECT used_by FROM client_invitations
            WHERE id = $1 AND NOT EXISTS (SELECT 1 FROM updated)
            "#,
        )
        .bind(id)
        .bind(consumer_id)
        .fetch_optional(&self.pool)
        .await;
        timer.observe(&result);

        match result.map_err(store_error)? {
            None => Err(StoreError::NotFound(id)),
            Some((Some(used_by),)) if used_by == consumer_id => Ok(()),
            Some(_) => Err(StoreError::AlreadyUsed { id }),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InvitationRecord>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM client_invitations WHERE id = $1");
        let query = sqlx::query_as::<_, ClientInvitationEntity>(&sql).bind(id);
        self.fetch_optional("find_invitation_by_id", query).await
    }

    async fn latest_unused_for_email(
        &self,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM client_invitations
            WHERE email = $1 AND mentor_id = $2 AND is_used = FALSE
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let query = sqlx::query_as::<_, ClientInvitationEntity>(&sql)
            .bind(email.trim())
            .bind(mentor_id);
        self.fetch_optional("latest_unused_invitation", query).await
    }

    async fn list_for_mentor(&self, mentor_id: Uuid) -> Result<Vec<InvitationRecord>, StoreError> {
        let timer = QueryTimer::new("list_mentor_invitations");
        let result = sqlx::query_as::<_, ClientInvitationEntity>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM client_invitations
            WHERE mentor_id = $1
            ORDER BY created_at DESC
            "#
        ))
        .bind(mentor_id)
        .fetch_all(&self.pool)
        .await;
        timer.observe(&result);

        result
            .map_err(store_error)?
            .into_iter()
            .map(TryInto::try_into)
            .collect()
    }

    async fn issue_atomic(
        &self,
        invitation: &NewInvitation,
    ) -> Result<IssuedInvitation, StoreError> {
        let timer = QueryTimer::new("issue_client_invitation");
        let result = sqlx::query_as::<_, IssuedInvitationEntity>(
            r#"
            SELECT * FROM issue_client_invitation($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(invitation.id)
        .bind(&invitation.code)
        .bind(&invitation.email)
        .bind(invitation.mentor_id)
        .bind(&invitation.invitee_name)
        .bind(self.clock.now())
        .bind(self.ttl.num_seconds())
        .fetch_one(&self.pool)
        .await;
        timer.observe(&result);

        let row = result.map_err(store_error)?;
        Ok(IssuedInvitation {
            record: row.invitation.try_into()?,
            renewed: row.renewed,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        crate::metrics::record_pool_state(&self.pool);
        Ok(())
    }
}
