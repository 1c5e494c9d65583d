//! In-memory store implementations for development and testing.
//!
//! Both stores can be switched "offline" to simulate an unreachable backend.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::clock::Clock;
use super::invitation_store::{InvitationStore, IssuedInvitation, ProfileStore, StoreError};
use crate::models::{
    normalize_invite_code, InvitationRecord, InvitationRole, Mentor, NewInvitation,
    DEFAULT_INVITATION_TTL_DAYS,
};

const OFFLINE_MESSAGE: &str = "connection refused (store offline)";

/// Invitation store backed by a vector guarded by a single lock.
///
/// Holding the write lock for the whole of `issue_atomic` makes it a true
/// insert-or-renew, mirroring the database function.
#[derive(Debug)]
pub struct InMemoryInvitationStore {
    records: RwLock<Vec<InvitationRecord>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    atomic: bool,
    offline: AtomicBool,
}

impl InMemoryInvitationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            clock,
            ttl: Duration::days(DEFAULT_INVITATION_TTL_DAYS),
            atomic: true,
            offline: AtomicBool::new(false),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Behave like a store without the atomic issuance function.
    pub fn without_atomic_issue(mut self) -> Self {
        self.atomic = false;
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Inserts a record verbatim.
    pub async fn insert(&self, record: InvitationRecord) {
        self.records.write().await.push(record);
    }

    /// Snapshot of every stored record in insertion order.
    pub async fn all(&self) -> Vec<InvitationRecord> {
        self.records.read().await.clone()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Persistence(OFFLINE_MESSAGE.to_string()))
        } else {
            Ok(())
        }
    }

    fn build_record(&self, invitation: &NewInvitation) -> InvitationRecord {
        let now = self.clock.now();
        InvitationRecord {
            id: invitation.id,
            code: invitation.code.clone(),
            email: invitation.email.clone(),
            mentor_id: invitation.mentor_id,
            role: InvitationRole::Client,
            invitee_name: invitation.invitee_name.clone(),
            is_used: false,
            used_by: None,
            created_at: now,
            expires_at: now + self.ttl,
        }
    }

    fn insert_checked(
        records: &mut Vec<InvitationRecord>,
        record: InvitationRecord,
    ) -> Result<InvitationRecord, StoreError> {
        if records.iter().any(|r| r.code == record.code) {
            return Err(StoreError::Conflict(format!(
                "invitation code {} already exists",
                record.code
            )));
        }
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Conflict(format!(
                "invitation {} already exists",
                record.id
            )));
        }
        records.push(record.clone());
        Ok(record)
    }

    /// Latest record matching `filter`; later inserts win ties on `created_at`.
    fn latest<F>(records: &[InvitationRecord], filter: F) -> Option<InvitationRecord>
    where
        F: Fn(&InvitationRecord) -> bool,
    {
        records
            .iter()
            .filter(|r| filter(r))
            .max_by_key(|r| r.created_at)
            .cloned()
    }
}

#[async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn find_valid_invite(
        &self,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let records = self.records.read().await;
        Ok(Self::latest(&records, |r| {
            r.email == email && r.mentor_id == mentor_id && r.is_valid_at(now)
        }))
    }

    async fn create_invite(
        &self,
        invitation: &NewInvitation,
    ) -> Result<InvitationRecord, StoreError> {
        self.check_online()?;
        let record = self.build_record(invitation);
        let mut records = self.records.write().await;
        Self::insert_checked(&mut records, record)
    }

    async fn renew_invite(&self, id: Uuid) -> Result<Uuid, StoreError> {
        self.check_online()?;
        let expires_at = self.clock.now() + self.ttl;
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        if record.is_used {
            return Err(StoreError::AlreadyUsed { id });
        }
        record.expires_at = expires_at;
        Ok(id)
    }

    async fn resolve_by_code(
        &self,
        code: &str,
        email: Option<&str>,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        self.check_online()?;
        let code = normalize_invite_code(code);
        let now = self.clock.now();
        let records = self.records.read().await;
        Ok(Self::latest(&records, |r| {
            r.code == code && email.map_or(true, |e| r.email == e) && r.is_valid_at(now)
        }))
    }

    async fn resolve_by_email(&self, email: &str) -> Result<Option<InvitationRecord>, StoreError> {
        self.check_online()?;
        let now = self.clock.now();
        let records = self.records.read().await;
        Ok(Self::latest(&records, |r| r.email == email && r.is_valid_at(now)))
    }

    async fn mark_used(&self, id: Uuid, consumer_id: Uuid) -> Result<(), StoreError> {
        self.check_online()?;
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;

        if record.is_used {
            return if record.used_by == Some(consumer_id) {
                Ok(())
            } else {
                Err(StoreError::AlreadyUsed { id })
            };
        }

        record.is_used = true;
        record.used_by = Some(consumer_id);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InvitationRecord>, StoreError> {
        self.check_online()?;
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn latest_unused_for_email(
        &self,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<Option<InvitationRecord>, StoreError> {
        self.check_online()?;
        let records = self.records.read().await;
        Ok(Self::latest(&records, |r| {
            r.email == email && r.mentor_id == mentor_id && !r.is_used
        }))
    }

    async fn list_for_mentor(&self, mentor_id: Uuid) -> Result<Vec<InvitationRecord>, StoreError> {
        self.check_online()?;
        let records = self.records.read().await;
        let mut list: Vec<InvitationRecord> = records
            .iter()
            .rev()
            .filter(|r| r.mentor_id == mentor_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn issue_atomic(
        &self,
        invitation: &NewInvitation,
    ) -> Result<IssuedInvitation, StoreError> {
        if !self.atomic {
            return Err(StoreError::Unavailable);
        }
        self.check_online()?;

        let now = self.clock.now();
        let mut records = self.records.write().await;

        let existing = Self::latest(&records, |r| {
            r.email == invitation.email && r.mentor_id == invitation.mentor_id && r.is_valid_at(now)
        });

        if let Some(existing) = existing {
            let renewed = records
                .iter_mut()
                .find(|r| r.id == existing.id)
                .ok_or(StoreError::NotFound(existing.id))?;
            renewed.expires_at = now + self.ttl;
            return Ok(IssuedInvitation {
                record: renewed.clone(),
                renewed: true,
            });
        }

        let record = Self::insert_checked(&mut records, self.build_record(invitation))?;
        Ok(IssuedInvitation {
            record,
            renewed: false,
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }
}

/// Profile store keeping mentors and client-to-mentor links in maps.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    mentors: RwLock<HashMap<Uuid, Mentor>>,
    assignments: RwLock<HashMap<Uuid, (String, Uuid)>>,
    offline: AtomicBool,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mentor(mut self, mentor: Mentor) -> Self {
        self.mentors.get_mut().insert(mentor.id, mentor);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Mentor currently linked to a client account.
    pub async fn mentor_of(&self, account_id: Uuid) -> Option<Uuid> {
        self.assignments
            .read()
            .await
            .get(&account_id)
            .map(|(_, mentor_id)| *mentor_id)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Persistence(OFFLINE_MESSAGE.to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn find_mentor(&self, mentor_id: Uuid) -> Result<Option<Mentor>, StoreError> {
        self.check_online()?;
        Ok(self.mentors.read().await.get(&mentor_id).cloned())
    }

    async fn assign_mentor(
        &self,
        account_id: Uuid,
        email: &str,
        mentor_id: Uuid,
    ) -> Result<(), StoreError> {
        self.check_online()?;
        self.assignments
            .write()
            .await
            .insert(account_id, (email.to_string(), mentor_id));
        Ok(())
    }
}
