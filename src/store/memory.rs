use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Page, Requester, Store, StoreError, StoreResult, UniqueField};
use crate::auth::repo_types::{Identity, NewIdentity, Session};
use crate::profiles::repo_types::{Profile, ProfileChanges};
use crate::students::repo_types::{NewStudent, Student, StudentFields};

const IDADE_CHECK: &str = "alunos_idade_check";

struct StoredStudent {
    seq: u64,
    row: Student,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, Identity>,
    profiles: HashMap<Uuid, Profile>,
    sessions: HashMap<Uuid, Session>,
    students: HashMap<Uuid, StoredStudent>,
    next_seq: u64,
}

impl Tables {
    /// Mirrors the unique and check constraints on `alunos`.
    fn check_student(&self, id: Uuid, fields: &StudentFields) -> StoreResult<()> {
        if !(1..=150).contains(&fields.idade) {
            return Err(StoreError::Check(IDADE_CHECK.into()));
        }
        let mut others = self.students.values().filter(|s| s.row.id != id);
        if others.clone().any(|s| s.row.email == fields.email) {
            return Err(StoreError::Conflict(UniqueField::StudentEmail));
        }
        if others.any(|s| s.row.matricula == fields.matricula) {
            return Err(StoreError::Conflict(UniqueField::StudentMatricula));
        }
        Ok(())
    }

    fn owned_student_mut(&mut self, owner: Uuid, id: Uuid) -> StoreResult<&mut Student> {
        match self.students.get_mut(&id) {
            Some(s) if s.row.user_id == owner => Ok(&mut s.row),
            _ => Err(StoreError::NotFound),
        }
    }
}

/// Updated timestamp that never moves backwards.
fn touch(prev: OffsetDateTime) -> OffsetDateTime {
    OffsetDateTime::now_utc().max(prev)
}

/// Process-local store with the same ownership and constraint rules as the
/// Postgres schema. Every operation runs under one lock, so each is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_identity(&self, new: NewIdentity) -> StoreResult<(Identity, Profile)> {
        let mut t = self.tables.write().await;
        if t.users.values().any(|u| u.email == new.email) {
            return Err(StoreError::Conflict(UniqueField::IdentityEmail));
        }
        // Provisioning failure aborts the signup before anything is written.
        if t.profiles.values().any(|p| p.email == new.email) {
            return Err(StoreError::Conflict(UniqueField::ProfileEmail));
        }

        let now = OffsetDateTime::now_utc();
        let name = new
            .metadata
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let identity = Identity {
            id: new.id,
            email: new.email.clone(),
            password_hash: new.password_hash,
            metadata: new.metadata,
            created_at: now,
        };
        let profile = Profile {
            id: new.id,
            name,
            email: new.email,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(identity.id, identity.clone());
        t.profiles.insert(profile.id, profile.clone());
        Ok((identity, profile))
    }

    async fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let t = self.tables.read().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_identity(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn delete_identity(&self, who: &Requester) -> StoreResult<()> {
        let user_id = who.user_id();
        let mut t = self.tables.write().await;
        if t.users.remove(&user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        t.profiles.remove(&user_id);
        t.sessions.retain(|_, s| s.user_id != user_id);
        t.students.retain(|_, s| s.row.user_id != user_id);
        Ok(())
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> StoreResult<Session> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        let now = OffsetDateTime::now_utc();
        t.sessions
            .retain(|_, s| s.user_id != user_id || s.expires_at > now);
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            created_at: now,
            expires_at,
            revoked_at: None,
        };
        t.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn revoke_session(&self, id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.write().await;
        match t.sessions.get_mut(&id) {
            Some(s) if s.revoked_at.is_none() => {
                s.revoked_at = Some(OffsetDateTime::now_utc());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_profile(&self, who: &Requester) -> StoreResult<Profile> {
        let t = self.tables.read().await;
        t.profiles
            .get(&who.user_id())
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update_profile(
        &self,
        who: &Requester,
        changes: ProfileChanges,
    ) -> StoreResult<Profile> {
        let mut t = self.tables.write().await;
        if let Some(email) = &changes.email {
            if t
                .profiles
                .values()
                .any(|p| p.id != who.user_id() && &p.email == email)
            {
                return Err(StoreError::Conflict(UniqueField::ProfileEmail));
            }
        }
        let profile = t
            .profiles
            .get_mut(&who.user_id())
            .ok_or(StoreError::NotFound)?;
        if let Some(name) = changes.name {
            profile.name = name;
        }
        if let Some(email) = changes.email {
            profile.email = email;
        }
        profile.updated_at = touch(profile.updated_at);
        Ok(profile.clone())
    }

    async fn list_students(&self, who: &Requester, page: Page) -> StoreResult<Vec<Student>> {
        let t = self.tables.read().await;
        let mut owned: Vec<&StoredStudent> = t
            .students
            .values()
            .filter(|s| s.row.user_id == who.user_id())
            .collect();
        owned.sort_by(|a, b| {
            b.row
                .created_at
                .cmp(&a.row.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        let offset = usize::try_from(page.offset.max(0)).unwrap_or(usize::MAX);
        let limit = page
            .limit
            .map(|l| usize::try_from(l.max(0)).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(owned
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|s| s.row.clone())
            .collect())
    }

    async fn get_student(&self, who: &Requester, id: Uuid) -> StoreResult<Student> {
        let t = self.tables.read().await;
        match t.students.get(&id) {
            Some(s) if s.row.user_id == who.user_id() => Ok(s.row.clone()),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn insert_student(&self, who: &Requester, new: NewStudent) -> StoreResult<Student> {
        if new.user_id != who.user_id() {
            return Err(StoreError::OwnerMismatch);
        }
        let mut t = self.tables.write().await;
        if !t.profiles.contains_key(&new.user_id) {
            return Err(StoreError::NotFound);
        }
        t.check_student(new.id, &new.fields)?;

        let now = OffsetDateTime::now_utc();
        let row = Student {
            id: new.id,
            name: new.fields.name,
            email: new.fields.email,
            matricula: new.fields.matricula,
            idade: new.fields.idade,
            user_id: new.user_id,
            created_at: now,
            updated_at: now,
        };
        let seq = t.next_seq;
        t.next_seq += 1;
        t.students.insert(row.id, StoredStudent { seq, row: row.clone() });
        Ok(row)
    }

    async fn update_student(
        &self,
        who: &Requester,
        id: Uuid,
        fields: StudentFields,
    ) -> StoreResult<Student> {
        let mut t = self.tables.write().await;
        t.owned_student_mut(who.user_id(), id)?;
        t.check_student(id, &fields)?;

        let row = t.owned_student_mut(who.user_id(), id)?;
        row.name = fields.name;
        row.email = fields.email;
        row.matricula = fields.matricula;
        row.idade = fields.idade;
        row.updated_at = touch(row.updated_at);
        Ok(row.clone())
    }

    async fn delete_student(&self, who: &Requester, id: Uuid) -> StoreResult<()> {
        let mut t = self.tables.write().await;
        t.owned_student_mut(who.user_id(), id)?;
        t.students.remove(&id);
        Ok(())
    }
}
