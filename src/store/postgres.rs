use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{Page, Requester, Store, StoreError, StoreResult};
use crate::auth::repo_types::{Identity, NewIdentity, Session};
use crate::profiles::{self, repo_types::{Profile, ProfileChanges}};
use crate::students::{self, repo_types::{NewStudent, Student, StudentFields}};

/// Postgres-backed store. Ownership is enforced twice: explicit `user_id`
/// predicates in every query, and RLS policies keyed on `app.current_user_id`.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Opens a transaction with the RLS identity bound for its duration.
    async fn begin_as(&self, user_id: Uuid) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SELECT set_config('app.current_user_id', $1, true)")
            .bind(user_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_identity(&self, new: NewIdentity) -> StoreResult<(Identity, Profile)> {
        // The provisioning trigger inserts into profiles under RLS, so bind the new id first.
        let mut tx = self.begin_as(new.id).await?;
        let identity = Identity::insert_tx(&mut tx, &new).await?;
        let profile = profiles::repo::find_owned(&mut tx, identity.id)
            .await?
            .ok_or(StoreError::NotFound)?;
        tx.commit().await?;
        debug!(user_id = %identity.id, "identity and profile created");
        Ok((identity, profile))
    }

    async fn find_identity_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        Ok(Identity::find_by_email(&self.db, email).await?)
    }

    async fn find_identity(&self, id: Uuid) -> StoreResult<Option<Identity>> {
        Ok(Identity::find_by_id(&self.db, id).await?)
    }

    async fn delete_identity(&self, who: &Requester) -> StoreResult<()> {
        match Identity::delete(&self.db, who.user_id()).await? {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> StoreResult<Session> {
        let mut tx = self.db.begin().await?;
        let pruned = Session::prune_expired(&mut tx, user_id).await?;
        let session = Session::create(&mut tx, Uuid::new_v4(), user_id, expires_at).await?;
        tx.commit().await?;
        if pruned > 0 {
            debug!(%user_id, pruned, "expired sessions removed");
        }
        Ok(session)
    }

    async fn find_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(Session::find(&self.db, id).await?)
    }

    async fn revoke_session(&self, id: Uuid) -> StoreResult<bool> {
        Ok(Session::revoke(&self.db, id).await?)
    }

    async fn get_profile(&self, who: &Requester) -> StoreResult<Profile> {
        let mut tx = self.begin_as(who.user_id()).await?;
        let profile = profiles::repo::find_owned(&mut tx, who.user_id()).await?;
        tx.commit().await?;
        profile.ok_or(StoreError::NotFound)
    }

    async fn update_profile(
        &self,
        who: &Requester,
        changes: ProfileChanges,
    ) -> StoreResult<Profile> {
        let mut tx = self.begin_as(who.user_id()).await?;
        let profile = profiles::repo::update_owned(&mut tx, who.user_id(), &changes)
            .await?
            .ok_or(StoreError::NotFound)?;
        tx.commit().await?;
        Ok(profile)
    }

    async fn list_students(&self, who: &Requester, page: Page) -> StoreResult<Vec<Student>> {
        let mut tx = self.begin_as(who.user_id()).await?;
        let rows = students::repo::list_by_owner(&mut tx, who.user_id(), page).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn get_student(&self, who: &Requester, id: Uuid) -> StoreResult<Student> {
        let mut tx = self.begin_as(who.user_id()).await?;
        let row = students::repo::find_owned(&mut tx, who.user_id(), id).await?;
        tx.commit().await?;
        row.ok_or(StoreError::NotFound)
    }

    async fn insert_student(&self, who: &Requester, new: NewStudent) -> StoreResult<Student> {
        if new.user_id != who.user_id() {
            return Err(StoreError::OwnerMismatch);
        }
        let mut tx = self.begin_as(who.user_id()).await?;
        let row = students::repo::insert_tx(&mut tx, &new).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn update_student(
        &self,
        who: &Requester,
        id: Uuid,
        fields: StudentFields,
    ) -> StoreResult<Student> {
        let mut tx = self.begin_as(who.user_id()).await?;
        let row = students::repo::update_owned(&mut tx, who.user_id(), id, &fields)
            .await?
            .ok_or(StoreError::NotFound)?;
        tx.commit().await?;
        Ok(row)
    }

    async fn delete_student(&self, who: &Requester, id: Uuid) -> StoreResult<()> {
        let mut tx = self.begin_as(who.user_id()).await?;
        let deleted = students::repo::delete_owned(&mut tx, who.user_id(), id).await?;
        tx.commit().await?;
        match deleted {
            0 => Err(StoreError::NotFound),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::store::UniqueField;

    async fn signup(store: &PgStore, email: &str, name: Option<&str>) -> Requester {
        let metadata = match name {
            Some(n) => json!({ "name": n }),
            None => json!({}),
        };
        let (identity, _) = store
            .create_identity(NewIdentity {
                id: Uuid::new_v4(),
                email: email.into(),
                password_hash: "hash".into(),
                metadata,
            })
            .await
            .expect("signup");
        Requester::new(identity.id, Uuid::new_v4())
    }

    fn fields(email: &str, matricula: &str, idade: i32) -> StudentFields {
        StudentFields {
            name: "Ana Silva".into(),
            email: email.into(),
            matricula: matricula.into(),
            idade,
        }
    }

    fn new_student(owner: Uuid, f: StudentFields) -> NewStudent {
        NewStudent {
            id: Uuid::new_v4(),
            user_id: owner,
            fields: f,
        }
    }

    /// Superusers bypass RLS, so policy checks run under a plain role.
    async fn as_plain_role(tx: &mut Transaction<'_, Postgres>) {
        let is_super: bool =
            sqlx::query_scalar("SELECT rolsuper FROM pg_roles WHERE rolname = current_user")
                .fetch_one(&mut **tx)
                .await
                .unwrap();
        if !is_super {
            return;
        }
        sqlx::query(
            r#"
            DO $$
            BEGIN
                CREATE ROLE alunos_app NOLOGIN;
            EXCEPTION WHEN duplicate_object OR unique_violation THEN NULL;
            END
            $$
            "#,
        )
        .execute(&mut **tx)
        .await
        .unwrap();
        for stmt in [
            "GRANT USAGE ON SCHEMA public TO alunos_app",
            "GRANT SELECT, INSERT, UPDATE, DELETE ON alunos, profiles TO alunos_app",
            "SET LOCAL ROLE alunos_app",
        ] {
            sqlx::query(stmt).execute(&mut **tx).await.unwrap();
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn signup_provisions_exactly_one_profile(pool: PgPool) {
        let store = PgStore::new(pool);
        let who = signup(&store, "prof@x.com", Some("Prof. Maria")).await;

        let profile = store.get_profile(&who).await.unwrap();
        assert_eq!(profile.id, who.user_id());
        assert_eq!(profile.name, "Prof. Maria");
        assert_eq!(profile.email, "prof@x.com");

        let mut tx = store.begin_as(who.user_id()).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM profiles WHERE id = $1")
            .bind(who.user_id())
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn failed_provisioning_rolls_back_the_identity(pool: PgPool) {
        let store = PgStore::new(pool);
        let first = signup(&store, "first@x.com", None).await;
        store
            .update_profile(
                &first,
                ProfileChanges {
                    name: None,
                    email: Some("taken@x.com".into()),
                },
            )
            .await
            .unwrap();

        let err = store
            .create_identity(NewIdentity {
                id: Uuid::new_v4(),
                email: "taken@x.com".into(),
                password_hash: "hash".into(),
                metadata: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::ProfileEmail)));
        assert!(store.find_identity_by_email("taken@x.com").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn owners_never_see_each_others_rows(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let b = signup(&store, "b@x.com", None).await;
        store
            .insert_student(&a, new_student(a.user_id(), fields("s1@x.com", "A01", 20)))
            .await
            .unwrap();
        let theirs = store
            .insert_student(&b, new_student(b.user_id(), fields("s2@x.com", "B01", 30)))
            .await
            .unwrap();

        let listed = store.list_students(&a, Page::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed.iter().all(|s| s.user_id == a.user_id()));

        assert!(matches!(store.get_student(&a, theirs.id).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.update_student(&a, theirs.id, fields("s9@x.com", "Z99", 40)).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(store.delete_student(&a, theirs.id).await, Err(StoreError::NotFound)));
        assert_eq!(store.get_student(&b, theirs.id).await.unwrap().idade, 30);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn row_policies_filter_without_explicit_predicates(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let b = signup(&store, "b@x.com", None).await;
        store
            .insert_student(&a, new_student(a.user_id(), fields("s1@x.com", "A01", 20)))
            .await
            .unwrap();
        store
            .insert_student(&b, new_student(b.user_id(), fields("s2@x.com", "B01", 30)))
            .await
            .unwrap();

        let mut tx = store.begin_as(a.user_id()).await.unwrap();
        as_plain_role(&mut tx).await;
        let visible: i64 = sqlx::query_scalar("SELECT count(*) FROM alunos")
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(visible, 1);
        let profiles: i64 = sqlx::query_scalar("SELECT count(*) FROM profiles")
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(profiles, 1);

        let updated = sqlx::query("UPDATE alunos SET idade = 99 WHERE user_id = $1")
            .bind(b.user_id())
            .execute(&mut *tx)
            .await
            .unwrap();
        assert_eq!(updated.rows_affected(), 0);
        let deleted = sqlx::query("DELETE FROM alunos WHERE user_id = $1")
            .bind(b.user_id())
            .execute(&mut *tx)
            .await
            .unwrap();
        assert_eq!(deleted.rows_affected(), 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn row_policies_reject_foreign_owner(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let b = signup(&store, "b@x.com", None).await;

        assert!(matches!(
            store
                .insert_student(&a, new_student(b.user_id(), fields("s@x.com", "M001", 20)))
                .await,
            Err(StoreError::OwnerMismatch)
        ));

        let mut tx = store.begin_as(a.user_id()).await.unwrap();
        as_plain_role(&mut tx).await;
        let new = new_student(b.user_id(), fields("s@x.com", "M001", 20));
        let err = students::repo::insert_tx(&mut tx, &new).await.unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::OwnerMismatch));
        drop(tx);

        assert!(store.list_students(&b, Page::default()).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn duplicates_fail_and_leave_table_unchanged(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let b = signup(&store, "b@x.com", None).await;
        store
            .insert_student(&a, new_student(a.user_id(), fields("ana@x.com", "M001", 20)))
            .await
            .unwrap();

        let err = store
            .insert_student(&b, new_student(b.user_id(), fields("ana@x.com", "M002", 20)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::StudentEmail)));

        let err = store
            .insert_student(&a, new_student(a.user_id(), fields("other@x.com", "M001", 20)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(UniqueField::StudentMatricula)));

        assert_eq!(store.list_students(&a, Page::default()).await.unwrap().len(), 1);
        assert!(store.list_students(&b, Page::default()).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn idade_must_be_between_1_and_150(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;

        for (i, bad) in [0, -3, 151].into_iter().enumerate() {
            let err = store
                .insert_student(
                    &a,
                    new_student(a.user_id(), fields(&format!("bad{i}@x.com"), &format!("B{i:03}"), bad)),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Check(ref c) if c == "alunos_idade_check"));
        }
        for (i, good) in [1, 150].into_iter().enumerate() {
            store
                .insert_student(
                    &a,
                    new_student(a.user_id(), fields(&format!("ok{i}@x.com"), &format!("G{i:03}"), good)),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.list_students(&a, Page::default()).await.unwrap().len(), 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn updates_advance_updated_at_and_pin_created_at(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let created = store
            .insert_student(&a, new_student(a.user_id(), fields("ana@x.com", "M001", 20)))
            .await
            .unwrap();
        assert_eq!(created.created_at, created.updated_at);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let updated = store
            .update_student(&a, created.id, fields("ana@x.com", "M001", 21))
            .await
            .unwrap();
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at > created.updated_at);

        // Client-supplied timestamps are overridden by the trigger.
        let mut tx = store.begin_as(a.user_id()).await.unwrap();
        sqlx::query(
            "UPDATE alunos SET created_at = '2000-01-01', updated_at = '2000-01-01' WHERE id = $1",
        )
        .bind(created.id)
        .execute(&mut *tx)
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let after = store.get_student(&a, created.id).await.unwrap();
        assert_eq!(after.created_at, created.created_at);
        assert!(after.updated_at >= updated.updated_at);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn deleting_identity_cascades(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let session = store
            .create_session(a.user_id(), OffsetDateTime::now_utc() + time::Duration::hours(1))
            .await
            .unwrap();
        store
            .insert_student(&a, new_student(a.user_id(), fields("ana@x.com", "M001", 20)))
            .await
            .unwrap();

        store.delete_identity(&a).await.unwrap();
        assert!(matches!(store.get_profile(&a).await, Err(StoreError::NotFound)));
        assert!(store.list_students(&a, Page::default()).await.unwrap().is_empty());
        assert!(store.find_session(session.id).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn new_session_prunes_expired_ones(pool: PgPool) {
        let store = PgStore::new(pool);
        let a = signup(&store, "a@x.com", None).await;
        let past = OffsetDateTime::now_utc() - time::Duration::minutes(1);
        let future = OffsetDateTime::now_utc() + time::Duration::hours(1);

        let stale = store.create_session(a.user_id(), past).await.unwrap();
        let live = store.create_session(a.user_id(), future).await.unwrap();
        assert!(store.find_session(stale.id).await.unwrap().is_none());
        assert!(store.find_session(live.id).await.unwrap().is_some());
    }
}
