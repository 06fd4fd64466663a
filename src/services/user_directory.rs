//! services/user_directory.rs
//! Sender identity lookups.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};

use crate::models::user_model::UserRecord;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>>;
}

#[derive(Clone, Debug)]
pub struct SqliteUserDirectory {
    db_pool: Pool<Sqlite>,
}

impl SqliteUserDirectory {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SqliteUserDirectory { db_pool }
    }

    /// Accounts are provisioned by the auth service; this is for fixtures.
    #[cfg(test)]
    pub async fn insert_user(
        &self,
        email: &str,
        delegation_credential: Option<&str>,
    ) -> Result<UserRecord> {
        use crate::services::message_store::format_ts;

        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO users (id, email, google_refresh_token, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&id)
        .bind(email)
        .bind(delegation_credential)
        .bind(format_ts(chrono::Utc::now()))
        .execute(&self.db_pool)
        .await
        .context("Failed to insert user")?;

        Ok(UserRecord {
            id,
            email: email.to_string(),
            delegation_credential: delegation_credential.map(str::to_string),
        })
    }
}

#[async_trait]
impl UserDirectory for SqliteUserDirectory {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        let row = sqlx::query("SELECT id, email, google_refresh_token FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db_pool)
            .await
            .context("Failed to load user")?;

        row.map(|r| -> Result<UserRecord> {
            Ok(UserRecord {
                id: r.try_get("id")?,
                email: r.try_get("email")?,
                delegation_credential: r.try_get("google_refresh_token")?,
            })
        })
        .transpose()
    }
}
