//! Allowlist repository for database operations

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::models::allowlist::{self, AllowlistStatus, Entity as Allowlist};

#[derive(Debug, Clone)]
pub struct AllowlistRepository {
    pub db: Arc<DatabaseConnection>,
}

/// Fields known when an account first shows up
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub account_name: String,
    pub account_type: Option<String>,
    pub installation_id: Option<i64>,
    pub sender_login: Option<String>,
}

impl AllowlistRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_account(&self, account_name: &str) -> Result<Option<allowlist::Model>> {
        let found = Allowlist::find()
            .filter(allowlist::Column::AccountName.eq(account_name))
            .one(&*self.db)
            .await?;
        Ok(found)
    }

    /// Returns the row for the account, inserting it with `status` on first sight.
    ///
    /// The boolean is true when this call created the row.
    pub async fn get_or_create(
        &self,
        account: NewAccount,
        status: AllowlistStatus,
    ) -> Result<(allowlist::Model, bool)> {
        if let Some(existing) = self.find_by_account(&account.account_name).await? {
            return Ok((existing, false));
        }

        let now = Utc::now().fixed_offset();
        let record = allowlist::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_name: Set(account.account_name.clone()),
            account_type: Set(account.account_type),
            status: Set(status.as_str().to_string()),
            installation_id: Set(account.installation_id),
            sender_login: Set(account.sender_login),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match record.insert(&*self.db).await {
            Ok(created) => Ok((created, true)),
            Err(err) if is_unique_violation(&err) => {
                debug!(account = %account.account_name, "Account inserted concurrently, re-reading");
                let existing = self
                    .find_by_account(&account.account_name)
                    .await?
                    .ok_or_else(|| {
                        anyhow::anyhow!("account '{}' vanished after conflict", account.account_name)
                    })?;
                Ok((existing, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn set_status(
        &self,
        record: allowlist::Model,
        status: AllowlistStatus,
    ) -> Result<allowlist::Model> {
        let mut active: allowlist::ActiveModel = record.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(Utc::now().fixed_offset());
        Ok(active.update(&*self.db).await?)
    }
}
