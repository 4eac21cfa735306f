//! Approval of forge accounts before their events are acted on.
//!
//! App installations register the installing account as `waiting`; a
//! maintainer approves it later. With approval required, forge events from
//! accounts that are neither approved themselves nor owned by an approved
//! namespace are refused before any job runs.

use std::sync::Arc;

use anyhow::Result;
use sea_orm::DatabaseConnection;
use tracing::info;

use crate::events::InstallationEvent;
use crate::models::allowlist::AllowlistStatus;
use crate::repositories::AllowlistRepository;
use crate::repositories::allowlist::NewAccount;

pub const NOT_ALLOWED_MSG: &str = "Account is not allowlisted!";

/// Outcome of recording an installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The account was approved before this installation
    AlreadyApproved,
    /// The account waits for approval; `new` is true on first sight
    Waiting { new: bool },
}

#[derive(Debug, Clone)]
pub struct Allowlist {
    accounts: AllowlistRepository,
}

impl Allowlist {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            accounts: AllowlistRepository::new(db),
        }
    }

    pub async fn is_approved(&self, account: &str) -> Result<bool> {
        let approved = self
            .accounts
            .find_by_account(account)
            .await?
            .and_then(|record| record.allowlist_status())
            .is_some_and(|status| status.is_approved());
        Ok(approved)
    }

    /// True when either the repository namespace or the acting user is approved.
    pub async fn is_allowed(&self, namespace: &str, user_login: Option<&str>) -> Result<bool> {
        if self.is_approved(namespace).await? {
            return Ok(true);
        }
        match user_login {
            Some(user) => self.is_approved(user).await,
            None => Ok(false),
        }
    }

    /// Marks the account approved, creating it when unknown. Returns false when already approved.
    pub async fn approve(&self, account: &str) -> Result<bool> {
        let new = NewAccount {
            account_name: account.to_string(),
            ..Default::default()
        };
        let (record, created) = self
            .accounts
            .get_or_create(new, AllowlistStatus::ApprovedManually)
            .await?;
        if created {
            info!(account, "Account approved");
            return Ok(true);
        }
        if record.allowlist_status().is_some_and(|s| s.is_approved()) {
            return Ok(false);
        }
        self.accounts
            .set_status(record, AllowlistStatus::ApprovedManually)
            .await?;
        info!(account, "Account approved");
        Ok(true)
    }

    pub async fn register_installation(&self, event: &InstallationEvent) -> Result<Registration> {
        let new = NewAccount {
            account_name: event.account_login.clone(),
            account_type: Some(event.account_type.clone()),
            installation_id: i64::try_from(event.installation_id).ok(),
            sender_login: Some(event.sender_login.clone()),
        };
        let (record, created) = self
            .accounts
            .get_or_create(new, AllowlistStatus::Waiting)
            .await?;
        if record.allowlist_status().is_some_and(|s| s.is_approved()) {
            return Ok(Registration::AlreadyApproved);
        }
        info!(
            account = %event.account_login,
            installation_id = event.installation_id,
            "Account waiting for approval"
        );
        Ok(Registration::Waiting { new: created })
    }
}

pub fn approval_issue_title(event: &InstallationEvent) -> String {
    format!("{} {} needs to be approved.", event.account_type, event.account_login)
}

pub fn approval_issue_body(event: &InstallationEvent) -> String {
    let mut body = format!(
        "{} {} needs to be approved manually!\n\nInstalled by: {}\n",
        event.account_type, event.account_login, event.sender_login
    );
    if !event.repositories.is_empty() {
        body.push_str("\nRepositories:\n");
        for repo in &event.repositories {
            body.push_str(&format!("- {repo}\n"));
        }
    }
    body
}

pub fn not_allowed_comment(user_login: &str, namespace: &str) -> String {
    format!("Neither account {user_login} nor owner {namespace} are on our allowlist!")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installation() -> InstallationEvent {
        InstallationEvent {
            installation_id: 1173510,
            account_login: "packit".into(),
            account_type: "Organization".into(),
            sender_login: "lbarcziova".into(),
            repositories: vec!["packit/hello-world".into()],
        }
    }

    #[test]
    fn issue_names_the_account() {
        let event = installation();
        assert_eq!(
            approval_issue_title(&event),
            "Organization packit needs to be approved."
        );
        let body = approval_issue_body(&event);
        assert!(body.starts_with("Organization packit needs to be approved manually!"));
        assert!(body.contains("- packit/hello-world"));
    }

    #[test]
    fn comment_names_user_and_owner() {
        assert_eq!(
            not_allowed_comment("mallory", "packit"),
            "Neither account mallory nor owner packit are on our allowlist!"
        );
    }
}
