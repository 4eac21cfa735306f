//! Status reporting back to forges.
//!
//! The reporter picks the richest primitive the project offers: commit
//! statuses (or commit flags), PR flags on the head commit, and comments as
//! the last resort. Reporting never fails the caller; errors are logged.

use std::sync::Arc;

use metrics::counter;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::forge::{CommentTarget, CommitState, ForgeError, ForgeProject};

/// First line of the comment posted after the first successful build on a PR.
pub const CONGRATULATION_MARKER: &str =
    "Congratulations! One of the builds has completed. :champagne:";

const MAX_URL_LEN: usize = 2048;

/// Stable flag identifier derived from the check name; at most 32 characters.
pub fn dedup_id(check_name: &str) -> String {
    let digest = Sha256::digest(check_name.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(32);
    id
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(limit.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Formats a status comment with one table line per check.
pub fn status_comment_body(state: CommitState, url: &str, check_names: &[String]) -> String {
    check_names
        .iter()
        .map(|check| format!("| [{}]({}) | {} |", check, url, state.upper()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn record(capability: &'static str, outcome: &'static str) {
    counter!("status_reports_total", "capability" => capability, "outcome" => outcome)
        .increment(1);
}

pub struct StatusReporter {
    project: Arc<dyn ForgeProject>,
    commit_sha: String,
    pr_id: Option<u64>,
    fallback_url: String,
}

impl StatusReporter {
    pub fn new(
        project: Arc<dyn ForgeProject>,
        commit_sha: impl Into<String>,
        pr_id: Option<u64>,
        fallback_url: impl Into<String>,
    ) -> Self {
        let commit_sha = commit_sha.into();
        debug!(
            project = %project.project_url(),
            commit_sha = %commit_sha,
            pr_id = ?pr_id,
            "Status reporter created"
        );
        Self {
            project,
            commit_sha,
            pr_id,
            fallback_url: fallback_url.into(),
        }
    }

    pub fn project(&self) -> &Arc<dyn ForgeProject> {
        &self.project
    }

    pub fn commit_sha(&self) -> &str {
        &self.commit_sha
    }

    pub fn pr_id(&self) -> Option<u64> {
        self.pr_id
    }

    /// Reports `state` for every check name.
    pub async fn report(
        &self,
        state: CommitState,
        description: &str,
        url: &str,
        check_names: &[String],
    ) {
        if check_names.is_empty() {
            warn!("No checks to set status for.");
            return;
        }

        let Some(statuses) = self.project.commit_statuses() else {
            self.report_status_by_comment(state, url, check_names).await;
            return;
        };

        let url = if url.is_empty() && statuses.requires_url() {
            self.fallback_url.as_str()
        } else {
            url
        };
        let url = truncate_chars(url, MAX_URL_LEN);
        let description = truncate_chars(description, statuses.description_limit());

        for check in check_names {
            debug!(check = %check, state = %state, description = %description, "Setting status");
            match statuses
                .set_commit_status(&self.commit_sha, state, &url, &description, check)
                .await
            {
                Ok(()) => record("commit_status", "ok"),
                Err(ForgeError::PermissionDenied(reason)) => {
                    warn!(check = %check, reason = %reason, "Commit status refused, reporting by comment");
                    record("commit_status", "denied");
                    self.report_status_by_comment(state, &url, std::slice::from_ref(check))
                        .await;
                }
                Err(err) => {
                    error!(check = %check, error = %err, "Failed to set commit status");
                    record("commit_status", "error");
                }
            }

            self.set_pull_request_flag(check, &description, &url, state)
                .await;
        }
    }

    /// Flags the PR too, for forges that do not derive PR state from commit flags.
    async fn set_pull_request_flag(
        &self,
        check_name: &str,
        description: &str,
        url: &str,
        state: CommitState,
    ) {
        let Some(pr_id) = self.pr_id else {
            return;
        };
        let Some(flags) = self.project.pr_flags() else {
            return;
        };

        let pr = match self.project.get_pr(pr_id).await {
            Ok(pr) => pr,
            Err(err) => {
                error!(pr_id, error = %err, "Failed to load PR for flagging");
                return;
            }
        };
        if pr.head_commit != self.commit_sha {
            debug!(
                pr_id,
                head = %pr.head_commit,
                commit_sha = %self.commit_sha,
                "Not flagging PR, commit is no longer the head"
            );
            return;
        }

        match flags
            .set_pr_flag(
                pr_id,
                check_name,
                description,
                url,
                state,
                &dedup_id(check_name),
            )
            .await
        {
            Ok(()) => record("pr_flag", "ok"),
            Err(err) => {
                error!(pr_id, check = %check_name, error = %err, "Failed to set PR flag");
                record("pr_flag", "error");
            }
        }
    }

    /// Posts a single comment listing every check and its state.
    pub async fn report_status_by_comment(
        &self,
        state: CommitState,
        url: &str,
        check_names: &[String],
    ) {
        let body = status_comment_body(state, url, check_names);
        self.comment(&body).await;
    }

    /// Comments on the PR when known, otherwise on the commit.
    pub async fn comment(&self, body: &str) {
        let Some(comments) = self.project.comments() else {
            warn!(project = %self.project.project_url(), "Project cannot be commented on");
            record("comment", "unsupported");
            return;
        };
        let target = match self.pr_id {
            Some(pr_id) => CommentTarget::PullRequest(pr_id),
            None => CommentTarget::Commit(self.commit_sha.clone()),
        };
        match comments.post_comment(&target, body).await {
            Ok(()) => record("comment", "ok"),
            Err(err) => {
                error!(target = ?target, error = %err, "Failed to post comment");
                record("comment", "error");
            }
        }
    }

    /// Whether the newest comment by `service_account` is the congratulation.
    pub async fn was_last_comment_congratulation(&self, service_account: &str) -> bool {
        let Some(pr_id) = self.pr_id else {
            return false;
        };
        match self.project.comments_by(pr_id, service_account).await {
            Ok(comments) => comments
                .last()
                .is_some_and(|c| c.body.starts_with(CONGRATULATION_MARKER)),
            Err(err) => {
                warn!(pr_id, error = %err, "Failed to list comments");
                false
            }
        }
    }
}
