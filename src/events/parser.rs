//! Webhook and message-bus payload parsing.
//!
//! Each parser returns `None` for payloads the service does not act on;
//! those are answered as ignored by the intake layer.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::{
    BuildEvent, CommentCommand, Event, InstallationEvent, ProjectRef, PullRequestAction,
    TestCaseResult, TestResult, TestResultEvent,
};
use crate::backends::{COPR_BACKEND, KOJI_BACKEND};
use crate::forge::ForgeKind;

static COMMAND_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Finds the first `/packit <command>` line in a comment.
pub fn parse_comment_command(comment: &str) -> Option<CommentCommand> {
    let re = COMMAND_RE
        .get_or_init(|| Regex::new(r"(?m)^\s*/packit\s+([\w-]+)").ok())
        .as_ref()?;
    let captures = re.captures(comment)?;
    match captures.get(1)?.as_str() {
        "build" | "copr-build" => Some(CommentCommand::Build),
        "test" => Some(CommentCommand::Test),
        other => {
            debug!(command = other, "Unrecognized comment command");
            None
        }
    }
}

fn str_at<'a>(payload: &'a Value, pointer: &str) -> Option<&'a str> {
    payload.pointer(pointer).and_then(Value::as_str)
}

fn u64_at(payload: &Value, pointer: &str) -> Option<u64> {
    payload.pointer(pointer).and_then(Value::as_u64)
}

/// Copr sends build ids as numbers, other producers as strings.
fn id_at(payload: &Value, pointer: &str) -> Option<String> {
    match payload.pointer(pointer)? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn split_full_name(full_name: &str) -> Option<(String, String)> {
    let (namespace, repo) = full_name.rsplit_once('/')?;
    Some((namespace.to_string(), repo.to_string()))
}

fn github_project(payload: &Value) -> Option<ProjectRef> {
    let project_url = str_at(payload, "/repository/html_url")?;
    let (namespace, repo) = split_full_name(str_at(payload, "/repository/full_name")?)?;
    Some(ProjectRef {
        forge: ForgeKind::Github,
        namespace,
        repo,
        project_url: project_url.to_string(),
    })
}

/// Parses a GitHub webhook given its `X-GitHub-Event` name.
pub fn parse_github(event_type: &str, payload: &Value) -> Option<Event> {
    match event_type {
        "pull_request" => {
            let action = match str_at(payload, "/action")? {
                "opened" => PullRequestAction::Opened,
                "reopened" => PullRequestAction::Reopened,
                "synchronize" => PullRequestAction::Synchronize,
                other => {
                    debug!(action = other, "Ignoring pull_request action");
                    return None;
                }
            };
            Some(Event::PullRequest {
                project: github_project(payload)?,
                pr_id: u64_at(payload, "/number")?,
                action,
                commit_sha: str_at(payload, "/pull_request/head/sha")?.to_string(),
                user_login: str_at(payload, "/pull_request/user/login")?.to_string(),
            })
        }
        "push" => {
            if payload.pointer("/deleted").and_then(Value::as_bool) == Some(true) {
                debug!("Ignoring branch deletion push");
                return None;
            }
            let raw_ref = str_at(payload, "/ref")?;
            let git_ref = raw_ref.strip_prefix("refs/heads/")?;
            let commit_sha = str_at(payload, "/after")
                .or_else(|| str_at(payload, "/head_commit/id"))?;
            Some(Event::Push {
                project: github_project(payload)?,
                git_ref: git_ref.to_string(),
                commit_sha: commit_sha.to_string(),
                user_login: str_at(payload, "/pusher/name").map(str::to_string),
            })
        }
        "installation"
        | "integration_installation"
        | "installation_repositories"
        | "integration_installation_repositories" => {
            match str_at(payload, "/action")? {
                "created" | "added" => {}
                other => {
                    debug!(action = other, "Ignoring installation action");
                    return None;
                }
            }
            let repositories = payload
                .pointer("/repositories")
                .or_else(|| payload.pointer("/repositories_added"))
                .and_then(Value::as_array)
                .map(|repos| {
                    repos
                        .iter()
                        .filter_map(|repo| str_at(repo, "/full_name").map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(Event::Installation(InstallationEvent {
                installation_id: u64_at(payload, "/installation/id")?,
                account_login: str_at(payload, "/installation/account/login")?.to_string(),
                account_type: str_at(payload, "/installation/account/type")?.to_string(),
                sender_login: str_at(payload, "/sender/login")?.to_string(),
                repositories,
            }))
        }
        "release" => {
            if str_at(payload, "/action")? != "published" {
                return None;
            }
            Some(Event::Release {
                project: github_project(payload)?,
                tag_name: str_at(payload, "/release/tag_name")?.to_string(),
                commit_sha: None,
            })
        }
        "issue_comment" => {
            if str_at(payload, "/action")? != "created" {
                return None;
            }
            let project = github_project(payload)?;
            let number = u64_at(payload, "/issue/number")?;
            let comment = str_at(payload, "/comment/body")?.to_string();
            let user_login = str_at(payload, "/comment/user/login")?.to_string();
            if payload.pointer("/issue/pull_request").is_some() {
                Some(Event::PrComment {
                    project,
                    pr_id: number,
                    command: parse_comment_command(&comment),
                    comment,
                    user_login,
                    commit_sha: None,
                })
            } else {
                Some(Event::IssueComment {
                    project,
                    issue_id: number,
                    comment,
                    user_login,
                })
            }
        }
        other => {
            debug!(event_type = other, "Ignoring GitHub event type");
            None
        }
    }
}

fn gitlab_project(payload: &Value) -> Option<ProjectRef> {
    let project_url = str_at(payload, "/project/web_url")?;
    let (namespace, repo) = split_full_name(str_at(payload, "/project/path_with_namespace")?)?;
    Some(ProjectRef {
        forge: ForgeKind::Gitlab,
        namespace,
        repo,
        project_url: project_url.to_string(),
    })
}

/// Parses a GitLab webhook; the kind is taken from `object_kind`.
pub fn parse_gitlab(payload: &Value) -> Option<Event> {
    match str_at(payload, "/object_kind")? {
        "merge_request" => {
            if str_at(payload, "/object_attributes/state")? != "opened" {
                return None;
            }
            let action = match str_at(payload, "/object_attributes/action")? {
                "open" => PullRequestAction::Opened,
                "reopen" => PullRequestAction::Reopened,
                // Only updates that push new commits carry `oldrev`.
                "update" if payload.pointer("/object_attributes/oldrev").is_some() => {
                    PullRequestAction::Synchronize
                }
                _ => return None,
            };
            Some(Event::PullRequest {
                project: gitlab_project(payload)?,
                pr_id: u64_at(payload, "/object_attributes/iid")?,
                action,
                commit_sha: str_at(payload, "/object_attributes/last_commit/id")?.to_string(),
                user_login: str_at(payload, "/user/username")?.to_string(),
            })
        }
        "push" => {
            let git_ref = str_at(payload, "/ref")?.strip_prefix("refs/heads/")?;
            // checkout_sha is null when the branch was deleted
            let commit_sha = str_at(payload, "/checkout_sha")?;
            Some(Event::Push {
                project: gitlab_project(payload)?,
                git_ref: git_ref.to_string(),
                commit_sha: commit_sha.to_string(),
                user_login: str_at(payload, "/user_username").map(str::to_string),
            })
        }
        "note" => {
            let project = gitlab_project(payload)?;
            let comment = str_at(payload, "/object_attributes/note")?.to_string();
            let user_login = str_at(payload, "/user/username")?.to_string();
            match str_at(payload, "/object_attributes/noteable_type")? {
                "MergeRequest" => Some(Event::PrComment {
                    project,
                    pr_id: u64_at(payload, "/merge_request/iid")?,
                    command: parse_comment_command(&comment),
                    comment,
                    user_login,
                    commit_sha: str_at(payload, "/merge_request/last_commit/id")
                        .map(str::to_string),
                }),
                "Issue" => Some(Event::IssueComment {
                    project,
                    issue_id: u64_at(payload, "/issue/iid")?,
                    comment,
                    user_login,
                }),
                _ => None,
            }
        }
        other => {
            debug!(object_kind = other, "Ignoring GitLab event");
            None
        }
    }
}

fn pagure_project(source: &str, project: &Value) -> Option<ProjectRef> {
    let url_path = str_at(project, "/url_path")?;
    Some(ProjectRef {
        forge: ForgeKind::Pagure,
        namespace: str_at(project, "/namespace").unwrap_or_default().to_string(),
        repo: str_at(project, "/name")?.to_string(),
        project_url: format!("https://{}/{}", source, url_path),
    })
}

fn parse_copr(topic: &str, payload: &Value) -> Option<Event> {
    let build = BuildEvent {
        backend: COPR_BACKEND.to_string(),
        build_id: id_at(payload, "/build")?,
        target: str_at(payload, "/chroot")?.to_string(),
        status: payload.pointer("/status").and_then(Value::as_i64),
        owner: str_at(payload, "/owner")?.to_string(),
        project_name: str_at(payload, "/copr")?.to_string(),
        pkg: str_at(payload, "/pkg").map(str::to_string),
        timestamp: payload.pointer("/timestamp").and_then(Value::as_f64),
        rpm_build_task_id: None,
    };
    if topic.ends_with("copr.build.start") {
        Some(Event::BuildStart(build))
    } else {
        Some(Event::BuildEnd(build))
    }
}

/// Koji task state change; only the top-level `build` task is followed.
fn parse_koji(payload: &Value) -> Option<Event> {
    let build_id = id_at(payload, "/id")?;
    if payload.pointer("/info/state").is_none() {
        debug!(build_id = %build_id, "Koji message without task state");
        return None;
    }
    if let Some(method) = str_at(payload, "/method").or_else(|| str_at(payload, "/info/method"))
        && method != "build"
    {
        return None;
    }

    let rpm_build_task_id = payload
        .pointer("/info/children")
        .and_then(Value::as_array)
        .and_then(|children| {
            children
                .iter()
                .find(|child| str_at(child, "/method") == Some("buildArch"))
        })
        .and_then(|child| u64_at(child, "/id"));
    let build = |status: i64| BuildEvent {
        backend: KOJI_BACKEND.to_string(),
        build_id: build_id.clone(),
        target: str_at(payload, "/info/request/1")
            .unwrap_or_default()
            .to_string(),
        status: Some(status),
        owner: str_at(payload, "/owner").unwrap_or_default().to_string(),
        project_name: String::new(),
        pkg: None,
        timestamp: None,
        rpm_build_task_id,
    };

    match str_at(payload, "/new")? {
        "OPEN" => Some(Event::BuildStart(build(1))),
        "CLOSED" => Some(Event::BuildEnd(build(2))),
        "CANCELED" => Some(Event::BuildEnd(build(3))),
        "FAILED" => Some(Event::BuildEnd(build(5))),
        other => {
            debug!(state = other, "Ignoring Koji task state");
            None
        }
    }
}

fn parse_pagure(source: &str, git_topic: &str, payload: &Value) -> Option<Event> {
    match git_topic {
        "pull-request.new" | "pull-request.reopened" | "pull-request.updated" => {
            let pr = payload.pointer("/pullrequest")?;
            let action = match git_topic {
                "pull-request.new" => PullRequestAction::Opened,
                "pull-request.reopened" => PullRequestAction::Reopened,
                _ => PullRequestAction::Synchronize,
            };
            Some(Event::PullRequest {
                project: pagure_project(source, pr.pointer("/project")?)?,
                pr_id: u64_at(pr, "/id")?,
                action,
                commit_sha: str_at(pr, "/commit_stop")?.to_string(),
                user_login: str_at(pr, "/user/name")?.to_string(),
            })
        }
        "pull-request.comment.added" | "pull-request.comment.edited" => {
            let pr = payload.pointer("/pullrequest")?;
            let comment_text = if git_topic.ends_with("edited") {
                str_at(payload, "/comment/comment")?
            } else {
                pr.pointer("/comments")?
                    .as_array()?
                    .last()?
                    .pointer("/comment")?
                    .as_str()?
            };
            let comment = comment_text.to_string();
            Some(Event::PrComment {
                project: pagure_project(source, pr.pointer("/project")?)?,
                pr_id: u64_at(pr, "/id")?,
                command: parse_comment_command(&comment),
                comment,
                user_login: str_at(payload, "/agent")?.to_string(),
                commit_sha: str_at(pr, "/commit_stop").map(str::to_string),
            })
        }
        "pull-request.tag.added" => {
            let pr = payload
                .pointer("/pull_request")
                .or_else(|| payload.pointer("/pullrequest"))?;
            let labels = payload
                .pointer("/tags")?
                .as_array()?
                .iter()
                .filter_map(|t| t.as_str().map(str::to_string))
                .collect();
            Some(Event::PrLabel {
                project: pagure_project(source, pr.pointer("/project")?)?,
                pr_id: u64_at(pr, "/id")?,
                labels,
                commit_sha: str_at(pr, "/commit_stop").map(str::to_string),
            })
        }
        other => {
            debug!(topic = other, "Ignoring Pagure topic");
            None
        }
    }
}

/// Parses a message relayed from the Fedora message bus.
pub fn parse_fedmsg(payload: &Value) -> Option<Event> {
    let topic = str_at(payload, "/topic")?;
    if topic.ends_with("copr.build.start") || topic.ends_with("copr.build.end") {
        return parse_copr(topic, payload);
    }
    if topic.ends_with("buildsys.task.state.change") {
        return parse_koji(payload);
    }
    // e.g. "git.stg.centos.org/pull-request.tag.added"
    let (source, git_topic) = topic.split_once('/')?;
    parse_pagure(source, git_topic, payload)
}

/// Parses the Testing Farm result notification.
pub fn parse_testing_farm_results(payload: &Value) -> Option<Event> {
    let pipeline_id = str_at(payload, "/pipeline/id")?.to_string();
    let result: TestResult =
        serde_json::from_value(payload.pointer("/result")?.clone()).unwrap_or(TestResult::Unknown);
    let tests = payload
        .pointer("/tests")
        .and_then(Value::as_array)
        .map(|tests| {
            tests
                .iter()
                .filter_map(|raw| {
                    Some(TestCaseResult {
                        name: str_at(raw, "/name")?.to_string(),
                        result: serde_json::from_value(raw.pointer("/result")?.clone())
                            .unwrap_or(TestResult::Unknown),
                        log_url: str_at(raw, "/log").map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Event::TestResult(TestResultEvent {
        pipeline_id,
        result,
        log_url: str_at(payload, "/url").map(str::to_string),
        message: str_at(payload, "/message").map(str::to_string),
        target: str_at(payload, "/artifact/copr-chroot").map(str::to_string),
        commit_sha: str_at(payload, "/artifact/commit-sha").map(str::to_string),
        project_url: str_at(payload, "/artifact/git-url").map(str::to_string),
        tests,
    }))
}
