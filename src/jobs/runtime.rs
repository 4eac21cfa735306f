//! Execution of a single handler with failure isolation.
//!
//! Every handler runs on its own tokio task inside a tracing span and the
//! handler scope, so errors and panics stay local to one job. `clean()` and
//! the scratch workspace purge run on every exit path.

use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use metrics::counter;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::AppConfig;
use crate::telemetry::with_handler_scope;

use super::{JobHandler, TaskResult};

/// Scratch directory shared by handlers that need a checkout.
///
/// Only purged when running in a managed environment (the marker variable
/// is set); on a developer machine the directory is left alone.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    managed: bool,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, managed: bool) -> Self {
        Self {
            root: root.into(),
            managed,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let managed = std::env::var_os(&config.workspace_env_marker).is_some();
        Self::new(config.command_handler_work_dir.clone(), managed)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Removes everything inside the workspace, keeping the directory itself.
    pub fn purge(&self) {
        if !self.managed {
            return;
        }
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.root.display(), "Workspace does not exist");
                return;
            }
            Err(err) => {
                warn!(path = %self.root.display(), error = %err, "Failed to read workspace");
                return;
            }
        };

        debug!(path = %self.root.display(), "Purging workspace");
        for entry in entries.flatten() {
            let path = entry.path();
            let removed = match entry.file_type() {
                Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path),
                _ => fs::remove_file(&path),
            };
            if let Err(err) = removed {
                warn!(path = %path.display(), error = %err, "Failed to remove workspace entry");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct HandlerRuntime {
    workspace: Workspace,
}

impl HandlerRuntime {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Runs the handler and cleans up after it; never fails.
    pub async fn run_n_clean(&self, handler: Box<dyn JobHandler>, job_key: &str) -> TaskResult {
        let kind = handler.kind();
        let mut scope = handler.tag_info();
        scope.job_key = Some(job_key.to_string());

        let span = info_span!(
            "handler",
            handler = %kind,
            job_key = %job_key,
            repository = scope.repository.as_deref().unwrap_or_default(),
            namespace = scope.namespace.as_deref().unwrap_or_default(),
        );

        self.workspace.purge();
        let _workspace = scopeguard::guard(&self.workspace, |workspace| workspace.purge());

        let task = tokio::spawn(
            with_handler_scope(scope, async move {
                let mut handler = scopeguard::guard(handler, |mut handler| handler.clean());
                handler.run().await
            })
            .instrument(span.clone()),
        );

        let result = match task.await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                span.in_scope(|| error!(error = %err, "Handler failed"));
                TaskResult::failure(err.to_string())
            }
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic().as_ref());
                span.in_scope(|| error!(panic = %message, "Handler panicked"));
                TaskResult::failure(format!("Handler panicked: {message}"))
            }
            Err(join_err) => {
                span.in_scope(|| error!(error = %join_err, "Handler task was cancelled"));
                TaskResult::failure(join_err.to_string())
            }
        };

        let outcome = if result.success { "success" } else { "failure" };
        counter!("jobs_executed_total", "handler" => kind.as_str(), "outcome" => outcome)
            .increment(1);
        span.in_scope(|| info!(success = result.success, msg = %result.msg(), "Handler finished"));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{HandlerError, HandlerKind};
    use crate::telemetry::{HandlerScope, current_handler_tags};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
    }

    struct ProbeHandler {
        behaviour: Behaviour,
        cleaned: Arc<AtomicBool>,
    }

    #[async_trait]
    impl JobHandler for ProbeHandler {
        fn kind(&self) -> HandlerKind {
            HandlerKind::CoprBuildEnd
        }

        fn tag_info(&self) -> HandlerScope {
            HandlerScope {
                handler: "copr_build_end".into(),
                repository: Some("hello".into()),
                namespace: Some("packit".into()),
                job_key: None,
            }
        }

        async fn run(&mut self) -> Result<TaskResult, HandlerError> {
            match self.behaviour {
                Behaviour::Succeed => {
                    let tags = current_handler_tags().expect("scope is set");
                    Ok(TaskResult::success("done").with_detail(
                        "job_key",
                        tags.job_key.unwrap_or_default(),
                    ))
                }
                Behaviour::Fail => Err(HandlerError::Config("no copr owner".into())),
                Behaviour::Panic => panic!("boom"),
            }
        }

        fn clean(&mut self) {
            self.cleaned.store(true, Ordering::SeqCst);
        }
    }

    fn scripted_handler(behaviour: Behaviour) -> (Box<dyn JobHandler>, Arc<AtomicBool>) {
        let cleaned = Arc::new(AtomicBool::new(false));
        let handler = ProbeHandler {
            behaviour,
            cleaned: cleaned.clone(),
        };
        (Box::new(handler), cleaned)
    }

    fn runtime() -> HandlerRuntime {
        HandlerRuntime::new(Workspace::new("/nonexistent/sandcastle", false))
    }

    #[tokio::test]
    async fn success_carries_the_job_key_scope() {
        let (handler, cleaned) = scripted_handler(Behaviour::Succeed);
        let result = runtime().run_n_clean(handler, "copr_build-1").await;
        assert!(result.success);
        assert_eq!(result.details.extra["job_key"], "copr_build-1");
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn error_becomes_failed_result() {
        let (handler, cleaned) = scripted_handler(Behaviour::Fail);
        let result = runtime().run_n_clean(handler, "copr_build-2").await;
        assert!(!result.success);
        assert!(result.msg().contains("no copr owner"));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panic_becomes_failed_result_and_still_cleans() {
        let (handler, cleaned) = scripted_handler(Behaviour::Panic);
        let result = runtime().run_n_clean(handler, "copr_build-3").await;
        assert!(!result.success);
        assert!(result.msg().contains("boom"));
        assert!(cleaned.load(Ordering::SeqCst));
    }

    #[test]
    fn purge_keeps_directory_and_removes_contents() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("checkout")).unwrap();
        fs::write(dir.path().join("checkout/hello.spec"), "Name: hello").unwrap();
        fs::write(dir.path().join("build.log"), "ok").unwrap();

        Workspace::new(dir.path(), true).purge();

        assert!(dir.path().exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn purge_is_a_no_op_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("build.log"), "ok").unwrap();

        Workspace::new(dir.path(), false).purge();

        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn purge_tolerates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        Workspace::new(dir.path().join("missing"), true).purge();
    }
}
