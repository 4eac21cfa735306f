//! Target resolution and status fan-out shared by the build and test handlers.
//!
//! Copr builds and tests report per chroot; Koji production builds report
//! per Koji build target.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::context::ServiceContext;
use crate::forge::{CommitState, ForgeProject};
use crate::package_config::{JobConfig, JobConfigTrigger, JobType, PackageConfig};
use crate::reporting::StatusReporter;

/// Chroot used when a job does not list any targets.
pub const DEFAULT_TARGET: &str = "fedora-stable";

/// Koji build target used when a production build job lists none.
pub const DEFAULT_KOJI_TARGET: &str = "rawhide";

const DEFAULT_ARCH: &str = "x86_64";
const KNOWN_ARCHES: &[&str] = &[
    "x86_64", "aarch64", "i386", "i686", "ppc64le", "s390x", "armhfp", "noarch",
];

/// Appends the default architecture to targets that name none.
pub fn normalize_target(target: &str) -> String {
    let has_arch = target
        .rsplit_once('-')
        .is_some_and(|(_, arch)| KNOWN_ARCHES.contains(&arch));
    if has_arch {
        target.to_string()
    } else {
        format!("{target}-{DEFAULT_ARCH}")
    }
}

/// Koji build target for a chroot: `fedora-34-x86_64` builds in `f34`.
pub fn koji_target(target: &str) -> String {
    let base = match target.rsplit_once('-') {
        Some((base, arch)) if KNOWN_ARCHES.contains(&arch) => base,
        _ => target,
    };
    let numeric = |version: &str| !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit());
    match base.split_once('-') {
        Some(("fedora", "rawhide")) => "rawhide".to_string(),
        Some(("fedora", version)) if numeric(version) => format!("f{version}"),
        Some(("epel", version)) if numeric(version) => format!("epel{version}"),
        _ => base.to_string(),
    }
}

/// Build, test and production build jobs of one package configuration for one trigger.
#[derive(Debug, Clone)]
pub struct JobTargets {
    prefix: &'static str,
    job_build: Option<JobConfig>,
    job_tests: Option<JobConfig>,
    job_production_build: Option<JobConfig>,
}

impl JobTargets {
    /// Picks the first build job and the first tests job whose trigger matches.
    pub fn new(
        package_config: &PackageConfig,
        config_trigger: JobConfigTrigger,
        prefix: &'static str,
    ) -> Self {
        let first = |wanted: fn(JobType) -> bool| {
            package_config
                .jobs
                .iter()
                .find(|job| wanted(job.job_type) && job.trigger == config_trigger)
                .cloned()
        };
        Self {
            prefix,
            job_build: first(|t| t.is_copr_build()),
            job_tests: first(|t| t == JobType::Tests),
            job_production_build: first(|t| t == JobType::ProductionBuild),
        }
    }

    pub fn job_production_build(&self) -> Option<&JobConfig> {
        self.job_production_build.as_ref()
    }

    /// Koji targets of the production build job.
    pub fn koji_targets(&self) -> BTreeSet<String> {
        match &self.job_production_build {
            Some(job) if !job.metadata.targets.is_empty() => {
                job.metadata.targets.iter().map(|t| koji_target(t)).collect()
            }
            Some(_) => BTreeSet::from([DEFAULT_KOJI_TARGET.to_string()]),
            None => BTreeSet::new(),
        }
    }

    pub fn production_check(&self, target: &str) -> String {
        format!("{}/production-build-{}", self.prefix, target)
    }

    pub fn production_check_names(&self) -> Vec<String> {
        self.koji_targets()
            .iter()
            .map(|t| self.production_check(t))
            .collect()
    }

    pub fn job_build(&self) -> Option<&JobConfig> {
        self.job_build.as_ref()
    }

    pub fn job_tests(&self) -> Option<&JobConfig> {
        self.job_tests.as_ref()
    }

    fn configured_build_targets(&self) -> BTreeSet<String> {
        let build_targets = self
            .job_build
            .as_ref()
            .map(|job| &job.metadata.targets)
            .filter(|targets| !targets.is_empty());
        let tests_targets = self
            .job_tests
            .as_ref()
            .map(|job| &job.metadata.targets)
            .filter(|targets| !targets.is_empty());

        match (build_targets, tests_targets) {
            (Some(targets), _) => targets.clone(),
            (None, Some(_)) => self.configured_tests_targets(),
            (None, None) => BTreeSet::from([DEFAULT_TARGET.to_string()]),
        }
    }

    fn configured_tests_targets(&self) -> BTreeSet<String> {
        let Some(tests) = &self.job_tests else {
            return BTreeSet::new();
        };
        if !tests.metadata.targets.is_empty() {
            return tests.metadata.targets.clone();
        }
        if self.job_build.is_some() {
            return self.configured_build_targets();
        }
        BTreeSet::from([DEFAULT_TARGET.to_string()])
    }

    /// Chroots to build in.
    pub fn build_targets(&self) -> BTreeSet<String> {
        self.configured_build_targets()
            .iter()
            .map(|t| normalize_target(t))
            .collect()
    }

    /// Chroots to test in; empty without a tests job.
    pub fn tests_targets(&self) -> BTreeSet<String> {
        self.configured_tests_targets()
            .iter()
            .map(|t| normalize_target(t))
            .collect()
    }

    pub fn build_check(&self, target: &str) -> String {
        format!("{}/rpm-build-{}", self.prefix, target)
    }

    pub fn test_check(&self, target: &str) -> String {
        format!("{}/testing-farm-{}", self.prefix, target)
    }

    pub fn build_check_names(&self) -> Vec<String> {
        self.build_targets()
            .iter()
            .map(|t| self.build_check(t))
            .collect()
    }

    pub fn test_check_names(&self) -> Vec<String> {
        self.tests_targets()
            .iter()
            .map(|t| self.test_check(t))
            .collect()
    }
}

/// Reports build and test states to the checks of the configured jobs.
pub struct CoprBuildJobHelper {
    targets: JobTargets,
    reporter: StatusReporter,
}

impl CoprBuildJobHelper {
    pub fn new(targets: JobTargets, reporter: StatusReporter) -> Self {
        Self { targets, reporter }
    }

    /// Helper reporting on `commit_sha` of `project` with the deployment's check prefix.
    pub fn for_commit(
        ctx: &ServiceContext,
        package_config: &PackageConfig,
        config_trigger: JobConfigTrigger,
        project: Arc<dyn ForgeProject>,
        commit_sha: &str,
        pr_id: Option<u64>,
    ) -> Self {
        let targets = JobTargets::new(
            package_config,
            config_trigger,
            ctx.config.deployment.check_prefix(),
        );
        Self::new(targets, ctx.reporter(project, commit_sha, pr_id))
    }

    pub fn targets(&self) -> &JobTargets {
        &self.targets
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub async fn report_status_to_all(&self, state: CommitState, description: &str, url: &str) {
        self.report_status_to_build(state, description, url).await;
        self.report_status_to_tests(state, description, url).await;
    }

    pub async fn report_status_to_build(&self, state: CommitState, description: &str, url: &str) {
        if self.targets.job_build().is_some() {
            self.reporter
                .report(state, description, url, &self.targets.build_check_names())
                .await;
        }
    }

    pub async fn report_status_to_tests(&self, state: CommitState, description: &str, url: &str) {
        if self.targets.job_tests().is_some() {
            self.reporter
                .report(state, description, url, &self.targets.test_check_names())
                .await;
        }
    }

    pub async fn report_status_to_build_for_chroot(
        &self,
        state: CommitState,
        description: &str,
        url: &str,
        chroot: &str,
    ) {
        if self.targets.job_build().is_some() && self.targets.build_targets().contains(chroot) {
            let check = self.targets.build_check(chroot);
            self.reporter
                .report(state, description, url, std::slice::from_ref(&check))
                .await;
        }
    }

    pub async fn report_status_to_test_for_chroot(
        &self,
        state: CommitState,
        description: &str,
        url: &str,
        chroot: &str,
    ) {
        if self.targets.job_tests().is_some() && self.targets.tests_targets().contains(chroot) {
            let check = self.targets.test_check(chroot);
            self.reporter
                .report(state, description, url, std::slice::from_ref(&check))
                .await;
        }
    }

    pub async fn report_status_to_all_for_chroot(
        &self,
        state: CommitState,
        description: &str,
        url: &str,
        chroot: &str,
    ) {
        self.report_status_to_build_for_chroot(state, description, url, chroot)
            .await;
        self.report_status_to_test_for_chroot(state, description, url, chroot)
            .await;
    }
}

/// Reports Koji build states to the production build checks.
pub struct KojiBuildJobHelper {
    targets: JobTargets,
    reporter: StatusReporter,
}

impl KojiBuildJobHelper {
    pub fn for_commit(
        ctx: &ServiceContext,
        package_config: &PackageConfig,
        config_trigger: JobConfigTrigger,
        project: Arc<dyn ForgeProject>,
        commit_sha: &str,
        pr_id: Option<u64>,
    ) -> Self {
        let targets = JobTargets::new(
            package_config,
            config_trigger,
            ctx.config.deployment.check_prefix(),
        );
        Self {
            targets,
            reporter: ctx.reporter(project, commit_sha, pr_id),
        }
    }

    pub fn targets(&self) -> &JobTargets {
        &self.targets
    }

    pub fn reporter(&self) -> &StatusReporter {
        &self.reporter
    }

    pub async fn report_status_to_all(&self, state: CommitState, description: &str, url: &str) {
        if self.targets.job_production_build().is_some() {
            self.reporter
                .report(state, description, url, &self.targets.production_check_names())
                .await;
        }
    }

    pub async fn report_status_for_target(
        &self,
        state: CommitState,
        description: &str,
        url: &str,
        target: &str,
    ) {
        if self.targets.koji_targets().contains(target) {
            let check = self.targets.production_check(target);
            self.reporter
                .report(state, description, url, std::slice::from_ref(&check))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jobs: Vec<JobConfig>) -> PackageConfig {
        PackageConfig {
            jobs,
            ..Default::default()
        }
    }

    fn targets(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn normalizes_targets_without_arch() {
        assert_eq!(normalize_target("fedora-rawhide"), "fedora-rawhide-x86_64");
        assert_eq!(normalize_target("fedora-33-aarch64"), "fedora-33-aarch64");
        assert_eq!(normalize_target("epel-8"), "epel-8-x86_64");
    }

    #[test]
    fn build_targets_fall_back_to_tests_then_default() {
        let pr = JobConfigTrigger::PullRequest;

        let only_tests = config(vec![JobConfig::new(JobType::Tests, pr).with_targets(["fedora-33"])]);
        let resolved = JobTargets::new(&only_tests, pr, "packit");
        assert_eq!(targets(&resolved.build_targets()), vec!["fedora-33-x86_64"]);
        assert_eq!(targets(&resolved.tests_targets()), vec!["fedora-33-x86_64"]);

        let bare_build = config(vec![JobConfig::new(JobType::CoprBuild, pr)]);
        let resolved = JobTargets::new(&bare_build, pr, "packit");
        assert_eq!(targets(&resolved.build_targets()), vec!["fedora-stable-x86_64"]);
        assert!(resolved.tests_targets().is_empty());
    }

    #[test]
    fn tests_targets_fall_back_to_build_targets() {
        let pr = JobConfigTrigger::PullRequest;
        let jobs = config(vec![
            JobConfig::new(JobType::Build, pr).with_targets(["fedora-rawhide", "fedora-33"]),
            JobConfig::new(JobType::Tests, pr),
        ]);
        let resolved = JobTargets::new(&jobs, pr, "packit-stg");
        assert_eq!(
            targets(&resolved.tests_targets()),
            vec!["fedora-33-x86_64", "fedora-rawhide-x86_64"]
        );
        assert_eq!(
            resolved.test_check_names(),
            vec![
                "packit-stg/testing-farm-fedora-33-x86_64".to_string(),
                "packit-stg/testing-farm-fedora-rawhide-x86_64".to_string(),
            ]
        );
    }

    #[test]
    fn jobs_of_other_triggers_are_ignored() {
        let jobs = config(vec![
            JobConfig::new(JobType::CoprBuild, JobConfigTrigger::Commit).with_targets(["epel-8"]),
            JobConfig::new(JobType::CoprBuild, JobConfigTrigger::PullRequest)
                .with_targets(["fedora-rawhide"]),
        ]);
        let resolved = JobTargets::new(&jobs, JobConfigTrigger::PullRequest, "packit");
        assert_eq!(
            resolved.build_check_names(),
            vec!["packit/rpm-build-fedora-rawhide-x86_64".to_string()]
        );
        assert!(resolved.job_tests().is_none());
    }

    #[test]
    fn chroots_map_to_koji_targets() {
        assert_eq!(koji_target("fedora-rawhide-x86_64"), "rawhide");
        assert_eq!(koji_target("fedora-34"), "f34");
        assert_eq!(koji_target("epel-8-aarch64"), "epel8");
        assert_eq!(koji_target("fedora-stable"), "fedora-stable");
    }

    #[test]
    fn production_builds_default_to_rawhide() {
        let pr = JobConfigTrigger::PullRequest;
        let jobs = config(vec![JobConfig::new(JobType::ProductionBuild, pr)]);
        let resolved = JobTargets::new(&jobs, pr, "packit");
        assert_eq!(
            resolved.production_check_names(),
            vec!["packit/production-build-rawhide".to_string()]
        );

        let jobs = config(vec![
            JobConfig::new(JobType::ProductionBuild, pr).with_targets(["fedora-34", "epel-8"]),
        ]);
        let resolved = JobTargets::new(&jobs, pr, "packit");
        assert_eq!(targets(&resolved.koji_targets()), vec!["epel8", "f34"]);
        assert!(resolved.job_build().is_none());
    }
}
