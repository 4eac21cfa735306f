//! Static table of handlers: which event kinds reach them and which job types they serve.

use crate::events::TriggerKind;
use crate::package_config::JobType;

use super::HandlerKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    pub kind: HandlerKind,
    pub triggers: Vec<TriggerKind>,
    pub job_types: Vec<JobType>,
    /// Job types that need this handler to run even without a job of its own
    pub required_by: Vec<JobType>,
}

impl HandlerRegistration {
    fn new(kind: HandlerKind, triggers: &[TriggerKind], job_types: &[JobType]) -> Self {
        Self {
            kind,
            triggers: triggers.to_vec(),
            job_types: job_types.to_vec(),
            required_by: Vec::new(),
        }
    }

    fn required_by(mut self, job_types: &[JobType]) -> Self {
        self.required_by = job_types.to_vec();
        self
    }

    pub fn handles(&self, job_type: JobType) -> bool {
        self.job_types.contains(&job_type)
    }

    pub fn is_required_by(&self, job_type: JobType) -> bool {
        self.required_by.contains(&job_type)
    }
}

#[derive(Debug, Clone)]
pub struct HandlerRegistry {
    registrations: Vec<HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        const COPR: &[JobType] = &[JobType::CoprBuild, JobType::Build];
        const TESTS: &[JobType] = &[JobType::Tests];
        const PRODUCTION: &[JobType] = &[JobType::ProductionBuild];

        let registrations = vec![
            HandlerRegistration::new(
                HandlerKind::PullRequestCoprBuild,
                &[TriggerKind::PullRequest],
                COPR,
            )
            .required_by(TESTS),
            HandlerRegistration::new(HandlerKind::PushCoprBuild, &[TriggerKind::Push], COPR)
                .required_by(TESTS),
            HandlerRegistration::new(HandlerKind::ReleaseCoprBuild, &[TriggerKind::Release], COPR)
                .required_by(TESTS),
            HandlerRegistration::new(
                HandlerKind::PrCommentCoprBuild,
                &[TriggerKind::PrComment],
                COPR,
            )
            .required_by(TESTS),
            HandlerRegistration::new(
                HandlerKind::PrCommentTestingFarm,
                &[TriggerKind::PrComment],
                TESTS,
            ),
            HandlerRegistration::new(
                HandlerKind::CoprBuildStart,
                &[TriggerKind::BuildStart],
                COPR,
            )
            .required_by(TESTS),
            HandlerRegistration::new(HandlerKind::CoprBuildEnd, &[TriggerKind::BuildEnd], COPR)
                .required_by(TESTS),
            HandlerRegistration::new(HandlerKind::TestingFarm, &[TriggerKind::BuildEnd], TESTS),
            HandlerRegistration::new(
                HandlerKind::TestingFarmResults,
                &[TriggerKind::TestResult],
                TESTS,
            ),
            HandlerRegistration::new(
                HandlerKind::PullRequestKojiBuild,
                &[TriggerKind::PullRequest],
                PRODUCTION,
            ),
            HandlerRegistration::new(HandlerKind::PushKojiBuild, &[TriggerKind::Push], PRODUCTION),
            HandlerRegistration::new(
                HandlerKind::ReleaseKojiBuild,
                &[TriggerKind::Release],
                PRODUCTION,
            ),
            HandlerRegistration::new(
                HandlerKind::KojiBuildReport,
                &[TriggerKind::BuildStart, TriggerKind::BuildEnd],
                PRODUCTION,
            ),
        ];
        Self { registrations }
    }

    /// Handlers reached by `trigger`, in registration order.
    pub fn handlers_for(&self, trigger: TriggerKind) -> impl Iterator<Item = &HandlerRegistration> {
        self.registrations
            .iter()
            .filter(move |r| r.triggers.contains(&trigger))
    }

    pub fn get(&self, kind: HandlerKind) -> Option<&HandlerRegistration> {
        self.registrations.iter().find(|r| r.kind == kind)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
