//! Selection of (handler, job config) pairs for an event.

use crate::events::TriggerKind;
use crate::package_config::{JobConfig, JobConfigTrigger};

use super::{HandlerKind, HandlerRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedJob {
    pub handler: HandlerKind,
    /// Index of the job in the package configuration
    pub job_index: usize,
    pub job_config: JobConfig,
    /// Synthesized because another job requires this handler
    pub implied: bool,
}

/// Matches `jobs` against the handlers `trigger` reaches.
///
/// Explicit matches come first, in declaration order. Handlers required by a
/// matching job but not matched explicitly follow, once each, carrying the
/// first job that implies them.
pub fn match_jobs(
    registry: &HandlerRegistry,
    trigger: TriggerKind,
    config_trigger: JobConfigTrigger,
    jobs: &[JobConfig],
) -> Vec<MatchedJob> {
    let mut matched = Vec::new();
    let candidates: Vec<_> = jobs
        .iter()
        .enumerate()
        .filter(|(_, job)| job.trigger == config_trigger)
        .collect();

    for (job_index, job) in &candidates {
        for registration in registry.handlers_for(trigger) {
            if registration.handles(job.job_type) {
                matched.push(MatchedJob {
                    handler: registration.kind,
                    job_index: *job_index,
                    job_config: (*job).clone(),
                    implied: false,
                });
            }
        }
    }

    let mut implied: Vec<MatchedJob> = Vec::new();
    for (job_index, job) in &candidates {
        for registration in registry.handlers_for(trigger) {
            if !registration.is_required_by(job.job_type) {
                continue;
            }
            let seen = matched
                .iter()
                .chain(implied.iter())
                .any(|m| m.handler == registration.kind);
            if seen {
                continue;
            }
            implied.push(MatchedJob {
                handler: registration.kind,
                job_index: *job_index,
                job_config: (*job).clone(),
                implied: true,
            });
        }
    }

    matched.extend(implied);
    matched
}
