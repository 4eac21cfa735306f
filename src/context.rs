//! Process-wide dependencies shared by the orchestrator and every handler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sea_orm::DatabaseConnection;

use crate::allowlist::Allowlist;
use crate::backends::{
    BuildBackend, CoprClient, HttpTestingFarmClient, KojiClient, TestingFarmClient,
};
use crate::config::AppConfig;
use crate::correlator::BuildCorrelator;
use crate::forge::{ForgeFactory, ForgeProject, ForgeRegistry, USER_AGENT};
use crate::jobs::{HandlerRegistry, HandlerRuntime, Workspace};
use crate::reporting::StatusReporter;
use crate::resolver::TriggerResolver;

pub struct ServiceContext {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub forges: Arc<dyn ForgeFactory>,
    /// Copr
    pub builds: Arc<dyn BuildBackend>,
    pub koji: Arc<dyn BuildBackend>,
    pub testing_farm: Arc<dyn TestingFarmClient>,
    pub registry: Arc<HandlerRegistry>,
    pub runtime: HandlerRuntime,
}

impl ServiceContext {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<DatabaseConnection>,
        forges: Arc<dyn ForgeFactory>,
        builds: Arc<dyn BuildBackend>,
        koji: Arc<dyn BuildBackend>,
        testing_farm: Arc<dyn TestingFarmClient>,
    ) -> Self {
        let runtime = HandlerRuntime::new(Workspace::from_config(&config));
        Self {
            config,
            db,
            forges,
            builds,
            koji,
            testing_farm,
            registry: Arc::new(HandlerRegistry::new()),
            runtime,
        }
    }

    /// Wires the HTTP-backed forge registry and the Copr, Koji and Testing Farm clients.
    pub fn from_config(config: Arc<AppConfig>, db: Arc<DatabaseConnection>) -> Result<Self> {
        let forges = ForgeRegistry::from_config(&config).context("building forge registry")?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("building backend HTTP client")?;
        let builds = CoprClient::new(
            http.clone(),
            config.copr_api_base.clone(),
            config.copr_login.clone(),
            config.copr_token.clone(),
        );
        let koji = KojiClient::new(
            http.clone(),
            config.koji_hub_url.clone(),
            config.koji_web_url.clone(),
            config.koji_session_id.clone(),
            config.koji_session_key.clone(),
        );
        let testing_farm = HttpTestingFarmClient::new(http, config.testing_farm_url.clone());
        Ok(Self::new(
            config,
            db,
            Arc::new(forges),
            Arc::new(builds),
            Arc::new(koji),
            Arc::new(testing_farm),
        ))
    }

    pub fn correlator(&self) -> BuildCorrelator {
        BuildCorrelator::new(self.db.clone())
    }

    pub fn allowlist(&self) -> Allowlist {
        Allowlist::new(self.db.clone())
    }

    pub fn resolver(&self) -> TriggerResolver {
        TriggerResolver::new(self.db.clone())
    }

    pub fn reporter(
        &self,
        project: Arc<dyn ForgeProject>,
        commit_sha: &str,
        pr_id: Option<u64>,
    ) -> StatusReporter {
        StatusReporter::new(
            project,
            commit_sha,
            pr_id,
            self.config.status_fallback_url.clone(),
        )
    }
}
