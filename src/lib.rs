pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::config::Config;
use crate::database::Store;
use crate::error::{Error, Result};
use crate::services::{
    attempt_service::AttemptService,
    eligibility_service::{AllowAllEligibility, EligibilityCheck, HttpEligibility},
    grading_service::GradingService,
    notification_service::{LogNotifier, NotificationService, Notifier, WebhookNotifier},
    proctoring_service::ProctoringService,
    sandbox_service::{CodeExecutor, SandboxService},
    scheduler_service::SchedulerService,
    score_service::ScoreService,
    test_service::TestService,
};
use crate::utils::time::{Clock, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub test_service: TestService,
    pub scheduler_service: SchedulerService,
    pub attempt_service: AttemptService,
    pub proctoring_service: ProctoringService,
    pub grading_service: GradingService,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self> {
        AppStateBuilder::new(config, store).build()
    }

    pub fn builder(config: Config, store: Arc<dyn Store>) -> AppStateBuilder {
        AppStateBuilder::new(config, store)
    }
}

/// Wires the services together. Collaborators that are not overridden are
/// built from the configuration.
pub struct AppStateBuilder {
    config: Config,
    store: Arc<dyn Store>,
    executor: Option<Arc<dyn CodeExecutor>>,
    clock: Option<Arc<dyn Clock>>,
    eligibility: Option<Arc<dyn EligibilityCheck>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AppStateBuilder {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config,
            store,
            executor: None,
            clock: None,
            eligibility: None,
            notifier: None,
        }
    }

    /// Replaces the sandbox backend. It still runs behind the bounded pool.
    pub fn executor(mut self, executor: Arc<dyn CodeExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn eligibility(mut self, eligibility: Arc<dyn EligibilityCheck>) -> Self {
        self.eligibility = Some(eligibility);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Result<AppState> {
        self.config.validate()?;
        let config = self.config;
        let store = self.store;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.sandbox_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("http client: {}", e)))?;

        // Every run goes through the pool, which also enforces the per-run time limit.
        let executor: Arc<dyn CodeExecutor> = match self.executor {
            Some(executor) => Arc::new(SandboxService::new(
                Some(executor),
                None,
                config.sandbox_max_concurrency,
            )),
            None => Arc::new(SandboxService::from_config(&config, http_client.clone())),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let eligibility: Arc<dyn EligibilityCheck> = match self.eligibility {
            Some(eligibility) => eligibility,
            None => match &config.eligibility_url {
                Some(url) => Arc::new(HttpEligibility::new(http_client.clone(), url.clone())),
                None => Arc::new(AllowAllEligibility),
            },
        };
        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => match &config.notification_webhook_url {
                Some(url) => Arc::new(WebhookNotifier::new(
                    http_client.clone(),
                    url.clone(),
                    config.webhook_secret.clone(),
                )),
                None => Arc::new(LogNotifier),
            },
        };

        let notifications = NotificationService::new(notifier);
        let grading_service =
            GradingService::new(executor, Duration::from_secs(config.case_timeout_secs));
        let score_service = ScoreService::new(store.clone());
        let test_service = TestService::new(store.clone());
        let scheduler_service = SchedulerService::new(
            store.clone(),
            eligibility,
            notifications.clone(),
            clock.clone(),
        );
        let attempt_service = AttemptService::new(
            store.clone(),
            grading_service.clone(),
            score_service,
            notifications,
            clock,
        );
        let proctoring_service = ProctoringService::new(
            attempt_service.clone(),
            config.proctoring_flag_threshold,
            config.proctoring_terminate_threshold,
        );

        Ok(AppState {
            config: Arc::new(config),
            store,
            test_service,
            scheduler_service,
            attempt_service,
            proctoring_service,
            grading_service,
        })
    }
}
