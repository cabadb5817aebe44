use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use sitewatch_core::{SitewatchConfig, SitewatchError};
use sitewatch_scheduler::{LocationStatusUpdater, ManagedPoller};

/// Central shared state: passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: SitewatchConfig,
    /// Enabled pollers keyed by service name (`logging`, `billing`, `calculation`).
    pub pollers: BTreeMap<&'static str, Arc<dyn ManagedPoller>>,
    /// `None` when the location updater is disabled.
    pub locations: Option<Arc<LocationStatusUpdater>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: SitewatchConfig,
        pollers: Vec<Arc<dyn ManagedPoller>>,
        locations: Option<Arc<LocationStatusUpdater>>,
    ) -> Self {
        Self {
            config,
            pollers: pollers.into_iter().map(|p| (p.service(), p)).collect(),
            locations,
            started_at: Utc::now(),
        }
    }

    pub fn poller(&self, service: &str) -> Result<&Arc<dyn ManagedPoller>, SitewatchError> {
        self.pollers
            .get(service)
            .ok_or_else(|| SitewatchError::UnknownService {
                name: service.to_string(),
            })
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/api/locations/updater",
            get(crate::http::locations::status_handler),
        )
        .route(
            "/api/locations/updater/start",
            post(crate::http::locations::start_handler),
        )
        .route(
            "/api/locations/updater/stop",
            post(crate::http::locations::stop_handler),
        )
        .route(
            "/api/locations/updater/run",
            post(crate::http::locations::run_handler),
        )
        .route(
            "/api/{service}/reload",
            post(crate::http::pollers::reload_handler).get(crate::http::pollers::ensure_handler),
        )
        .route("/api/{service}/jobs", get(crate::http::pollers::jobs_handler))
        .route(
            "/webhooks/config-change",
            post(crate::http::webhooks::config_change_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Router-level fakes shared by the handler tests.

    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use sitewatch_scheduler::{
        CycleReport, CycleTotals, ReloadTicket, Result, SchedulerError, StatusSnapshot,
    };
    use tower::ServiceExt;

    use super::*;

    /// Counts calls instead of polling anything.
    pub struct FakePoller {
        pub service: &'static str,
        pub reloads: AtomicU64,
        pub inits: AtomicU64,
        pub fail_init: AtomicBool,
        pub initialized: AtomicBool,
    }

    impl FakePoller {
        pub fn new(service: &'static str) -> Arc<Self> {
            Arc::new(Self {
                service,
                reloads: AtomicU64::new(0),
                inits: AtomicU64::new(0),
                fail_init: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl ManagedPoller for FakePoller {
        fn service(&self) -> &'static str {
            self.service
        }

        async fn initialize(&self) -> Result<StatusSnapshot> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            if self.fail_init.load(Ordering::SeqCst) {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(SchedulerError::InitializationFailure {
                    service: self.service.to_string(),
                    reason: "database is locked".to_string(),
                });
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(self.status())
        }

        async fn ensure_initialized(&self) -> Result<StatusSnapshot> {
            if self.initialized.load(Ordering::SeqCst) {
                return Ok(self.status());
            }
            self.initialize().await
        }

        fn request_reload(&self) -> ReloadTicket {
            if self.reloads.fetch_add(1, Ordering::SeqCst) == 0 {
                ReloadTicket::Scheduled
            } else {
                ReloadTicket::Coalesced
            }
        }

        fn status(&self) -> StatusSnapshot {
            StatusSnapshot {
                service: self.service.to_string(),
                initialized: self.initialized.load(Ordering::SeqCst),
                active_timers: 2,
                configs: 2,
                interval_minutes: Some(1),
                reload_pending: self.reloads.load(Ordering::SeqCst) > 0,
                initializations: self.inits.load(Ordering::SeqCst),
                last_error: None,
                cycles: CycleTotals::default(),
                last_cycle_at: None,
            }
        }

        fn job_reports(&self) -> Vec<CycleReport> {
            Vec::new()
        }

        async fn shutdown(&self) {}
    }

    pub fn state_with(
        config: SitewatchConfig,
        pollers: &[Arc<FakePoller>],
        locations: Option<Arc<LocationStatusUpdater>>,
    ) -> Arc<AppState> {
        let pollers = pollers
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn ManagedPoller>)
            .collect();
        Arc::new(AppState::new(config, pollers, locations))
    }

    pub async fn send(state: Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }
}
