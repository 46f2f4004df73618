//! Shared application state for the exporter.
//!
//! - One `MetricsStore` backs everything (call instruments and `build_info`).
//! - One `CallInterceptor` owns the instrument registry; hand out clones of
//!   `AppState` to share it.
//! - Startup errors are explicit (Result instead of panic).

use std::convert::Infallible;
use std::sync::Arc;

use fnmetrics_core::error::Result;
use fnmetrics_core::CallInterceptor;

use crate::build_info::BuildInfo;
use crate::config::ExporterConfig;
use crate::obs::metrics::{MetricsStore, RENDER_SITE};

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: ExporterConfig,
    store: Arc<MetricsStore>,
    interceptor: CallInterceptor,
    build: BuildInfo,
}

impl AppState {
    /// Build application state and publish `build_info`.
    pub fn new(cfg: ExporterConfig) -> Result<Self> {
        let store = Arc::new(MetricsStore::new(cfg.exporter.max_series));
        let interceptor = CallInterceptor::new(store.clone());

        let build = BuildInfo::load(&cfg.build);
        build.publish(store.as_ref())?;
        tracing::info!(
            version = %build.version,
            commit = %build.commit,
            branch = %build.branch,
            service = %build.service_name,
            "build info published"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                store,
                interceptor,
                build,
            }),
        })
    }

    pub fn cfg(&self) -> &ExporterConfig {
        &self.inner.cfg
    }

    pub fn store(&self) -> Arc<MetricsStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn interceptor(&self) -> &CallInterceptor {
        &self.inner.interceptor
    }

    pub fn build_info(&self) -> &BuildInfo {
        &self.inner.build
    }

    /// Prometheus text for a scrape. The render itself is an instrumented call.
    pub fn render_metrics(&self) -> String {
        let rendered: std::result::Result<String, Infallible> = self
            .inner
            .interceptor
            .instrument_site(&RENDER_SITE, || Ok(self.inner.store.render()));
        match rendered {
            Ok(body) => body,
            Err(never) => match never {},
        }
    }
}
