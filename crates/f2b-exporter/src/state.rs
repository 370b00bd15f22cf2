//! Shared application state and the global allocator.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use prometheus::Registry;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;

use f2b_exporter_core::collector::{ControlClient, MetricsCollector};
use f2b_exporter_core::textfile::TextfileCollector;

/// Liveness check behind `/health`.
pub(crate) trait HealthCheck: Send + Sync {
    fn healthy(&self) -> bool;
}

impl<C: ControlClient> HealthCheck for MetricsCollector<C> {
    fn healthy(&self) -> bool {
        self.health_check()
    }
}

/// Registry entry sharing the collector with the health check.
struct RegisteredCollector<C: ControlClient>(Arc<MetricsCollector<C>>);

impl<C: ControlClient> Collector for RegisteredCollector<C> {
    fn desc(&self) -> Vec<&Desc> {
        self.0.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.0.collect()
    }
}

pub(crate) struct AppState {
    pub(crate) registry: Registry,
    pub(crate) health: Arc<dyn HealthCheck>,
    /// Appended to every scrape when configured.
    pub(crate) textfile: Option<Arc<TextfileCollector>>,
}

pub(crate) type SharedState = Arc<AppState>;

impl AppState {
    /// Registers `collector` in a fresh registry.
    pub(crate) fn new<C: ControlClient + 'static>(
        collector: MetricsCollector<C>,
        textfile: Option<TextfileCollector>,
    ) -> prometheus::Result<SharedState> {
        let collector = Arc::new(collector);
        let registry = Registry::new();
        registry.register(Box::new(RegisteredCollector(Arc::clone(&collector))))?;
        Ok(Arc::new(Self {
            registry,
            health: collector,
            textfile: textfile.map(Arc::new),
        }))
    }
}
