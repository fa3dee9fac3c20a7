//! Metrics registry for portgate observability
//!
//! All instruments live on a single [`Metrics`] struct constructed once at
//! startup and shared by `Arc`. Covered:
//! - reconcile counts and durations per controller
//! - dependent-resource events seen and Ingress enqueues produced per filter
//! - load-balancer worker count
//! - deferred listener deletions

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Controller label values for reconcile metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    /// Primary Ingress controller
    Ingress,
    /// Listener dispatch controller
    Listener,
    /// Listener uptime-check controller
    Uptime,
}

impl ControllerKind {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Listener => "listener",
            Self::Uptime => "uptime",
        }
    }
}

/// Instruments shared by controllers, filters and background loops
pub struct Metrics {
    /// Histogram of reconcile duration, labeled by controller and result
    reconcile_duration: Histogram<f64>,
    /// Counter of reconcile errors, labeled by controller
    reconcile_errors: Counter<u64>,
    /// Counter of dependent-resource events observed, labeled by kind
    filter_events: Counter<u64>,
    /// Counter of Ingress enqueues produced by filters, labeled by kind
    filter_enqueues: Counter<u64>,
    /// Gauge of live per-load-balancer workers
    lb_workers: Gauge<u64>,
    /// Counter of deferred listener deletions, labeled by result
    deferred_deletions: Counter<u64>,
}

impl Metrics {
    /// Build all instruments on the given meter
    pub fn new(meter: &Meter) -> Self {
        Self {
            reconcile_duration: meter
                .f64_histogram("portgate_reconcile_duration_seconds")
                .with_description("Duration of reconciliation in seconds")
                .with_unit("s")
                .build(),
            reconcile_errors: meter
                .u64_counter("portgate_reconcile_errors_total")
                .with_description("Total number of reconciliation errors")
                .with_unit("{errors}")
                .build(),
            filter_events: meter
                .u64_counter("portgate_filter_events_total")
                .with_description("Dependent-resource events observed by event filters")
                .with_unit("{events}")
                .build(),
            filter_enqueues: meter
                .u64_counter("portgate_filter_enqueues_total")
                .with_description("Ingress reconciliations enqueued by event filters")
                .with_unit("{enqueues}")
                .build(),
            lb_workers: meter
                .u64_gauge("portgate_lb_workers")
                .with_description("Number of live per-load-balancer workers")
                .with_unit("{workers}")
                .build(),
            deferred_deletions: meter
                .u64_counter("portgate_deferred_deletions_total")
                .with_description("Listener deletions processed by the deferred deletion queue")
                .with_unit("{deletions}")
                .build(),
        }
    }

    /// Record a dependent-resource event seen by a filter
    pub fn record_filter_event(&self, kind: &'static str) {
        self.filter_events.add(1, &[KeyValue::new("kind", kind)]);
    }

    /// Record Ingress enqueues produced by a filter
    pub fn record_filter_enqueues(&self, kind: &'static str, count: usize) {
        if count > 0 {
            self.filter_enqueues
                .add(count as u64, &[KeyValue::new("kind", kind)]);
        }
    }

    /// Update the live worker gauge
    pub fn set_lb_workers(&self, count: u64) {
        self.lb_workers.record(count, &[]);
    }

    /// Record a deferred deletion outcome
    pub fn record_deferred_deletion(&self, success: bool) {
        let result = if success { "success" } else { "error" };
        self.deferred_deletions
            .add(1, &[KeyValue::new("result", result)]);
    }

    /// Start timing a reconciliation
    pub fn reconcile_timer(&self, controller: ControllerKind) -> ReconcileTimer<'_> {
        ReconcileTimer {
            metrics: self,
            controller,
            start: std::time::Instant::now(),
        }
    }
}

/// Records a reconciliation duration (and error count) on completion
pub struct ReconcileTimer<'a> {
    metrics: &'a Metrics,
    controller: ControllerKind,
    start: std::time::Instant,
}

impl ReconcileTimer<'_> {
    /// Record successful completion
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metrics.reconcile_duration.record(
            duration,
            &[
                KeyValue::new("controller", self.controller.as_str()),
                KeyValue::new("result", "success"),
            ],
        );
    }

    /// Record error completion
    pub fn error(self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.metrics.reconcile_duration.record(
            duration,
            &[
                KeyValue::new("controller", self.controller.as_str()),
                KeyValue::new("result", "error"),
            ],
        );
        self.metrics.reconcile_errors.add(
            1,
            &[KeyValue::new("controller", self.controller.as_str())],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;

    fn test_metrics() -> Metrics {
        Metrics::new(&global::meter("portgate-test"))
    }

    #[test]
    fn controller_kind_labels() {
        assert_eq!(ControllerKind::Ingress.as_str(), "ingress");
        assert_eq!(ControllerKind::Listener.as_str(), "listener");
        assert_eq!(ControllerKind::Uptime.as_str(), "uptime");
    }

    #[test]
    fn recording_does_not_panic() {
        let metrics = test_metrics();
        metrics.record_filter_event("Pod");
        metrics.record_filter_enqueues("Pod", 3);
        metrics.record_filter_enqueues("Pod", 0);
        metrics.set_lb_workers(2);
        metrics.record_deferred_deletion(true);
        metrics.record_deferred_deletion(false);
    }

    #[test]
    fn reconcile_timer_completes() {
        let metrics = test_metrics();
        metrics.reconcile_timer(ControllerKind::Ingress).success();
        metrics.reconcile_timer(ControllerKind::Uptime).error();
    }
}
