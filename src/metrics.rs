use crate::Error;
use prometheus::{
    histogram_opts, opts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Registry,
};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    /// Number of JSON patch operations requested per unsupported-feature annotation
    pub unsafe_modifications: IntGaugeVec,
    /// Operand changes made outside of the operator and reverted by it
    pub overwritten_modifications: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "hyperconverged_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "hyperconverged_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounter::new(
            "hyperconverged_operator_reconciliations_total",
            "reconciliations",
        )
        .unwrap();
        let unsafe_modifications = IntGaugeVec::new(
            opts!(
                "hyperconverged_operator_unsafe_modification_count",
                "Count of unsafe modifications in the HyperConverged annotations",
            ),
            &["annotation_name"],
        )
        .unwrap();
        let overwritten_modifications = IntCounterVec::new(
            opts!(
                "hyperconverged_operator_out_of_band_modifications_total",
                "Count of out-of-band modifications overwritten by the operator",
            ),
            &["component_kind", "component_name"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            unsafe_modifications,
            overwritten_modifications,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.unsafe_modifications.clone()))?;
        registry.register(Box::new(self.overwritten_modifications.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, instance: &str, e: &Error) {
        self.failures
            .with_label_values(&[T::kind(&()).as_ref(), instance, e.metric_label()])
            .inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }

    pub fn set_unsafe_modification_count(&self, annotation: &str, count: usize) {
        self.unsafe_modifications
            .with_label_values(&[annotation])
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn unsafe_modification_count(&self, annotation: &str) -> i64 {
        self.unsafe_modifications
            .with_label_values(&[annotation])
            .get()
    }

    pub fn inc_overwritten_modifications(&self, kind: &str, name: &str) {
        self.overwritten_modifications
            .with_label_values(&[kind, name])
            .inc()
    }

    pub fn overwritten_modifications_count(&self, kind: &str, name: &str) -> u64 {
        self.overwritten_modifications
            .with_label_values(&[kind, name])
            .get()
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}
