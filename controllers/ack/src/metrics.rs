//! Prometheus counters served on `/metrics`

use crate::error::ControllerError;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone, Debug)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    instance_create_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new();
        let reconcile_total = IntCounterVec::new(
            Opts::new("ack_reconcile_total", "Reconciliations by resource kind and result"),
            &["kind", "result"],
        )?;
        let instance_create_total =
            IntCounter::new("ack_instance_create_total", "ECS instances created by the controller")?;
        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(instance_create_total.clone()))?;
        Ok(Self { registry, reconcile_total, instance_create_total })
    }

    /// Counts one reconciliation; `result` is "success" or an error kind
    pub fn record_reconcile(&self, kind: &str, result: &str) {
        self.reconcile_total.with_label_values(&[kind, result]).inc();
    }

    pub fn record_instance_created(&self) {
        self.instance_create_total.inc();
    }

    #[cfg(test)]
    pub fn reconcile_count(&self, kind: &str, result: &str) -> u64 {
        self.reconcile_total.with_label_values(&[kind, result]).get()
    }

    #[cfg(test)]
    pub fn instances_created(&self) -> u64 {
        self.instance_create_total.get()
    }

    /// Text exposition of every registered metric
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("ACKMachine", "success");
        metrics.record_instance_created();

        let text = metrics.render().unwrap();
        assert!(text.contains("ack_reconcile_total{kind=\"ACKMachine\",result=\"success\"} 1"));
        assert!(text.contains("ack_instance_create_total 1"));
    }

    #[test]
    fn test_reconcile_counts_per_label() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconcile("ACKCluster", "success");
        metrics.record_reconcile("ACKCluster", "success");
        metrics.record_reconcile("ACKCluster", "conflict");

        assert_eq!(metrics.reconcile_count("ACKCluster", "success"), 2);
        assert_eq!(metrics.reconcile_count("ACKCluster", "conflict"), 1);
        assert_eq!(metrics.reconcile_count("ACKMachine", "success"), 0);
        assert_eq!(metrics.instances_created(), 0);
    }
}
