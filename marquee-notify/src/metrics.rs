use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Sent/failed counters shared by every worker. Cloning shares the counters.
#[derive(Clone)]
pub struct NotificationMetrics {
    registry: Registry,
    sent: IntCounter,
    failed: IntCounter,
}

impl NotificationMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let sent = IntCounter::new(
            "notifications_sent_total",
            "Notification jobs delivered to the sender",
        )?;
        let failed = IntCounter::new(
            "notifications_failed_total",
            "Notification jobs that could not be delivered",
        )?;
        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(failed.clone()))?;

        Ok(Self {
            registry,
            sent,
            failed,
        })
    }

    pub fn record_sent(&self) {
        self.sent.inc();
    }

    pub fn record_failed(&self) {
        self.failed.inc();
    }

    /// `(sent, failed)`
    pub fn snapshot(&self) -> (u64, u64) {
        (self.sent.get(), self.failed.get())
    }

    /// Prometheus text exposition of this registry.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = NotificationMetrics::new().unwrap();
        let worker_view = metrics.clone();

        worker_view.record_sent();
        worker_view.record_sent();
        metrics.record_failed();

        assert_eq!(metrics.snapshot(), (2, 1));
    }

    #[test]
    fn test_encode_exposes_both_counters() {
        let metrics = NotificationMetrics::new().unwrap();
        metrics.record_sent();

        let text = metrics.encode().unwrap();
        assert!(text.contains("notifications_sent_total 1"));
        assert!(text.contains("notifications_failed_total 0"));
    }
}
