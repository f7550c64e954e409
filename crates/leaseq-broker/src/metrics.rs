use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Prometheus metrics for the broker
pub struct BrokerMetrics {
    pub registry: Registry,

    // Request counters
    pub requests_total: IntCounterVec,
    pub responses_total: IntCounterVec,

    // Lease lifecycle
    pub leases_expired_total: IntCounter,
    pub tasks_acked_total: IntCounter,

    // Registry size
    pub tasks: IntGauge,
    pub queues: IntGauge,

    // Checkpoints
    pub checkpoints_total: IntCounterVec,
}

impl BrokerMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("leaseq_requests_total", "Total number of requests by command"),
            &["command"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let responses_total = IntCounterVec::new(
            Opts::new("leaseq_responses_total", "Total number of responses by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(responses_total.clone()))?;

        let leases_expired_total = IntCounter::new(
            "leaseq_leases_expired_total",
            "Leases reverted to idle by the timeout sweep",
        )?;
        registry.register(Box::new(leases_expired_total.clone()))?;

        let tasks_acked_total =
            IntCounter::new("leaseq_tasks_acked_total", "Tasks removed by ACK")?;
        registry.register(Box::new(tasks_acked_total.clone()))?;

        let tasks = IntGauge::new("leaseq_tasks", "Tasks currently held across all queues")?;
        registry.register(Box::new(tasks.clone()))?;

        let queues = IntGauge::new("leaseq_queues", "Number of known queues")?;
        registry.register(Box::new(queues.clone()))?;

        let checkpoints_total = IntCounterVec::new(
            Opts::new("leaseq_checkpoints_total", "SAVE attempts by result"),
            &["result"],
        )?;
        registry.register(Box::new(checkpoints_total.clone()))?;

        Ok(BrokerMetrics {
            registry,
            requests_total,
            responses_total,
            leases_expired_total,
            tasks_acked_total,
            tasks,
            queues,
            checkpoints_total,
        })
    }

    pub fn inc_requests(&self, command: &str) {
        self.requests_total.with_label_values(&[command]).inc();
    }

    pub fn inc_responses(&self, outcome: &str) {
        self.responses_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_checkpoints(&self, result: &str) {
        self.checkpoints_total.with_label_values(&[result]).inc();
    }

    /// Refresh registry size gauges
    pub fn update_registry_size(&self, queues: usize, tasks: usize) {
        self.queues.set(queues as i64);
        self.tasks.set(tasks as i64);
    }

    /// Render all metrics in the text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::{Encoder, TextEncoder};

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
