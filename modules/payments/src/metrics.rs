use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    pub charges_total: IntCounterVec,
    pub replays_total: IntCounterVec,
    pub conflicts_total: IntCounterVec,
    pub outbox_outcomes_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let charges_total = IntCounterVec::new(
            Opts::new("payments_charges_total", "Total charge requests handled"),
            &["result"], // accepted|error
        )
        .expect("metric");

        let replays_total = IntCounterVec::new(
            Opts::new("payments_replays_total", "Total idempotent replays served"),
            &["scope"],
        )
        .expect("metric");

        let conflicts_total = IntCounterVec::new(
            Opts::new("payments_conflicts_total", "Total idempotency conflicts rejected"),
            &["kind"], // hash_conflict|in_progress_conflict
        )
        .expect("metric");

        let outbox_outcomes_total = IntCounterVec::new(
            Opts::new("payments_outbox_outcomes_total", "Outbox dispatch outcomes"),
            &["outcome"], // sent|retry|dead
        )
        .expect("metric");

        registry.register(Box::new(charges_total.clone())).unwrap();
        registry.register(Box::new(replays_total.clone())).unwrap();
        registry.register(Box::new(conflicts_total.clone())).unwrap();
        registry
            .register(Box::new(outbox_outcomes_total.clone()))
            .unwrap();

        Self {
            registry,
            charges_total,
            replays_total,
            conflicts_total,
            outbox_outcomes_total,
        }
    }

    pub fn render(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&mf, &mut buf).map_err(|e| e.to_string())?;
        String::from_utf8(buf).map_err(|e| e.to_string())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
