use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe the dispatch series.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("status_polls_total", "Service polls attempted.");
    describe_counter!("status_accepted_total", "Updates accepted as genuinely new.");
    describe_counter!("status_ghost_total", "Re-fetched updates identical to the last accepted one.");
    describe_counter!("status_fetch_errors_total", "Feed fetch failures (connection or HTTP status).");
    describe_counter!("status_malformed_total", "Feeds that could not be normalized.");
    describe_counter!("status_deliveries_total", "Successful per-destination deliveries.");
    describe_counter!("status_delivery_failures_total", "Failed per-destination deliveries.");
    describe_counter!("status_cycle_timeouts_total", "Cycles cut short by the cycle deadline.");
    describe_histogram!("status_parse_ms", "Feed XML parse time in milliseconds.");
    describe_gauge!("status_last_cycle_ts", "Unix ts when the last dispatch cycle started.");
}
