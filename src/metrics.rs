use tracing::trace;

// Counters are emitted as trace events; no exporter is wired up.

pub fn inc_requests(route: &'static str) {
    trace!(target = "relay.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "relay.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
