//! Tracing setup for binaries embedding the client.
//!
//! Initialization is guarded by `OnceLock` so repeated calls (tests, multiple
//! entry points) are no-ops. Metrics counters are emitted through the `metrics`
//! facade; installing a recorder is left to the embedding application.
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Counter: guard decisions, labelled by `outcome`.
pub const GUARD_DECISIONS_TOTAL: &str = "lectern_guard_decisions_total";
/// Counter: relation grant/revoke calls, labelled by `op` and `result`.
pub const RELATION_MUTATIONS_TOTAL: &str = "lectern_relation_mutations_total";
/// Counter: identity transitions, labelled by `transition`.
pub const IDENTITY_TRANSITIONS_TOTAL: &str = "lectern_identity_transitions_total";

pub fn init_tracing(default_filter: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
    });
}
