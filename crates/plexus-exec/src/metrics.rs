//! Metrics/tracing hooks.
//!
//! Events go through `tracing`; the binary layer decides where they end up
//! (the CLI installs a `tracing-subscriber` fmt layer).

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::trace_span!("plexus", event);
    let _enter = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}
