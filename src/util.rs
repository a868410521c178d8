//! Small shared helpers that don't deserve their own module.

/// Milliseconds since the Unix epoch, the timestamp unit used throughout
/// the wire protocol and descriptor envelopes.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Small random jitter added to the opening timeout so many conversations
/// reconnecting after a shared transport outage don't all retry in lockstep.
pub fn jitter_millis(max: u64) -> u64 {
    use rand::Rng;
    rand::rng().random_range(0..=max)
}
