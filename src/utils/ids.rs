//! Locally generated identifiers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn random_urlsafe(bytes_len: usize) -> String {
    let bytes = best_effort_random_bytes(bytes_len);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Id for a message that has not been acknowledged by the backend.
pub fn local_message_id() -> String {
    format!("local-{}", random_urlsafe(12))
}

fn best_effort_random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0_u8; len];
    if getrandom::fill(&mut out).is_ok() {
        return out;
    }

    // Unique but predictable; only used when the OS RNG is unavailable.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = [nanos.to_le_bytes(), counter.to_le_bytes()].concat();
    for (index, byte) in out.iter_mut().enumerate() {
        *byte = seed[index % seed.len()];
    }
    out
}
