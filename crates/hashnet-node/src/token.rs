//! Call tokens and local handle ids.

use std::sync::atomic::{AtomicU64, Ordering};

/// Width of a call token in bits.
const TOKEN_BITS: u32 = 128;

/// Random call token: 128 bits rendered as 32 lowercase hex characters.
/// Correlates a response frame with the call waiting for it.
pub fn random_token() -> String {
    format!("{:0width$x}", rand::random::<u128>(), width = (TOKEN_BITS / 4) as usize)
}

/// Process-unique id for handlers, hooks and links.
pub(crate) fn next_local_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
