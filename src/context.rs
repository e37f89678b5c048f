//! The value a security handler hands its crypt filters at build time, used
//! instead of a back-pointer from filter to handler (spec.md §9, "Cyclic
//! reference (filter ↔ handler)"). Filters cache only what they derive from
//! this; they never reach back into the handler that created them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Everything a crypt filter needs to derive its shared encryption key
/// without holding a reference to the handler that owns it.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub file_key: Vec<u8>,
    pub encrypt_metadata: bool,
    pub version: i64,
}

/// A flag shared between a handler and every crypt filter it owns. Latching
/// it (on a failed authentication) is visible to a caller holding only a
/// filter reference, matching the original implementation's
/// `_auth_failed` propagation (see `test_wrong_password` in
/// `pyhanko_tests/test_crypt.py`, the source this behavior was carried over
/// from; SPEC_FULL.md §2).
#[derive(Clone, Debug, Default)]
pub struct AuthLatch(Arc<AtomicBool>);

impl AuthLatch {
    pub fn new() -> Self {
        AuthLatch(Arc::new(AtomicBool::new(false)))
    }

    pub fn fail(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn has_failed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
