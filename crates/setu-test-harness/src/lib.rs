//! Setu Test Harness
//!
//! Mock HTTP servers and fault-injecting TCP servers shared by the Setu
//! integration tests.

pub mod mocks;

use once_cell::sync::Lazy;

/// Initialize test logging once per test binary.
pub fn init() {
    static INIT: Lazy<()> = Lazy::new(|| {
        // Another harness may already own the global subscriber.
        let _ = setu_log::init(setu_log::LogConfig::for_tests());
    });

    Lazy::force(&INIT);
}
