//! Interrupt handling
//!
//! Lives in its own test binary: the interrupt flag is process-global.

mod common;

use common::Scenario;
use lilac::infra::signals;

/// An interrupt before the first pick stops all submission; the driver
/// still terminates cleanly.
#[test]
fn test_interrupt_stops_submission() {
    let scenario = Scenario::new()
        .package("a", &[])
        .package("b", &[])
        .nv_change("a", "1", "2")
        .nv_change("b", "1", "2");
    let worker = scenario.worker.clone();

    let mut batch = scenario.into_batch();
    signals::request_interrupt();
    batch.drive();
    signals::reset_interrupt();

    assert!(worker.submission_order().is_empty());
    assert!(batch.built.is_empty());
    assert!(batch.failed.is_empty());
    // work remains for the next, uninterrupted batch
    assert!(batch.sorter.is_active());
}
