//! Property tests for idle detection.

use std::sync::Arc;
use std::time::Duration;

use idlefleet_agent::mock::MockGameStatus;
use idlefleet_agent::probe::ServerEndpoint;
use idlefleet_agent::watchdog::{IdleStreak, OccupancyWatchdog, ProbeFailurePolicy};
use idlefleet_poll::ManualSleeper;
use proptest::prelude::*;

/// Index of the observation that ends the watch, if any.
fn expected_stop(counts: &[u32], threshold: u32) -> Option<usize> {
    let mut run = 0u32;
    for (i, count) in counts.iter().enumerate() {
        run = if *count == 0 { run + 1 } else { 0 };
        if run > threshold {
            return Some(i);
        }
    }
    None
}

fn counts() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(prop_oneof![3 => Just(0u32), 1 => 1u32..30], 0..40)
}

proptest! {
    #[test]
    fn streak_matches_reference(counts in counts(), threshold in 0u32..6) {
        let mut streak = IdleStreak::new(threshold);
        let stop = counts.iter().position(|c| streak.observe(*c));
        prop_assert_eq!(stop, expected_stop(&counts, threshold));
    }

    #[test]
    fn watch_stops_at_first_qualifying_tick(counts in counts(), threshold in 0u32..6) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let status = Arc::new(MockGameStatus::new().with_occupancy(counts.clone()));
        let sleeper = Arc::new(ManualSleeper::new());
        let watchdog = OccupancyWatchdog::new(
            status.clone(),
            sleeper.clone(),
            Duration::from_secs(10),
            threshold,
            ProbeFailurePolicy::Skip,
        );

        let result = runtime.block_on(watchdog.watch(&ServerEndpoint::new("10.0.0.5", 25565)));

        match expected_stop(&counts, threshold) {
            Some(index) => {
                let summary = result.unwrap();
                prop_assert_eq!(summary.ticks as usize, index + 1);
                prop_assert_eq!(sleeper.count(), index + 1);
                prop_assert_eq!(status.remaining_queries(), counts.len() - index - 1);
            }
            // Scripted answers ran out before the server went idle.
            None => prop_assert!(result.is_err()),
        }
    }
}
