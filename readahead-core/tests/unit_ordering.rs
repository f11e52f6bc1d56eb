//! Stage ordering tracker tests

use proptest::prelude::*;

use readahead_core::schedule::{StagePhase, StageTracker};
use readahead_core::{ExecutionMode, ReaderError, StageKind};

const STAGES: [StageKind; 3] = [StageKind::Precompute, StageKind::D2D, StageKind::Barrier];

#[test]
fn test_rejects_barrier_first() {
    let mut tracker = StageTracker::new(1);
    let err = tracker.advance(StageKind::Barrier, ExecutionMode::Eager).unwrap_err();
    assert!(matches!(
        err,
        ReaderError::OutOfOrder {
            device_id: 1,
            stage: StageKind::Barrier,
            expected: StageKind::Precompute,
        }
    ));
    assert_eq!(tracker.phase(), StagePhase::Idle);
}

#[test]
fn test_mode_resets_between_batches() {
    let mut tracker = StageTracker::new(0);
    for stage in STAGES {
        tracker.advance(stage, ExecutionMode::Eager).unwrap();
    }
    // Next batch may use the other mode
    for stage in STAGES {
        tracker.advance(stage, ExecutionMode::Capturing).unwrap();
    }
    assert_eq!(tracker.batches_scheduled(), 2);
    assert_eq!(tracker.mode(), None);
}

proptest! {
    #[test]
    fn accepted_stages_form_whole_batches(
        calls in prop::collection::vec((0usize..3, any::<bool>()), 0..64)
    ) {
        let mut tracker = StageTracker::new(0);
        let mut accepted = Vec::new();

        for (stage_idx, capturing) in calls {
            let stage = STAGES[stage_idx];
            let mode = ExecutionMode::from_graph(capturing);
            let expected = tracker.expected();
            match tracker.advance(stage, mode) {
                Ok(()) => {
                    prop_assert_eq!(stage, expected);
                    accepted.push((stage, mode));
                }
                Err(e) => prop_assert!(e.is_fatal()),
            }
        }

        // Accepted calls are repetitions of P D B, one mode per batch
        for (idx, (stage, _)) in accepted.iter().enumerate() {
            prop_assert_eq!(*stage, STAGES[idx % 3]);
        }
        for batch in accepted.chunks(3) {
            prop_assert!(batch.iter().all(|(_, mode)| *mode == batch[0].1));
        }
        prop_assert_eq!(tracker.batches_scheduled(), (accepted.len() / 3) as u64);
    }
}
