//! Pure frame plan for the cascade pipeline.
//!
//! The per-frame work is expressed as an ordered list of pass operations
//! that the GPU executor walks verbatim. Gather dispatches write disjoint
//! buffers and only read frame-stable inputs, so they need no barriers
//! between them; the merge reduction has a real read-after-write dependency
//! between consecutive steps and therefore carries a barrier after every
//! dispatch. Modelling the sequence as data keeps the ordering constraints
//! testable without a GPU.

use crate::params::PipelineParameters;

/// One step of the per-frame pipeline, in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOp {
    /// Gather raw directional samples for one cascade level.
    Gather { level: u32 },
    /// Synchronization point: prior writes must be visible to later reads.
    Barrier,
    /// Fold `source_level` into the next-finer level (`source_level - 1`).
    Merge { source_level: u32 },
    /// Sample the given layer's buffer into the presentable surface.
    Resolve { layer: u32 },
}

/// Builds the ordered pass list for one frame.
///
/// The merge reduction runs coarsest to finest (`N-1` down to `1`), each
/// dispatch followed by a barrier, so level `k-1`'s read of level `k` is
/// ordered after level `k`'s write. This strict sequencing is
/// correctness-critical; the merge steps must not be reordered or batched.
pub fn frame_ops(level_count: u32, params: &PipelineParameters) -> Vec<PassOp> {
    if level_count == 0 {
        return Vec::new();
    }

    let mut ops = Vec::with_capacity(level_count as usize * 2 + 2);
    for level in 0..level_count {
        ops.push(PassOp::Gather { level });
    }
    ops.push(PassOp::Barrier);

    if params.apply_merge {
        for source_level in (1..level_count).rev() {
            ops.push(PassOp::Merge { source_level });
            ops.push(PassOp::Barrier);
        }
    }

    ops.push(PassOp::Resolve {
        layer: params.display_layer.min(level_count - 1),
    });
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_sequence_is_strictly_descending_with_barriers() {
        let params = PipelineParameters::default();
        let ops = frame_ops(7, &params);

        let merge_section: Vec<&PassOp> = ops
            .iter()
            .skip_while(|op| !matches!(op, PassOp::Merge { .. }))
            .take_while(|op| matches!(op, PassOp::Merge { .. } | PassOp::Barrier))
            .collect();

        let mut expected = Vec::new();
        for source_level in (1..7).rev() {
            expected.push(PassOp::Merge { source_level });
            expected.push(PassOp::Barrier);
        }
        let actual: Vec<PassOp> = merge_section.into_iter().copied().collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn gathers_precede_single_barrier_before_merge() {
        let params = PipelineParameters::default();
        let ops = frame_ops(3, &params);

        assert_eq!(
            &ops[..4],
            &[
                PassOp::Gather { level: 0 },
                PassOp::Gather { level: 1 },
                PassOp::Gather { level: 2 },
                PassOp::Barrier,
            ]
        );
    }

    #[test]
    fn merge_bypass_goes_straight_to_resolve() {
        let params = PipelineParameters {
            apply_merge: false,
            ..PipelineParameters::default()
        };
        let ops = frame_ops(4, &params);

        assert!(!ops.iter().any(|op| matches!(op, PassOp::Merge { .. })));
        assert_eq!(
            ops,
            vec![
                PassOp::Gather { level: 0 },
                PassOp::Gather { level: 1 },
                PassOp::Gather { level: 2 },
                PassOp::Gather { level: 3 },
                PassOp::Barrier,
                PassOp::Resolve { layer: 0 },
            ]
        );
    }

    #[test]
    fn zero_levels_issues_no_work() {
        let params = PipelineParameters::default();
        assert!(frame_ops(0, &params).is_empty());
    }

    #[test]
    fn single_level_has_no_merge_steps() {
        let params = PipelineParameters::default();
        let ops = frame_ops(1, &params);
        assert_eq!(
            ops,
            vec![
                PassOp::Gather { level: 0 },
                PassOp::Barrier,
                PassOp::Resolve { layer: 0 },
            ]
        );
    }

    #[test]
    fn resolve_layer_is_clamped_to_available_levels() {
        let params = PipelineParameters {
            display_layer: 9,
            ..PipelineParameters::default()
        };
        let ops = frame_ops(3, &params);
        assert_eq!(ops.last(), Some(&PassOp::Resolve { layer: 2 }));
    }

    #[test]
    fn every_merge_is_followed_by_a_barrier() {
        let params = PipelineParameters::default();
        let ops = frame_ops(6, &params);
        for (index, op) in ops.iter().enumerate() {
            if matches!(op, PassOp::Merge { .. }) {
                assert_eq!(ops.get(index + 1), Some(&PassOp::Barrier));
            }
        }
    }
}
