//! Selection of the best-scoring contiguous frame range.
use clipseek_common::FrameIndex;
use std::collections::BTreeMap;

/// Inclusive bounds of the contiguous run of frames with the highest
/// aggregate score, per Kadane's maximum-subarray algorithm.
///
/// Scores arrive with zero-hit frames already normalized to −1, so runs of
/// empty frames never extend a positive region. When every score is
/// negative the result is the single least-negative frame. Returns [None]
/// only for an empty map, which a job (always ≥ 1 frame) never produces.
pub fn max_score_range(scores: &BTreeMap<FrameIndex, i64>) -> Option<(FrameIndex, FrameIndex)> {
    let mut frames = scores.iter();
    let (&first_frame, &first_score) = frames.next()?;

    let (mut best_start, mut best_end, mut best_sum) = (first_frame, first_frame, first_score);
    let (mut run_start, mut run_sum) = (first_frame, first_score);

    for (&frame, &score) in frames {
        if run_sum < 0 {
            // A negative prefix only drags the run down; restart here.
            run_start = frame;
            run_sum = score;
        } else {
            run_sum += score;
        }
        if run_sum > best_sum {
            (best_start, best_end, best_sum) = (run_start, frame, run_sum);
        }
    }

    Some((best_start, best_end))
}
