//! Nearest-agent selection for reallocating failed tasks.

use crate::core::types::Pos;

/// Pick the candidate closest to `target` by Manhattan distance, skipping
/// `exclude`. Ties resolve to the lexicographically smallest id.
pub fn nearest_agent<'a, I>(candidates: I, target: Pos, exclude: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, Pos)>,
{
    candidates
        .into_iter()
        .filter(|(id, _)| *id != exclude)
        .min_by(|(left_id, left_pose), (right_id, right_pose)| {
            left_pose
                .manhattan(target)
                .cmp(&right_pose.manhattan(target))
                .then_with(|| left_id.cmp(right_id))
        })
        .map(|(id, _)| id)
}
