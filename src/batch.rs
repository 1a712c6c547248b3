//! Grouped concurrent execution with a cooldown between groups.
//!
//! Inputs are split into fixed-size groups. A group's items run concurrently
//! on the current task and the group finishes only when all of them do; a
//! fixed cooldown separates groups to stay under provider rate limits.

use std::future::Future;
use std::time::{Duration, Instant};

use futures_util::future::join_all;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Items per concurrent group. Zero is treated as one.
    pub group_size: usize,
    /// Pause between consecutive groups.
    pub cooldown: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            group_size: 3,
            cooldown: Duration::from_secs(12),
        }
    }
}

/// Inputs tagged with their original index, split into groups.
#[derive(Debug)]
pub struct BatchPlan<T> {
    groups: Vec<Vec<(usize, T)>>,
    len: usize,
}

impl<T> BatchPlan<T> {
    pub fn new(inputs: Vec<T>, group_size: usize) -> Self {
        let group_size = group_size.max(1);
        let len = inputs.len();
        let mut groups: Vec<Vec<(usize, T)>> = Vec::with_capacity(len.div_ceil(group_size));

        for (index, input) in inputs.into_iter().enumerate() {
            match groups.last_mut() {
                Some(group) if group.len() < group_size => group.push((index, input)),
                _ => groups.push(vec![(index, input)]),
            }
        }

        Self { groups, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Original indices per group, in order.
    pub fn group_indices(&self) -> Vec<Vec<usize>> {
        self.groups
            .iter()
            .map(|g| g.iter().map(|(i, _)| *i).collect())
            .collect()
    }
}

/// Run `f(index, input)` for every input under `policy`. The returned vector
/// has the same length and order as `inputs`, whatever order items finish in.
/// `f` must capture its own failures in `R`; one item never aborts another.
pub async fn run_batch<T, R, F, Fut>(policy: &BatchPolicy, inputs: Vec<T>, f: F) -> Vec<R>
where
    F: Fn(usize, T) -> Fut,
    Fut: Future<Output = R>,
{
    let plan = BatchPlan::new(inputs, policy.group_size);
    let total = plan.len();
    let group_count = plan.group_count();
    let start = Instant::now();

    tracing::info!(total, group_count, "batch started");
    tracing::debug!(groups = ?plan.group_indices(), "batch plan");

    let mut results: Vec<R> = Vec::with_capacity(total);

    for (group_no, group) in plan.groups.into_iter().enumerate() {
        let first = group.first().map(|(i, _)| *i).unwrap_or_default();
        let size = group.len();
        tracing::info!(group = group_no + 1, first, size, "batch group started");

        // join_all yields outputs in the order its futures were given, so
        // placement is positional no matter which item completes first.
        let outputs = join_all(group.into_iter().map(|(index, input)| f(index, input))).await;
        results.extend(outputs);

        tracing::info!(group = group_no + 1, "batch group finished");

        if group_no + 1 < group_count {
            tracing::info!(
                cooldown_ms = policy.cooldown.as_millis() as u64,
                "cooling down before next group"
            );
            tokio::time::sleep(policy.cooldown).await;
        }
    }

    tracing::info!(
        total = results.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "batch finished"
    );
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_splits_into_fixed_groups() {
        let plan = BatchPlan::new(vec!["a", "b", "c", "d", "e", "f", "g"], 3);
        assert_eq!(plan.len(), 7);
        assert_eq!(plan.group_count(), 3);
        assert_eq!(
            plan.group_indices(),
            vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]
        );
    }

    #[test]
    fn plan_of_nothing_has_no_groups() {
        let plan: BatchPlan<u8> = BatchPlan::new(vec![], 3);
        assert!(plan.is_empty());
        assert_eq!(plan.group_count(), 0);
    }

    #[test]
    fn zero_group_size_is_clamped() {
        let plan = BatchPlan::new(vec![1, 2], 0);
        assert_eq!(plan.group_count(), 2);
    }
}
