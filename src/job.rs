use crate::candidate::{Candidate, SharedCandidate};
use enum_display_derive::Display;
use itertools::Itertools;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum JobKind {
    Independent,
    Grouped,
}

pub struct JobItem<C> {
    pub candidate: SharedCandidate<C>,
    pub slot: usize,
    pub update_fitness: bool,
}

/// A batch of candidates dispatched to one worker for evaluation. Owned by
/// exactly one worker link's queue at a time; item order is fixed at creation
/// because result demultiplexing relies on it.
pub struct Job<C: Candidate> {
    pub kind: JobKind,
    pub count_victories_only: bool,
    pub items: Vec<JobItem<C>>,
    pub(crate) sent: bool,
}

impl<C: Candidate> Job<C> {
    pub fn independent(candidates: &[SharedCandidate<C>], slots: &[usize]) -> Self {
        let items = candidates
            .iter()
            .zip_eq(slots)
            .map(|(candidate, &slot)| JobItem {
                candidate: candidate.clone(),
                slot,
                update_fitness: true,
            })
            .collect();

        Self::from_items(JobKind::Independent, false, items)
    }

    pub fn grouped(
        candidates: &[SharedCandidate<C>],
        update_fitness: &[bool],
        count_victories_only: bool,
        slots: &[usize],
    ) -> Self {
        let items = candidates
            .iter()
            .zip_eq(update_fitness)
            .zip_eq(slots)
            .map(|((candidate, &update_fitness), &slot)| JobItem {
                candidate: candidate.clone(),
                slot,
                update_fitness,
            })
            .collect();

        Self::from_items(JobKind::Grouped, count_victories_only, items)
    }

    pub(crate) fn from_items(
        kind: JobKind,
        count_victories_only: bool,
        items: Vec<JobItem<C>>,
    ) -> Self {
        Self {
            kind,
            count_victories_only,
            items,
            sent: false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Working copies for transmission, leaving the caller-held originals in
    /// place until results come back.
    pub(crate) fn snapshot_items(&self) -> Vec<(C, usize, bool)> {
        self.items
            .iter()
            .map(|item| (item.candidate.snapshot(), item.slot, item.update_fitness))
            .collect()
    }

    /// Merges a fully read result set into the original candidates. Called at
    /// most once per job, and only after every item's result has been decoded.
    pub(crate) fn merge(&self, results: Vec<ResultItem<C>>) {
        for (item, result) in self.items.iter().zip_eq(results) {
            match result {
                ResultItem::Nothing => {}
                ResultItem::Full(candidate) => item.candidate.replace(candidate),
                ResultItem::FitnessOnly { evaluated, fitness } => item.candidate.with(|c| {
                    c.set_fitness(fitness);
                    c.set_evaluated(evaluated);
                }),
            }
        }
    }
}

pub(crate) enum ResultItem<C> {
    Nothing,
    Full(C),
    FitnessOnly { evaluated: bool, fitness: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{shared_scalars, ScalarCandidate};
    use float_cmp::assert_approx_eq;

    #[test]
    fn independent_marks_all_items_for_update() {
        let candidates = shared_scalars(&[1.0, 2.0]);
        let job = Job::independent(&candidates, &[0, 1]);

        assert_eq!(job.kind, JobKind::Independent);
        assert_eq!(job.len(), 2);
        assert!(job.items.iter().all(|item| item.update_fitness));
        assert_eq!(job.items[1].slot, 1);
    }

    #[test]
    #[should_panic]
    fn mismatched_slots_are_rejected() {
        let candidates = shared_scalars(&[1.0, 2.0]);
        Job::<ScalarCandidate>::independent(&candidates, &[0]);
    }

    #[test]
    fn merge_writes_into_the_original_handles() {
        let candidates = shared_scalars(&[1.0, 2.0, 3.0]);
        let job = Job::grouped(&candidates, &[true, false, true], false, &[0, 0, 0]);

        job.merge(vec![
            ResultItem::FitnessOnly {
                evaluated: true,
                fitness: 10.0,
            },
            ResultItem::Nothing,
            ResultItem::FitnessOnly {
                evaluated: true,
                fitness: 30.0,
            },
        ]);

        assert_approx_eq!(f64, candidates[0].fitness(), 10.0);
        assert!(!candidates[1].is_evaluated());
        assert_approx_eq!(f64, candidates[2].fitness(), 30.0);
        assert_eq!(candidates[0].with(|c| c.merge_count), 1);
        assert_eq!(candidates[1].with(|c| c.merge_count), 0);
    }
}
