use crate::candidate::{Candidate, SharedCandidate};
use crate::error::Error;
use crate::job::{Job, JobItem, JobKind};
use crate::monitor::Monitor;
use itertools::Itertools;

/// The interface the evolutionary engine calls. When a batch size is
/// configured, independently evaluated candidates accumulate client-side until
/// the batch fills; grouped submissions always bypass batching because the
/// group must travel to one worker as a unit.
pub struct EvalClient<C: Candidate> {
    monitor: Monitor<C>,
    batch_size: usize,
    num_slots: Option<usize>,
    buffer: Vec<JobItem<C>>,
}

impl<C: Candidate> EvalClient<C> {
    pub(crate) fn new(monitor: Monitor<C>, batch_size: usize, num_slots: Option<usize>) -> Self {
        Self {
            monitor,
            batch_size,
            num_slots,
            buffer: Vec::new(),
        }
    }

    /// True iff at least one worker currently has admission headroom. Not
    /// atomic with a subsequent submit; availability may change in between.
    pub async fn can_evaluate(&self) -> bool {
        self.monitor.has_available().await
    }

    /// Submits candidates for independent evaluation. With batching enabled,
    /// jobs are only dispatched once a full batch has accumulated; call
    /// `await_all` (or `flush`) to push out a partial batch.
    pub async fn submit(
        &mut self,
        candidates: &[SharedCandidate<C>],
        slots: &[usize],
    ) -> Result<(), Error> {
        self.check_slots(slots)?;

        if self.batch_size == 0 {
            let job = Job::independent(candidates, slots);
            if !job.is_empty() {
                self.monitor.schedule(job).await;
            }
            return Ok(());
        }

        let items = candidates
            .iter()
            .zip_eq(slots)
            .map(|(candidate, &slot)| JobItem {
                candidate: candidate.clone(),
                slot,
                update_fitness: true,
            });
        self.buffer.extend(items);

        while self.buffer.len() >= self.batch_size {
            let batch: Vec<JobItem<C>> = self.buffer.drain(..self.batch_size).collect();
            self.monitor
                .schedule(Job::from_items(JobKind::Independent, false, batch))
                .await;
        }
        Ok(())
    }

    /// Submits a group that must be evaluated together. Never batched: the job
    /// contains exactly the given group.
    pub async fn submit_grouped(
        &mut self,
        candidates: &[SharedCandidate<C>],
        update_fitness: &[bool],
        count_victories_only: bool,
        slots: &[usize],
    ) -> Result<(), Error> {
        self.check_slots(slots)?;
        let job = Job::grouped(candidates, update_fitness, count_victories_only, slots);
        if !job.is_empty() {
            self.monitor.schedule(job).await;
        }
        Ok(())
    }

    /// Dispatches any partially filled batch immediately.
    pub async fn flush(&mut self) {
        if !self.buffer.is_empty() {
            let batch: Vec<JobItem<C>> = self.buffer.drain(..).collect();
            self.monitor
                .schedule(Job::from_items(JobKind::Independent, false, batch))
                .await;
        }
    }

    /// Flushes, then blocks until all outstanding jobs have drained.
    pub async fn await_all(&mut self) {
        self.flush().await;
        self.monitor.await_drain().await;
    }

    /// Pulls one completed (candidate, slot) pair as it arrives; the
    /// steady-state consumption style.
    pub async fn next_completed(&self) -> Result<(SharedCandidate<C>, usize), Error> {
        self.monitor.pull_completed().await
    }

    fn check_slots(&self, slots: &[usize]) -> Result<(), Error> {
        if let Some(num_slots) = self.num_slots {
            for &slot in slots {
                if slot >= num_slots {
                    return Err(Error::SlotOutOfRange { slot, num_slots });
                }
            }
        }
        Ok(())
    }
}
