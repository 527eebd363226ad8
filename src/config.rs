use crate::error::Error;
use std::time::Duration;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:15000";
const DEFAULT_MAX_JOBS_PER_WORKER: usize = 1;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Validated master-side settings. Produced by [`MasterConfigBuilder`].
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub bind_addr: String,
    pub max_jobs_per_worker: usize,
    pub batch_size: usize,
    pub steady_state: bool,
    pub return_candidates: bool,
    pub compress: bool,
    pub seed: Option<u64>,
    pub num_slots: Option<usize>,
    pub handshake_extra: Vec<u8>,
}

#[derive(Default)]
pub struct MasterConfigBuilder {
    bind_addr: Option<String>,
    max_jobs_per_worker: Option<usize>,
    batch_size: Option<usize>,
    steady_state: Option<bool>,
    return_candidates: Option<bool>,
    compress: Option<bool>,
    seed: Option<u64>,
    num_slots: Option<usize>,
    handshake_extra: Option<Vec<u8>>,
}

impl MasterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_addr(&mut self, bind_addr: impl Into<String>) -> &mut Self {
        self.bind_addr = Some(bind_addr.into());
        self
    }

    /// Admission threshold: a worker is only handed another job while it has
    /// fewer than this many outstanding.
    pub fn max_jobs_per_worker(&mut self, max_jobs_per_worker: usize) -> &mut Self {
        self.max_jobs_per_worker = Some(max_jobs_per_worker);
        self
    }

    /// Client-side batch size for independent submissions; 0 disables
    /// batching.
    pub fn batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Steady-state mode: completed items are staged for incremental pulls via
    /// `next_completed` instead of only being awaited in bulk.
    pub fn steady_state(&mut self, steady_state: bool) -> &mut Self {
        self.steady_state = Some(steady_state);
        self
    }

    /// Whether workers return whole candidates or only fitness values. The
    /// choice is announced to each worker in the handshake.
    pub fn return_candidates(&mut self, return_candidates: bool) -> &mut Self {
        self.return_candidates = Some(return_candidates);
        self
    }

    pub fn compress(&mut self, compress: bool) -> &mut Self {
        self.compress = Some(compress);
        self
    }

    /// Pins the seed from which per-worker seeds are derived.
    pub fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = Some(seed);
        self
    }

    /// Enables slot-range validation on submission.
    pub fn num_slots(&mut self, num_slots: usize) -> &mut Self {
        self.num_slots = Some(num_slots);
        self
    }

    /// Opaque bytes appended to the handshake, handed to each worker's
    /// evaluator at bootstrap.
    pub fn handshake_extra(&mut self, handshake_extra: Vec<u8>) -> &mut Self {
        self.handshake_extra = Some(handshake_extra);
        self
    }

    pub fn build(&mut self) -> Result<MasterConfig, Error> {
        let max_jobs_per_worker = self
            .max_jobs_per_worker
            .unwrap_or(DEFAULT_MAX_JOBS_PER_WORKER);
        if max_jobs_per_worker == 0 {
            return Err(Error::ZeroMaxJobsPerWorker);
        }

        Ok(MasterConfig {
            bind_addr: self
                .bind_addr
                .clone()
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_jobs_per_worker,
            batch_size: self.batch_size.unwrap_or(0),
            steady_state: self.steady_state.unwrap_or(false),
            return_candidates: self.return_candidates.unwrap_or(false),
            compress: self.compress.unwrap_or(false),
            seed: self.seed,
            num_slots: self.num_slots,
            handshake_extra: self.handshake_extra.clone().unwrap_or_default(),
        })
    }
}

/// Validated worker-side settings. Produced by [`WorkerConfigBuilder`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub master_addr: String,
    pub name: String,
    pub eval_threads: usize,
    pub retry_backoff: Duration,
    pub one_shot: bool,
    pub compress: bool,
    pub local_search: Option<Duration>,
    pub num_slots: Option<usize>,
}

pub struct WorkerConfigBuilder {
    master_addr: String,
    name: String,
    eval_threads: Option<usize>,
    retry_backoff: Option<Duration>,
    one_shot: Option<bool>,
    compress: Option<bool>,
    local_search: Option<Duration>,
    num_slots: Option<usize>,
}

impl WorkerConfigBuilder {
    pub fn new(master_addr: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            name: name.into(),
            eval_threads: None,
            retry_backoff: None,
            one_shot: None,
            compress: None,
            local_search: None,
            num_slots: None,
        }
    }

    /// Upper bound on concurrent independent evaluations; capped at the
    /// available hardware parallelism.
    pub fn eval_threads(&mut self, eval_threads: usize) -> &mut Self {
        self.eval_threads = Some(eval_threads);
        self
    }

    /// Fixed interval between connection attempts while no master is
    /// reachable.
    pub fn retry_backoff(&mut self, retry_backoff: Duration) -> &mut Self {
        self.retry_backoff = Some(retry_backoff);
        self
    }

    /// One-shot workers exit when the master shuts down or the connection is
    /// lost; persistent workers go back to waiting for a master.
    pub fn one_shot(&mut self, one_shot: bool) -> &mut Self {
        self.one_shot = Some(one_shot);
        self
    }

    pub fn compress(&mut self, compress: bool) -> &mut Self {
        self.compress = Some(compress);
        self
    }

    /// Budget for a bounded burst of local search after each independent
    /// evaluation.
    pub fn local_search(&mut self, budget: Duration) -> &mut Self {
        self.local_search = Some(budget);
        self
    }

    pub fn num_slots(&mut self, num_slots: usize) -> &mut Self {
        self.num_slots = Some(num_slots);
        self
    }

    pub fn build(&mut self) -> Result<WorkerConfig, Error> {
        if self.name.is_empty() {
            return Err(Error::EmptyWorkerName);
        }
        let eval_threads = self.eval_threads.unwrap_or(1);
        if eval_threads == 0 {
            return Err(Error::ZeroEvalThreads);
        }

        Ok(WorkerConfig {
            master_addr: self.master_addr.clone(),
            name: self.name.clone(),
            eval_threads,
            retry_backoff: self.retry_backoff.unwrap_or(DEFAULT_RETRY_BACKOFF),
            one_shot: self.one_shot.unwrap_or(false),
            compress: self.compress.unwrap_or(false),
            local_search: self.local_search,
            num_slots: self.num_slots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn master_defaults() {
        let config = MasterConfigBuilder::new().build().unwrap();
        assert_eq!(config.max_jobs_per_worker, 1);
        assert_eq!(config.batch_size, 0);
        assert!(!config.steady_state);
        assert!(!config.return_candidates);
    }

    #[test]
    fn zero_admission_threshold_is_rejected() {
        let result = MasterConfigBuilder::new().max_jobs_per_worker(0).build();
        assert!(matches!(result.unwrap_err(), Error::ZeroMaxJobsPerWorker));
    }

    #[test]
    fn worker_name_must_not_be_empty() {
        let result = WorkerConfigBuilder::new("localhost:15000", "").build();
        assert!(matches!(result.unwrap_err(), Error::EmptyWorkerName));
    }

    #[test]
    fn zero_eval_threads_is_rejected() {
        let result = WorkerConfigBuilder::new("localhost:15000", "w0")
            .eval_threads(0)
            .build();
        assert!(matches!(result.unwrap_err(), Error::ZeroEvalThreads));
    }
}
