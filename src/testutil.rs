use crate::candidate::{Candidate, SharedCandidate};
use crate::error::Error;
use crate::job::{JobKind, ResultItem};
use crate::monitor::Monitor;
use crate::protocol::{self, IncomingFrame};
use crate::worker::Evaluator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Candidate with a scalar genome and a merge counter, so tests can detect an
/// item being merged more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarCandidate {
    pub genome: f64,
    pub fitness: f64,
    pub evaluated: bool,
    pub merge_count: u32,
}

impl ScalarCandidate {
    pub fn new(genome: f64) -> Self {
        Self {
            genome,
            fitness: 0.0,
            evaluated: false,
            merge_count: 0,
        }
    }
}

impl Candidate for ScalarCandidate {
    fn fitness(&self) -> f64 {
        self.fitness
    }

    fn set_fitness(&mut self, fitness: f64) {
        self.fitness = fitness;
        self.merge_count += 1;
    }

    fn is_evaluated(&self) -> bool {
        self.evaluated
    }

    fn set_evaluated(&mut self, evaluated: bool) {
        self.evaluated = evaluated;
    }
}

/// Polls until the monitor has registered the expected number of workers.
pub async fn wait_for_workers<C: Candidate>(monitor: &Monitor<C>, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while monitor.worker_count().await != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("workers did not reach the expected count in time");
}

pub fn shared_scalars(genomes: &[f64]) -> Vec<SharedCandidate<ScalarCandidate>> {
    genomes
        .iter()
        .map(|&genome| SharedCandidate::new(ScalarCandidate::new(genome)))
        .collect()
}

/// In-process evaluator: the fitness of a scalar candidate is its genome
/// value. Writes the field directly so the merge counter only ever counts
/// master-side merges.
pub struct IdentityEvaluator;

#[async_trait]
impl Evaluator<ScalarCandidate> for IdentityEvaluator {
    async fn evaluate(&self, candidate: &mut ScalarCandidate, _slot: usize) -> Result<(), Error> {
        candidate.fitness = candidate.genome;
        Ok(())
    }

    async fn evaluate_group(
        &self,
        candidates: &mut [ScalarCandidate],
        _slots: &[usize],
        _count_victories_only: bool,
    ) -> Result<(), Error> {
        for candidate in candidates {
            candidate.fitness = candidate.genome;
        }
        Ok(())
    }
}

pub struct ReceivedItem {
    pub candidate: ScalarCandidate,
    pub slot: usize,
    pub update_fitness: bool,
}

pub struct ReceivedJob {
    pub kind: JobKind,
    pub count_victories_only: bool,
    pub items: Vec<ReceivedItem>,
}

/// A hand-driven worker speaking the raw wire protocol, for tests that need
/// control over exactly when results appear and when the connection dies.
pub struct FakeWorker {
    stream: TcpStream,
    pub seed: u32,
    pub return_candidates: bool,
    pub bootstrap: Vec<u8>,
}

impl FakeWorker {
    pub async fn connect(addr: SocketAddr, name: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.set_nodelay(true).ok();
        protocol::write_string(&mut stream, name).await.unwrap();
        let handshake = protocol::read_handshake(&mut stream).await.unwrap();
        Self {
            stream,
            seed: handshake.seed,
            return_candidates: handshake.return_candidates,
            bootstrap: handshake.bootstrap,
        }
    }

    pub async fn read_job(&mut self) -> ReceivedJob {
        match protocol::read_job_frame::<ScalarCandidate, _>(&mut self.stream)
            .await
            .unwrap()
        {
            IncomingFrame::Job(job) => ReceivedJob {
                kind: job.kind,
                count_victories_only: job.count_victories_only,
                items: job
                    .items
                    .into_iter()
                    .map(|item| ReceivedItem {
                        candidate: item.candidate,
                        slot: item.slot,
                        update_fitness: item.update_fitness,
                    })
                    .collect(),
            },
            IncomingFrame::Shutdown => panic!("received shutdown while expecting a job"),
        }
    }

    pub async fn expect_shutdown(&mut self) {
        match protocol::read_job_frame::<ScalarCandidate, _>(&mut self.stream)
            .await
            .unwrap()
        {
            IncomingFrame::Shutdown => {}
            IncomingFrame::Job(_) => panic!("received a job while expecting shutdown"),
        }
    }

    /// Replies one result frame, fitness-only granularity. `None` entries come
    /// back as "nothing returned".
    pub async fn reply_fitness(&mut self, fitnesses: &[Option<f64>]) {
        for fitness in fitnesses {
            let result = match fitness {
                Some(fitness) => ResultItem::<ScalarCandidate>::FitnessOnly {
                    evaluated: true,
                    fitness: *fitness,
                },
                None => ResultItem::Nothing,
            };
            protocol::write_result_item(&mut self.stream, &result)
                .await
                .unwrap();
        }
    }

    /// Replies one result frame returning whole candidates.
    pub async fn reply_full(&mut self, candidates: Vec<ScalarCandidate>) {
        for candidate in candidates {
            protocol::write_result_item(&mut self.stream, &ResultItem::Full(candidate))
                .await
                .unwrap();
        }
    }
}
