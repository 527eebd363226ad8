use crate::candidate::Candidate;
use crate::config::WorkerConfig;
use crate::error::Error;
use crate::job::{JobKind, ResultItem};
use crate::protocol::{self, IncomingFrame, IncomingItem, IncomingJob};
use crate::transport::{self, TransportReader, TransportWriter};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use futures_timer::Delay;
use log::{debug, info, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// The evaluation callback a worker deployment plugs in. The engine's genetic
/// machinery never appears here; a candidate goes in, a fitness comes out.
#[async_trait]
pub trait Evaluator<C: Candidate>: Send + Sync + 'static {
    /// Called once per session with the seed and bootstrap bytes received in
    /// the handshake.
    fn bootstrap(&self, _seed: u32, _extra: &[u8]) {}

    /// Evaluates one candidate on its own. An error is recovered: it is
    /// logged and reported upstream as "nothing returned" for that item.
    async fn evaluate(&self, candidate: &mut C, slot: usize) -> Result<(), Error>;

    /// Evaluates candidates that only make sense as an interacting group.
    async fn evaluate_group(
        &self,
        candidates: &mut [C],
        slots: &[usize],
        count_victories_only: bool,
    ) -> Result<(), Error>;

    /// Optional bounded burst of local search applied after an independent
    /// evaluation. The implementation is responsible for honoring the budget.
    async fn refine(
        &self,
        _candidate: &mut C,
        _slot: usize,
        _budget: Duration,
    ) -> Result<(), Error> {
        Ok(())
    }
}

/// Worker main loop: connect (retrying on a fixed interval until a master
/// exists), handshake, serve jobs until the master shuts down or the
/// connection is lost, then exit or reconnect depending on one-shot mode.
///
/// Only protocol violations abort the loop with an error; transport failures
/// put a persistent worker back into its connect-retry cycle.
pub async fn run_worker<C, E>(config: WorkerConfig, evaluator: Arc<E>) -> Result<(), Error>
where
    C: Candidate,
    E: Evaluator<C>,
{
    // Address resolution failure is a setup error, not a retriable condition.
    let master_addr = resolve_master(&config.master_addr).await?;

    loop {
        let stream = connect_with_retry(master_addr, config.retry_backoff).await;
        let outcome = run_session(&config, &evaluator, stream).await;

        match outcome {
            Ok(()) => {
                if config.one_shot {
                    info!("master shut down, exiting");
                    return Ok(());
                }
                info!("master shut down, waiting for a new one");
            }
            Err(Error::Io(err)) => {
                if config.one_shot {
                    info!("connection to master lost ({}), exiting", err);
                    return Ok(());
                }
                warn!("connection to master lost ({}), reconnecting", err);
            }
            Err(err) => return Err(err),
        }
    }
}

async fn resolve_master(master_addr: &str) -> Result<SocketAddr, Error> {
    tokio::net::lookup_host(master_addr)
        .await?
        .next()
        .ok_or_else(|| Error::AddressUnresolved(master_addr.to_string()))
}

async fn connect_with_retry(master_addr: SocketAddr, backoff: Duration) -> TcpStream {
    loop {
        match TcpStream::connect(master_addr).await {
            Ok(stream) => return stream,
            Err(err) => {
                debug!(
                    "master at {} not reachable ({}), retrying in {:?}",
                    master_addr, err, backoff
                );
                Delay::new(backoff).await;
            }
        }
    }
}

async fn run_session<C, E>(
    config: &WorkerConfig,
    evaluator: &Arc<E>,
    stream: TcpStream,
) -> Result<(), Error>
where
    C: Candidate,
    E: Evaluator<C>,
{
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = transport::wrap(stream, config.compress)?;

    protocol::write_string(&mut writer, &config.name).await?;
    writer.flush().await?;
    let handshake = protocol::read_handshake(&mut reader).await?;
    info!(
        "connected to master as {:?}, seed {}",
        config.name, handshake.seed
    );
    evaluator.bootstrap(handshake.seed, &handshake.bootstrap);

    let pool_size = effective_pool_size(config.eval_threads);

    loop {
        let job = match protocol::read_job_frame::<C, _>(&mut reader).await? {
            IncomingFrame::Shutdown => {
                info!("received shutdown from master");
                let _ = writer.shutdown().await;
                return Ok(());
            }
            IncomingFrame::Job(job) => job,
        };

        check_slots(config, &job)?;
        trace!("received {} job, {} items", job.kind, job.items.len());

        let results = match job.kind {
            JobKind::Independent => {
                evaluate_independent(
                    evaluator,
                    job.items,
                    pool_size,
                    config.local_search,
                    handshake.return_candidates,
                )
                .await
            }
            JobKind::Grouped => {
                evaluate_grouped(evaluator, job, handshake.return_candidates).await
            }
        };

        for result in &results {
            protocol::write_result_item(&mut writer, result).await?;
        }
        writer.flush().await?;
    }
}

fn effective_pool_size(eval_threads: usize) -> usize {
    let hardware = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    eval_threads.min(hardware).max(1)
}

fn check_slots<C: Candidate>(config: &WorkerConfig, job: &IncomingJob<C>) -> Result<(), Error> {
    if let Some(num_slots) = config.num_slots {
        for item in &job.items {
            if item.slot >= num_slots {
                return Err(Error::SlotOutOfRange {
                    slot: item.slot,
                    num_slots,
                });
            }
        }
    }
    Ok(())
}

/// Runs items across a bounded pool. `buffered` preserves the input order, so
/// results go back to the master in submission order even when a later item
/// finishes computing first.
async fn evaluate_independent<C, E>(
    evaluator: &Arc<E>,
    items: Vec<IncomingItem<C>>,
    pool_size: usize,
    local_search: Option<Duration>,
    return_candidates: bool,
) -> Vec<ResultItem<C>>
where
    C: Candidate,
    E: Evaluator<C>,
{
    let evaluations = items.into_iter().map(|item| {
        let evaluator = evaluator.clone();
        async move {
            if !item.update_fitness {
                return ResultItem::Nothing;
            }

            let mut candidate = item.candidate;
            match evaluator.evaluate(&mut candidate, item.slot).await {
                Ok(()) => {
                    candidate.set_evaluated(true);
                    if let Some(budget) = local_search {
                        if let Err(err) = evaluator.refine(&mut candidate, item.slot, budget).await
                        {
                            warn!("local search failed for slot {}: {}", item.slot, err);
                        }
                    }
                    make_result(candidate, return_candidates)
                }
                Err(err) => {
                    warn!("evaluation failed for slot {}: {}", item.slot, err);
                    ResultItem::Nothing
                }
            }
        }
    });

    stream::iter(evaluations)
        .buffered(pool_size)
        .collect::<Vec<_>>()
        .await
}

async fn evaluate_grouped<C, E>(
    evaluator: &Arc<E>,
    job: IncomingJob<C>,
    return_candidates: bool,
) -> Vec<ResultItem<C>>
where
    C: Candidate,
    E: Evaluator<C>,
{
    let count = job.items.len();
    let mut candidates = Vec::with_capacity(count);
    let mut slots = Vec::with_capacity(count);
    let mut update_flags = Vec::with_capacity(count);
    for item in job.items {
        candidates.push(item.candidate);
        slots.push(item.slot);
        update_flags.push(item.update_fitness);
    }

    if let Err(err) = evaluator
        .evaluate_group(&mut candidates, &slots, job.count_victories_only)
        .await
    {
        warn!("grouped evaluation failed: {}", err);
        return (0..count).map(|_| ResultItem::Nothing).collect();
    }

    candidates
        .into_iter()
        .zip(update_flags)
        .map(|(mut candidate, update_fitness)| {
            if update_fitness {
                candidate.set_evaluated(true);
                make_result(candidate, return_candidates)
            } else {
                ResultItem::Nothing
            }
        })
        .collect()
}

fn make_result<C: Candidate>(candidate: C, return_candidates: bool) -> ResultItem<C> {
    if return_candidates {
        ResultItem::Full(candidate)
    } else {
        ResultItem::FitnessOnly {
            evaluated: candidate.is_evaluated(),
            fitness: candidate.fitness(),
        }
    }
}
