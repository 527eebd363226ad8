use crate::candidate::{Candidate, SharedCandidate};
use crate::client::EvalClient;
use crate::config::MasterConfig;
use crate::connection::WorkerLink;
use crate::error::Error;
use crate::event::MonitorEvent;
use crate::job::Job;
use crate::protocol::{self, Handshake};
use crate::shutdown::{self, ShutdownToken, ShutdownTrigger};
use crate::transport;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot;
use futures::StreamExt;
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// The coordinator. Owns the worker set, the round-robin availability queue,
/// and the completed-result queue; all of it lives inside a single event loop,
/// so registration, scheduling, completion, and failure handling never race.
pub struct Monitor<C: Candidate> {
    events: UnboundedSender<MonitorEvent<C>>,
    local_addr: SocketAddr,
    trigger: Arc<ShutdownTrigger>,
    batch_size: usize,
    num_slots: Option<usize>,
}

impl<C: Candidate> Clone for Monitor<C> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
            local_addr: self.local_addr,
            trigger: self.trigger.clone(),
            batch_size: self.batch_size,
            num_slots: self.num_slots,
        }
    }
}

impl<C: Candidate> Monitor<C> {
    /// Binds the listening socket and starts the accept and scheduling loops.
    /// Workers may connect from the moment this returns.
    pub async fn bind(config: MasterConfig) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind_addr.as_str()).await?;
        let local_addr = listener.local_addr()?;
        info!("listening for workers on {}", local_addr);

        let (events, event_recv) = mpsc::unbounded();
        let (trigger, token) = shutdown::channel();

        tokio::spawn(accept_loop(listener, config.clone(), events.clone(), token));
        tokio::spawn(state_loop(config.clone(), event_recv));

        Ok(Self {
            events,
            local_addr,
            trigger: Arc::new(trigger),
            batch_size: config.batch_size,
            num_slots: config.num_slots,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Facade for the evolutionary engine, preconfigured from the master
    /// config. Each submitter thread should hold its own client.
    pub fn client(&self) -> EvalClient<C> {
        EvalClient::new(self.clone(), self.batch_size, self.num_slots)
    }

    /// Hands a job to the next available worker, blocking while every worker
    /// is at its admission threshold. During shutdown the job is silently
    /// dropped and the call returns immediately.
    pub async fn schedule(&self, job: Job<C>) {
        let (assigned, confirmation) = oneshot::channel();
        if self
            .events
            .unbounded_send(MonitorEvent::Schedule { job, assigned })
            .is_err()
        {
            return;
        }
        confirmation.await.ok();
    }

    /// Blocks until no assigned or pending jobs remain. Jobs scheduled
    /// concurrently by other tasks extend the wait; this call means "finish
    /// what has been submitted", not "freeze the system".
    pub async fn await_drain(&self) {
        let (done, drained) = oneshot::channel();
        if self
            .events
            .unbounded_send(MonitorEvent::AwaitDrain { done })
            .is_err()
        {
            return;
        }
        drained.await.ok();
    }

    /// Pops one completed (candidate, slot) pair, blocking until a result
    /// exists. Only meaningful when the master runs in steady-state mode.
    pub async fn pull_completed(&self) -> Result<(SharedCandidate<C>, usize), Error> {
        let (reply, result) = oneshot::channel();
        self.events
            .unbounded_send(MonitorEvent::PullCompleted { reply })
            .map_err(|_| Error::MonitorShutDown)?;
        result.await.map_err(|_| Error::MonitorShutDown)
    }

    /// Snapshot of "is any worker available right now". Availability can
    /// change before a subsequent call; this is advisory, not a reservation.
    pub async fn has_available(&self) -> bool {
        let (reply, result) = oneshot::channel();
        if self
            .events
            .unbounded_send(MonitorEvent::QueryAvailable { reply })
            .is_err()
        {
            return false;
        }
        result.await.unwrap_or(false)
    }

    pub async fn worker_count(&self) -> usize {
        let (reply, result) = oneshot::channel();
        if self
            .events
            .unbounded_send(MonitorEvent::QueryWorkerCount { reply })
            .is_err()
        {
            return 0;
        }
        result.await.unwrap_or(0)
    }

    /// Stops accepting connections, tells every worker to shut down, and wakes
    /// all blocked callers so they observe the shutdown.
    pub async fn shutdown(&self) {
        self.trigger.trigger();
        let (done, finished) = oneshot::channel();
        if self
            .events
            .unbounded_send(MonitorEvent::Shutdown { done })
            .is_err()
        {
            return;
        }
        finished.await.ok();
    }
}

async fn accept_loop<C: Candidate>(
    listener: TcpListener,
    config: MasterConfig,
    events: UnboundedSender<MonitorEvent<C>>,
    token: ShutdownToken,
) {
    let mut rng = StdRng::seed_from_u64(config.seed.unwrap_or_else(rand::random));
    let mut next_id = 0usize;

    loop {
        let accepted = tokio::select! {
            _ = token.triggered() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let id = next_id;
                next_id += 1;
                let seed: u32 = rng.gen();
                tokio::spawn(register_worker(
                    stream,
                    peer,
                    id,
                    seed,
                    config.clone(),
                    events.clone(),
                ));
            }
            Err(err) => warn!("failed to accept worker connection: {}", err),
        }
    }
    debug!("accept loop stopped");
}

async fn register_worker<C: Candidate>(
    stream: TcpStream,
    peer: SocketAddr,
    id: usize,
    seed: u32,
    config: MasterConfig,
    events: UnboundedSender<MonitorEvent<C>>,
) {
    if let Err(err) = try_register_worker(stream, peer, id, seed, config, events).await {
        warn!("handshake with {} failed: {}", peer, err);
    }
}

async fn try_register_worker<C: Candidate>(
    stream: TcpStream,
    peer: SocketAddr,
    id: usize,
    seed: u32,
    config: MasterConfig,
    events: UnboundedSender<MonitorEvent<C>>,
) -> Result<(), Error> {
    stream.set_nodelay(true).ok();
    let (mut reader, mut writer) = transport::wrap(stream, config.compress)?;

    let name = protocol::read_string(&mut reader, protocol::MAX_NAME_BYTES).await?;
    protocol::write_handshake(
        &mut writer,
        &Handshake {
            seed,
            return_candidates: config.return_candidates,
            bootstrap: config.handshake_extra.clone(),
        },
    )
    .await?;
    tokio::io::AsyncWriteExt::flush(&mut writer).await?;

    info!("worker {:?} connected from {} with seed {}", name, peer, seed);
    let link = WorkerLink::spawn(id, name, reader, writer, events.clone());
    events
        .unbounded_send(MonitorEvent::Registered { link })
        .ok();
    Ok(())
}

struct PendingJob<C: Candidate> {
    job: Job<C>,
    assigned: Option<oneshot::Sender<()>>,
}

struct State<C: Candidate> {
    max_jobs_per_worker: usize,
    steady_state: bool,
    shutting_down: bool,
    workers: FxHashMap<usize, WorkerLink<C>>,
    outstanding: FxHashMap<usize, usize>,
    available: VecDeque<usize>,
    pending: VecDeque<PendingJob<C>>,
    completed: VecDeque<(SharedCandidate<C>, usize)>,
    pull_waiters: VecDeque<oneshot::Sender<(SharedCandidate<C>, usize)>>,
    drain_waiters: Vec<oneshot::Sender<()>>,
}

async fn state_loop<C: Candidate>(
    config: MasterConfig,
    mut event_recv: UnboundedReceiver<MonitorEvent<C>>,
) {
    let mut state = State {
        max_jobs_per_worker: config.max_jobs_per_worker,
        steady_state: config.steady_state,
        shutting_down: false,
        workers: FxHashMap::default(),
        outstanding: FxHashMap::default(),
        available: VecDeque::new(),
        pending: VecDeque::new(),
        completed: VecDeque::new(),
        pull_waiters: VecDeque::new(),
        drain_waiters: Vec::new(),
    };

    while let Some(event) = event_recv.next().await {
        match event {
            MonitorEvent::Registered { link } => state.on_registered(link),
            MonitorEvent::Schedule { job, assigned } => state.on_schedule(job, assigned),
            MonitorEvent::JobCompleted { worker, job } => state.on_job_completed(worker, job),
            MonitorEvent::WorkerClosed { worker, unfinished } => {
                state.on_worker_closed(worker, unfinished)
            }
            MonitorEvent::AwaitDrain { done } => state.on_await_drain(done),
            MonitorEvent::PullCompleted { reply } => state.on_pull_completed(reply),
            MonitorEvent::QueryAvailable { reply } => {
                reply
                    .send(!state.shutting_down && !state.available.is_empty())
                    .ok();
            }
            MonitorEvent::QueryWorkerCount { reply } => {
                reply.send(state.workers.len()).ok();
            }
            // The loop keeps running after shutdown so that stragglers (a
            // worker whose handshake completed concurrently) are still closed
            // instead of leaking; it ends when the last event sender is gone.
            MonitorEvent::Shutdown { done } => {
                state.on_shutdown();
                done.send(()).ok();
            }
        }
    }
    debug!("scheduling loop stopped");
}

impl<C: Candidate> State<C> {
    fn on_registered(&mut self, link: WorkerLink<C>) {
        if self.shutting_down {
            link.close();
            return;
        }
        info!("worker {:?} registered (id {})", link.name, link.id);
        self.outstanding.insert(link.id, 0);
        self.available.push_back(link.id);
        self.workers.insert(link.id, link);
        self.dispatch();
    }

    fn on_schedule(&mut self, job: Job<C>, assigned: oneshot::Sender<()>) {
        if self.shutting_down {
            // Dropped silently; the caller unblocks and observes shutdown
            // through other channels.
            assigned.send(()).ok();
            return;
        }
        self.pending.push_back(PendingJob {
            job,
            assigned: Some(assigned),
        });
        self.dispatch();
    }

    /// Round-robin: take the worker at the front of the availability queue,
    /// re-admit it at the back while it still has headroom.
    fn dispatch(&mut self) {
        while !self.pending.is_empty() {
            let worker_id = match self.available.pop_front() {
                Some(id) => id,
                None => break,
            };
            let link = match self.workers.get(&worker_id) {
                Some(link) => link,
                None => continue,
            };
            let PendingJob { job, assigned } = match self.pending.pop_front() {
                Some(pending) => pending,
                None => break,
            };

            trace!(
                "assigning {} job of {} items to worker {:?}",
                job.kind,
                job.len(),
                link.name
            );
            link.enqueue(job);

            let outstanding = self.outstanding.entry(worker_id).or_insert(0);
            *outstanding += 1;
            if *outstanding < self.max_jobs_per_worker {
                self.available.push_back(worker_id);
            }

            if let Some(assigned) = assigned {
                assigned.send(()).ok();
            }
        }
    }

    fn on_job_completed(&mut self, worker_id: usize, job: Job<C>) {
        if let Some(outstanding) = self.outstanding.get_mut(&worker_id) {
            *outstanding = outstanding.saturating_sub(1);
            let outstanding = *outstanding;
            if !self.shutting_down
                && self.workers.contains_key(&worker_id)
                && outstanding < self.max_jobs_per_worker
                && !self.available.contains(&worker_id)
            {
                self.available.push_back(worker_id);
            }
        }

        if self.steady_state && !self.shutting_down {
            for item in &job.items {
                self.completed
                    .push_back((item.candidate.clone(), item.slot));
            }
            self.release_pull_waiters();
        }

        self.dispatch();
        self.check_drain();
    }

    fn on_worker_closed(&mut self, worker_id: usize, unfinished: Vec<Job<C>>) {
        if let Some(link) = self.workers.remove(&worker_id) {
            info!("worker {:?} deregistered (id {})", link.name, worker_id);
        }
        self.outstanding.remove(&worker_id);
        self.available.retain(|&id| id != worker_id);

        if !self.shutting_down && !unfinished.is_empty() {
            warn!(
                "redistributing {} unfinished jobs from worker {}",
                unfinished.len(),
                worker_id
            );
            // Ahead of new submissions, preserving original order.
            for job in unfinished.into_iter().rev() {
                self.pending.push_front(PendingJob {
                    job,
                    assigned: None,
                });
            }
            self.dispatch();
        }

        self.check_drain();
    }

    fn on_await_drain(&mut self, done: oneshot::Sender<()>) {
        if self.total_outstanding() == 0 {
            done.send(()).ok();
        } else {
            self.drain_waiters.push(done);
        }
    }

    fn on_pull_completed(&mut self, reply: oneshot::Sender<(SharedCandidate<C>, usize)>) {
        match self.completed.pop_front() {
            Some(item) => {
                if let Err(item) = reply.send(item) {
                    self.completed.push_front(item);
                }
            }
            // Dropping the sender during shutdown cancels the caller's wait.
            None if self.shutting_down => {}
            None => self.pull_waiters.push_back(reply),
        }
    }

    fn release_pull_waiters(&mut self) {
        while !self.pull_waiters.is_empty() && !self.completed.is_empty() {
            let waiter = match self.pull_waiters.pop_front() {
                Some(waiter) => waiter,
                None => break,
            };
            if waiter.is_canceled() {
                continue;
            }
            if let Some(item) = self.completed.pop_front() {
                if let Err(item) = waiter.send(item) {
                    self.completed.push_front(item);
                }
            }
        }
    }

    fn total_outstanding(&self) -> usize {
        self.pending.len() + self.outstanding.values().sum::<usize>()
    }

    fn check_drain(&mut self) {
        if self.total_outstanding() == 0 {
            for done in self.drain_waiters.drain(..) {
                done.send(()).ok();
            }
        }
    }

    fn on_shutdown(&mut self) {
        info!(
            "shutting down, {} workers connected, {} jobs pending",
            self.workers.len(),
            self.pending.len()
        );
        self.shutting_down = true;

        for link in self.workers.values() {
            link.close();
        }
        self.workers.clear();
        self.outstanding.clear();
        self.available.clear();

        for pending in self.pending.drain(..) {
            if let Some(assigned) = pending.assigned {
                assigned.send(()).ok();
            }
        }
        for done in self.drain_waiters.drain(..) {
            done.send(()).ok();
        }
        self.pull_waiters.clear();
        self.completed.clear();
    }
}
