use crate::candidate::{Candidate, SharedCandidate};
use crate::connection::WorkerLink;
use crate::job::Job;
use futures::channel::oneshot::Sender;

/// Everything that mutates scheduling state arrives here, serialized onto the
/// monitor's event loop. Blocking operations carry a oneshot sender that is
/// resolved when their condition holds.
pub(crate) enum MonitorEvent<C: Candidate> {
    Registered {
        link: WorkerLink<C>,
    },
    Schedule {
        job: Job<C>,
        assigned: Sender<()>,
    },
    JobCompleted {
        worker: usize,
        job: Job<C>,
    },
    WorkerClosed {
        worker: usize,
        unfinished: Vec<Job<C>>,
    },
    AwaitDrain {
        done: Sender<()>,
    },
    PullCompleted {
        reply: Sender<(SharedCandidate<C>, usize)>,
    },
    QueryAvailable {
        reply: Sender<bool>,
    },
    QueryWorkerCount {
        reply: Sender<usize>,
    },
    Shutdown {
        done: Sender<()>,
    },
}
