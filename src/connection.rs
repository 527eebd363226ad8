use crate::candidate::Candidate;
use crate::error::Error;
use crate::event::MonitorEvent;
use crate::job::{Job, JobKind};
use crate::protocol;
use crate::transport::{TransportReader, TransportWriter};
use futures::channel::mpsc::UnboundedSender;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;

/// Handle to one connected worker. The link exclusively owns the worker's job
/// queue; the monitor only ever asks it to enqueue, and the queue is drained
/// back to the monitor in one step when the connection dies.
pub(crate) struct WorkerLink<C: Candidate> {
    pub(crate) id: usize,
    pub(crate) name: Arc<str>,
    inner: Arc<LinkInner<C>>,
}

impl<C: Candidate> Clone for WorkerLink<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

struct LinkInner<C: Candidate> {
    queue: Mutex<VecDeque<Job<C>>>,
    send_wakeup: Notify,
    recv_wakeup: Notify,
    closing: AtomicBool,
    events: UnboundedSender<MonitorEvent<C>>,
}

impl<C: Candidate> WorkerLink<C> {
    pub(crate) fn spawn(
        id: usize,
        name: String,
        reader: TransportReader,
        writer: TransportWriter,
        events: UnboundedSender<MonitorEvent<C>>,
    ) -> Self {
        let link = Self {
            id,
            name: name.into(),
            inner: Arc::new(LinkInner {
                queue: Mutex::new(VecDeque::new()),
                send_wakeup: Notify::new(),
                recv_wakeup: Notify::new(),
                closing: AtomicBool::new(false),
                events,
            }),
        };

        tokio::spawn(send_loop(link.clone(), writer));
        tokio::spawn(recv_loop(link.clone(), reader));

        link
    }

    /// Appends a job to the tail of this worker's queue and wakes the send
    /// loop. Only jobs that have never been transmitted may be enqueued.
    pub(crate) fn enqueue(&self, job: Job<C>) {
        assert!(
            !job.sent,
            "attempt to enqueue an already-sent job on worker {:?}",
            self.name
        );
        self.lock_queue().push_back(job);
        self.inner.send_wakeup.notify_one();
    }

    /// Idempotent: the first caller wins, severs the connection, and hands
    /// every job still in the queue back to the monitor for reassignment.
    pub(crate) fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("worker {:?}: closing connection", self.name);

        let unfinished: Vec<Job<C>> = self
            .lock_queue()
            .drain(..)
            .map(|mut job| {
                job.sent = false;
                job
            })
            .collect();

        self.inner.send_wakeup.notify_one();
        self.inner.recv_wakeup.notify_one();
        self.inner
            .events
            .unbounded_send(MonitorEvent::WorkerClosed {
                worker: self.id,
                unfinished,
            })
            .ok();
    }

    fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Job<C>>> {
        self.inner.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Marks the oldest unsent job as sent and returns the frame data to
    /// transmit for it. Snapshots are taken under the queue lock; encoding and
    /// I/O happen outside it.
    fn take_unsent_frame(&self) -> Option<(JobKind, bool, Vec<(C, usize, bool)>)> {
        let mut queue = self.lock_queue();
        let job = queue.iter_mut().find(|job| !job.sent)?;
        job.sent = true;
        Some((job.kind, job.count_victories_only, job.snapshot_items()))
    }

    fn head_len(&self) -> Option<usize> {
        self.lock_queue().front().map(Job::len)
    }

    fn pop_head(&self) -> Option<Job<C>> {
        self.lock_queue().pop_front()
    }
}

async fn send_loop<C: Candidate>(link: WorkerLink<C>, mut writer: TransportWriter) {
    loop {
        if link.is_closing() {
            break;
        }
        match link.take_unsent_frame() {
            Some((kind, count_victories_only, items)) => {
                trace!(
                    "worker {:?}: sending {} job, {} items",
                    link.name,
                    kind,
                    items.len()
                );
                let written = async {
                    protocol::write_job_frame(&mut writer, kind, count_victories_only, &items)
                        .await?;
                    writer.flush().await?;
                    Ok::<(), Error>(())
                }
                .await;

                if let Err(err) = written {
                    warn!("worker {:?}: send failed: {}", link.name, err);
                    link.close();
                }
            }
            None => link.inner.send_wakeup.notified().await,
        }
    }

    // Tell the worker to stop before severing the stream. After a transport
    // failure these writes fail silently.
    writer.write_u8(protocol::KIND_SHUTDOWN).await.ok();
    writer.flush().await.ok();
    writer.shutdown().await.ok();
    debug!("worker {:?}: send loop stopped", link.name);
}

async fn recv_loop<C: Candidate>(link: WorkerLink<C>, mut reader: TransportReader) {
    loop {
        if link.is_closing() {
            break;
        }
        tokio::select! {
            _ = link.inner.recv_wakeup.notified() => continue,
            read = read_job_results(&link, &mut reader) => {
                if let Err(err) = read {
                    match err {
                        Error::Io(ref io_err) => {
                            debug!("worker {:?}: connection lost: {}", link.name, io_err)
                        }
                        ref err => warn!("worker {:?}: receive failed: {}", link.name, err),
                    }
                    link.close();
                    break;
                }
            }
        }
    }
    debug!("worker {:?}: receive loop stopped", link.name);
}

/// Reads one job's complete result set. Results arrive strictly in the order
/// jobs were sent, so the head of the queue is the job being answered. The
/// original candidates are not touched until every item has been decoded; a
/// connection that dies mid-frame redistributes the whole job unmerged.
async fn read_job_results<C: Candidate>(
    link: &WorkerLink<C>,
    reader: &mut TransportReader,
) -> Result<(), Error> {
    let first_tag = tokio::io::AsyncReadExt::read_u8(reader).await?;

    let expected = match link.head_len() {
        Some(len) => len,
        // The queue was drained by a concurrent close; discard and let the
        // loop observe the closing flag.
        None if link.is_closing() => return Ok(()),
        None => return Err(Error::UnexpectedResult),
    };

    let mut results = Vec::with_capacity(expected);
    results.push(protocol::read_result_item_body(reader, first_tag).await?);
    for _ in 1..expected {
        results.push(protocol::read_result_item(reader).await?);
    }

    match link.pop_head() {
        Some(job) => {
            job.merge(results);
            trace!(
                "worker {:?}: completed job of {} items",
                link.name,
                job.len()
            );
            link.inner
                .events
                .unbounded_send(MonitorEvent::JobCompleted {
                    worker: link.id,
                    job,
                })
                .ok();
        }
        // Drained by a concurrent close after we started reading; the job is
        // already on its way to another worker, so merging here would deliver
        // the same items twice.
        None => {}
    }

    Ok(())
}
