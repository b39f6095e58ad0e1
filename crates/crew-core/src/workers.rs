//! Per-thread worker dispatch.
//!
//! Every conversation thread gets its own worker task with a bounded
//! inbox. Messages within a thread are handled strictly in arrival
//! order; threads are independent and parallel. Workers exit after an
//! inactivity timeout and are respawned transparently by the next
//! dispatch. A panicking handler is contained inside the worker: it is
//! logged and the worker keeps processing subsequent messages.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crew_types::ThreadMessage;

/// Default bounded inbox capacity per worker.
const DEFAULT_INBOX_CAPACITY: usize = 10;

/// Default inactivity timeout before a worker exits.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// How many recent event ids the dedup window remembers.
const DEDUP_WINDOW: usize = 1024;

/// Handles one message on a worker's thread.
///
/// At most one invocation per thread runs at any instant; invocations
/// for a given thread happen in arrival order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one inbound message.
    async fn handle(&self, msg: ThreadMessage);
}

struct WorkerHandle {
    tx: mpsc::Sender<ThreadMessage>,
    done: Arc<AtomicBool>,
}

/// Maintains `thread_id → worker` and dispatches inbound messages.
pub struct WorkerRegistry {
    handler: Arc<dyn MessageHandler>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    seen_events: Mutex<(HashSet<String>, VecDeque<String>)>,
    inbox_capacity: usize,
    idle_timeout: Duration,
    shutdown: CancellationToken,
    accepting: AtomicBool,
}

impl WorkerRegistry {
    /// Create a registry with the default inbox capacity and idle timeout.
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_limits(handler, DEFAULT_INBOX_CAPACITY, DEFAULT_IDLE_TIMEOUT)
    }

    /// Create a registry with explicit limits.
    pub fn with_limits(
        handler: Arc<dyn MessageHandler>,
        inbox_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            handler,
            workers: Mutex::new(HashMap::new()),
            seen_events: Mutex::new((HashSet::new(), VecDeque::new())),
            inbox_capacity: inbox_capacity.max(1),
            idle_timeout,
            shutdown: CancellationToken::new(),
            accepting: AtomicBool::new(true),
        }
    }

    /// The shutdown token; cancel to stop all workers.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatch a message to its thread's worker, spawning one if needed.
    ///
    /// Transport retransmits (same `event_id`) and messages arriving
    /// after shutdown began are dropped. A full inbox also drops the
    /// message, with a warning -- that should not happen under normal
    /// load.
    pub fn dispatch(&self, msg: ThreadMessage) {
        if !self.accepting.load(Ordering::SeqCst) {
            debug!(thread_id = %msg.thread_id, "dispatcher draining, message dropped");
            return;
        }
        if self.is_duplicate(&msg.event_id) {
            debug!(event_id = %msg.event_id, "duplicate event dropped");
            return;
        }

        let thread_id = msg.thread_id.clone();
        let mut workers = self.workers.lock().unwrap();

        // Reuse the live worker when there is one.
        if let Some(handle) = workers.get(&thread_id) {
            if !handle.done.load(Ordering::SeqCst) {
                match handle.tx.try_send(msg) {
                    Ok(()) => return,
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        warn!(
                            thread_id = %thread_id,
                            message_id = %dropped.message_id,
                            "worker inbox full, message dropped"
                        );
                        return;
                    }
                    Err(mpsc::error::TrySendError::Closed(returned)) => {
                        // Worker exited between the done check and the send.
                        self.spawn_worker(&mut workers, thread_id, returned);
                        return;
                    }
                }
            }
        }

        self.spawn_worker(&mut workers, thread_id, msg);
    }

    fn spawn_worker(
        &self,
        workers: &mut HashMap<String, WorkerHandle>,
        thread_id: String,
        first: ThreadMessage,
    ) {
        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        let done = Arc::new(AtomicBool::new(false));
        // The fresh channel has capacity for the first message.
        let _ = tx.try_send(first);

        debug!(thread_id = %thread_id, "spawning thread worker");
        tokio::spawn(run_worker(
            thread_id.clone(),
            rx,
            done.clone(),
            self.handler.clone(),
            self.idle_timeout,
            self.shutdown.clone(),
        ));

        workers.insert(thread_id, WorkerHandle { tx, done });
    }

    fn is_duplicate(&self, event_id: &str) -> bool {
        if event_id.is_empty() {
            return false;
        }
        let mut seen = self.seen_events.lock().unwrap();
        if seen.0.contains(event_id) {
            return true;
        }
        seen.0.insert(event_id.to_string());
        seen.1.push_back(event_id.to_string());
        if seen.1.len() > DEDUP_WINDOW {
            if let Some(evicted) = seen.1.pop_front() {
                seen.0.remove(&evicted);
            }
        }
        false
    }

    /// Number of workers whose handle is still live.
    pub fn active_workers(&self) -> usize {
        let workers = self.workers.lock().unwrap();
        workers
            .values()
            .filter(|h| !h.done.load(Ordering::SeqCst))
            .count()
    }

    /// Stop accepting new messages and signal all workers to exit.
    ///
    /// Waits up to `grace` for the active workers to finish what they
    /// have; workers observe the shutdown token at their next select
    /// point.
    pub async fn shutdown(&self, grace: Duration) {
        info!("worker registry draining");
        self.accepting.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.active_workers() == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.active_workers(),
                    "shutdown grace expired with workers still active"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// The worker task: select over inbox, inactivity timer, and shutdown.
async fn run_worker(
    thread_id: String,
    mut rx: mpsc::Receiver<ThreadMessage>,
    done: Arc<AtomicBool>,
    handler: Arc<dyn MessageHandler>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!(thread_id = %thread_id, "worker exiting on shutdown");
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => handle_recovered(&handler, msg).await,
                None => break,
            },
            _ = tokio::time::sleep(idle_timeout) => {
                debug!(thread_id = %thread_id, "worker idle timeout");
                done.store(true, Ordering::SeqCst);
                // Drain stragglers that raced the timeout before exiting;
                // the next dispatch for this thread spawns a fresh worker.
                while let Ok(msg) = rx.try_recv() {
                    handle_recovered(&handler, msg).await;
                }
                break;
            }
        }
    }
    done.store(true, Ordering::SeqCst);
}

/// Invoke the handler inside a spawned task so a panic is contained to
/// that task instead of tearing down the worker (or the process).
async fn handle_recovered(handler: &Arc<dyn MessageHandler>, msg: ThreadMessage) {
    let thread_id = msg.thread_id.clone();
    let message_id = msg.message_id.clone();
    let handler = handler.clone();
    let join = tokio::spawn(async move { handler.handle(msg).await });
    if let Err(e) = join.await {
        if e.is_panic() {
            error!(
                thread_id = %thread_id,
                message_id = %message_id,
                panic = ?e,
                "message handler panicked; worker continues"
            );
        }
    }
}
