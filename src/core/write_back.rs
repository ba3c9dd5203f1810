/*
 * Coalesces bursts of catalog edits into a single export pass.
 *
 * Two states, guarded by one mutex: `Idle` and `PendingFlush { deadline }`. A
 * notification moves Idle to PendingFlush or pushes the deadline of a pending flush
 * further out. A dedicated worker thread sleeps on a condition variable until the
 * deadline passes, switches back to Idle, and only then runs the flush with the lock
 * released. A notification that arrives while a flush runs therefore starts a new
 * pending period instead of being lost.
 *
 * `shutdown` cancels a pending flush without running it.
 */
use crate::core::reconcile::Reconciler;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Idle,
    PendingFlush { deadline: Instant },
}

#[derive(Debug)]
struct SchedulerState {
    flush: FlushState,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| {
            log::warn!("WriteBack: Scheduler mutex poisoned; continuing.");
            e.into_inner()
        })
    }
}

type FlushFn = Box<dyn Fn() + Send + 'static>;

pub struct WriteBackScheduler {
    shared: Arc<Shared>,
    delay: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl WriteBackScheduler {
    /*
     * Starts the worker thread. `flush` runs on that thread, never concurrently with
     * itself.
     */
    pub fn new<F>(delay: Duration, flush: F) -> io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState {
                flush: FlushState::Idle,
                shutting_down: false,
            }),
            wakeup: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let flush: FlushFn = Box::new(flush);
        let handle = thread::Builder::new()
            .name("shortcut-write-back".to_string())
            .spawn(move || run_worker(&worker_shared, &flush))?;
        let worker_id = handle.thread().id();
        log::debug!("WriteBack: Scheduler started with delay {delay:?}.");
        Ok(WriteBackScheduler {
            shared,
            delay,
            worker: Mutex::new(Some(handle)),
            worker_id,
        })
    }

    /*
     * A scheduler whose flush exports every record owned by this integration.
     */
    pub fn for_reconciler(reconciler: Arc<Reconciler>, delay: Duration) -> io::Result<Self> {
        Self::new(delay, move || match reconciler.export_integration_records() {
            Ok(outcome) => log::info!(
                "WriteBack: Flushed: {} created, {} updated, {} skipped.",
                outcome.created,
                outcome.updated,
                outcome.skipped.len()
            ),
            Err(e) => log::error!("WriteBack: Flush failed: {e}"),
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /*
     * Records one catalog edit. Arms the timer when idle, otherwise restarts the
     * countdown. Ignored after shutdown.
     */
    pub fn notify(&self) {
        let mut state = self.shared.lock();
        if state.shutting_down {
            log::debug!("WriteBack: Notification after shutdown ignored.");
            return;
        }
        let deadline = Instant::now() + self.delay;
        match state.flush {
            FlushState::Idle => log::trace!("WriteBack: Idle -> PendingFlush."),
            FlushState::PendingFlush { .. } => log::trace!("WriteBack: Re-arming pending flush."),
        }
        state.flush = FlushState::PendingFlush { deadline };
        self.shared.wakeup.notify_all();
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.shared.lock().flush, FlushState::PendingFlush { .. })
    }

    /*
     * Cancels any pending flush and stops the worker. A flush already running is
     * allowed to finish. Safe to call more than once, and from within the flush.
     */
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if matches!(state.flush, FlushState::PendingFlush { .. }) {
                log::info!("WriteBack: Shutdown discards a pending flush.");
            }
            state.shutting_down = true;
            state.flush = FlushState::Idle;
            self.shared.wakeup.notify_all();
        }
        if thread::current().id() == self.worker_id {
            return;
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("WriteBack: Worker thread panicked.");
            }
            log::debug!("WriteBack: Scheduler stopped.");
        }
    }
}

impl Drop for WriteBackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: &Shared, flush: &FlushFn) {
    let mut state = shared.lock();
    loop {
        if state.shutting_down {
            break;
        }
        let current = state.flush;
        match current {
            FlushState::Idle => {
                state = shared.wakeup.wait(state).unwrap_or_else(|e| e.into_inner());
            }
            FlushState::PendingFlush { deadline } => {
                let now = Instant::now();
                if now < deadline {
                    state = shared
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|e| e.into_inner().0);
                    continue;
                }
                state.flush = FlushState::Idle;
                drop(state);
                log::debug!("WriteBack: Delay elapsed; flushing.");
                flush();
                state = shared.lock();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlushLog {
        observed: Mutex<Vec<u32>>,
    }

    fn counting_scheduler(
        delay: Duration,
        source: Arc<Mutex<u32>>,
        flush_time: Duration,
    ) -> (WriteBackScheduler, Arc<FlushLog>) {
        let flushes = Arc::new(FlushLog {
            observed: Mutex::new(Vec::new()),
        });
        let flush_log = Arc::clone(&flushes);
        let scheduler = WriteBackScheduler::new(delay, move || {
            let value = *source.lock().unwrap();
            flush_log.observed.lock().unwrap().push(value);
            thread::sleep(flush_time);
        })
        .unwrap();
        (scheduler, flushes)
    }

    #[test]
    fn test_burst_of_notifications_flushes_once_with_latest_state() {
        let source = Arc::new(Mutex::new(0));
        let (scheduler, flushes) =
            counting_scheduler(Duration::from_millis(150), source.clone(), Duration::ZERO);
        for i in 1..=5 {
            *source.lock().unwrap() = i;
            scheduler.notify();
            thread::sleep(Duration::from_millis(10));
        }
        assert!(scheduler.is_pending());
        thread::sleep(Duration::from_millis(600));
        assert_eq!(flushes.observed.lock().unwrap().as_slice(), &[5]);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_notification_rearms_countdown() {
        let source = Arc::new(Mutex::new(0));
        let (scheduler, flushes) =
            counting_scheduler(Duration::from_millis(300), source, Duration::ZERO);
        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(450) {
            scheduler.notify();
            thread::sleep(Duration::from_millis(25));
        }
        // Far past the delay since the first notification, yet nothing flushed.
        assert!(flushes.observed.lock().unwrap().is_empty());
        thread::sleep(Duration::from_millis(800));
        assert_eq!(flushes.observed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_shutdown_cancels_pending_flush() {
        let source = Arc::new(Mutex::new(0));
        let (scheduler, flushes) =
            counting_scheduler(Duration::from_millis(200), source, Duration::ZERO);
        scheduler.notify();
        scheduler.shutdown();
        assert!(!scheduler.is_pending());
        thread::sleep(Duration::from_millis(400));
        assert!(flushes.observed.lock().unwrap().is_empty());

        // Ignored once stopped.
        scheduler.notify();
        assert!(!scheduler.is_pending());
        scheduler.shutdown();
    }

    #[test]
    fn test_notification_during_flush_is_not_lost() {
        let source = Arc::new(Mutex::new(1));
        let (scheduler, flushes) = counting_scheduler(
            Duration::from_millis(50),
            source.clone(),
            Duration::from_millis(300),
        );
        scheduler.notify();
        // Flush starts around 50ms and runs until around 350ms.
        thread::sleep(Duration::from_millis(150));
        assert_eq!(flushes.observed.lock().unwrap().len(), 1);
        *source.lock().unwrap() = 2;
        scheduler.notify();
        thread::sleep(Duration::from_millis(900));
        assert_eq!(flushes.observed.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn test_drop_stops_worker() {
        let source = Arc::new(Mutex::new(0));
        let (scheduler, flushes) =
            counting_scheduler(Duration::from_millis(100), source, Duration::ZERO);
        scheduler.notify();
        drop(scheduler);
        thread::sleep(Duration::from_millis(250));
        assert!(flushes.observed.lock().unwrap().is_empty());
    }
}
