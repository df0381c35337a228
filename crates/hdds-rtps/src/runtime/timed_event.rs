// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-thread timer wheel for protocol timers.
//!
//! Heartbeat periods, nack-response delays and nack-suppression windows of
//! every endpoint run on one `hdds-timed-events` thread. Callbacks decide
//! their own rescheduling through [`EventOutcome`]:
//!
//! ```text
//! schedule(100ms, cb) ──▶ [deadline queue] ──(due)──▶ cb()
//!                               ▲                       │
//!                               └── Restart(period) ◀───┤
//!                                                       └── Done: dropped
//! ```
//!
//! Commands reach the thread over a crossbeam channel, so `schedule` and
//! `cancel` never block on a running callback. Callbacks must not block:
//! they run one after another on the timer thread.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::dds::{Error, Result};

/// Handle naming one scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

/// What a callback wants after it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Fire again after this delay.
    Restart(Duration),
    Done,
}

type Callback = Box<dyn FnMut() -> EventOutcome + Send>;

enum Command {
    Schedule { id: EventId, at: Instant, callback: Callback },
    Cancel(EventId),
    Shutdown,
}

pub struct TimedEventService {
    tx: Sender<Command>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimedEventService {
    /// Spawn the timer thread.
    pub fn start() -> Result<Self> {
        let (tx, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("hdds-timed-events".into())
            .spawn(move || event_loop(rx))
            .map_err(|e| Error::InvalidState(format!("failed to spawn timer thread: {}", e)))?;
        log::debug!("[TimedEvents] service started");
        Ok(Self {
            tx,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `callback` once `after` has elapsed.
    ///
    /// After shutdown the event is silently dropped.
    pub fn schedule<F>(&self, after: Duration, callback: F) -> EventId
    where
        F: FnMut() -> EventOutcome + Send + 'static,
    {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cmd = Command::Schedule {
            id,
            at: Instant::now() + after,
            callback: Box::new(callback),
        };
        if self.tx.send(cmd).is_err() {
            log::debug!("[TimedEvents] schedule after shutdown ignored ({:?})", id);
        }
        id
    }

    /// Drop a pending event. Cancelling an unknown or finished event is a no-op.
    pub fn cancel(&self, id: EventId) {
        let _ = self.tx.send(Command::Cancel(id));
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Stop the thread and drop every pending event. Idempotent.
    ///
    /// Called from a callback, the thread is told to stop but not joined.
    pub fn shutdown(&self) {
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        let _ = self.tx.send(Command::Shutdown);
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::warn!("[TimedEvents] timer thread panicked");
        }
        log::debug!("[TimedEvents] service stopped");
    }
}

impl Drop for TimedEventService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TimedEventService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedEventService")
            .field("running", &self.is_running())
            .finish()
    }
}

#[derive(Default)]
struct Queue {
    by_deadline: BTreeMap<(Instant, EventId), Callback>,
    deadlines: HashMap<EventId, Instant>,
}

impl Queue {
    fn insert(&mut self, id: EventId, at: Instant, callback: Callback) {
        self.by_deadline.insert((at, id), callback);
        self.deadlines.insert(id, at);
    }

    fn remove(&mut self, id: EventId) {
        if let Some(at) = self.deadlines.remove(&id) {
            self.by_deadline.remove(&(at, id));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(at, _)| *at)
    }

    fn pop_due(&mut self, now: Instant) -> Option<(EventId, Callback)> {
        let (at, id) = *self.by_deadline.keys().next()?;
        if at > now {
            return None;
        }
        self.deadlines.remove(&id);
        self.by_deadline.remove(&(at, id)).map(|cb| (id, cb))
    }
}

/// Returns `false` on shutdown.
fn apply(queue: &mut Queue, cmd: Command) -> bool {
    match cmd {
        Command::Schedule { id, at, callback } => queue.insert(id, at, callback),
        Command::Cancel(id) => queue.remove(id),
        Command::Shutdown => return false,
    }
    true
}

fn event_loop(rx: Receiver<Command>) {
    let mut queue = Queue::default();
    loop {
        let received = match queue.next_deadline() {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(cmd) => {
                if !apply(&mut queue, cmd) {
                    break;
                }
                // Drain whatever else is queued before running callbacks.
                let mut stop = false;
                while let Ok(cmd) = rx.try_recv() {
                    if !apply(&mut queue, cmd) {
                        stop = true;
                        break;
                    }
                }
                if stop {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let now = Instant::now();
        while let Some((id, mut callback)) = queue.pop_due(now) {
            if let EventOutcome::Restart(after) = callback() {
                queue.insert(id, Instant::now() + after, callback);
            }
        }
    }
    log::trace!(
        "[TimedEvents] loop exited with {} pending events",
        queue.deadlines.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn wait_until<F: Fn() -> bool>(cond: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_one_shot_fires_once() {
        let service = TimedEventService::start().expect("timer thread should start");
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        service.schedule(Duration::from_millis(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
            EventOutcome::Done
        });
        assert!(wait_until(|| hits.load(Ordering::SeqCst) == 1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_restart_until_done() {
        let service = TimedEventService::start().expect("timer thread should start");
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        service.schedule(Duration::from_millis(1), move || {
            if h.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                EventOutcome::Restart(Duration::from_millis(1))
            } else {
                EventOutcome::Done
            }
        });
        assert!(wait_until(|| hits.load(Ordering::SeqCst) == 3));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_before_due() {
        let service = TimedEventService::start().expect("timer thread should start");
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        let id = service.schedule(Duration::from_millis(50), move || {
            h.fetch_add(1, Ordering::SeqCst);
            EventOutcome::Done
        });
        service.cancel(id);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_events_fire_in_deadline_order() {
        let service = TimedEventService::start().expect("timer thread should start");
        let order = Arc::new(Mutex::new(Vec::new()));
        for (delay, tag) in [(30u64, 'c'), (10, 'a'), (20, 'b')] {
            let order = Arc::clone(&order);
            service.schedule(Duration::from_millis(delay), move || {
                order.lock().push(tag);
                EventOutcome::Done
            });
        }
        assert!(wait_until(|| order.lock().len() == 3));
        assert_eq!(*order.lock(), vec!['a', 'b', 'c']);
    }

    #[test]
    fn test_shutdown_is_idempotent_and_drops_events() {
        let service = TimedEventService::start().expect("timer thread should start");
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        service.schedule(Duration::from_millis(20), move || {
            h.fetch_add(1, Ordering::SeqCst);
            EventOutcome::Done
        });
        service.shutdown();
        service.shutdown();
        assert!(!service.is_running());
        service.schedule(Duration::ZERO, || EventOutcome::Done);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
