/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Periodic callback timers, and a named collection of them that a state handler owns.
//!
//! A [`CallbackTimer`] runs its callback on a dedicated thread. Each tick waits for the timer's interval
//! on the timer's shutdown channel, so [`stop`](CallbackTimer::stop) wakes the thread immediately and
//! then joins it: once `stop` returns, the callback is not running and will not run again.
//!
//! The callback receives the number of ticks so far and returns whether to keep running. Returning
//! `Ok(false)` or an error halts the timer.

use std::{
    collections::HashMap,
    fmt::{self, Display, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("timer {0} is already started")]
    AlreadyStarted(TimerID),
    #[error("timer {0} is already stopped")]
    AlreadyStopped(TimerID),
    #[error("timer callback failed: {0}")]
    Callback(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerID(String);

impl TimerID {
    pub fn new(id: impl Into<String>) -> TimerID {
        TimerID(id.into())
    }
}

impl Display for TimerID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type TimerCallback = Arc<dyn Fn(u64) -> Result<bool, TimerError> + Send + Sync>;

/// How long a timer waits before each tick.
#[derive(Clone)]
pub enum Interval {
    Constant(Duration),
    /// Computed from the number of ticks so far. A zero duration halts the timer.
    Dynamic(Arc<dyn Fn(u64) -> Duration + Send + Sync>),
}

impl Interval {
    /// Wait `first` before the first tick and `then` before every later tick.
    pub fn first_then(first: Duration, then: Duration) -> Interval {
        Interval::Dynamic(Arc::new(move |ticks| if ticks == 0 { first } else { then }))
    }

    fn at(&self, ticks: u64) -> Duration {
        match self {
            Interval::Constant(interval) => *interval,
            Interval::Dynamic(interval) => interval(ticks),
        }
    }
}

struct Running {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CallbackTimer {
    id: TimerID,
    callback: TimerCallback,
    interval: Interval,
    running: Mutex<Option<Running>>,
    stopped: Arc<AtomicBool>,
}

impl CallbackTimer {
    pub fn new(
        id: TimerID,
        interval: Interval,
        callback: impl Fn(u64) -> Result<bool, TimerError> + Send + Sync + 'static,
    ) -> CallbackTimer {
        CallbackTimer {
            id,
            callback: Arc::new(callback),
            interval,
            running: Mutex::new(None),
            stopped: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &TimerID {
        &self.id
    }

    pub fn start(&self) -> Result<(), TimerError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.stopped.load(Ordering::SeqCst) {
            return Err(TimerError::AlreadyStarted(self.id.clone()));
        }
        // The previous lifecycle may have halted itself; reap its thread.
        if let Some(previous) = running.take() {
            join_unless_current(previous.handle);
        }

        let (shutdown, shutdown_receiver) = mpsc::channel::<()>();
        let id = self.id.clone();
        let callback = Arc::clone(&self.callback);
        let interval = self.interval.clone();
        let stopped = Arc::clone(&self.stopped);
        stopped.store(false, Ordering::SeqCst);

        let handle = thread::spawn(move || {
            let mut ticks = 0;
            loop {
                let wait = interval.at(ticks);
                if wait.is_zero() {
                    break;
                }
                match shutdown_receiver.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => (),
                }
                match callback(ticks) {
                    Ok(true) => ticks += 1,
                    Ok(false) => break,
                    Err(err) => {
                        log::warn!("timer {} halted: {}", id, err);
                        break;
                    }
                }
            }
            stopped.store(true, Ordering::SeqCst);
        });

        *running = Some(Running { shutdown, handle });
        Ok(())
    }

    /// Stop the timer and wait for its thread to exit. Called from the timer's own callback, this only
    /// signals the thread.
    pub fn stop(&self) -> Result<(), TimerError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let already_stopped = self.stopped.swap(true, Ordering::SeqCst);

        if let Some(Running { shutdown, handle }) = running.take() {
            let _ = shutdown.send(());
            join_unless_current(handle);
        }

        if already_stopped {
            Err(TimerError::AlreadyStopped(self.id.clone()))
        } else {
            Ok(())
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for CallbackTimer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn join_unless_current(handle: JoinHandle<()>) {
    if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
    }
}

/// Named timers owned by one state handler.
#[derive(Default)]
pub struct Timers {
    timers: Mutex<HashMap<TimerID, CallbackTimer>>,
}

impl Timers {
    pub fn new() -> Timers {
        Timers::default()
    }

    /// Start `timer`, stopping and replacing any timer with the same ID.
    pub fn start(&self, timer: CallbackTimer) -> Result<(), TimerError> {
        let previous = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(timer.id());
        if let Some(previous) = previous {
            let _ = previous.stop();
        }

        timer.start()?;
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(timer.id().clone(), timer);
        Ok(())
    }

    /// Stop the timers with the given IDs.
    pub fn stop(&self, ids: &[TimerID]) {
        let removed: Vec<CallbackTimer> = {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            ids.iter().filter_map(|id| timers.remove(id)).collect()
        };
        for timer in removed {
            let _ = timer.stop();
        }
    }

    /// Stop every timer except those with the given IDs.
    pub fn stop_except(&self, keep: &[TimerID]) {
        let removed: Vec<CallbackTimer> = {
            let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<TimerID> = timers
                .keys()
                .filter(|id| !keep.contains(id))
                .cloned()
                .collect();
            ids.iter().filter_map(|id| timers.remove(id)).collect()
        };
        for timer in removed {
            let _ = timer.stop();
        }
    }

    pub fn stop_all(&self) {
        self.stop_except(&[]);
    }

    pub fn is_running(&self, id: &TimerID) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|timer| !timer.is_stopped())
            .unwrap_or(false)
    }
}
