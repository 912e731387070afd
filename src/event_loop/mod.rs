//! Event Loop Implementation
//!
//! A cooperative, single-threaded event loop with three queues:
//!
//! - **microtasks** (promise reaction jobs) always run first, and the queue
//!   is fully drained before any other task is handed out;
//! - **timers** fire in the timers phase of a tick once virtual time has
//!   reached their deadline;
//! - **immediates** run in the check phase of a tick. Only immediates queued
//!   before the check phase began run in it; anything queued while it runs
//!   waits for the next tick. This is the lowest-priority queue.
//!
//! Time is virtual. The loop never sleeps: when nothing is runnable the
//! owner decides whether to jump the clock to the next timer.
//!
//! The loop is generic over the context `C` its tasks receive, so it holds
//! no knowledge of what a task does.

use std::collections::VecDeque;
use std::fmt;

/// A unit of work queued on the loop
pub type Task<C> = Box<dyn FnOnce(&mut C)>;

/// Identifier returned by [`EventLoop::schedule_timer`]
pub type TimerId = u64;

struct Timer<C> {
    id: TimerId,
    fire_at: u64,
    task: Task<C>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Timers,
    Check,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventLoopStats {
    /// Microtasks handed out
    pub microtasks: u64,
    /// Timers fired
    pub timers: u64,
    /// Immediates run
    pub immediates: u64,
    /// Ticks that ran at least one timer or immediate
    pub ticks: u64,
}

/// The event loop manages task queues and execution order
pub struct EventLoop<C> {
    microtask_queue: VecDeque<Task<C>>,
    timers: Vec<Timer<C>>,
    immediate_queue: VecDeque<Task<C>>,
    check_batch: VecDeque<Task<C>>,
    phase: Phase,
    tick_active: bool,
    virtual_time: u64,
    next_timer_id: TimerId,
    stats: EventLoopStats,
}

impl<C> Default for EventLoop<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventLoop<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("microtasks", &self.microtask_queue.len())
            .field("timers", &self.timers.len())
            .field("immediates", &(self.immediate_queue.len() + self.check_batch.len()))
            .field("virtual_time", &self.virtual_time)
            .finish()
    }
}

impl<C> EventLoop<C> {
    /// Create a new event loop
    pub fn new() -> Self {
        Self {
            microtask_queue: VecDeque::new(),
            timers: Vec::new(),
            immediate_queue: VecDeque::new(),
            check_batch: VecDeque::new(),
            phase: Phase::Timers,
            tick_active: false,
            virtual_time: 0,
            next_timer_id: 1,
            stats: EventLoopStats::default(),
        }
    }

    /// Get current virtual time in milliseconds
    pub fn current_time(&self) -> u64 {
        self.virtual_time
    }

    /// Enqueue a microtask
    pub fn queue_microtask(&mut self, task: Task<C>) {
        self.microtask_queue.push_back(task);
    }

    /// Enqueue an immediate: it runs in the check phase of the current tick
    /// if that phase has not started yet, otherwise in the next tick
    pub fn set_immediate(&mut self, task: Task<C>) {
        self.immediate_queue.push_back(task);
    }

    /// Schedule a timer `delay` virtual milliseconds from now
    pub fn schedule_timer(&mut self, delay: u64, task: Task<C>) -> TimerId {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.push(Timer {
            id,
            fire_at: self.virtual_time.saturating_add(delay),
            task,
        });
        id
    }

    /// Cancel a timer; returns `false` when it already fired or never existed
    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        match self.timers.iter().position(|t| t.id == id) {
            Some(idx) => {
                self.timers.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Check if there are pending microtasks
    pub fn has_pending_microtasks(&self) -> bool {
        !self.microtask_queue.is_empty()
    }

    /// Check if the loop holds any work at all, runnable now or later
    pub fn has_pending_work(&self) -> bool {
        self.has_runnable_work() || !self.timers.is_empty()
    }

    /// Time of the earliest armed timer
    pub fn next_timer_time(&self) -> Option<u64> {
        self.timers.iter().map(|t| t.fire_at).min()
    }

    /// Jump virtual time forward to the earliest timer, as long as it fires
    /// no later than `limit`. Returns whether the clock moved to a timer.
    pub fn advance_to_next_timer(&mut self, limit: u64) -> bool {
        match self.next_timer_time() {
            Some(fire_at) if fire_at <= limit => {
                self.virtual_time = self.virtual_time.max(fire_at);
                true
            }
            _ => false,
        }
    }

    /// Move virtual time forward to `time` (never backwards)
    pub fn advance_to(&mut self, time: u64) {
        self.virtual_time = self.virtual_time.max(time);
    }

    /// Hand out the next runnable task, or `None` when the loop is idle at
    /// the current virtual time.
    pub fn next_task(&mut self) -> Option<Task<C>> {
        if let Some(task) = self.microtask_queue.pop_front() {
            self.stats.microtasks += 1;
            return Some(task);
        }

        loop {
            match self.phase {
                Phase::Timers => {
                    if let Some(task) = self.take_ready_timer() {
                        self.stats.timers += 1;
                        self.tick_active = true;
                        return Some(task);
                    }
                    self.phase = Phase::Check;
                    self.check_batch = std::mem::take(&mut self.immediate_queue);
                }
                Phase::Check => {
                    if let Some(task) = self.check_batch.pop_front() {
                        self.stats.immediates += 1;
                        self.tick_active = true;
                        return Some(task);
                    }
                    self.phase = Phase::Timers;
                    if std::mem::take(&mut self.tick_active) {
                        self.stats.ticks += 1;
                    }
                    if !self.has_runnable_work() {
                        return None;
                    }
                }
            }
        }
    }

    /// Drop every queued task (execution teardown)
    pub fn clear(&mut self) {
        self.microtask_queue.clear();
        self.timers.clear();
        self.immediate_queue.clear();
        self.check_batch.clear();
        self.phase = Phase::Timers;
        self.tick_active = false;
    }

    /// Get a snapshot of the current event loop statistics
    pub fn stats(&self) -> EventLoopStats {
        self.stats.clone()
    }

    fn has_runnable_work(&self) -> bool {
        !self.microtask_queue.is_empty()
            || !self.immediate_queue.is_empty()
            || !self.check_batch.is_empty()
            || self.timers.iter().any(|t| t.fire_at <= self.virtual_time)
    }

    fn take_ready_timer(&mut self) -> Option<Task<C>> {
        let idx = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.fire_at <= self.virtual_time)
            .min_by_key(|(_, t)| (t.fire_at, t.id))
            .map(|(i, _)| i)?;
        Some(self.timers.remove(idx).task)
    }
}
