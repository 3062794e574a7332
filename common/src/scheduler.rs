//! Cadence bookkeeping for the cooperative main loop.
//!
//! Time is device uptime in milliseconds as a `u32`. The counter wraps after
//! ~49.7 days, so every comparison goes through [`elapsed_ms`], which uses
//! modular subtraction and stays correct across the wrap.

/// Device uptime in milliseconds.
pub type Millis = u32;

/// Milliseconds from `since` to `now`, correct across counter wraparound.
pub fn elapsed_ms(now: Millis, since: Millis) -> u32 {
    now.wrapping_sub(since)
}

/// Fires once every `interval_ms`. A gate that has never run is due
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalGate {
    interval_ms: u32,
    last_run_ms: Option<Millis>,
}

impl IntervalGate {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            last_run_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval_ms = interval_ms;
    }

    pub fn is_due(&self, now: Millis) -> bool {
        self.last_run_ms
            .map(|last| elapsed_ms(now, last) >= self.interval_ms)
            .unwrap_or(true)
    }

    /// Returns true and records the run when the gate is due.
    pub fn poll(&mut self, now: Millis) -> bool {
        if self.is_due(now) {
            self.last_run_ms = Some(now);
            true
        } else {
            false
        }
    }

    /// Marks a run at `now` without checking the interval.
    pub fn mark(&mut self, now: Millis) {
        self.last_run_ms = Some(now);
    }
}

/// Fixed-rate tasks keyed by an identifier, each with its own gate.
#[derive(Debug, Clone)]
pub struct TaskScheduler<T> {
    tasks: Vec<(T, IntervalGate)>,
}

impl<T> Default for TaskScheduler<T> {
    fn default() -> Self {
        Self { tasks: Vec::new() }
    }
}

impl<T: Copy + PartialEq> TaskScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task: T, interval_ms: u32) -> Self {
        self.register(task, interval_ms);
        self
    }

    /// Adds a task, or changes the interval of an existing one.
    pub fn register(&mut self, task: T, interval_ms: u32) {
        match self.gate_mut(task) {
            Some(gate) => gate.set_interval(interval_ms),
            None => self.tasks.push((task, IntervalGate::new(interval_ms))),
        }
    }

    /// True when `task` is due at `now`; the run is recorded. Unknown tasks
    /// are never due.
    pub fn poll(&mut self, task: T, now: Millis) -> bool {
        self.gate_mut(task)
            .map(|gate| gate.poll(now))
            .unwrap_or(false)
    }

    pub fn is_due(&self, task: T, now: Millis) -> bool {
        self.tasks
            .iter()
            .find(|(id, _)| *id == task)
            .map(|(_, gate)| gate.is_due(now))
            .unwrap_or(false)
    }

    fn gate_mut(&mut self, task: T) -> Option<&mut IntervalGate> {
        self.tasks
            .iter_mut()
            .find(|(id, _)| *id == task)
            .map(|(_, gate)| gate)
    }
}
