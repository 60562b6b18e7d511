//! Explicit deferred-task queue.
//!
//! Two deferral primitives exist:
//!
//! - [`Due::EndOfStep`]: runs once after the current step's main update,
//!   before the next step begins.
//! - [`Due::AfterSteps`]: runs once `k` physics steps have completed after
//!   scheduling (`k = 1` is "after the next physics step").
//!
//! Tasks are plain data tagged with an owner. Due tasks are handed back in
//! FIFO order; the caller executes them. The caller reports each completed
//! physics step with [`DeferredQueue::advance_step`]. Destroying an owner removes its
//! pending tasks with [`DeferredQueue::cancel_owner`].

use std::collections::VecDeque;

/// When a deferred task becomes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    EndOfStep,
    AfterSteps(u32),
}

#[derive(Debug, Clone)]
struct Delayed<O, T> {
    remaining: u32,
    owner: O,
    task: T,
}

/// FIFO queue of deferred tasks keyed by owner.
#[derive(Debug, Clone)]
pub struct DeferredQueue<O, T> {
    end_of_step: VecDeque<(O, T)>,
    delayed: VecDeque<Delayed<O, T>>,
}

impl<O, T> Default for DeferredQueue<O, T> {
    fn default() -> Self {
        Self {
            end_of_step: VecDeque::new(),
            delayed: VecDeque::new(),
        }
    }
}

impl<O: Copy + PartialEq, T> DeferredQueue<O, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, owner: O, due: Due, task: T) {
        match due {
            Due::EndOfStep => self.end_of_step.push_back((owner, task)),
            Due::AfterSteps(steps) => self.delayed.push_back(Delayed {
                remaining: steps.max(1),
                owner,
                task,
            }),
        }
    }

    /// Count one completed physics step and take the delayed tasks that
    /// became due. Call once right after every physics step.
    pub fn advance_step(&mut self) -> Vec<(O, T)> {
        let mut due = Vec::new();
        let mut pending = VecDeque::with_capacity(self.delayed.len());
        for mut entry in self.delayed.drain(..) {
            entry.remaining -= 1;
            if entry.remaining == 0 {
                due.push((entry.owner, entry.task));
            } else {
                pending.push_back(entry);
            }
        }
        self.delayed = pending;
        due
    }

    /// Take every end-of-step task scheduled so far.
    ///
    /// Tasks scheduled while the returned batch executes wait for the next
    /// end of step.
    pub fn take_end_of_step(&mut self) -> Vec<(O, T)> {
        self.end_of_step.drain(..).collect()
    }

    /// Remove every pending task of `owner`. Returns how many were removed.
    pub fn cancel_owner(&mut self, owner: O) -> usize {
        let before = self.len();
        self.end_of_step.retain(|(o, _)| *o != owner);
        self.delayed.retain(|entry| entry.owner != owner);
        before - self.len()
    }

    pub fn len(&self) -> usize {
        self.end_of_step.len() + self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.end_of_step.is_empty() && self.delayed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
