//! Job scheduler.
//!
//! All deferred work in the runtime is a [`Job`]: render flushes, commit
//! continuations, parked initializers. Jobs land in one of two queues.
//! The main queue holds state-driven work such as render jobs; the
//! post-flush queue holds work that must observe a settled main queue,
//! like `next_tick` wakeups. A flush drains the main queue, then runs
//! post-flush jobs one at a time, re-draining the main queue after each
//! in case a post job queued more work.
//!
//! There is no hidden microtask loop. The embedding host pumps the
//! scheduler explicitly through [`crate::Runtime::flush`].

use std::collections::VecDeque;

use crate::runtime::Runtime;

/// A unit of deferred work run with full runtime access.
pub type Job = Box<dyn FnOnce(&mut Runtime)>;

#[derive(Default)]
pub(crate) struct Scheduler {
    queue: VecDeque<Job>,
    post_flush: VecDeque<Job>,
    flushing: bool,
}

impl Scheduler {
    pub(crate) fn queue_job(&mut self, job: Job) {
        self.queue.push_back(job);
    }

    pub(crate) fn queue_post_flush(&mut self, job: Job) {
        self.post_flush.push_back(job);
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.is_empty() || !self.post_flush.is_empty()
    }
}

/// Drain both queues until idle. Re-entrant calls (a job that flushes)
/// are no-ops; the outer drive picks up whatever the job queued.
pub(crate) fn flush_jobs(rt: &mut Runtime) {
    if rt.scheduler.flushing {
        return;
    }
    rt.scheduler.flushing = true;
    loop {
        while let Some(job) = rt.scheduler.queue.pop_front() {
            job(rt);
        }
        match rt.scheduler.post_flush.pop_front() {
            Some(job) => job(rt),
            None => break,
        }
    }
    rt.scheduler.flushing = false;
}
