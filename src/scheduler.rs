//! First-come-first-served fiber scheduler.
//!
//! # Example
//!
//! ```no_run
//! use myfiber::{FiberRegistry, Scheduler};
//!
//! let mut scheduler = Scheduler::new(FiberRegistry::local());
//!
//! for i in 0..3 {
//!     scheduler.spawn(move || println!("hello world {i}")).unwrap();
//! }
//!
//! scheduler.run();
//! ```

use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Result;
use crate::fiber::{Fiber, FiberHandle, FiberState};
use crate::registry::FiberRegistry;

/// Resumes scheduled fibers in submission order.
///
/// Fibers that yield before finishing go to the back of the queue, so a
/// pass ends only once every scheduled fiber has terminated.
#[derive(Debug)]
pub struct Scheduler {
    registry: FiberRegistry,
    /// Queue of runnable fibers
    tasks: VecDeque<FiberHandle>,
}

impl Scheduler {
    pub fn new(registry: FiberRegistry) -> Self {
        Scheduler {
            registry,
            tasks: VecDeque::new(),
        }
    }

    /// The registry fibers created by [`spawn`](Self::spawn) belong to.
    pub fn registry(&self) -> &FiberRegistry {
        &self.registry
    }

    /// Add a fiber to the back of the queue.
    pub fn schedule(&mut self, fiber: FiberHandle) {
        if !fiber.run_in_scheduler() {
            log::debug!("fiber {} scheduled but not marked run_in_scheduler", fiber.id());
        }
        self.tasks.push_back(fiber);
    }

    /// Create a fiber on this scheduler's registry and schedule it.
    pub fn spawn<F>(&mut self, f: F) -> Result<FiberHandle>
    where
        F: FnOnce() + 'static,
    {
        let fiber = Fiber::new(&self.registry, f)?;
        self.schedule(Rc::clone(&fiber));
        Ok(fiber)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run until the queue is empty.
    ///
    /// Returns how many fibers ran to termination. Must be called from the
    /// main fiber.
    pub fn run(&mut self) -> usize {
        log::debug!("scheduler: running {} fibers", self.tasks.len());

        let mut finished = 0;
        while let Some(fiber) = self.tasks.pop_front() {
            if fiber.state() != FiberState::Ready {
                log::warn!(
                    "scheduler: skipping fiber {} in state {:?}",
                    fiber.id(),
                    fiber.state()
                );
                continue;
            }

            fiber.resume();

            // We're back! Fiber either yielded or finished
            match fiber.state() {
                FiberState::Ready => self.tasks.push_back(fiber),
                FiberState::Terminated => finished += 1,
                FiberState::Running => {
                    unreachable!("fiber {} still running after resume returned", fiber.id())
                }
            }
        }

        log::debug!("scheduler: {finished} fibers finished");
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn runs_in_submission_order() {
        let mut scheduler = Scheduler::new(FiberRegistry::local());
        let order = Rc::new(RefCell::new(Vec::new()));

        for i in 0..5 {
            let order = Rc::clone(&order);
            scheduler.spawn(move || order.borrow_mut().push(i)).unwrap();
        }
        assert_eq!(scheduler.len(), 5);

        assert_eq!(scheduler.run(), 5);
        assert_eq!(*order.borrow(), [0, 1, 2, 3, 4]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn yielding_fibers_are_requeued() {
        let mut scheduler = Scheduler::new(FiberRegistry::local());
        let log = Rc::new(RefCell::new(Vec::new()));

        for name in ["a", "b"] {
            let log = Rc::clone(&log);
            let registry = scheduler.registry().clone();
            scheduler
                .spawn(move || {
                    log.borrow_mut().push(format!("{name}1"));
                    registry.yield_now();
                    log.borrow_mut().push(format!("{name}2"));
                })
                .unwrap();
        }

        assert_eq!(scheduler.run(), 2);
        assert_eq!(*log.borrow(), ["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn non_ready_fibers_are_skipped() {
        let registry = FiberRegistry::local();
        let mut scheduler = Scheduler::new(registry.clone());
        let runs = Rc::new(RefCell::new(0));

        let fiber = {
            let runs = Rc::clone(&runs);
            Fiber::new(&registry, move || *runs.borrow_mut() += 1).unwrap()
        };
        scheduler.schedule(Rc::clone(&fiber));
        scheduler.schedule(Rc::clone(&fiber));

        assert_eq!(scheduler.run(), 1);
        assert_eq!(*runs.borrow(), 1);
        assert_eq!(fiber.state(), FiberState::Terminated);
    }

    #[test]
    fn reset_fibers_can_be_scheduled_again() {
        let mut scheduler = Scheduler::new(FiberRegistry::local());
        let order = Rc::new(RefCell::new(Vec::new()));

        let fiber = {
            let order = Rc::clone(&order);
            scheduler.spawn(move || order.borrow_mut().push(1)).unwrap()
        };
        scheduler.run();

        {
            let order = Rc::clone(&order);
            fiber.reset(move || order.borrow_mut().push(2));
        }
        scheduler.schedule(fiber);
        scheduler.run();

        assert_eq!(*order.borrow(), [1, 2]);
    }
}
