use std::cell::RefCell;
use std::rc::Rc;

use myfiber::{Fiber, FiberRegistry, FiberState, Scheduler};

#[test]
fn twenty_fibers_run_in_order() {
    let mut scheduler = Scheduler::new(FiberRegistry::local());
    let output = Rc::new(RefCell::new(Vec::new()));

    let fibers: Vec<_> = (0..20)
        .map(|i| {
            let output = Rc::clone(&output);
            scheduler
                .spawn(move || output.borrow_mut().push(i))
                .unwrap()
        })
        .collect();

    assert_eq!(scheduler.run(), 20);

    assert_eq!(*output.borrow(), (0..20).collect::<Vec<_>>());
    for fiber in &fibers {
        assert_eq!(fiber.state(), FiberState::Terminated);
    }
    assert!(scheduler.is_empty());
}

#[test]
fn callbacks_never_interleave_without_yield() {
    let mut scheduler = Scheduler::new(FiberRegistry::local());
    let events = Rc::new(RefCell::new(Vec::new()));

    for i in 0..4 {
        let events = Rc::clone(&events);
        scheduler
            .spawn(move || {
                events.borrow_mut().push(("start", i));
                // Deep enough to exercise the fiber's own stack.
                let sum: u64 = (0..1000u64).map(|n| n * i).sum();
                assert_eq!(sum, 499_500 * i);
                events.borrow_mut().push(("end", i));
            })
            .unwrap();
    }
    scheduler.run();

    let expected: Vec<(&str, u64)> = (0..4).flat_map(|i| [("start", i), ("end", i)]).collect();
    assert_eq!(*events.borrow(), expected);
}

#[test]
fn cooperative_fibers_round_robin() {
    let mut scheduler = Scheduler::new(FiberRegistry::local());
    let trace = Rc::new(RefCell::new(Vec::new()));

    for id in 0..3 {
        let trace = Rc::clone(&trace);
        let registry = scheduler.registry().clone();
        scheduler
            .spawn(move || {
                for step in 0..3 {
                    trace.borrow_mut().push((id, step));
                    registry.yield_now();
                }
            })
            .unwrap();
    }
    assert_eq!(scheduler.run(), 3);

    let expected: Vec<_> = (0..3)
        .flat_map(|step| (0..3).map(move |id| (id, step)))
        .collect();
    assert_eq!(*trace.borrow(), expected);
}

#[test]
fn fiber_pool_reuses_stacks_across_batches() {
    let registry = FiberRegistry::local();
    let mut scheduler = Scheduler::new(registry.clone());
    let output = Rc::new(RefCell::new(Vec::new()));
    registry.current();
    let before = registry.total_fibers();

    let pool: Vec<_> = (0..4)
        .map(|i| {
            let output = Rc::clone(&output);
            Fiber::new(&registry, move || output.borrow_mut().push(i)).unwrap()
        })
        .collect();
    let bases: Vec<_> = pool.iter().map(|fiber| fiber.stack_base()).collect();

    for fiber in &pool {
        scheduler.schedule(Rc::clone(fiber));
    }
    scheduler.run();

    for (i, fiber) in pool.iter().enumerate() {
        let output = Rc::clone(&output);
        fiber.reset(move || output.borrow_mut().push(10 + i));
        scheduler.schedule(Rc::clone(fiber));
    }
    scheduler.run();

    assert_eq!(*output.borrow(), [0, 1, 2, 3, 10, 11, 12, 13]);
    let after: Vec<_> = pool.iter().map(|fiber| fiber.stack_base()).collect();
    assert_eq!(bases, after);
    assert_eq!(registry.total_fibers(), before + 4);
}
