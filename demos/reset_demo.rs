use std::time::Instant;

use myfiber::{Fiber, FiberHandle, FiberRegistry, Scheduler};

const POOL_SIZE: usize = 8;
const ROUNDS: usize = 1000;

fn main() {
    let registry = FiberRegistry::local();
    let mut scheduler = Scheduler::new(registry.clone());

    let pool: Vec<FiberHandle> = (0..POOL_SIZE)
        .map(|_| Fiber::new(&registry, || {}).expect("failed to create fiber"))
        .collect();
    for fiber in &pool {
        scheduler.schedule(FiberHandle::clone(fiber));
    }
    scheduler.run();

    let start = Instant::now();
    for round in 0..ROUNDS {
        for fiber in &pool {
            fiber.reset(move || {
                std::hint::black_box(round);
            });
            scheduler.schedule(FiberHandle::clone(fiber));
        }
        scheduler.run();
    }
    let elapsed = start.elapsed();

    println!(
        "{} fiber runs on {} reused stacks in {:?} ({:?} per run)",
        ROUNDS * POOL_SIZE,
        POOL_SIZE,
        elapsed,
        elapsed / (ROUNDS * POOL_SIZE) as u32
    );
}
