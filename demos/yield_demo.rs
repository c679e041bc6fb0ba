use myfiber::{FiberRegistry, Scheduler};

fn main() {
    let mut scheduler = Scheduler::new(FiberRegistry::local());

    for task in 1..=3 {
        scheduler
            .spawn(move || {
                println!("Task {task}: start");
                myfiber::yield_now();
                println!("Task {task}: end");
            })
            .expect("failed to create fiber");
    }

    scheduler.run();
    println!("All tasks completed!");
}
