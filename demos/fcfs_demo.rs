use myfiber::{FiberRegistry, Scheduler};

const NUM_FIBERS: usize = 20;

fn main() {
    // Initialize this thread's main fiber
    let main = myfiber::current();
    println!("main fiber id = {}", main.id());

    let mut scheduler = Scheduler::new(FiberRegistry::local());

    for i in 0..NUM_FIBERS {
        scheduler
            .spawn(move || println!("hello world {i}"))
            .expect("failed to create fiber");
    }

    println!("Running {} fibers...", scheduler.len());
    let finished = scheduler.run();
    println!("{finished} fibers finished, {} still alive", myfiber::total_fibers());
}
