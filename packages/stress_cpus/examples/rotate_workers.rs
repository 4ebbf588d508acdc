//! Runs one worker per processor the process may use and moves the workers around with the
//! barrier policy for a few cycles.
//!
//! Set `RUST_LOG=stress_cpus=trace` to see each migration.

use std::sync::Arc;
use std::thread;

use stress_cpus::{
    HardwareThread, RunPlan, ScheduleConfig, SchedulePolicy, TopologyBuilder,
    ambient_logical_processor_set,
};
use tracing_subscriber::EnvFilter;

const CYCLES: usize = 3;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Without a discovery backend, every processor is treated as its own core.
    let threads = ambient_logical_processor_set()
        .unwrap()
        .iter()
        .map(|processor| HardwareThread::new(processor).with_core_id(processor.get()))
        .collect::<Vec<_>>();

    let topology = TopologyBuilder::new(threads).build().unwrap();

    if topology.num_devices() < 2 {
        println!("Need at least two processors to migrate workers.");
        return;
    }

    let config = ScheduleConfig::new().policy(SchedulePolicy::Barrier);
    let plan = Arc::new(RunPlan::new(&topology, &config).unwrap());

    let workers: Vec<_> = (0..plan.worker_count())
        .map(|worker| {
            let plan = Arc::clone(&plan);
            thread::spawn(move || {
                let start = plan.pin_worker(worker).unwrap();
                println!("worker {worker} started on processor {start}");

                for _ in 0..CYCLES {
                    // A real worker runs a test here.
                    if let Some(migration) = plan.reschedule(worker) {
                        println!(
                            "worker {worker} moved to device {} (processor {}, pinned: {})",
                            migration.device, migration.processor, migration.pinned
                        );
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    plan.finish();

    println!("All workers have finished.");
}
