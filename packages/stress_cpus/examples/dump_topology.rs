//! Builds a synthetic two-package topology, restricts it with a CPU set expression and prints
//! what a stress test would log about the hardware before starting.

use new_zealand::nz;
use stress_cpus::fake::TopologyShape;
use stress_cpus::{CpuSetExpression, LogicalProcessor, LogicalProcessorSet, TopologyBuilder};

fn main() {
    tracing_subscriber::fmt().init();

    let threads = TopologyShape::new()
        .packages(nz!(2))
        .numa_nodes_per_package(nz!(2))
        .cores_per_package(nz!(4))
        .threads_per_core(nz!(2))
        .threads();

    // Leave the SMT siblings of package 1 out of the run.
    let cpuset: CpuSetExpression = "0-11".parse().unwrap();

    let topology = TopologyBuilder::new(threads)
        .apply_cpuset(&cpuset)
        .unwrap()
        .build()
        .unwrap();

    println!(
        "{} packages, {} cores, {} devices",
        topology.num_packages(),
        topology.cores().count(),
        topology.num_devices()
    );

    for package in topology.packages() {
        for node in package.numa_domains() {
            println!(
                "package {:?} NUMA node {:?}: {} cores",
                package.id(),
                node.id(),
                node.cores().len()
            );
        }
    }

    topology.write_cpu_info(std::io::stdout().lock()).unwrap();

    let failed = LogicalProcessorSet::from_iter([3, 9].map(LogicalProcessor::new));
    println!("failure mask: {}", topology.build_failure_mask(&failed));
}
