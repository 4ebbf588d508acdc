//! Synthetic hardware thread records for testing.
//!
//! Discovery backends are outside this package, so code that builds a topology in tests needs
//! some other source of [`HardwareThread`] records. [`TopologyShape`] generates them for a
//! regular machine layout, numbering logical processors the way Linux does on typical x86
//! servers: the first SMT thread of every core comes first, followed by the second SMT thread of
//! every core, and so on.
//!
//! Only available when the `test-util` feature is enabled.
//!
//! # Example
//!
//! ```
//! use new_zealand::nz;
//! use stress_cpus::TopologyBuilder;
//! use stress_cpus::fake::TopologyShape;
//!
//! let threads = TopologyShape::new()
//!     .packages(nz!(2))
//!     .cores_per_package(nz!(4))
//!     .threads_per_core(nz!(2))
//!     .threads();
//!
//! let topology = TopologyBuilder::new(threads).build().unwrap();
//!
//! assert_eq!(topology.num_packages(), 2);
//! assert_eq!(topology.num_devices(), 16);
//! ```

use std::num::NonZero;

use new_zealand::nz;

use crate::{HardwareThread, LogicalProcessor};

/// Describes a regular machine layout to generate hardware thread records for.
#[derive(Clone, Debug)]
pub struct TopologyShape {
    packages: NonZero<u32>,
    numa_nodes_per_package: NonZero<u32>,
    cores_per_package: NonZero<u32>,
    threads_per_core: NonZero<u32>,
}

impl Default for TopologyShape {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyShape {
    /// A single package with a single one-thread core.
    #[must_use]
    pub fn new() -> Self {
        Self {
            packages: nz!(1),
            numa_nodes_per_package: nz!(1),
            cores_per_package: nz!(1),
            threads_per_core: nz!(1),
        }
    }

    /// Sets the number of packages (sockets).
    #[must_use]
    pub fn packages(mut self, count: NonZero<u32>) -> Self {
        self.packages = count;
        self
    }

    /// Sets the number of NUMA nodes each package is split into.
    ///
    /// Cores are distributed over the nodes in contiguous blocks; if the core count is not a
    /// multiple of the node count, the last node gets fewer cores.
    #[must_use]
    pub fn numa_nodes_per_package(mut self, count: NonZero<u32>) -> Self {
        self.numa_nodes_per_package = count;
        self
    }

    /// Sets the number of cores in each package.
    #[must_use]
    pub fn cores_per_package(mut self, count: NonZero<u32>) -> Self {
        self.cores_per_package = count;
        self
    }

    /// Sets the number of hardware threads in each core.
    #[must_use]
    pub fn threads_per_core(mut self, count: NonZero<u32>) -> Self {
        self.threads_per_core = count;
        self
    }

    /// Total number of hardware threads the shape describes.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        let total = u64::from(self.packages.get())
            * u64::from(self.cores_per_package.get())
            * u64::from(self.threads_per_core.get());

        usize::try_from(total).expect("unrealistic to have more than usize::MAX threads")
    }

    /// Generates the hardware thread records, ordered by logical processor number.
    #[must_use]
    #[expect(
        clippy::arithmetic_side_effects,
        reason = "test-only generator for small shapes"
    )]
    #[expect(
        clippy::integer_division,
        reason = "intentional rounding up of cores per NUMA node"
    )]
    pub fn threads(&self) -> Vec<HardwareThread> {
        let packages = self.packages.get();
        let cores = self.cores_per_package.get();
        let smt = self.threads_per_core.get();
        let nodes = self.numa_nodes_per_package.get();

        let cores_per_node = cores.div_ceil(nodes);
        let total_cores = packages * cores;

        let mut threads = Vec::with_capacity(self.thread_count());

        for thread_id in 0..smt {
            for package_id in 0..packages {
                for core_id in 0..cores {
                    let global_core = package_id * cores + core_id;
                    let cpu_number = thread_id * total_cores + global_core;
                    let numa_id = package_id * nodes + core_id / cores_per_node;

                    threads.push(
                        HardwareThread::new(LogicalProcessor::new(cpu_number))
                            .with_package_id(package_id)
                            .with_core_id(core_id)
                            .with_thread_id(thread_id)
                            .with_numa_id(numa_id)
                            .with_signature(6, 0xad, 1)
                            .with_microcode(0x1000_0000)
                            .with_ppin(0x5eed_0000_0000_0000 | u64::from(package_id)),
                    );
                }
            }
        }

        threads
    }
}
