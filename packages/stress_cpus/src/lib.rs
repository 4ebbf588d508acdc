#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Processor topology, thread pinning and worker migration for hardware stress testing.
//!
//! A stress test runs one worker thread per logical processor and keeps each worker on its
//! processor so a failure can be attributed to a specific piece of silicon. During long runs,
//! workers are periodically moved to other processors so that more pairs of cores, caches and
//! interconnect links get exercised together.
//!
//! This package provides the moving parts for that:
//!
//! * [`CpuTopology`] - the package → NUMA node → core → thread hierarchy, built once from the
//!   hardware thread records a discovery backend reports ([`HardwareThread`]) and optionally
//!   restricted by a [`CpuSetExpression`] or a [`DeviceRange`].
//! * [`LogicalProcessorSet`] - a growable bitmap of processors.
//! * [`pin_to_logical_processor()`] and friends - binding threads to processors.
//! * [`SlicePlan`] - partitioning the cores into bounded slices.
//! * [`DeviceSchedule`] - the migration policies: shuffled queue, uniform random and barrier
//!   rendezvous groups.
//! * [`RunPlan`] - putting the above together for one run, configured by [`ScheduleConfig`].
//!
//! # Devices and processors
//!
//! A *device* is a position in the topology-ordered list of hardware threads. The
//! [`LogicalProcessor`] of a device is the number the operating system uses for it. Workers and
//! schedules work with devices; pinning works with processors.
//!
//! # Example
//!
//! ```
//! use new_zealand::nz;
//! use stress_cpus::fake::TopologyShape;
//! use stress_cpus::{CpuTopology, RunPlan, ScheduleConfig, SchedulePolicy, TopologyBuilder};
//!
//! // A real harness gets these records from a discovery backend.
//! let threads = TopologyShape::new()
//!     .packages(nz!(2))
//!     .cores_per_package(nz!(4))
//!     .threads_per_core(nz!(2))
//!     .threads();
//!
//! let topology = TopologyBuilder::new(threads).build().unwrap();
//! let topology = CpuTopology::install(topology).unwrap();
//!
//! let config = ScheduleConfig::new()
//!     .policy("queue".parse().unwrap())
//!     .max_cores_per_slice(2);
//!
//! let plan = RunPlan::new(topology, &config).unwrap();
//!
//! assert_eq!(plan.worker_count(), 16);
//! assert_eq!(plan.slices().len(), 4);
//! assert_eq!(plan.schedule().unwrap().policy(), SchedulePolicy::Queue);
//! ```
//!
//! # Logging
//!
//! The package reports what it does through [`tracing`](https://docs.rs/tracing). It does not
//! install a subscriber; that is up to the application.
//!
//! # Platform support
//!
//! Thread pinning uses the Linux affinity system calls. On other platforms pinning is simulated:
//! the requested affinity is remembered but the operating system is not asked to apply it.

mod completion_barrier;
mod constants;
mod cpu_topology;
mod cpuset;
mod device_schedule;
mod error;
mod hardware_thread;
mod logical_processor_set;
mod pinning;
mod primitive_types;
mod run_plan;
mod schedule_config;
mod slice_plan;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub(crate) mod pal;

pub use completion_barrier::*;
pub use cpu_topology::*;
pub use cpuset::*;
pub use device_schedule::{DeviceSchedule, Migration};
pub use error::Error;
pub use hardware_thread::*;
pub use logical_processor_set::*;
pub use pinning::{
    ambient_logical_processor_set, current_os_thread_id, pin_thread_to_logical_processor,
    pin_to_logical_processor, pin_to_logical_processors,
};
pub use primitive_types::*;
pub use run_plan::*;
pub use schedule_config::*;
pub use slice_plan::*;
