use std::io;

use thiserror::Error;

use crate::{DeviceRange, LogicalProcessor};

/// Errors that can occur when building the topology, configuring a run or preparing workers.
///
/// All of these are fatal for the run that encounters them: they are reported before any test
/// executes. Pinning failures in the middle of a run are not errors - they are reported as a
/// `false` result to the caller, who decides what to do.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Discovery (or a subsequent restriction) produced a topology with no packages.
    #[error("processor topology is empty - no usable hardware threads were discovered")]
    InvalidTopology,

    /// A process-wide topology has already been installed.
    #[error("the process-wide processor topology has already been installed")]
    TopologyAlreadyInstalled,

    /// A worker could not be pinned to its initial processor, so test isolation is not possible.
    #[error("failed to pin worker {worker} to logical processor {processor}")]
    PinFailed {
        /// Index of the worker that failed to pin.
        worker: usize,

        /// The processor the worker was supposed to run on.
        processor: LogicalProcessor,
    },

    /// A worker index does not belong to the run.
    #[error("worker {worker} does not exist - the run has {worker_count} workers")]
    UnknownWorker {
        /// The worker index that was provided.
        worker: usize,

        /// Number of workers in the run.
        worker_count: usize,
    },

    /// The migration policy name is not one we recognize.
    #[error("unknown reschedule policy '{value}' - expected one of: none, queue, random, barrier")]
    UnknownPolicy {
        /// The value that was provided.
        value: String,
    },

    /// A migration policy was requested but there are not enough workers to migrate between.
    #[error("rescheduling requires at least two worker threads but only {requested} are configured")]
    NotEnoughWorkers {
        /// The number of workers configured.
        requested: usize,
    },

    /// The processor set restriction expression is not valid.
    #[error("invalid cpuset '{expression}': {problem}")]
    InvalidCpuSet {
        /// The expression (or the offending part of it).
        expression: String,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// The processor set restriction did not match any hardware thread.
    #[error("cpuset does not select any of the discovered hardware threads")]
    EmptyCpuSet,

    /// The processor set restriction selected a processor the process is not allowed to use.
    #[error("cpuset selects logical processor {processor}, which is not available to this process")]
    CpuSetOutsideAmbient {
        /// The first offending processor.
        processor: LogicalProcessor,
    },

    /// A device range does not fit into the list of discovered devices.
    #[error("device range {range} is out of bounds for {device_count} devices")]
    DeviceRangeOutOfBounds {
        /// The requested range.
        range: DeviceRange,

        /// Number of devices available.
        device_count: usize,
    },

    /// The operating system refused to report the processors available to the process.
    #[error("failed to query processor affinity: {0}")]
    AffinityQuery(#[source] io::Error),
}

/// A specialized `Result` type for this crate, returning the crate's [`Error`] type as the error
/// value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn messages_carry_context() {
        let error = Error::PinFailed {
            worker: 3,
            processor: LogicalProcessor::new(17),
        };
        assert_eq!(
            error.to_string(),
            "failed to pin worker 3 to logical processor 17"
        );

        let error = Error::DeviceRangeOutOfBounds {
            range: DeviceRange::new(6, 4),
            device_count: 8,
        };
        assert_eq!(
            error.to_string(),
            "device range [6, +4) is out of bounds for 8 devices"
        );
    }
}
