use tracing::{debug, warn};

use crate::error::Result;
use crate::pinning::ThreadPinning;
use crate::{
    CpuTopology, DeviceSchedule, Error, LogicalProcessor, Migration, ScheduleConfig, Slice,
    SlicePlan,
};

/// Everything a run needs to place its workers: the slices, each worker's initial processor and
/// the migration schedule.
///
/// Worker `i` starts on device `i` of the topology. Workers call [`pin_worker()`][Self::pin_worker]
/// once when they start and then [`reschedule()`][Self::reschedule] whenever the run loop decides
/// it is time to move. At the end of the run, call [`finish()`][Self::finish].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use stress_cpus::{HardwareThread, RunPlan, ScheduleConfig, TopologyBuilder};
/// use stress_cpus::ambient_logical_processor_set;
///
/// // A single device the process is allowed to use, so the example runs anywhere.
/// let processor = ambient_logical_processor_set().unwrap().first().unwrap();
///
/// let topology = TopologyBuilder::new([HardwareThread::new(processor)])
///     .build()
///     .unwrap();
///
/// let plan = Arc::new(RunPlan::new(&topology, &ScheduleConfig::new()).unwrap());
///
/// let handles: Vec<_> = (0..plan.worker_count())
///     .map(|worker| {
///         let plan = Arc::clone(&plan);
///         thread::spawn(move || {
///             plan.pin_worker(worker).unwrap();
///
///             // With no migration policy, rescheduling does nothing.
///             assert!(plan.reschedule(worker).is_none());
///         })
///     })
///     .collect();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
///
/// plan.finish();
/// ```
#[derive(Debug)]
pub struct RunPlan {
    slices: SlicePlan,
    schedule: Option<DeviceSchedule>,
    initial_processors: Vec<LogicalProcessor>,
    pinning: ThreadPinning,
}

impl RunPlan {
    /// Plans a run of `config` on `topology`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is not valid for the topology, e.g. a migration
    /// policy with fewer than two workers.
    pub fn new(topology: &CpuTopology, config: &ScheduleConfig) -> Result<Self> {
        Self::with_pinning(topology, config, ThreadPinning::default())
    }

    pub(crate) fn with_pinning(
        topology: &CpuTopology,
        config: &ScheduleConfig,
        pinning: ThreadPinning,
    ) -> Result<Self> {
        config.validate(topology.num_devices())?;

        let worker_count = config.worker_count(topology.num_devices());

        let initial_processors = topology
            .threads()
            .iter()
            .take(worker_count)
            .map(|t| t.cpu_number)
            .collect();

        let slices = SlicePlan::new(topology, config.slice_limit());
        let schedule = DeviceSchedule::with_pinning(config, topology, pinning.clone())?;

        debug!(
            workers = worker_count,
            slices = slices.slices().len(),
            policy = %config.selected_policy(),
            "planned run"
        );

        Ok(Self {
            slices,
            schedule,
            initial_processors,
            pinning,
        })
    }

    /// Number of workers in the run.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.initial_processors.len()
    }

    /// The slices the topology was partitioned into.
    #[must_use]
    pub fn slices(&self) -> &[Slice] {
        self.slices.slices()
    }

    /// The slice a worker starts in.
    #[must_use]
    pub fn slice_of_worker(&self, worker: usize) -> Option<&Slice> {
        if worker >= self.worker_count() {
            return None;
        }

        // Worker `i` starts on device `i`.
        self.slices.slice_of_device(worker)
    }

    /// The migration schedule, if the run migrates workers.
    #[must_use]
    pub fn schedule(&self) -> Option<&DeviceSchedule> {
        self.schedule.as_ref()
    }

    /// The processor a worker starts on.
    #[must_use]
    pub fn initial_processor(&self, worker: usize) -> Option<LogicalProcessor> {
        self.initial_processors.get(worker).copied()
    }

    /// Pins the calling thread, which must be worker `worker`, to the worker's initial processor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownWorker`] if `worker` is not a worker of this run and
    /// [`Error::PinFailed`] if the operating system refused. Test isolation is not possible
    /// then, so the run should not start.
    pub fn pin_worker(&self, worker: usize) -> Result<LogicalProcessor> {
        let processor = self
            .initial_processor(worker)
            .ok_or_else(|| Error::UnknownWorker {
                worker,
                worker_count: self.worker_count(),
            })?;

        if self
            .pinning
            .pin_current(processor, &format!("worker {worker}"))
        {
            Ok(processor)
        } else {
            Err(Error::PinFailed { worker, processor })
        }
    }

    /// Moves worker `worker` (the calling thread) to its next device, as the schedule decides.
    ///
    /// Returns `None` if the run does not migrate workers.
    pub fn reschedule(&self, worker: usize) -> Option<Migration> {
        self.schedule
            .as_ref()
            .and_then(|schedule| schedule.reschedule_to_next_device(worker))
    }

    /// Pins the calling helper thread to all processors of a slice.
    ///
    /// Returns `false` if there is no such slice or the operating system refused.
    pub fn pin_helper_to_slice(&self, slice: usize, name: &str) -> bool {
        let Some(slice) = self.slices.slices().get(slice) else {
            warn!(slice, thread_name = name, "cannot pin helper to nonexistent slice");
            return false;
        };

        self.pinning
            .pin_current_to_set(slice.logical_processors(), name)
    }

    /// Releases run resources. Call after all workers have stopped rescheduling.
    pub fn finish(&self) {
        if let Some(schedule) = &self.schedule {
            schedule.finish_reschedule();
        }
    }
}
