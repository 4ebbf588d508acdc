mod barrier;
mod queue;
mod random;

use barrier::BarrierSchedule;
use queue::QueueSchedule;
use random::RandomSchedule;
use tracing::debug;

use crate::error::Result;
use crate::pinning::ThreadPinning;
use crate::{CpuTopology, LogicalProcessor, OsThreadId, ScheduleConfig, SchedulePolicy};

/// The outcome of one migration of a worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct Migration {
    /// The device the worker was moved to.
    pub device: usize,

    /// The logical processor of that device.
    pub processor: LogicalProcessor,

    /// Whether the operating system accepted the new affinity. If not, the worker keeps running
    /// wherever it was; the caller decides whether that is a fault.
    pub pinned: bool,
}

/// Migration policy for one run: decides which device a worker moves to next and moves it there.
///
/// Created once per run from a [`ScheduleConfig`] and shared by all workers (it is `Sync`). Each
/// worker periodically calls [`reschedule_to_next_device()`][Self::reschedule_to_next_device]
/// with its own worker index; at the end of the run, call
/// [`finish_reschedule()`][Self::finish_reschedule].
///
/// The policies:
///
/// * [`SchedulePolicy::Queue`] - a shuffled permutation of all devices is handed out in order and
///   reshuffled when exhausted. Calls are serialized by a mutex; pinning happens outside it.
/// * [`SchedulePolicy::Random`] - a uniformly random device per call. No shared state.
/// * [`SchedulePolicy::Barrier`] - workers form groups that rotate their devices among themselves.
///   Each member pins itself to its next device and then waits for the rest of its group, so
///   nobody outside the group sees a half-migrated group. A member that never arrives blocks its
///   group forever.
#[derive(Debug)]
pub struct DeviceSchedule {
    kind: ScheduleKind,
    devices: ScheduleDevices,
    worker_count: usize,
}

#[derive(Debug)]
enum ScheduleKind {
    Barrier(BarrierSchedule),
    Queue(QueueSchedule),
    Random(RandomSchedule),
}

impl DeviceSchedule {
    /// Creates the schedule selected by `config` for `topology`.
    ///
    /// Returns `None` if the configured policy does not migrate workers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is not valid for the topology
    /// (see [`ScheduleConfig::validate()`]).
    pub fn new(config: &ScheduleConfig, topology: &CpuTopology) -> Result<Option<Self>> {
        Self::with_pinning(config, topology, ThreadPinning::default())
    }

    pub(crate) fn with_pinning(
        config: &ScheduleConfig,
        topology: &CpuTopology,
        pinning: ThreadPinning,
    ) -> Result<Option<Self>> {
        config.validate(topology.num_devices())?;

        let worker_count = config.worker_count(topology.num_devices());
        let device_count = topology.num_devices();

        let kind = match config.selected_policy() {
            SchedulePolicy::None => return Ok(None),
            SchedulePolicy::Queue => ScheduleKind::Queue(QueueSchedule::new(device_count)),
            SchedulePolicy::Random => ScheduleKind::Random(RandomSchedule::new(device_count)),
            SchedulePolicy::Barrier => ScheduleKind::Barrier(BarrierSchedule::new(
                worker_count,
                config.group_size(),
            )),
        };

        debug!(
            policy = %config.selected_policy(),
            workers = worker_count,
            devices = device_count,
            "created device schedule"
        );

        Ok(Some(Self {
            kind,
            devices: ScheduleDevices::new(topology, pinning),
            worker_count,
        }))
    }

    /// The policy this schedule implements.
    #[must_use]
    pub fn policy(&self) -> SchedulePolicy {
        match self.kind {
            ScheduleKind::Barrier(_) => SchedulePolicy::Barrier,
            ScheduleKind::Queue(_) => SchedulePolicy::Queue,
            ScheduleKind::Random(_) => SchedulePolicy::Random,
        }
    }

    /// Number of workers the schedule was created for.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Picks the next device for `worker` (the calling thread) and pins the calling thread to it.
    ///
    /// Under [`SchedulePolicy::Barrier`] this blocks until every member of the worker's group has
    /// made the same call.
    ///
    /// Returns `None` if `worker` is not a worker index of this schedule.
    pub fn reschedule_to_next_device(&self, worker: usize) -> Option<Migration> {
        if worker >= self.worker_count {
            return None;
        }

        match &self.kind {
            ScheduleKind::Barrier(schedule) => {
                Some(schedule.reschedule(worker, &self.devices))
            }
            ScheduleKind::Queue(schedule) => {
                Some(self.devices.migrate(worker, schedule.next_device()))
            }
            ScheduleKind::Random(schedule) => {
                Some(self.devices.migrate(worker, schedule.next_device()))
            }
        }
    }

    /// Releases the resources of the schedule at the end of the run.
    ///
    /// Must not be called while a worker is still inside
    /// [`reschedule_to_next_device()`][Self::reschedule_to_next_device].
    pub fn finish_reschedule(&self) {
        if let ScheduleKind::Barrier(schedule) = &self.kind {
            schedule.finish();
        }

        debug!(policy = %self.policy(), "finished device schedule");
    }
}

/// Maps device indexes to processors and applies migrations.
#[derive(Debug)]
struct ScheduleDevices {
    processors: Vec<LogicalProcessor>,
    pinning: ThreadPinning,
}

impl ScheduleDevices {
    fn new(topology: &CpuTopology, pinning: ThreadPinning) -> Self {
        Self {
            processors: topology.threads().iter().map(|t| t.cpu_number).collect(),
            pinning,
        }
    }

    fn migrate(&self, worker: usize, device: usize) -> Migration {
        let processor = *self
            .processors
            .get(device)
            .expect("schedules only pick devices that exist in the topology");

        let pinned = self
            .pinning
            .pin_current(processor, &format!("worker {worker}"));

        debug!(worker, device, %processor, pinned, "migrated worker");

        Migration {
            device,
            processor,
            pinned,
        }
    }

    fn current_thread_id(&self) -> OsThreadId {
        self.pinning.current_thread_id()
    }
}
