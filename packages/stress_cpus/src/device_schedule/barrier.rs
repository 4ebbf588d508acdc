use std::fmt::{self, Debug};
use std::num::NonZero;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, trace};

use super::{Migration, ScheduleDevices};
use crate::constants::ERR_POISONED_LOCK;
use crate::{CompletionBarrier, OsThreadId};

type GroupCompletion = Box<dyn FnMut() + Send>;

/// Workers rendezvous in fixed groups and rotate their devices within the group.
///
/// Worker `w` belongs to group `w / members_per_group`; the last group is smaller if the workers
/// do not divide evenly. Initially worker `w` is on device `w`. On every cycle each member moves
/// to the device its successor in the group held, so the devices of a group stay a permutation
/// and no two members ever share a device after the group completes.
///
/// The group roster is created on first use under the write lock and only read-locked after that.
pub(super) struct BarrierSchedule {
    worker_count: usize,
    members_per_group: NonZero<usize>,
    roster: RwLock<Vec<Arc<GroupInfo>>>,
}

struct GroupInfo {
    first_worker: usize,
    barrier: CompletionBarrier<GroupCompletion>,
    members: Arc<Mutex<GroupMembers>>,
}

/// Per-member bookkeeping of one group, indexed by position within the group.
#[derive(Debug)]
struct GroupMembers {
    thread_ids: Vec<Option<OsThreadId>>,

    /// Devices as of the last completed cycle.
    current_devices: Vec<usize>,

    /// Devices members have moved to in the cycle in progress.
    next_devices: Vec<usize>,
}

impl GroupMembers {
    fn len(&self) -> usize {
        self.current_devices.len()
    }

    fn commit(&mut self) {
        self.current_devices.clone_from(&self.next_devices);
    }
}

impl GroupInfo {
    fn new(group_index: usize, first_worker: usize, size: NonZero<usize>) -> Self {
        let devices: Vec<usize> = (first_worker..first_worker.saturating_add(size.get())).collect();

        let members = Arc::new(Mutex::new(GroupMembers {
            thread_ids: vec![None; size.get()],
            current_devices: devices.clone(),
            next_devices: devices,
        }));

        let on_completion: GroupCompletion = Box::new({
            let members = Arc::clone(&members);
            move || {
                let mut members = members.lock().expect(ERR_POISONED_LOCK);
                members.commit();

                trace!(
                    group = group_index,
                    devices = ?members.current_devices,
                    threads = ?members.thread_ids,
                    "group completed migration"
                );
            }
        });

        Self {
            first_worker,
            barrier: CompletionBarrier::new(size, on_completion),
            members,
        }
    }
}

impl BarrierSchedule {
    pub(super) fn new(worker_count: usize, members_per_group: NonZero<usize>) -> Self {
        Self {
            worker_count,
            members_per_group,
            roster: RwLock::new(Vec::new()),
        }
    }

    pub(super) fn reschedule(&self, worker: usize, devices: &ScheduleDevices) -> Migration {
        let group = self.group_of(worker);

        let member = worker
            .checked_sub(group.first_worker)
            .expect("a worker's group never starts after the worker");

        let next_device = {
            let mut members = group.members.lock().expect(ERR_POISONED_LOCK);

            let successor = member.wrapping_add(1).checked_rem(members.len()).unwrap_or(0);
            let next_device = *members
                .current_devices
                .get(successor)
                .expect("successor index is reduced modulo the group size");

            if let Some(slot) = members.next_devices.get_mut(member) {
                *slot = next_device;
            }

            next_device
        };

        let migration = devices.migrate(worker, next_device);

        {
            let mut members = group.members.lock().expect(ERR_POISONED_LOCK);

            if let Some(slot) = members.thread_ids.get_mut(member) {
                *slot = Some(devices.current_thread_id());
            }
        }

        group.barrier.arrive_and_wait();

        migration
    }

    pub(super) fn finish(&self) {
        let mut roster = self.roster.write().expect(ERR_POISONED_LOCK);
        let groups = roster.len();
        roster.clear();

        debug!(groups, "released barrier groups");
    }

    fn group_of(&self, worker: usize) -> Arc<GroupInfo> {
        let index = worker
            .checked_div(self.members_per_group.get())
            .expect("group size is non-zero");

        {
            let roster = self.roster.read().expect(ERR_POISONED_LOCK);

            if let Some(group) = roster.get(index) {
                return Arc::clone(group);
            }
        }

        let mut roster = self.roster.write().expect(ERR_POISONED_LOCK);

        // Another worker may have built the roster while we waited for the write lock.
        if roster.is_empty() {
            roster.extend(self.build_groups());

            debug!(
                groups = roster.len(),
                members_per_group = self.members_per_group.get(),
                workers = self.worker_count,
                "created barrier groups"
            );
        }

        Arc::clone(
            roster
                .get(index)
                .expect("the roster has a group for every worker index"),
        )
    }

    fn build_groups(&self) -> Vec<Arc<GroupInfo>> {
        (0..self.worker_count)
            .step_by(self.members_per_group.get())
            .enumerate()
            .map(|(group_index, first_worker)| {
                let remaining = self.worker_count.saturating_sub(first_worker);
                let size = NonZero::new(remaining.min(self.members_per_group.get()))
                    .expect("step_by never yields a start past the last worker");

                Arc::new(GroupInfo::new(group_index, first_worker, size))
            })
            .collect()
    }
}

impl Debug for BarrierSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierSchedule")
            .field("worker_count", &self.worker_count)
            .field("members_per_group", &self.members_per_group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    use new_zealand::nz;
    use testing::with_watchdog;

    use super::*;
    use crate::fake::TopologyShape;
    use crate::pal::MockPlatform;
    use crate::pinning::ThreadPinning;
    use crate::{LogicalProcessor, TopologyBuilder};

    fn devices(count: NonZero<u32>) -> Arc<ScheduleDevices> {
        let threads = TopologyShape::new().cores_per_package(count).threads();
        let topology = TopologyBuilder::new(threads).build().unwrap();

        let mut platform = MockPlatform::new();
        platform.expect_pin_thread().returning(|_, _| Ok(()));
        platform.expect_current_thread_id().returning(|| 7);

        Arc::new(ScheduleDevices::new(
            &topology,
            ThreadPinning::with_platform(platform),
        ))
    }

    fn run_cycle(
        schedule: &Arc<BarrierSchedule>,
        devices: &Arc<ScheduleDevices>,
        workers: usize,
    ) -> Vec<Migration> {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let schedule = Arc::clone(schedule);
                let devices = Arc::clone(devices);
                thread::spawn(move || schedule.reschedule(worker, &devices))
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn groups_are_split_by_size() {
        let schedule = BarrierSchedule::new(5, nz!(2));
        let groups = schedule.build_groups();

        let sizes: Vec<_> = groups.iter().map(|g| g.barrier.parties().get()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let starts: Vec<_> = groups.iter().map(|g| g.first_worker).collect();
        assert_eq!(starts, vec![0, 2, 4]);
    }

    #[test]
    fn first_member_waits_for_second() {
        with_watchdog(|| {
            let schedule = Arc::new(BarrierSchedule::new(2, nz!(2)));
            let devices = devices(nz!(2));
            let first_done = Arc::new(AtomicBool::new(false));

            let first = thread::spawn({
                let schedule = Arc::clone(&schedule);
                let devices = Arc::clone(&devices);
                let first_done = Arc::clone(&first_done);
                move || {
                    let migration = schedule.reschedule(0, &devices);
                    first_done.store(true, Ordering::SeqCst);
                    migration
                }
            });

            thread::sleep(Duration::from_millis(100));
            assert!(!first_done.load(Ordering::SeqCst));

            let second = schedule.reschedule(1, &devices);
            let first = first.join().unwrap();

            assert!(first_done.load(Ordering::SeqCst));
            assert_ne!(first.device, second.device);
            assert!(first.device < 2 && second.device < 2);
        });
    }

    #[test]
    fn rotation_keeps_group_devices_distinct() {
        with_watchdog(|| {
            let schedule = Arc::new(BarrierSchedule::new(3, nz!(3)));
            let devices = devices(nz!(3));

            // Each cycle moves every member to its successor's device.
            let expected = [[1, 2, 0], [2, 0, 1], [0, 1, 2]];

            for expected in expected {
                let migrations = run_cycle(&schedule, &devices, 3);
                let got: Vec<_> = migrations.iter().map(|m| m.device).collect();
                assert_eq!(got, expected);
            }
        });
    }

    #[test]
    fn groups_migrate_independently() {
        with_watchdog(|| {
            let schedule = Arc::new(BarrierSchedule::new(4, nz!(2)));
            let devices = devices(nz!(4));

            let migrations = run_cycle(&schedule, &devices, 4);
            let got: Vec<_> = migrations.iter().map(|m| m.device).collect();

            assert_eq!(got, vec![1, 0, 3, 2]);
            assert!(
                migrations
                    .iter()
                    .all(|m| m.processor == LogicalProcessor::new(u32::try_from(m.device).unwrap()))
            );
        });
    }

    #[test]
    fn records_member_thread_ids() {
        with_watchdog(|| {
            let schedule = Arc::new(BarrierSchedule::new(2, nz!(2)));
            let devices = devices(nz!(2));

            run_cycle(&schedule, &devices, 2);

            let group = schedule.group_of(0);
            let members = group.members.lock().unwrap();
            assert_eq!(members.thread_ids, vec![Some(7), Some(7)]);
        });
    }

    #[test]
    fn finish_releases_groups() {
        with_watchdog(|| {
            let schedule = Arc::new(BarrierSchedule::new(1, nz!(2)));
            let devices = devices(nz!(2));

            // A lone worker in a group of one completes alone and keeps its device.
            let migration = schedule.reschedule(0, &devices);
            assert_eq!(migration.device, 0);
            assert_eq!(schedule.roster.read().unwrap().len(), 1);

            schedule.finish();
            assert!(schedule.roster.read().unwrap().is_empty());
        });
    }
}
