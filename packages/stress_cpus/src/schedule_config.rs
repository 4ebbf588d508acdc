use std::fmt::Display;
use std::num::NonZero;
use std::str::FromStr;

use new_zealand::nz;

use crate::Error;
use crate::error::Result;

/// How workers are migrated between devices during a run.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SchedulePolicy {
    /// Workers stay on their initial device for the whole run.
    #[default]
    None,

    /// Devices are handed out from a shuffled queue, so every device is visited once per pass.
    Queue,

    /// Every migration picks a uniformly random device.
    Random,

    /// Workers are grouped and swap devices within the group at a rendezvous point.
    Barrier,
}

impl SchedulePolicy {
    /// Whether the policy moves workers at all.
    #[must_use]
    pub const fn migrates(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl FromStr for SchedulePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "queue" => Ok(Self::Queue),
            "random" => Ok(Self::Random),
            "barrier" => Ok(Self::Barrier),
            _ => Err(Error::UnknownPolicy {
                value: s.to_string(),
            }),
        }
    }
}

impl Display for SchedulePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Queue => "queue",
            Self::Random => "random",
            Self::Barrier => "barrier",
        })
    }
}

/// Run-start configuration of worker placement and migration.
///
/// # Example
///
/// ```
/// use std::num::NonZero;
///
/// use stress_cpus::{ScheduleConfig, SchedulePolicy};
///
/// let config = ScheduleConfig::new()
///     .policy("queue".parse().unwrap())
///     .max_cores_per_slice(4)
///     .thread_count(NonZero::new(8).unwrap());
///
/// assert_eq!(config.worker_count(16), 8);
/// assert!(config.validate(16).is_ok());
///
/// // Migration needs at least two workers.
/// let lonely = config.thread_count(NonZero::new(1).unwrap());
/// assert!(lonely.validate(16).is_err());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[must_use]
pub struct ScheduleConfig {
    policy: SchedulePolicy,
    max_cores_per_slice: i32,
    thread_count: Option<NonZero<usize>>,
    members_per_group: NonZero<usize>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleConfig {
    /// No migration, no slice limit, one worker per device, barrier groups of two.
    pub const fn new() -> Self {
        Self {
            policy: SchedulePolicy::None,
            max_cores_per_slice: 0,
            thread_count: None,
            members_per_group: nz!(2),
        }
    }

    /// Sets the migration policy.
    pub const fn policy(mut self, policy: SchedulePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the maximum number of cores per slice. Zero or less means no limit.
    pub const fn max_cores_per_slice(mut self, max_cores: i32) -> Self {
        self.max_cores_per_slice = max_cores;
        self
    }

    /// Disables slicing: all cores form one slice.
    pub const fn no_slicing(self) -> Self {
        self.max_cores_per_slice(-1)
    }

    /// Sets the number of worker threads. By default there is one worker per device.
    pub const fn thread_count(mut self, count: NonZero<usize>) -> Self {
        self.thread_count = Some(count);
        self
    }

    /// Sets how many workers rendezvous together under [`SchedulePolicy::Barrier`].
    pub const fn members_per_group(mut self, members: NonZero<usize>) -> Self {
        self.members_per_group = members;
        self
    }

    /// The configured migration policy.
    #[must_use]
    pub const fn selected_policy(&self) -> SchedulePolicy {
        self.policy
    }

    /// The configured slice bound, where zero or less means no limit.
    #[must_use]
    pub const fn slice_limit(&self) -> i32 {
        self.max_cores_per_slice
    }

    /// The configured barrier group size.
    #[must_use]
    pub const fn group_size(&self) -> NonZero<usize> {
        self.members_per_group
    }

    /// Number of workers to run on a topology with `num_devices` devices.
    ///
    /// Never more than the number of devices, since every worker gets a device of its own.
    #[must_use]
    pub fn worker_count(&self, num_devices: usize) -> usize {
        self.thread_count
            .map_or(num_devices, |count| count.get().min(num_devices))
    }

    /// Checks the configuration against a topology with `num_devices` devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnoughWorkers`] if a migrating policy is selected but there would be
    /// fewer than two workers.
    pub fn validate(&self, num_devices: usize) -> Result<()> {
        let workers = self.worker_count(num_devices);

        if self.policy.migrates() && workers < 2 {
            return Err(Error::NotEnoughWorkers { requested: workers });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_policies() {
        for policy in [
            SchedulePolicy::None,
            SchedulePolicy::Queue,
            SchedulePolicy::Random,
            SchedulePolicy::Barrier,
        ] {
            assert_eq!(policy.to_string().parse::<SchedulePolicy>().unwrap(), policy);
        }
    }

    #[test]
    fn rejects_unknown_policy() {
        let result = "roundrobin".parse::<SchedulePolicy>();

        assert!(matches!(
            result,
            Err(Error::UnknownPolicy { value }) if value == "roundrobin"
        ));
        assert!("Queue".parse::<SchedulePolicy>().is_err());
    }

    #[test]
    fn defaults() {
        let config = ScheduleConfig::default();

        assert_eq!(config.selected_policy(), SchedulePolicy::None);
        assert_eq!(config.slice_limit(), 0);
        assert_eq!(config.group_size().get(), 2);
        assert_eq!(config.worker_count(12), 12);
    }

    #[test]
    fn no_slicing_sets_negative_limit() {
        assert_eq!(ScheduleConfig::new().no_slicing().slice_limit(), -1);
    }

    #[test]
    fn worker_count_saturates_at_device_count() {
        let config = ScheduleConfig::new().thread_count(nz!(64));
        assert_eq!(config.worker_count(8), 8);
    }

    #[test]
    fn migration_needs_two_workers() {
        let one = ScheduleConfig::new()
            .policy(SchedulePolicy::Random)
            .thread_count(nz!(1));

        assert!(matches!(
            one.validate(8),
            Err(Error::NotEnoughWorkers { requested: 1 })
        ));

        // A single device limits the workers just the same.
        let queue = ScheduleConfig::new().policy(SchedulePolicy::Queue);
        assert!(matches!(
            queue.validate(1),
            Err(Error::NotEnoughWorkers { requested: 1 })
        ));

        assert!(queue.validate(2).is_ok());
    }

    #[test]
    fn no_migration_is_fine_with_one_worker() {
        let config = ScheduleConfig::new().thread_count(nz!(1));
        assert!(config.validate(1).is_ok());
    }
}
