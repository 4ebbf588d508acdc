use rand::Rng;

/// Picks a uniformly random device on every call. Holds no mutable state.
#[derive(Debug)]
pub(super) struct RandomSchedule {
    device_count: usize,
}

impl RandomSchedule {
    pub(super) fn new(device_count: usize) -> Self {
        assert!(device_count > 0, "random selection needs at least one device");

        Self { device_count }
    }

    pub(super) fn next_device(&self) -> usize {
        rand::rng().random_range(0..self.device_count)
    }
}
