use std::sync::Mutex;

use rand::seq::SliceRandom;
use tracing::trace;

use crate::constants::ERR_POISONED_LOCK;

/// Hands out devices from a shuffled permutation, reshuffling whenever it is used up.
#[derive(Debug)]
pub(super) struct QueueSchedule {
    state: Mutex<QueueState>,
}

#[derive(Debug)]
struct QueueState {
    device_count: usize,
    order: Vec<usize>,
    cursor: usize,
}

impl QueueState {
    fn reshuffle(&mut self) {
        self.order.clear();
        self.order.extend(0..self.device_count);
        self.order.shuffle(&mut rand::rng());
        self.cursor = 0;

        trace!(devices = self.device_count, "reshuffled device queue");
    }
}

impl QueueSchedule {
    pub(super) fn new(device_count: usize) -> Self {
        assert!(device_count > 0, "a device queue needs at least one device");

        Self {
            state: Mutex::new(QueueState {
                device_count,
                // Empty until the first call, which shuffles.
                order: Vec::with_capacity(device_count),
                cursor: 0,
            }),
        }
    }

    pub(super) fn next_device(&self) -> usize {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        if state.cursor >= state.order.len() {
            state.reshuffle();
        }

        let device = *state
            .order
            .get(state.cursor)
            .expect("a freshly shuffled queue holds every device");

        state.cursor = state.cursor.wrapping_add(1);

        device
    }
}
