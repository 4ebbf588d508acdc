use std::fmt::{self, Debug};
use std::num::NonZero;
use std::sync::{Condvar, Mutex};

use crate::constants::ERR_POISONED_LOCK;

/// A reusable rendezvous point for a fixed number of threads that owns a completion action.
///
/// Each thread calls [`arrive_and_wait()`][Self::arrive_and_wait]. The call blocks until all
/// `parties` threads of the current cycle have arrived. The last thread to arrive runs the
/// completion action exactly once, then releases everyone and the barrier starts a new cycle.
///
/// There is no timeout. A party that never arrives blocks the others forever.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::thread;
///
/// use new_zealand::nz;
/// use stress_cpus::CompletionBarrier;
///
/// let completions = Arc::new(AtomicUsize::new(0));
/// let barrier = Arc::new(CompletionBarrier::new(nz!(3), {
///     let completions = Arc::clone(&completions);
///     move || {
///         completions.fetch_add(1, Ordering::Relaxed);
///     }
/// }));
///
/// let handles: Vec<_> = (0..3)
///     .map(|_| {
///         let barrier = Arc::clone(&barrier);
///         thread::spawn(move || barrier.arrive_and_wait())
///     })
///     .collect();
///
/// let leaders = handles
///     .into_iter()
///     .map(|h| h.join().unwrap())
///     .filter(|&led| led)
///     .count();
///
/// assert_eq!(leaders, 1);
/// assert_eq!(completions.load(Ordering::Relaxed), 1);
/// ```
pub struct CompletionBarrier<F> {
    parties: NonZero<usize>,
    state: Mutex<BarrierState<F>>,
    released: Condvar,
}

struct BarrierState<F> {
    arrived: usize,
    generation: u64,
    on_completion: F,
}

impl<F> CompletionBarrier<F>
where
    F: FnMut(),
{
    /// Creates a barrier for `parties` threads that runs `on_completion` once per cycle.
    #[must_use]
    pub fn new(parties: NonZero<usize>, on_completion: F) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                on_completion,
            }),
            released: Condvar::new(),
        }
    }

    /// Number of threads that must arrive to complete a cycle.
    #[must_use]
    pub fn parties(&self) -> NonZero<usize> {
        self.parties
    }

    /// Arrives at the barrier and blocks until the current cycle completes.
    ///
    /// Returns `true` for the one thread per cycle that ran the completion action. The completion
    /// action has finished before any thread of the cycle returns.
    pub fn arrive_and_wait(&self) -> bool {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        state.arrived = state.arrived.wrapping_add(1);

        if state.arrived == self.parties.get() {
            (state.on_completion)();

            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            drop(state);

            self.released.notify_all();
            return true;
        }

        let generation = state.generation;

        let _state = self
            .released
            .wait_while(state, |s| s.generation == generation)
            .expect(ERR_POISONED_LOCK);

        false
    }
}

impl<F> Debug for CompletionBarrier<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (arrived, generation) = match self.state.try_lock() {
            Ok(state) => (Some(state.arrived), Some(state.generation)),
            Err(_) => (None, None),
        };

        f.debug_struct("CompletionBarrier")
            .field("parties", &self.parties)
            .field("arrived", &arrived)
            .field("generation", &generation)
            .finish_non_exhaustive()
    }
}
