use std::cell::Cell;
use std::collections::HashMap;
use std::io;
use std::num::NonZero;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::constants::ERR_POISONED_LOCK;
use crate::pal::Platform;
use crate::{LogicalProcessor, LogicalProcessorSet, OsThreadId};

/// Source of simulated OS thread IDs. Starts at 1 because 0 means "calling thread" to the OS.
static NEXT_THREAD_ID: AtomicI32 = AtomicI32::new(1);

thread_local! {
    /// Simulated OS thread ID of the current thread, assigned on first use.
    static THREAD_ID: Cell<Option<OsThreadId>> = const { Cell::new(None) };
}

/// Fallback platform implementation for operating systems without native support.
///
/// Pinning is simulated: the requested processors are remembered per thread but the OS is never
/// asked to change anything. All processors reported by `std::thread::available_parallelism()`
/// are considered available, numbered from zero.
#[derive(Debug)]
pub(crate) struct BuildTargetPlatform {
    pins: OnceLock<Mutex<HashMap<OsThreadId, LogicalProcessorSet>>>,
}

/// Singleton instance of `BuildTargetPlatform`, used by public API types
/// to hook up to the correct PAL implementation.
pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform::new();

impl BuildTargetPlatform {
    pub(crate) const fn new() -> Self {
        Self {
            pins: OnceLock::new(),
        }
    }

    fn pins(&self) -> &Mutex<HashMap<OsThreadId, LogicalProcessorSet>> {
        self.pins.get_or_init(|| Mutex::new(HashMap::new()))
    }

    #[expect(clippy::unused_self, reason = "matches Platform trait signature")]
    #[cfg_attr(test, mutants::skip)] // Processor count depends on the machine running the tests.
    fn all_processors(&self) -> LogicalProcessorSet {
        let count = std::thread::available_parallelism()
            .map(NonZero::get)
            .unwrap_or(1);
        let count = u32::try_from(count).unwrap_or(u32::MAX);

        (0..count).map(LogicalProcessor::new).collect()
    }

    /// The simulated pinning state of a thread, if it was ever pinned.
    #[cfg(test)]
    pub(crate) fn pinned_processors(&self, thread: OsThreadId) -> Option<LogicalProcessorSet> {
        self.pins()
            .lock()
            .expect(ERR_POISONED_LOCK)
            .get(&thread)
            .cloned()
    }
}

impl Platform for BuildTargetPlatform {
    fn pin_thread(
        &self,
        thread: Option<OsThreadId>,
        processors: &LogicalProcessorSet,
    ) -> io::Result<()> {
        let all = self.all_processors();

        // Same validation the Linux kernel does: at least one usable processor must remain.
        if !processors.iter().any(|p| all.is_set(p)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no available processor in the requested set",
            ));
        }

        let thread = thread.unwrap_or_else(|| self.current_thread_id());

        self.pins()
            .lock()
            .expect(ERR_POISONED_LOCK)
            .insert(thread, processors.clone());

        Ok(())
    }

    fn thread_processors(&self) -> io::Result<LogicalProcessorSet> {
        let current = self.current_thread_id();

        let pinned = self
            .pins()
            .lock()
            .expect(ERR_POISONED_LOCK)
            .get(&current)
            .cloned();

        Ok(pinned.unwrap_or_else(|| self.all_processors()))
    }

    fn current_thread_id(&self) -> OsThreadId {
        THREAD_ID.with(|id| {
            if let Some(id) = id.get() {
                return id;
            }

            let new_id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
            id.set(Some(new_id));
            new_id
        })
    }
}
