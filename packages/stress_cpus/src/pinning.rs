use std::sync::OnceLock;

use tracing::{trace, warn};

use crate::error::Result;
use crate::pal::{Platform, PlatformFacade};
use crate::{Error, LogicalProcessor, LogicalProcessorSet, OsThreadId};

/// The processors the process was allowed to use when first asked, before any pinning.
static AMBIENT_PROCESSORS: OnceLock<LogicalProcessorSet> = OnceLock::new();

/// Binds threads to logical processors via the platform's affinity primitives.
///
/// Failures are never fatal here: they are logged and reported as `false`, leaving it to the
/// caller to decide whether a failed pin matters.
#[derive(Clone, Debug, Default)]
pub(crate) struct ThreadPinning {
    platform: PlatformFacade,
}

impl ThreadPinning {
    #[cfg(test)]
    pub(crate) fn with_platform(platform: impl Into<PlatformFacade>) -> Self {
        Self {
            platform: platform.into(),
        }
    }

    pub(crate) fn pin_current(&self, processor: LogicalProcessor, name: &str) -> bool {
        self.pin(None, &LogicalProcessorSet::from_iter([processor]), name)
    }

    pub(crate) fn pin_thread(
        &self,
        processor: LogicalProcessor,
        thread: OsThreadId,
        name: &str,
    ) -> bool {
        self.pin(
            Some(thread),
            &LogicalProcessorSet::from_iter([processor]),
            name,
        )
    }

    pub(crate) fn pin_current_to_set(&self, processors: &LogicalProcessorSet, name: &str) -> bool {
        self.pin(None, processors, name)
    }

    pub(crate) fn current_thread_id(&self) -> OsThreadId {
        self.platform.current_thread_id()
    }

    pub(crate) fn thread_processors(&self) -> Result<LogicalProcessorSet> {
        self.platform
            .thread_processors()
            .map_err(Error::AffinityQuery)
    }

    fn pin(
        &self,
        thread: Option<OsThreadId>,
        processors: &LogicalProcessorSet,
        name: &str,
    ) -> bool {
        match self.platform.pin_thread(thread, processors) {
            Ok(()) => {
                trace!(%processors, thread_name = name, "pinned thread");
                true
            }
            Err(error) => {
                warn!(
                    %processors,
                    thread_name = name,
                    os_thread_id = thread,
                    %error,
                    "failed to pin thread"
                );
                false
            }
        }
    }
}

/// Binds the calling thread to exactly `processor`.
///
/// `name` identifies the thread in log messages. Returns `false` (after logging a warning) if the
/// operating system refused, for example because the processor is offline or outside the
/// process's allowed set.
///
/// # Example
///
/// ```
/// use stress_cpus::{ambient_logical_processor_set, pin_to_logical_processor};
///
/// let ambient = ambient_logical_processor_set().unwrap();
/// let first = ambient.first().unwrap();
///
/// std::thread::spawn(move || {
///     assert!(pin_to_logical_processor(first, "example worker"));
/// })
/// .join()
/// .unwrap();
/// ```
#[must_use]
pub fn pin_to_logical_processor(processor: LogicalProcessor, name: &str) -> bool {
    ThreadPinning::default().pin_current(processor, name)
}

/// Binds an already running thread, identified by its OS thread ID, to exactly `processor`.
///
/// Use [`current_os_thread_id()`] on the target thread to obtain its ID.
#[must_use]
pub fn pin_thread_to_logical_processor(
    processor: LogicalProcessor,
    thread: OsThreadId,
    name: &str,
) -> bool {
    ThreadPinning::default().pin_thread(processor, thread, name)
}

/// Binds the calling thread to a group of processors. The thread may run on any of them.
///
/// This is used for helper threads that should stay near a group of workers without taking a
/// specific processor. See [`CpuTopology::processors_in()`][crate::CpuTopology::processors_in] to
/// obtain the processors of a device range.
#[must_use]
pub fn pin_to_logical_processors(processors: &LogicalProcessorSet, name: &str) -> bool {
    ThreadPinning::default().pin_current_to_set(processors, name)
}

/// The processors the operating system allows this process to use, before any restriction.
///
/// The set is captured the first time this function succeeds and the same set is returned on
/// every later call, so call it at startup before pinning the calling thread.
///
/// # Errors
///
/// Returns [`Error::AffinityQuery`] if the operating system could not be queried.
pub fn ambient_logical_processor_set() -> Result<LogicalProcessorSet> {
    if let Some(ambient) = AMBIENT_PROCESSORS.get() {
        return Ok(ambient.clone());
    }

    let queried = ThreadPinning::default().thread_processors()?;

    Ok(AMBIENT_PROCESSORS.get_or_init(|| queried).clone())
}

/// The operating system identifier of the calling thread, for use with
/// [`pin_thread_to_logical_processor()`].
#[must_use]
pub fn current_os_thread_id() -> OsThreadId {
    ThreadPinning::default().current_thread_id()
}
