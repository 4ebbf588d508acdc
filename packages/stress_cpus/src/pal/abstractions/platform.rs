#![cfg_attr(
    test,
    expect(
        clippy::struct_field_names,
        reason = "false positive from automock generated code"
    )
)]

use std::fmt::Debug;
use std::io;

use crate::{LogicalProcessorSet, OsThreadId};

/// Operating system operations on thread affinity.
///
/// Implementations report OS failures as `io::Error` and never panic. Deciding what a failure
/// means is left to the callers.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait Platform: Debug + Send + Sync + 'static {
    /// Restricts a thread to the given processors.
    ///
    /// `None` means the calling thread.
    fn pin_thread(
        &self,
        thread: Option<OsThreadId>,
        processors: &LogicalProcessorSet,
    ) -> io::Result<()>;

    /// The processors the calling thread is currently allowed to run on.
    fn thread_processors(&self) -> io::Result<LogicalProcessorSet>;

    /// The OS identifier of the calling thread.
    fn current_thread_id(&self) -> OsThreadId;
}
