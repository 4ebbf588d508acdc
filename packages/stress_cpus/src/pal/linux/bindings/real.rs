use std::fmt::Debug;
use std::io;

use libc::{c_ulong, pid_t};

use crate::pal::linux::Bindings;

/// FFI bindings that target the real operating system that the build is targeting.
///
/// You would only use different bindings in PAL unit tests that need to use mock bindings.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetBindings;

// Real OS bindings are exercised by the integration tests on actual Linux. Their error paths
// need OS-level failures that are impractical to trigger.
#[cfg_attr(coverage_nightly, coverage(off))]
impl Bindings for BuildTargetBindings {
    fn sched_setaffinity(&self, tid: pid_t, mask: &[c_ulong]) -> io::Result<()> {
        // SAFETY: The pointer and size describe the `mask` slice, which outlives the call.
        // The kernel only reads `size_of_val(mask)` bytes.
        let result = unsafe {
            libc::sched_setaffinity(tid, size_of_val(mask), mask.as_ptr().cast::<libc::cpu_set_t>())
        };

        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn sched_getaffinity_current(&self, word_count: usize) -> io::Result<Vec<c_ulong>> {
        let mut mask: Vec<c_ulong> = vec![0; word_count];

        // 0 means current thread.
        // SAFETY: The pointer and size describe the `mask` buffer, which outlives the call.
        // The kernel writes at most `size_of_val(mask)` bytes.
        let result = unsafe {
            libc::sched_getaffinity(
                0,
                size_of_val(mask.as_slice()),
                mask.as_mut_ptr().cast::<libc::cpu_set_t>(),
            )
        };

        if result == 0 {
            Ok(mask)
        } else {
            Err(io::Error::last_os_error())
        }
    }

    fn gettid(&self) -> pid_t {
        // SAFETY: No safety requirements.
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };

        #[expect(
            clippy::cast_possible_truncation,
            reason = "the kernel guarantees thread IDs fit in pid_t"
        )]
        let tid = tid as pid_t;
        tid
    }
}
