//! Platform Abstraction Layer (PAL). Everything that talks to the operating system about thread
//! affinity goes through the `Platform` trait defined here, so the layers above can be tested
//! against a mock.

mod abstractions;
pub(crate) use abstractions::*;

mod facade;
pub(crate) use facade::*;

#[cfg(all(target_os = "linux", not(miri)))]
mod linux;
#[cfg(all(target_os = "linux", not(miri)))]
pub(crate) use linux::*;

// The fallback module is compiled in test mode on all platforms, under Miri, and as the primary
// implementation on unsupported platforms. On Linux in test mode it must be accessed via the
// explicit path `fallback::` to avoid ambiguity with the real implementation.
#[cfg(any(test, miri, not(target_os = "linux")))]
pub(crate) mod fallback;

#[cfg(any(miri, not(target_os = "linux")))]
pub(crate) use fallback::*;
