#![cfg_attr(coverage_nightly, coverage(off))]

use std::fmt::Debug;
use std::io;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::pal::MockPlatform;
#[cfg(all(test, target_os = "linux", not(miri)))]
use crate::pal::fallback::BuildTargetPlatform as FallbackPlatform;
use crate::pal::{BUILD_TARGET_PLATFORM, BuildTargetPlatform, Platform};
use crate::{LogicalProcessorSet, OsThreadId};

/// Enum to hide the real/fallback/mock choice behind a single wrapper type.
#[derive(Clone)]
pub(crate) enum PlatformFacade {
    Target(&'static BuildTargetPlatform),

    #[cfg(all(test, target_os = "linux", not(miri)))]
    Fallback(&'static FallbackPlatform),

    #[cfg(test)]
    Mock(Arc<MockPlatform>),
}

impl PlatformFacade {
    pub(crate) const fn target() -> Self {
        Self::Target(&BUILD_TARGET_PLATFORM)
    }

    #[cfg(all(test, target_os = "linux", not(miri)))]
    pub(crate) const fn fallback() -> Self {
        Self::Fallback(&crate::pal::fallback::BUILD_TARGET_PLATFORM)
    }

    #[cfg(test)]
    pub(crate) fn from_mock(mock: MockPlatform) -> Self {
        Self::Mock(Arc::new(mock))
    }
}

impl Platform for PlatformFacade {
    fn pin_thread(
        &self,
        thread: Option<OsThreadId>,
        processors: &LogicalProcessorSet,
    ) -> io::Result<()> {
        match self {
            Self::Target(p) => p.pin_thread(thread, processors),
            #[cfg(all(test, target_os = "linux", not(miri)))]
            Self::Fallback(p) => p.pin_thread(thread, processors),
            #[cfg(test)]
            Self::Mock(p) => p.pin_thread(thread, processors),
        }
    }

    fn thread_processors(&self) -> io::Result<LogicalProcessorSet> {
        match self {
            Self::Target(p) => p.thread_processors(),
            #[cfg(all(test, target_os = "linux", not(miri)))]
            Self::Fallback(p) => p.thread_processors(),
            #[cfg(test)]
            Self::Mock(p) => p.thread_processors(),
        }
    }

    fn current_thread_id(&self) -> OsThreadId {
        match self {
            Self::Target(p) => p.current_thread_id(),
            #[cfg(all(test, target_os = "linux", not(miri)))]
            Self::Fallback(p) => p.current_thread_id(),
            #[cfg(test)]
            Self::Mock(p) => p.current_thread_id(),
        }
    }
}

impl Default for PlatformFacade {
    fn default() -> Self {
        Self::target()
    }
}

#[cfg(test)]
impl From<MockPlatform> for PlatformFacade {
    fn from(p: MockPlatform) -> Self {
        Self::from_mock(p)
    }
}

impl Debug for PlatformFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Target(inner) => inner.fmt(f),
            #[cfg(all(test, target_os = "linux", not(miri)))]
            Self::Fallback(inner) => inner.fmt(f),
            #[cfg(test)]
            Self::Mock(inner) => inner.fmt(f),
        }
    }
}
