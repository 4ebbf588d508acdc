// A poisoned lock means a thread panicked while updating shared state. The state may be half
// updated, so we panic too.
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - continued execution \
    is not safe because the protected state may be inconsistent";
