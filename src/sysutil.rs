use std::sync::{LazyLock, Mutex};

use sysinfo::System;

/// The process-wide OS-stats handle.
///
/// Construction (which scans the full system state once) happens exactly
/// once, on first access, and strictly precedes any use of the handle. The
/// accessor is the only way to reach the handle, so no caller can observe
/// it uninitialized regardless of declaration or link order.
static SYSTEM: LazyLock<Mutex<System>> = LazyLock::new(|| Mutex::new(System::new_all()));

/// Returns the shared [`System`] handle.
///
/// Callers refresh the slices they need while holding the lock; refreshes
/// are incremental, so sharing one handle keeps the per-poll cost bounded.
pub fn shared_system() -> &'static Mutex<System> {
    &SYSTEM
}
