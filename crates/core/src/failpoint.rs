//! Failpoint registry
//!
//! Named hooks that tests flip to force specific internal timing: inject a
//! write conflict, pause a migration before its critical section, abort
//! recovery replay mid-way. Production code asks `hit(name)` at the point
//! the failpoint guards; with no test involvement every failpoint is off
//! and the check is a single map lookup.
//!
//! Modes:
//! - `Off` — never fires
//! - `AlwaysOn` — fires every time
//! - `Times(n)` — fires for the next `n` hits, then turns off

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Activation mode for a failpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPointMode {
    Off,
    AlwaysOn,
    Times(u32),
}

static REGISTRY: Lazy<Mutex<HashMap<String, FailPointMode>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Set a failpoint's mode. `Off` removes it from the registry.
pub fn set(name: &str, mode: FailPointMode) {
    let mut registry = REGISTRY.lock();
    match mode {
        FailPointMode::Off => {
            registry.remove(name);
        }
        other => {
            registry.insert(name.to_string(), other);
        }
    }
}

/// Check (and consume, for `Times`) a failpoint.
///
/// Returns true when the code under test should take the injected path.
pub fn hit(name: &str) -> bool {
    let mut registry = REGISTRY.lock();
    match registry.get_mut(name) {
        None => false,
        Some(FailPointMode::Off) => false,
        Some(FailPointMode::AlwaysOn) => true,
        Some(FailPointMode::Times(n)) => {
            if *n == 0 {
                registry.remove(name);
                return false;
            }
            *n -= 1;
            if *n == 0 {
                registry.remove(name);
            }
            true
        }
    }
}

/// True while the named failpoint is active, without consuming a `Times`
/// charge. Used for cooperative pause loops.
pub fn is_active(name: &str) -> bool {
    let registry = REGISTRY.lock();
    matches!(
        registry.get(name),
        Some(FailPointMode::AlwaysOn) | Some(FailPointMode::Times(_))
    )
}

/// RAII guard that enables a failpoint and disables it on drop.
///
/// Keeps tests from leaking activation into each other when an assertion
/// fails mid-test.
pub struct FailPointGuard {
    name: String,
}

impl FailPointGuard {
    pub fn enable(name: &str, mode: FailPointMode) -> Self {
        set(name, mode);
        Self {
            name: name.to_string(),
        }
    }
}

impl Drop for FailPointGuard {
    fn drop(&mut self) {
        set(&self.name, FailPointMode::Off);
    }
}
