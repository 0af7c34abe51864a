// ============================================================================
// reactive-core - Control-flow signals
//
// Solid/Svelte-style runtimes let NotReady and captured errors unwind
// through arbitrary user call frames with a `throw`. Rust's equivalent for
// "unwind through frames that don't know how to handle this" is a panic, so
// a tracked compute runs inside `catch_unwind`. Only a zero-sized, `Send`
// marker crosses the unwind boundary (`Rc` payloads are not `Send`); the
// actual NotReady/error detail rides in thread-local storage, which is safe
// because the runtime is single-threaded cooperative by design (see
// CONCURRENCY & RESOURCE MODEL).
// ============================================================================

use std::cell::RefCell;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use super::types::ErrorPayload;

/// What interrupted a tracked compute.
#[derive(Clone)]
pub enum ControlSignal {
    NotReady,
    Error(ErrorPayload),
}

/// Marker carried across the unwind boundary. Carries no data itself;
/// the real payload lives in `PENDING`.
struct ControlUnwind;

thread_local! {
    static PENDING: RefCell<Option<ControlSignal>> = const { RefCell::new(None) };
}

static QUIET_HOOK_INSTALLED: Once = Once::new();

/// A `NotReady`/captured-error interrupt is routine control flow, not a
/// bug report, so the process's default panic report (message + backtrace
/// on stderr) must not fire for it. Installs a hook, once per process,
/// that swallows exactly the `ControlUnwind` marker and otherwise
/// delegates to whatever hook was previously installed, so genuine panics
/// (caught as `ControlSignal::Error` by `run_tracked` too, but via a
/// different path) still report normally.
fn ensure_quiet_panic_hook() {
    QUIET_HOOK_INSTALLED.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<ControlUnwind>().is_some() {
                return;
            }
            previous(info);
        }));
    });
}

/// Interrupt the current compute: a dependency is LOADING.
///
/// Never returns. Must only be called from within a tracked compute body
/// (a `Computation`/`Effect` closure); calling it elsewhere simply panics
/// the current thread, same as any other unwind with no handler above it.
pub fn raise_not_ready() -> ! {
    ensure_quiet_panic_hook();
    PENDING.with(|p| *p.borrow_mut() = Some(ControlSignal::NotReady));
    panic::panic_any(ControlUnwind)
}

/// Interrupt the current compute with a captured user error.
pub fn raise_error(err: ErrorPayload) -> ! {
    ensure_quiet_panic_hook();
    PENDING.with(|p| *p.borrow_mut() = Some(ControlSignal::Error(err)));
    panic::panic_any(ControlUnwind)
}

/// Convenience wrapper for `raise_error` taking any `std::error::Error`.
pub fn fail<E: StdError + 'static>(err: E) -> ! {
    raise_error(std::rc::Rc::new(err))
}

/// Run `f`, catching NotReady/captured-error interrupts as well as any
/// ordinary panic raised by user code (which is itself "anything thrown by
/// a compute/effect body" per the error handling policy).
pub fn run_tracked<T>(f: impl FnOnce() -> T) -> Result<T, ControlSignal> {
    let result = panic::catch_unwind(AssertUnwindSafe(f));

    match result {
        Ok(value) => Ok(value),
        Err(payload) => {
            if payload.downcast_ref::<ControlUnwind>().is_some() {
                Err(PENDING.with(|p| p.borrow_mut().take()).unwrap_or(ControlSignal::NotReady))
            } else {
                Err(ControlSignal::Error(std::rc::Rc::new(PanicError(describe_panic(&payload)))))
            }
        }
    }
}

#[derive(Debug)]
struct PanicError(String);

impl std::fmt::Display for PanicError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for PanicError {}

fn describe_panic(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "compute panicked with a non-string payload".to_string()
    }
}
