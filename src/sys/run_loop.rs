//! A manual CFRunLoop source that lets other threads schedule work on the
//! thread that created it, and the context plumbing shared with timers.

use std::ffi::c_void;

use objc2_core_foundation::{
    CFIndex, CFRetained, CFRunLoop, CFRunLoopSource, CFRunLoopSourceContext, kCFRunLoopCommonModes,
};

/// Signals a version 0 run loop source and wakes the loop it was added to.
///
/// Signals that arrive before the loop gets around to the source are
/// coalesced into one call of the callback.
#[derive(Clone, PartialEq)]
pub struct WakeupHandle {
    source: CFRetained<CFRunLoopSource>,
    run_loop: CFRetained<CFRunLoop>,
}

// SAFETY: CFRunLoopSourceSignal and CFRunLoopWakeUp are documented as
// thread-safe, and nothing else is reachable through the handle.
unsafe impl Send for WakeupHandle {}
unsafe impl Sync for WakeupHandle {}

/// Context `info` shared by run loop sources and timers. The run loop owns
/// it through `retain`/`release`.
pub(super) struct Callback<F> {
    retains: usize,
    pub(super) func: F,
}

impl<F> Callback<F> {
    pub(super) fn new(func: F) -> Callback<F> { Callback { retains: 0, func } }
}

unsafe extern "C-unwind" fn perform<F: Fn() + 'static>(info: *mut c_void) {
    // SAFETY: `info` is the Callback<F> installed by `for_current_thread`, and
    // the source holds a retain on it while it can still fire.
    let callback = unsafe { &*(info as *const Callback<F>) };
    (callback.func)();
}

pub(super) unsafe extern "C-unwind" fn retain<F>(info: *const c_void) -> *const c_void {
    // SAFETY: as above; retain and release are only called by the run loop
    // on the owning thread.
    let callback = unsafe { &mut *(info as *mut Callback<F>) };
    callback.retains += 1;
    info
}

pub(super) unsafe extern "C-unwind" fn release<F>(info: *const c_void) {
    let callback = unsafe { &mut *(info as *mut Callback<F>) };
    callback.retains -= 1;
    if callback.retains == 0 {
        drop(unsafe { Box::from_raw(info as *mut Callback<F>) });
    }
}

impl WakeupHandle {
    /// Adds a source to the current thread's run loop, in all common modes,
    /// that calls `func` each time it is signalled. `order` is relative to the
    /// loop's other sources; 0 unless there is a reason otherwise.
    ///
    /// # Panics
    ///
    /// If CoreFoundation cannot allocate the source.
    pub fn for_current_thread<F: Fn() + 'static>(order: CFIndex, func: F) -> WakeupHandle {
        let info = Box::into_raw(Box::new(Callback::new(func)));
        let mut context = CFRunLoopSourceContext {
            version: 0,
            info: info as *mut c_void,
            retain: Some(retain::<F>),
            release: Some(release::<F>),
            copyDescription: None,
            equal: None,
            hash: None,
            schedule: None,
            cancel: None,
            perform: Some(perform::<F>),
        };

        // CFRunLoopSourceCreate retains `info` through the context, so the
        // callback lives exactly as long as the source.
        let source = unsafe { CFRunLoopSource::new(None, order, &mut context) }
            .expect("CFRunLoopSourceCreate returned null");
        let run_loop = CFRunLoop::current().expect("every thread has a run loop");
        run_loop.add_source(Some(&source), unsafe { kCFRunLoopCommonModes });

        WakeupHandle { source, run_loop }
    }

    pub fn wake(&self) {
        self.source.signal();
        self.run_loop.wake_up();
    }
}
