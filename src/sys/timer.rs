//! A re-armable one-shot timer usable from the run loop executor.
//!
//! Deadlines are `CFRunLoopTimer`s on the arming thread's run loop, so the
//! timer completes on the same thread that awaits it.

use std::cell::RefCell;
use std::ffi::c_void;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use objc2_core_foundation::{
    CFAbsoluteTimeGetCurrent, CFRetained, CFRunLoop, CFRunLoopTimer, CFRunLoopTimerContext,
    kCFRunLoopCommonModes,
};
use tracing::warn;

use super::run_loop::{Callback, release, retain};

#[derive(Default)]
struct Shared {
    /// Bumped every time the timer is armed or cancelled. A callout only
    /// fires if it still carries the current generation.
    generation: u64,
    fired: Option<u64>,
    waker: Option<Waker>,
}

/// Completes once after the most recently requested delay.
///
/// Arming again, or cancelling, discards any earlier deadline. An idle timer
/// never completes, so it should be polled behind a guard in `select!`.
pub struct Timer {
    shared: Rc<RefCell<Shared>>,
    armed: Option<u64>,
    deadline: Option<CFRetained<CFRunLoopTimer>>,
}

unsafe extern "C-unwind" fn fire<F: Fn() + 'static>(_timer: *mut CFRunLoopTimer, info: *mut c_void) {
    // SAFETY: `info` is the Callback<F> installed by `set_next_fire`; the
    // timer holds a retain on it while it can still fire.
    let callback = unsafe { &*(info as *const Callback<F>) };
    (callback.func)();
}

impl Timer {
    pub fn manual() -> Timer {
        Timer {
            shared: Rc::default(),
            armed: None,
            deadline: None,
        }
    }

    #[cfg(test)]
    pub fn after(delay: Duration) -> Timer {
        let mut timer = Timer::manual();
        timer.set_next_fire(delay);
        timer
    }

    pub fn is_armed(&self) -> bool { self.armed.is_some() }

    pub fn set_next_fire(&mut self, delay: Duration) {
        self.invalidate();
        let generation = {
            let mut shared = self.shared.borrow_mut();
            shared.generation += 1;
            shared.fired = None;
            shared.generation
        };
        self.armed = Some(generation);

        let shared = Rc::downgrade(&self.shared);
        let on_fire = move || {
            let Some(shared) = shared.upgrade() else { return };
            let waker = {
                let mut shared = shared.borrow_mut();
                if shared.generation != generation {
                    return;
                }
                shared.fired = Some(generation);
                shared.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        };
        self.deadline = schedule(delay, on_fire);
    }

    pub fn cancel(&mut self) {
        self.invalidate();
        if self.armed.take().is_some() {
            let mut shared = self.shared.borrow_mut();
            shared.generation += 1;
            shared.fired = None;
        }
    }

    fn invalidate(&mut self) {
        if let Some(deadline) = self.deadline.take() {
            deadline.invalidate();
        }
    }
}

/// Adds a one-shot timer to the current run loop in all common modes.
fn schedule<F: Fn() + 'static>(delay: Duration, func: F) -> Option<CFRetained<CFRunLoopTimer>> {
    let info = Box::into_raw(Box::new(Callback::new(func)));
    let mut context = CFRunLoopTimerContext {
        version: 0,
        info: info as *mut c_void,
        retain: Some(retain::<F>),
        release: Some(release::<F>),
        copyDescription: None,
    };
    #[allow(unused_unsafe)]
    let fire_date = unsafe { CFAbsoluteTimeGetCurrent() } + delay.as_secs_f64();

    // CFRunLoopTimerCreate retains `info` through the context, so the
    // callback lives exactly as long as the timer.
    let timer =
        unsafe { CFRunLoopTimer::new(None, fire_date, 0.0, 0, 0, Some(fire::<F>), &mut context) };
    let Some(timer) = timer else {
        // Nothing retained `info`, so it is still ours.
        drop(unsafe { Box::from_raw(info) });
        warn!("CFRunLoopTimerCreate returned null");
        return None;
    };
    let Some(run_loop) = CFRunLoop::current() else {
        warn!("no run loop to schedule the timer on");
        return None;
    };
    run_loop.add_timer(Some(&timer), unsafe { kCFRunLoopCommonModes });
    Some(timer)
}

impl Drop for Timer {
    fn drop(&mut self) { self.invalidate(); }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(generation) = self.armed else {
            return Poll::Pending;
        };
        let mut shared = self.shared.borrow_mut();
        if shared.fired == Some(generation) {
            shared.fired = None;
            drop(shared);
            self.armed = None;
            return Poll::Ready(());
        }
        shared.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Instant;

    use super::*;
    use crate::sys::executor::Executor;

    #[test]
    fn fires_after_the_delay() {
        let start = Instant::now();
        Executor::run(Timer::after(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn rearming_replaces_the_deadline() {
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        Executor::run(async move {
            let mut timer = Timer::after(Duration::from_millis(10));
            timer.set_next_fire(Duration::from_millis(40));
            let start = Instant::now();
            (&mut timer).await;
            assert!(start.elapsed() >= Duration::from_millis(30));
            f.set(f.get() + 1);
            assert!(!timer.is_armed());
        });
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn a_burst_of_rearms_fires_once() {
        let fired = Rc::new(Cell::new(0));
        let f = fired.clone();
        Executor::run(async move {
            let mut timer = Timer::manual();
            for _ in 0..50 {
                timer.set_next_fire(Duration::from_millis(5));
            }
            (&mut timer).await;
            f.set(f.get() + 1);
            assert!(!timer.is_armed());
        });
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn cancelled_timer_stays_pending() {
        Executor::run(async {
            let mut stale = Timer::after(Duration::from_millis(5));
            stale.cancel();
            let mut fresh = Timer::after(Duration::from_millis(30));
            let mut stale_fired = false;
            loop {
                tokio::select! {
                    _ = &mut stale, if stale.is_armed() => stale_fired = true,
                    _ = &mut fresh => break,
                }
            }
            assert!(!stale_fired);
        });
    }
}
