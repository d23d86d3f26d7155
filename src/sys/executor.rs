//! Drives a single future on the main thread's CFRunLoop.
//!
//! Everything the app does happens inside AppKit callbacks or inside this
//! future, so there is no need for a general purpose task scheduler. Wakers
//! are `Send`; waking from another thread signals the run loop source, and
//! the future is polled again on the next loop iteration.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use objc2::MainThreadMarker;
use objc2_app_kit::NSApp;
use objc2_core_foundation::CFRunLoop;
use tracing::trace;

use super::run_loop::WakeupHandle;

type Task = Pin<Box<dyn Future<Output = ()> + 'static>>;

thread_local! {
    static DRIVER: Driver = Driver::new();
}

pub struct Executor;

impl Executor {
    /// Polls `task` to completion inside a bare `CFRunLoop`.
    pub fn run(task: impl Future<Output = ()> + 'static) {
        Self::drive(Box::pin(task), CFRunLoop::run);
    }

    /// Like [`Executor::run`], but the loop is `-[NSApplication run]`, which
    /// is required for status items, menus and global event monitors.
    pub fn run_main(mtm: MainThreadMarker, task: impl Future<Output = ()> + 'static) {
        Self::drive(Box::pin(task), || NSApp(mtm).run());
    }

    fn drive(task: Task, run_loop: impl Fn()) {
        DRIVER.with(|driver| {
            // Drop the task even if the loop unwinds, so its resources are
            // released before the thread-local is.
            struct ClearOnExit<'a>(&'a Driver);
            impl Drop for ClearOnExit<'_> {
                fn drop(&mut self) { self.0.state.borrow_mut().task = None; }
            }
            let _clear = ClearOnExit(driver);

            driver.state.borrow_mut().task = Some(task);
            driver.waker.wake_by_ref();

            // The loop may return for reasons of its own; only a finished task
            // ends the drive.
            while driver.state.borrow().task.is_some() {
                run_loop();
            }
        });
    }
}

struct Driver {
    state: Rc<RefCell<State>>,
    waker: Waker,
}

struct State {
    task: Option<Task>,
}

impl Driver {
    fn new() -> Self {
        let state = Rc::new(RefCell::new(State { task: None }));
        let weak: Weak<RefCell<State>> = Rc::downgrade(&state);
        let wakeup = WakeupHandle::for_current_thread(0, move || {
            if let Some(state) = weak.upgrade() {
                poll_task(&state);
            }
        });
        Driver {
            state,
            waker: Waker::from(Arc::new(RunLoopWaker(wakeup))),
        }
    }
}

fn poll_task(state: &RefCell<State>) {
    let waker = DRIVER.with(|d| d.waker.clone());
    let mut cx = Context::from_waker(&waker);
    let mut state = state.borrow_mut();
    let Some(task) = state.task.as_mut() else {
        trace!("woken with no task");
        return;
    };
    if task.as_mut().poll(&mut cx).is_ready() {
        state.task = None;
        if let Some(rl) = CFRunLoop::current() {
            rl.stop();
        }
    }
}

struct RunLoopWaker(WakeupHandle);

impl Wake for RunLoopWaker {
    fn wake(self: Arc<Self>) { self.0.wake(); }

    fn wake_by_ref(self: &Arc<Self>) { self.0.wake(); }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::rc::Rc;
    use std::time::Duration;
    use std::{future, thread};

    use super::*;

    /// Yields once, waking itself.
    #[derive(Default)]
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn runs_tasks_to_completion() {
        Executor::run(future::ready(()));

        let steps = Rc::new(Cell::new(0));
        let s = steps.clone();
        Executor::run(async move {
            s.set(1);
            YieldOnce::default().await;
            s.set(2);
        });
        assert_eq!(steps.get(), 2);
    }

    #[test]
    fn task_is_dropped_when_it_panics() {
        struct Flag(AssertUnwindSafe<Rc<Cell<bool>>>);
        impl Drop for Flag {
            fn drop(&mut self) { self.0.set(true); }
        }

        let dropped = Rc::new(Cell::new(false));
        let flag = Flag(AssertUnwindSafe(dropped.clone()));
        let result = catch_unwind(|| {
            Executor::run(async move {
                let _flag = flag;
                YieldOnce::default().await;
                panic!("task failed");
            });
        });

        assert!(result.is_err());
        assert!(dropped.get());
    }

    #[test]
    fn wakes_from_other_threads() {
        let (tx, mut rx) = crate::actor::channel::<u8>();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            tx.send(1);
            tx.send(2);
        });

        let received = Rc::new(RefCell::new(vec![]));
        let r = received.clone();
        Executor::run(async move {
            while let Some((_span, n)) = rx.recv().await {
                r.borrow_mut().push(n);
            }
        });
        assert_eq!(*received.borrow(), vec![1, 2]);
    }
}
