use std::ptr::NonNull;

use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_app_kit::{NSEvent, NSEventMask};
use tracing::warn;

/// Watches left mouse-up events delivered to other applications.
///
/// Clicks inside our own windows are not reported; overlays ignore the mouse
/// so that only leaves the status item menu.
pub struct MouseMonitor {
    monitor: Option<Retained<AnyObject>>,
}

impl MouseMonitor {
    pub fn new(on_mouse_up: impl Fn() + 'static) -> Self {
        let handler = RcBlock::new(move |_event: NonNull<NSEvent>| on_mouse_up());
        let monitor =
            NSEvent::addGlobalMonitorForEventsMatchingMask_handler(NSEventMask::LeftMouseUp, &handler);
        if monitor.is_none() {
            warn!("failed to install mouse-up monitor");
        }
        MouseMonitor { monitor }
    }
}

impl Drop for MouseMonitor {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            unsafe { NSEvent::removeMonitor(&monitor) };
        }
    }
}
