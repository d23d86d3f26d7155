use objc2::rc::Retained;
use objc2::MainThreadMarker;
use objc2_app_kit::{
    NSBackingStoreType, NSColor, NSNormalWindowLevel, NSWindow, NSWindowAnimationBehavior,
    NSWindowCollectionBehavior, NSWindowOrderingMode, NSWindowStyleMask,
};
use objc2_core_foundation::CGRect;
use thiserror::Error;
use tracing::trace;

use crate::common::config::DimLevel;
use crate::sys::screen::{ScreenDescriptor, ScreenId};
use crate::sys::window_server::WindowServerId;

#[derive(Debug, Error, PartialEq)]
pub enum OverlayError {
    #[error("display {0:?} has an empty or invalid frame")]
    InvalidFrame(ScreenId),
}

/// A click-through black window covering one display, kept directly below a
/// reference window.
///
/// Closing the window is tied to dropping this handle.
#[derive(Debug)]
pub struct OverlayWindow {
    window: Retained<NSWindow>,
    screen: ScreenId,
}

impl OverlayWindow {
    pub fn build(
        mtm: MainThreadMarker,
        screen: &ScreenDescriptor,
        level: DimLevel,
        reference: WindowServerId,
    ) -> Result<OverlayWindow, OverlayError> {
        if !is_usable(screen.frame) {
            return Err(OverlayError::InvalidFrame(screen.id));
        }

        let window = unsafe {
            let window = NSWindow::initWithContentRect_styleMask_backing_defer(
                mtm.alloc::<NSWindow>(),
                screen.frame,
                NSWindowStyleMask::Borderless,
                NSBackingStoreType::Buffered,
                false,
            );
            window.setReleasedWhenClosed(false);
            window
        };
        window.setAnimationBehavior(NSWindowAnimationBehavior::None);
        window.setCollectionBehavior(
            NSWindowCollectionBehavior::Transient
                | NSWindowCollectionBehavior::FullScreenNone
                | NSWindowCollectionBehavior::IgnoresCycle,
        );
        window.setIgnoresMouseEvents(true);
        window.setHasShadow(false);
        window.setOpaque(false);
        window.setLevel(NSNormalWindowLevel);

        let overlay = OverlayWindow { window, screen: screen.id };
        overlay.set_level(level);
        overlay.window.orderWindow_relativeTo(
            NSWindowOrderingMode::Below,
            reference.as_u32() as isize,
        );
        trace!(screen = ?screen.id, ?reference, %level, "overlay shown");
        Ok(overlay)
    }

    pub fn screen(&self) -> ScreenId { self.screen }

    pub fn set_level(&self, level: DimLevel) {
        let color = NSColor::blackColor().colorWithAlphaComponent(level.alpha());
        self.window.setBackgroundColor(Some(&color));
    }
}

impl Drop for OverlayWindow {
    fn drop(&mut self) {
        self.window.orderOut(None);
        self.window.close();
    }
}

fn is_usable(frame: CGRect) -> bool {
    let values = [frame.origin.x, frame.origin.y, frame.size.width, frame.size.height];
    values.iter().all(|v| v.is_finite()) && frame.size.width > 0.0 && frame.size.height > 0.0
}
