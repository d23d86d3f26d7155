//! Decides which window each display's overlay is stacked behind.
//!
//! Matching is by rectangle intersection in window-server coordinates. An
//! older approach matched on the window's midpoint instead; it misplaces
//! windows that straddle two displays and is deprecated.

use objc2_core_foundation::CGRect;

use crate::common::config::DimMode;
use crate::sys::screen::{ScreenDescriptor, ScreenId};
use crate::sys::window_server::{WindowServerId, WindowSnapshot};

/// Where one overlay goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayPlacement {
    pub screen: ScreenId,
    /// `WindowServerId::BASE` when no window qualified.
    pub reference: WindowServerId,
}

pub fn select_reference_window(
    snapshot: &WindowSnapshot,
    screen: &ScreenDescriptor,
    mode: DimMode,
) -> Option<WindowServerId> {
    match mode {
        DimMode::Single => snapshot.frontmost().map(|r| r.id),
        DimMode::Parallel => snapshot
            .records()
            .iter()
            .find(|r| r.bounds.is_some_and(|b| intersects(b, screen.bounds)))
            .map(|r| r.id),
    }
}

/// One placement per display, in display order.
pub fn plan_overlays(
    snapshot: &WindowSnapshot,
    screens: &[ScreenDescriptor],
    mode: DimMode,
) -> Vec<OverlayPlacement> {
    screens
        .iter()
        .map(|screen| OverlayPlacement {
            screen: screen.id,
            reference: select_reference_window(snapshot, screen, mode)
                .unwrap_or(WindowServerId::BASE),
        })
        .collect()
}

/// True when the rectangles share a region of positive area. Rectangles that
/// only touch along an edge do not intersect.
pub fn intersects(a: CGRect, b: CGRect) -> bool {
    if a.size.width <= 0.0 || a.size.height <= 0.0 || b.size.width <= 0.0 || b.size.height <= 0.0 {
        return false;
    }
    a.origin.x < b.max().x && b.origin.x < a.max().x && a.origin.y < b.max().y && b.origin.y < a.max().y
}
