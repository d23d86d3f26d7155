//! Read-only access to the window server's list of on-screen windows.

use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use objc2_foundation::{NSArray, NSDictionary, NSNumber, NSString, ns_string};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub type Pid = i32;

/// Identifier the window server assigns to a window. `0` never names a real
/// window; ordering relative to it means "the bottom of the stack".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowServerId(u32);

impl WindowServerId {
    pub const BASE: WindowServerId = WindowServerId(0);

    pub fn new(id: u32) -> Self { WindowServerId(id) }

    pub fn as_u32(self) -> u32 { self.0 }

    pub fn is_base(self) -> bool { self.0 == 0 }
}

impl From<WindowServerId> for u32 {
    fn from(id: WindowServerId) -> u32 { id.0 }
}

/// One entry of the window list, as reported at the time of the query.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshotRecord {
    pub id: WindowServerId,
    /// In window-server coordinates. Missing when the server did not report
    /// a usable rectangle.
    pub bounds: Option<CGRect>,
    pub layer: i32,
    pub owner_pid: Option<Pid>,
    pub owner_name: Option<String>,
    pub on_screen: bool,
    pub alpha: f64,
}

impl WindowSnapshotRecord {
    pub fn new(id: u32, bounds: Option<CGRect>) -> Self {
        WindowSnapshotRecord {
            id: WindowServerId(id),
            bounds,
            layer: 0,
            owner_pid: None,
            owner_name: None,
            on_screen: true,
            alpha: 1.0,
        }
    }
}

/// Normal-level windows, front to back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowSnapshot {
    records: Vec<WindowSnapshotRecord>,
}

impl WindowSnapshot {
    /// Keeps only layer 0 records. Menus, the Dock, the menu bar and other
    /// floating windows live on other layers.
    pub fn from_records(records: impl IntoIterator<Item = WindowSnapshotRecord>) -> Self {
        WindowSnapshot {
            records: records.into_iter().filter(|r| r.layer == 0).collect(),
        }
    }

    /// Drops the windows owned by `pid`, so our own overlays never serve as
    /// a reference for the next set.
    pub fn excluding_owner(mut self, pid: Pid) -> Self {
        self.records.retain(|r| r.owner_pid != Some(pid));
        self
    }

    pub fn records(&self) -> &[WindowSnapshotRecord] { &self.records }

    pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn len(&self) -> usize { self.records.len() }

    pub fn frontmost(&self) -> Option<&WindowSnapshotRecord> { self.records.first() }
}

const ON_SCREEN_ONLY: u32 = 1 << 0;
const EXCLUDE_DESKTOP_ELEMENTS: u32 = 1 << 4;
const NULL_WINDOW: u32 = 0;

#[link(name = "CoreGraphics", kind = "framework")]
unsafe extern "C" {
    fn CGWindowListCopyWindowInfo(option: u32, relative_to_window: u32) -> *mut NSArray;
}

type WindowInfo = NSDictionary<NSString, AnyObject>;

/// Queries the on-screen windows. An absent answer from the window server is
/// an empty snapshot.
pub fn snapshot() -> WindowSnapshot {
    let list = unsafe {
        let raw = CGWindowListCopyWindowInfo(ON_SCREEN_ONLY | EXCLUDE_DESKTOP_ELEMENTS, NULL_WINDOW);
        Retained::from_raw(raw.cast::<NSArray<WindowInfo>>())
    };
    let Some(list) = list else {
        debug!("CGWindowListCopyWindowInfo returned nothing");
        return WindowSnapshot::default();
    };
    let mut snapshot =
        WindowSnapshot::from_records(list.iter().filter_map(|info| parse_record(&info)));
    if let Ok(own_pid) = Pid::try_from(std::process::id()) {
        snapshot = snapshot.excluding_owner(own_pid);
    }
    trace!(windows = snapshot.len(), "took window snapshot");
    snapshot
}

fn parse_record(info: &WindowInfo) -> Option<WindowSnapshotRecord> {
    let number = |key: &NSString| {
        info.objectForKey(key).and_then(|v| v.downcast::<NSNumber>().ok())
    };
    let id = number(ns_string!("kCGWindowNumber"))?.as_u32();
    let bounds = info
        .objectForKey(ns_string!("kCGWindowBounds"))
        .and_then(|v| v.downcast::<NSDictionary>().ok())
        .and_then(|d| {
            let field = |key: &NSString| {
                d.objectForKey(key).and_then(|v| v.downcast::<NSNumber>().ok()).map(|n| n.as_f64())
            };
            rect_from_parts(
                field(ns_string!("X")),
                field(ns_string!("Y")),
                field(ns_string!("Width")),
                field(ns_string!("Height")),
            )
        });
    Some(WindowSnapshotRecord {
        id: WindowServerId(id),
        bounds,
        layer: number(ns_string!("kCGWindowLayer")).map_or(0, |n| n.as_i32()),
        owner_pid: number(ns_string!("kCGWindowOwnerPID")).map(|n| n.as_i32()),
        owner_name: info
            .objectForKey(ns_string!("kCGWindowOwnerName"))
            .and_then(|v| v.downcast::<NSString>().ok())
            .map(|s| s.to_string()),
        on_screen: number(ns_string!("kCGWindowIsOnscreen")).is_some_and(|n| n.as_bool()),
        alpha: number(ns_string!("kCGWindowAlpha")).map_or(1.0, |n| n.as_f64()),
    })
}

fn rect_from_parts(
    x: Option<f64>,
    y: Option<f64>,
    width: Option<f64>,
    height: Option<f64>,
) -> Option<CGRect> {
    let (x, y, width, height) = (x?, y?, width?, height?);
    if ![x, y, width, height].iter().all(|v| v.is_finite()) || width < 0.0 || height < 0.0 {
        return None;
    }
    Some(CGRect::new(CGPoint::new(x, y), CGSize::new(width, height)))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn layered(id: u32, layer: i32) -> WindowSnapshotRecord {
        WindowSnapshotRecord { layer, ..WindowSnapshotRecord::new(id, None) }
    }

    #[test]
    fn snapshot_keeps_only_normal_layer_in_order() {
        let snapshot = WindowSnapshot::from_records(vec![
            layered(7, 25),
            layered(3, 0),
            layered(9, -20),
            layered(4, 0),
            layered(1, 24),
        ]);
        let ids: Vec<u32> = snapshot.records().iter().map(|r| r.id.as_u32()).collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(snapshot.frontmost().map(|r| r.id), Some(WindowServerId::new(3)));
    }

    #[test]
    fn own_windows_are_left_out() {
        let owned = |id, pid| WindowSnapshotRecord {
            owner_pid: Some(pid),
            ..WindowSnapshotRecord::new(id, None)
        };
        let snapshot = WindowSnapshot::from_records(vec![
            owned(20, 4242),
            owned(21, 311),
            WindowSnapshotRecord::new(22, None),
            owned(23, 4242),
        ])
        .excluding_owner(4242);
        let ids: Vec<u32> = snapshot.records().iter().map(|r| r.id.as_u32()).collect();
        assert_eq!(ids, vec![21, 22]);
    }

    #[test]
    fn snapshot_of_only_floating_windows_is_empty() {
        let snapshot = WindowSnapshot::from_records(vec![layered(1, 8), layered(2, 3)]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.frontmost(), None);
    }

    #[test]
    fn bounds_need_every_component() {
        assert_eq!(
            rect_from_parts(Some(10.0), Some(20.0), Some(300.0), Some(200.0)),
            Some(CGRect::new(CGPoint::new(10.0, 20.0), CGSize::new(300.0, 200.0)))
        );
        assert_eq!(rect_from_parts(Some(10.0), None, Some(300.0), Some(200.0)), None);
        assert_eq!(rect_from_parts(Some(f64::NAN), Some(0.0), Some(1.0), Some(1.0)), None);
        assert_eq!(rect_from_parts(Some(0.0), Some(0.0), Some(-1.0), Some(1.0)), None);
    }

    #[test]
    fn base_window_id() {
        assert!(WindowServerId::BASE.is_base());
        assert!(WindowServerId::default().is_base());
        assert!(!WindowServerId::new(12).is_base());
    }
}
