use std::mem::MaybeUninit;

use objc2_app_kit::NSScreen;
use objc2_core_foundation::{CGPoint, CGRect};
use objc2_core_graphics::{CGDisplayBounds, CGError, CGGetActiveDisplayList};
use objc2_foundation::{MainThreadMarker, NSNumber, ns_string};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub struct ScreenCache<S: System = Actual> {
    system: S,
    last: Option<Vec<ScreenDescriptor>>,
}

/// One connected display.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenDescriptor {
    pub id: ScreenId,
    /// Full frame in Cocoa coordinates (bottom-left origin). Overlays cover
    /// exactly this rectangle.
    pub frame: CGRect,
    /// The same rectangle in window-server coordinates (top-left origin of
    /// the primary display), comparable with window bounds.
    pub bounds: CGRect,
    pub name: Option<String>,
}

impl ScreenCache<Actual> {
    pub fn new(mtm: MainThreadMarker) -> Self { Self::new_with(Actual { mtm }) }
}

impl<S: System> ScreenCache<S> {
    fn new_with(system: S) -> ScreenCache<S> { ScreenCache { system, last: None } }

    /// Returns the current displays, the primary display first. There may be
    /// no displays at all.
    ///
    /// Returns `None` when AppKit and Quartz disagree about the display list,
    /// which happens transiently during reconfiguration.
    #[forbid(unsafe_code)]
    pub fn screens(&self) -> Option<(Vec<ScreenDescriptor>, CoordinateConverter)> {
        let ns_screens = self.system.ns_screens();
        debug!("ns_screens={ns_screens:?}");
        let mut cg_screens = match self.system.cg_screens() {
            Ok(screens) => screens,
            Err(err) => {
                warn!(?err, "CGGetActiveDisplayList failed");
                return None;
            }
        };
        debug!("cg_screens={cg_screens:?}");

        if ns_screens.len() != cg_screens.len() {
            warn!(
                "Ignoring screen config: There are {} ns_screens but {} cg_screens",
                ns_screens.len(),
                cg_screens.len(),
            );
            return None;
        }

        if cg_screens.is_empty() {
            return Some((vec![], CoordinateConverter::default()));
        }

        if let Some(main_screen_idx) =
            cg_screens.iter().position(|s| s.bounds.origin == CGPoint::ZERO)
        {
            cg_screens.swap(0, main_screen_idx);
        } else {
            warn!("Could not find main screen. cg_screens={cg_screens:?}");
        }

        let converter = CoordinateConverter {
            screen_height: cg_screens[0].bounds.max().y,
        };

        let descriptors = cg_screens
            .iter()
            .flat_map(|&CGScreenInfo { cg_id, bounds }| {
                let Some(ns_screen) = ns_screens.iter().find(|s| s.cg_id == cg_id) else {
                    warn!("Can't find NSScreen corresponding to {cg_id:?}");
                    return None;
                };
                Some(ScreenDescriptor {
                    id: cg_id,
                    frame: ns_screen.frame,
                    bounds: converter.convert_rect(ns_screen.frame).unwrap_or(bounds),
                    name: ns_screen.name.clone(),
                })
            })
            .collect();
        Some((descriptors, converter))
    }

    /// Like [`Self::screens`], but returns `None` when the displays are the
    /// same as on the previous call. Used to collapse the bursts of
    /// notifications macOS sends for a single reconfiguration.
    pub fn update_screen_config(&mut self) -> Option<Vec<ScreenDescriptor>> {
        let (screens, _) = self.screens()?;
        if self.last.as_ref() == Some(&screens) {
            debug!("screen configuration unchanged");
            return None;
        }
        self.last = Some(screens.clone());
        Some(screens)
    }
}

/// Converts between Quartz and Cocoa coordinate systems.
#[derive(Clone, Copy, Debug)]
pub struct CoordinateConverter {
    /// The y offset of the Cocoa origin in the Quartz coordinate system, and
    /// vice versa. This is the height of the first screen. The origins
    /// are the bottom left and top left of the screen, respectively.
    screen_height: f64,
}

/// Creates a `CoordinateConverter` that returns None for any conversion.
impl Default for CoordinateConverter {
    fn default() -> Self { Self { screen_height: f64::NAN } }
}

impl CoordinateConverter {
    pub fn screen_height(&self) -> Option<f64> {
        if self.screen_height.is_nan() {
            None
        } else {
            Some(self.screen_height)
        }
    }

    pub fn convert_rect(&self, rect: CGRect) -> Option<CGRect> {
        let height = self.screen_height()?;
        Some(CGRect::new(
            CGPoint::new(rect.origin.x, height - rect.max().y),
            rect.size,
        ))
    }
}

#[allow(private_interfaces)]
pub trait System {
    fn cg_screens(&self) -> Result<Vec<CGScreenInfo>, CGError>;
    fn ns_screens(&self) -> Vec<NSScreenInfo>;
}

#[derive(Debug, Clone)]
struct CGScreenInfo {
    cg_id: ScreenId,
    bounds: CGRect,
}

#[derive(Debug, Clone)]
struct NSScreenInfo {
    frame: CGRect,
    cg_id: ScreenId,
    name: Option<String>,
}

pub struct Actual {
    mtm: MainThreadMarker,
}

#[allow(private_interfaces)]
impl System for Actual {
    fn cg_screens(&self) -> Result<Vec<CGScreenInfo>, CGError> {
        const MAX_SCREENS: usize = 64;
        let mut ids: MaybeUninit<[CGDirectDisplayID; MAX_SCREENS]> = MaybeUninit::uninit();
        let mut count: u32 = 0;
        let ids = unsafe {
            let err = CGGetActiveDisplayList(
                MAX_SCREENS as u32,
                ids.as_mut_ptr() as *mut CGDirectDisplayID,
                &mut count,
            );
            if err != CGError::Success {
                return Err(err);
            }
            std::slice::from_raw_parts(ids.as_ptr() as *const u32, count as usize)
        };
        Ok(ids
            .iter()
            .map(|&cg_id| CGScreenInfo {
                cg_id: ScreenId(cg_id),
                bounds: CGDisplayBounds(cg_id),
            })
            .collect())
    }

    fn ns_screens(&self) -> Vec<NSScreenInfo> {
        NSScreen::screens(self.mtm)
            .iter()
            .flat_map(|s| {
                Some(NSScreenInfo {
                    frame: s.frame(),
                    cg_id: s.get_number()?,
                    name: Some(s.localizedName().to_string()),
                })
            })
            .collect()
    }
}

type CGDirectDisplayID = u32;

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScreenId(CGDirectDisplayID);

impl ScreenId {
    pub fn new(id: u32) -> Self { ScreenId(id) }

    pub fn as_u32(&self) -> u32 { self.0 }
}

pub trait NSScreenExt {
    fn get_number(&self) -> Option<ScreenId>;
}

impl NSScreenExt for NSScreen {
    fn get_number(&self) -> Option<ScreenId> {
        let desc = self.deviceDescription();
        let value = desc.objectForKey(ns_string!("NSScreenNumber"));
        match value.map(|v| v.downcast::<NSNumber>()) {
            Some(Ok(number)) => Some(ScreenId(number.as_u32())),
            _ => {
                warn!(
                    "Could not get NSScreenNumber for screen with name {:?}",
                    self.localizedName(),
                );
                None
            }
        }
    }
}
