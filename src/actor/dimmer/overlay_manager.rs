//! Owns the set of live overlay windows and every transition between sets.
//!
//! The manager has two observable states. With no overlays it is disabled
//! (or enabled but showing nothing, after the desktop was focused). With one
//! overlay per display it is active. A structural change always builds the
//! complete replacement set before the previous set is dropped, so the
//! desktop never flashes through between the two.

use objc2::MainThreadMarker;
use tracing::{debug, info, instrument, warn};

use super::reference_policy::{OverlayPlacement, plan_overlays};
use crate::common::config::{DimLevel, DimSettings};
use crate::sys::app::{self, FrontmostApp};
use crate::sys::overlay_window::{OverlayError, OverlayWindow};
use crate::sys::screen::{ScreenCache, ScreenDescriptor, ScreenId};
use crate::sys::window_server::{self, WindowServerId, WindowSnapshot};

pub trait Overlay {
    fn screen(&self) -> ScreenId;
    fn set_level(&self, level: DimLevel);
}

/// Everything the manager needs from the window system.
pub trait DimSystem {
    type Overlay: Overlay;

    /// `None` when the display list is momentarily inconsistent.
    fn screens(&mut self) -> Option<Vec<ScreenDescriptor>>;
    fn snapshot(&mut self) -> WindowSnapshot;
    fn frontmost_app(&self) -> Option<FrontmostApp>;
    fn build_overlay(
        &mut self,
        screen: &ScreenDescriptor,
        level: DimLevel,
        reference: WindowServerId,
    ) -> Result<Self::Overlay, OverlayError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimState {
    Disabled,
    Active,
}

pub struct OverlayManager<S: DimSystem> {
    system: S,
    overlays: Vec<S::Overlay>,
    placements: Vec<OverlayPlacement>,
}

impl<S: DimSystem> OverlayManager<S> {
    pub fn new(system: S) -> Self {
        OverlayManager {
            system,
            overlays: vec![],
            placements: vec![],
        }
    }

    pub fn state(&self) -> DimState {
        if self.overlays.is_empty() {
            DimState::Disabled
        } else {
            DimState::Active
        }
    }

    pub fn overlays(&self) -> &[S::Overlay] { &self.overlays }

    pub fn placements(&self) -> &[OverlayPlacement] { &self.placements }

    pub fn frontmost_app(&self) -> Option<FrontmostApp> { self.system.frontmost_app() }

    #[cfg(test)]
    pub(crate) fn system_mut(&mut self) -> &mut S { &mut self.system }

    /// Decides whether a trigger may dim at all, tearing down the current set
    /// when it may not. `trigger` is the application that caused the request,
    /// if there is one.
    pub fn admit(&mut self, settings: &DimSettings, trigger: Option<&FrontmostApp>) -> bool {
        if !settings.enabled {
            self.tear_down("dimming disabled");
            return false;
        }
        if trigger.is_some_and(FrontmostApp::is_desktop_shell) {
            self.tear_down("desktop focused");
            return false;
        }
        true
    }

    /// Admits the trigger and, if allowed, rebuilds the overlays right away.
    #[instrument(level = "debug", skip_all, fields(app = ?trigger.and_then(|a| a.bundle_id.as_deref())))]
    pub fn request_dim(&mut self, settings: &DimSettings, trigger: Option<&FrontmostApp>) {
        if self.admit(settings, trigger) {
            self.dim_now(settings);
        }
    }

    /// `true` dims behind whatever is frontmost now; `false` removes every
    /// overlay.
    #[instrument(level = "debug", skip(self, settings))]
    pub fn request_toggle(&mut self, enabled: bool, settings: &DimSettings) {
        if !enabled {
            self.tear_down("dimming disabled");
            return;
        }
        let frontmost = self.system.frontmost_app();
        if frontmost.as_ref().is_some_and(FrontmostApp::is_desktop_shell) {
            self.tear_down("desktop focused");
            return;
        }
        self.dim_now(settings);
    }

    /// Recolors the live overlays. Does nothing while disabled.
    pub fn request_level_change(&mut self, level: DimLevel) {
        if self.state() == DimState::Disabled {
            return;
        }
        debug!(%level, overlays = self.overlays.len(), "changing dim level");
        for overlay in &self.overlays {
            overlay.set_level(level);
        }
    }

    /// Snapshots the windows and replaces the overlay set. Displays whose
    /// overlay cannot be built are left undimmed.
    pub fn dim_now(&mut self, settings: &DimSettings) {
        let Some(screens) = self.system.screens() else {
            debug!("display list unavailable, keeping current overlays");
            return;
        };
        let snapshot = self.system.snapshot();
        let placements = plan_overlays(&snapshot, &screens, settings.mode);

        let mut fresh = Vec::with_capacity(placements.len());
        let mut built = Vec::with_capacity(placements.len());
        for (screen, placement) in screens.iter().zip(&placements) {
            match self.system.build_overlay(screen, settings.level, placement.reference) {
                Ok(overlay) => {
                    fresh.push(overlay);
                    built.push(*placement);
                }
                Err(err) => warn!(?err, screen = ?screen.id, "skipping display"),
            }
        }

        debug!(
            mode = ?settings.mode,
            windows = snapshot.len(),
            placements = ?built,
            "replacing overlays"
        );
        let stale = std::mem::replace(&mut self.overlays, fresh);
        self.placements = built;
        drop(stale);
    }

    fn tear_down(&mut self, reason: &str) {
        if self.overlays.is_empty() {
            return;
        }
        info!(reason, count = self.overlays.len(), "removing overlays");
        self.overlays.clear();
        self.placements.clear();
    }
}

impl Overlay for OverlayWindow {
    fn screen(&self) -> ScreenId { OverlayWindow::screen(self) }

    fn set_level(&self, level: DimLevel) { OverlayWindow::set_level(self, level) }
}

/// The real window system.
pub struct MacSystem {
    mtm: MainThreadMarker,
    screens: ScreenCache,
}

impl MacSystem {
    pub fn new(mtm: MainThreadMarker) -> Self {
        MacSystem { mtm, screens: ScreenCache::new(mtm) }
    }
}

impl DimSystem for MacSystem {
    type Overlay = OverlayWindow;

    fn screens(&mut self) -> Option<Vec<ScreenDescriptor>> {
        self.screens.screens().map(|(screens, _)| screens)
    }

    fn snapshot(&mut self) -> WindowSnapshot { window_server::snapshot() }

    fn frontmost_app(&self) -> Option<FrontmostApp> { app::frontmost_app() }

    fn build_overlay(
        &mut self,
        screen: &ScreenDescriptor,
        level: DimLevel,
        reference: WindowServerId,
    ) -> Result<OverlayWindow, OverlayError> {
        OverlayWindow::build(self.mtm, screen, level, reference)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::BTreeSet;
    use std::rc::Rc;

    use objc2_core_foundation::{CGPoint, CGRect, CGSize};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::common::config::DimMode;
    use crate::sys::window_server::WindowSnapshotRecord;

    #[derive(Default)]
    pub struct Registry {
        next_id: Cell<usize>,
        alive: RefCell<BTreeSet<usize>>,
        /// How many overlays were alive just before each build.
        alive_at_build: RefCell<Vec<usize>>,
    }

    impl Registry {
        pub fn builds(&self) -> usize { self.alive_at_build.borrow().len() }
    }

    pub struct StubOverlay {
        pub id: usize,
        pub screen: ScreenId,
        pub reference: WindowServerId,
        pub level: Cell<DimLevel>,
        registry: Rc<Registry>,
    }

    impl Overlay for StubOverlay {
        fn screen(&self) -> ScreenId { self.screen }

        fn set_level(&self, level: DimLevel) { self.level.set(level) }
    }

    impl Drop for StubOverlay {
        fn drop(&mut self) { self.registry.alive.borrow_mut().remove(&self.id); }
    }

    pub struct StubSystem {
        pub screens: Option<Vec<ScreenDescriptor>>,
        pub windows: Vec<WindowSnapshotRecord>,
        pub frontmost: Option<FrontmostApp>,
        pub failing: BTreeSet<ScreenId>,
        pub snapshots_taken: Rc<Cell<usize>>,
        pub registry: Rc<Registry>,
    }

    impl StubSystem {
        pub fn new(screens: Vec<ScreenDescriptor>) -> Self {
            StubSystem {
                screens: Some(screens),
                windows: vec![],
                frontmost: None,
                failing: BTreeSet::new(),
                snapshots_taken: Rc::default(),
                registry: Rc::default(),
            }
        }
    }

    impl DimSystem for StubSystem {
        type Overlay = StubOverlay;

        fn screens(&mut self) -> Option<Vec<ScreenDescriptor>> { self.screens.clone() }

        fn snapshot(&mut self) -> WindowSnapshot {
            self.snapshots_taken.set(self.snapshots_taken.get() + 1);
            WindowSnapshot::from_records(self.windows.clone())
        }

        fn frontmost_app(&self) -> Option<FrontmostApp> { self.frontmost.clone() }

        fn build_overlay(
            &mut self,
            screen: &ScreenDescriptor,
            level: DimLevel,
            reference: WindowServerId,
        ) -> Result<StubOverlay, OverlayError> {
            if self.failing.contains(&screen.id) {
                return Err(OverlayError::InvalidFrame(screen.id));
            }
            let registry = &self.registry;
            registry.alive_at_build.borrow_mut().push(registry.alive.borrow().len());
            let id = registry.next_id.get();
            registry.next_id.set(id + 1);
            registry.alive.borrow_mut().insert(id);
            Ok(StubOverlay {
                id,
                screen: screen.id,
                reference,
                level: Cell::new(level),
                registry: registry.clone(),
            })
        }
    }

    pub fn display(id: u32, x: f64, y: f64, w: f64, h: f64) -> ScreenDescriptor {
        let r = CGRect::new(CGPoint::new(x, y), CGSize::new(w, h));
        ScreenDescriptor {
            id: ScreenId::new(id),
            frame: r,
            bounds: r,
            name: None,
        }
    }

    pub fn two_displays() -> Vec<ScreenDescriptor> {
        vec![display(1, 0.0, 0.0, 1440.0, 900.0), display(2, 1440.0, 0.0, 1920.0, 1080.0)]
    }

    fn finder() -> FrontmostApp { FrontmostApp::new(100, Some("com.apple.finder")) }

    fn editor() -> FrontmostApp { FrontmostApp::new(200, Some("com.example.editor")) }

    fn manager() -> OverlayManager<StubSystem> {
        let mut system = StubSystem::new(two_displays());
        system.windows = vec![
            WindowSnapshotRecord::new(10, Some(two_displays()[0].bounds)),
            WindowSnapshotRecord::new(11, Some(two_displays()[1].bounds)),
        ];
        system.frontmost = Some(editor());
        OverlayManager::new(system)
    }

    fn ids(m: &OverlayManager<StubSystem>) -> Vec<usize> { m.overlays().iter().map(|o| o.id).collect() }

    fn refs(m: &OverlayManager<StubSystem>) -> Vec<u32> {
        m.overlays().iter().map(|o| o.reference.as_u32()).collect()
    }

    #[test]
    fn dim_builds_one_overlay_per_display() {
        let mut m = manager();
        m.request_dim(&DimSettings::default(), Some(&editor()));
        assert_eq!(m.state(), DimState::Active);
        assert_eq!(refs(&m), vec![10, 10]);

        let parallel = DimSettings { mode: DimMode::Parallel, ..Default::default() };
        m.request_dim(&parallel, None);
        assert_eq!(refs(&m), vec![10, 11]);
        assert_eq!(m.placements().len(), 2);
    }

    #[test]
    fn new_overlays_are_ready_before_old_ones_close() {
        let mut m = manager();
        let settings = DimSettings::default();
        m.request_dim(&settings, Some(&editor()));
        let first = ids(&m);
        m.request_dim(&settings, Some(&editor()));

        let registry = m.system.registry.clone();
        assert_eq!(*registry.alive_at_build.borrow(), vec![0, 1, 2, 3]);
        assert!(first.iter().all(|id| !registry.alive.borrow().contains(id)));
        assert_eq!(registry.alive.borrow().len(), 2);
    }

    #[test]
    fn disabling_always_empties_the_set() {
        for mode in [DimMode::Single, DimMode::Parallel] {
            for level in [10, 55, 100] {
                let mut m = manager();
                let settings = DimSettings { mode, level: DimLevel::new(level), ..Default::default() };
                m.request_dim(&settings, Some(&editor()));
                m.request_toggle(false, &settings);
                assert_eq!(m.state(), DimState::Disabled);
                assert!(m.system.registry.alive.borrow().is_empty());
            }
        }
    }

    #[test]
    fn disabled_settings_tear_down_on_dim() {
        let mut m = manager();
        m.request_dim(&DimSettings::default(), Some(&editor()));
        let disabled = DimSettings { enabled: false, ..Default::default() };
        m.request_dim(&disabled, Some(&editor()));
        assert!(m.overlays().is_empty());
    }

    #[test]
    fn focusing_the_desktop_removes_overlays_regardless_of_enabled() {
        for enabled in [true, false] {
            let mut m = manager();
            m.request_dim(&DimSettings::default(), Some(&editor()));
            let settings = DimSettings { enabled, ..Default::default() };
            m.request_dim(&settings, Some(&finder()));
            assert!(m.overlays().is_empty());
        }
    }

    #[test]
    fn level_change_recolors_without_rebuilding() {
        let mut m = manager();
        m.request_dim(&DimSettings::default(), Some(&editor()));
        let before = ids(&m);
        let snapshots = m.system.snapshots_taken.get();

        m.request_level_change(DimLevel::new(55));

        assert_eq!(ids(&m), before);
        assert_eq!(m.system.snapshots_taken.get(), snapshots);
        for overlay in m.overlays() {
            assert!((overlay.level.get().alpha() - 0.55).abs() < 1e-9);
        }
    }

    #[test]
    fn level_change_while_disabled_builds_nothing() {
        let mut m = manager();
        m.request_level_change(DimLevel::new(80));
        assert!(m.overlays().is_empty());
        assert_eq!(m.system.snapshots_taken.get(), 0);
    }

    #[test]
    fn toggle_on_dims_behind_the_frontmost_app() {
        let mut m = manager();
        m.request_toggle(true, &DimSettings::default());
        assert_eq!(m.state(), DimState::Active);

        m.system.frontmost = Some(finder());
        m.request_toggle(true, &DimSettings::default());
        assert_eq!(m.state(), DimState::Disabled);
    }

    #[test_log::test]
    fn failing_display_is_skipped() {
        let mut m = manager();
        m.system.failing.insert(ScreenId::new(1));
        m.request_dim(&DimSettings::default(), None);
        let screens: Vec<_> = m.overlays().iter().map(|o| o.screen()).collect();
        assert_eq!(screens, vec![ScreenId::new(2)]);
        assert_eq!(m.placements()[0].screen, ScreenId::new(2));
    }

    #[test]
    fn no_displays_gives_an_empty_set() {
        let mut m = manager();
        m.request_dim(&DimSettings::default(), None);
        m.system.screens = Some(vec![]);
        m.request_dim(&DimSettings::default(), None);
        assert!(m.overlays().is_empty());
        assert!(m.system.registry.alive.borrow().is_empty());
    }

    #[test]
    fn inconsistent_display_list_keeps_current_overlays() {
        let mut m = manager();
        m.request_dim(&DimSettings::default(), None);
        let before = ids(&m);
        m.system.screens = None;
        m.request_dim(&DimSettings::default(), None);
        assert_eq!(ids(&m), before);
    }

    #[test]
    fn empty_snapshot_dims_behind_everything() {
        let mut m = manager();
        m.system.windows.clear();
        let parallel = DimSettings { mode: DimMode::Parallel, ..Default::default() };
        m.request_dim(&parallel, None);
        assert_eq!(refs(&m), vec![0, 0]);
    }

    #[test]
    fn floating_windows_never_become_references() {
        let mut m = manager();
        let mut menu = WindowSnapshotRecord::new(99, Some(two_displays()[0].bounds));
        menu.layer = 24;
        m.system.windows.insert(0, menu);
        m.request_dim(&DimSettings::default(), None);
        assert_eq!(refs(&m), vec![10, 10]);
    }
}
