//! The dimmer actor owns the settings and the overlay manager, and is the
//! only place either is mutated.
//!
//! Every trigger, whether it comes from the OS, the menu or the settings
//! file, arrives as an [`Event`] on one queue. Focus and mode changes are dimmed
//! after a short delay so the window server has caught up with the
//! activation; a newer trigger always supersedes a pending delayed dim.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

pub mod overlay_manager;
pub mod reference_policy;

use self::overlay_manager::{DimSystem, OverlayManager};
use crate::actor::{self, menu_bar};
use crate::common::config::{DimLevel, DimMode, SettingChange, Settings};
use crate::sys::app::{self, FrontmostApp};
use crate::sys::hotkey::HotkeyManager;
use crate::sys::login_item::LoginItem;
use crate::sys::timer::Timer;

/// Time given to the window server to reorder windows after an activation.
pub const FOCUS_DIM_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Another application was activated.
    FocusChanged(FrontmostApp),
    /// The left mouse button was released somewhere on screen.
    MouseClicked,
    /// Displays were added, removed, rearranged, or the machine woke.
    ScreenConfigChanged,
    HotkeyPressed,
    ToggleRequested(bool),
    LevelChanged(DimLevel),
    /// Relative change from scrolling over the status item.
    LevelAdjusted(i32),
    ModeChanged(DimMode),
    AutoStartChanged(bool),
    OpenPreferencesOnLaunchChanged(bool),
    /// The settings file was modified on disk.
    SettingsFileChanged,
    OpenPreferences,
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

pub struct Dimmer<S: DimSystem> {
    settings: Settings,
    overlays: OverlayManager<S>,
    rx: Receiver,
    timer: Timer,
    hotkeys: Option<HotkeyManager>,
    login_item: Option<LoginItem>,
    menu_tx: Option<menu_bar::Sender>,
}

impl<S: DimSystem> Dimmer<S> {
    pub fn new(settings: Settings, overlays: OverlayManager<S>, rx: Receiver) -> Self {
        Dimmer {
            settings,
            overlays,
            rx,
            timer: Timer::manual(),
            hotkeys: None,
            login_item: None,
            menu_tx: None,
        }
    }

    pub fn with_hotkeys(mut self, hotkeys: HotkeyManager) -> Self {
        self.hotkeys = Some(hotkeys);
        self
    }

    pub fn with_login_item(mut self, login_item: LoginItem) -> Self {
        self.login_item = Some(login_item);
        self
    }

    pub fn with_menu(mut self, menu_tx: menu_bar::Sender) -> Self {
        self.menu_tx = Some(menu_tx);
        self
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn overlays(&self) -> &OverlayManager<S> { &self.overlays }

    pub async fn run(mut self) {
        self.start();
        loop {
            tokio::select! {
                _ = &mut self.timer, if self.timer.is_armed() => self.fire_delayed_dim(),
                event = self.rx.recv() => {
                    let Some((span, event)) = event else { break };
                    let _guard = span.enter();
                    self.handle_event(event);
                }
            }
        }
        debug!("dimmer queue closed");
    }

    /// Brings the platform in line with the loaded settings and dims behind
    /// whatever is frontmost.
    pub fn start(&mut self) {
        let values = self.settings.values().clone();
        info!(?values, "starting dimmer");
        if let Some(hotkeys) = &mut self.hotkeys {
            hotkeys.bind(values.hotkey.clone());
        }
        self.sync_login_item(values.auto_start_at_login);
        self.overlays.request_toggle(values.enabled, &values);
        self.notify_menu();
        if values.open_preferences_on_launch {
            self.open_preferences();
        }
    }

    #[instrument(name = "dimmer::handle_event", skip(self))]
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::FocusChanged(app) => self.focus_changed(app),
            Event::MouseClicked => {
                self.timer.cancel();
                let frontmost = self.overlays.frontmost_app();
                self.overlays.request_dim(self.settings.values(), frontmost.as_ref());
            }
            Event::ScreenConfigChanged => self.redim(),
            Event::HotkeyPressed => {
                let change = self.settings.toggle_enabled();
                self.apply(change);
            }
            Event::ToggleRequested(enabled) => {
                let change = self.settings.set_enabled(enabled);
                self.apply(change);
            }
            Event::LevelChanged(level) => {
                let change = self.settings.set_level(level);
                self.apply(change);
            }
            Event::LevelAdjusted(delta) => {
                let change = self.settings.adjust_level(delta);
                self.apply(change);
            }
            Event::ModeChanged(mode) => {
                let change = self.settings.set_mode(mode);
                self.apply(change);
            }
            Event::AutoStartChanged(on) => {
                let change = self.settings.set_auto_start_at_login(on);
                self.apply(change);
            }
            Event::OpenPreferencesOnLaunchChanged(on) => {
                let change = self.settings.set_open_preferences_on_launch(on);
                self.apply(change);
            }
            Event::SettingsFileChanged => {
                let changes = self.settings.reload();
                if changes.is_empty() {
                    return;
                }
                info!(?changes, "settings file changed");
                for change in changes {
                    self.apply_change(change);
                }
                self.notify_menu();
            }
            Event::OpenPreferences => self.open_preferences(),
        }
    }

    fn focus_changed(&mut self, app: FrontmostApp) {
        debug!(?app.bundle_id, "focus changed");
        self.schedule_dim(Some(&app));
    }

    /// Admits the trigger now and dims once the window server has settled.
    fn schedule_dim(&mut self, trigger: Option<&FrontmostApp>) {
        self.timer.cancel();
        if self.overlays.admit(self.settings.values(), trigger) {
            self.timer.set_next_fire(FOCUS_DIM_DELAY);
        }
    }

    fn fire_delayed_dim(&mut self) {
        // The trigger was admitted when it arrived; only `enabled` can have
        // changed since, and any change to it cancels the timer.
        self.overlays.request_dim(self.settings.values(), None);
    }

    /// Full rebuild with no particular application in focus.
    fn redim(&mut self) {
        self.timer.cancel();
        self.overlays.request_dim(self.settings.values(), None);
    }

    fn apply(&mut self, change: Option<SettingChange>) {
        if let Some(change) = change {
            self.apply_change(change);
            self.notify_menu();
        }
    }

    fn apply_change(&mut self, change: SettingChange) {
        debug!(?change, "applying setting");
        match change {
            SettingChange::Enabled(enabled) => {
                self.timer.cancel();
                let values = self.settings.values();
                self.overlays.request_toggle(enabled, values);
            }
            SettingChange::Level(level) => self.overlays.request_level_change(level),
            SettingChange::Mode(_) => self.schedule_dim(None),
            SettingChange::Hotkey(binding) => {
                if let Some(hotkeys) = &mut self.hotkeys {
                    hotkeys.bind(binding);
                }
            }
            SettingChange::AutoStartAtLogin(on) => self.sync_login_item(on),
            SettingChange::OpenPreferencesOnLaunch(_) => {}
        }
    }

    fn sync_login_item(&self, enabled: bool) {
        let Some(item) = &self.login_item else { return };
        // Rewritten even when present, so the agent follows the app if it moved.
        if let Err(err) = item.set_enabled(enabled) {
            warn!(%err, enabled, "could not update login item");
        }
    }

    fn open_preferences(&self) {
        let Some(path) = self.settings.path() else {
            warn!("settings are not backed by a file");
            return;
        };
        if !path.exists() {
            if let Err(err) = self.settings.save() {
                warn!(%err, "could not create settings file");
                return;
            }
        }
        if let Err(err) = app::open_in_text_editor(path) {
            warn!(%err, path = %path.display(), "could not open settings");
        }
    }

    fn notify_menu(&self) {
        if let Some(tx) = &self.menu_tx {
            tx.send(menu_bar::Event::SettingsChanged(self.settings.values().clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::overlay_manager::DimState;
    use super::overlay_manager::tests::{StubSystem, two_displays};
    use super::*;
    use crate::common::config::{DimSettings, MemorySettingsStore, TomlSettingsStore};
    use crate::sys::executor::Executor;
    use crate::sys::window_server::WindowSnapshotRecord;

    fn stub() -> StubSystem {
        let mut system = StubSystem::new(two_displays());
        system.windows = vec![WindowSnapshotRecord::new(10, None)];
        system.frontmost = Some(editor());
        system
    }

    fn editor() -> FrontmostApp { FrontmostApp::new(200, Some("com.example.editor")) }

    fn finder() -> FrontmostApp { FrontmostApp::new(100, Some("com.apple.finder")) }

    fn dimmer_with(values: DimSettings) -> (Dimmer<StubSystem>, Sender) {
        let (tx, rx) = actor::channel();
        let settings = Settings::load(MemorySettingsStore::with(values));
        (Dimmer::new(settings, OverlayManager::new(stub()), rx), tx)
    }

    fn dimmer() -> Dimmer<StubSystem> { dimmer_with(DimSettings::default()).0 }

    #[test]
    fn start_dims_when_enabled() {
        let mut d = dimmer();
        d.start();
        assert_eq!(d.overlays().state(), DimState::Active);

        let (mut off, _tx) = dimmer_with(DimSettings { enabled: false, ..Default::default() });
        off.start();
        assert_eq!(off.overlays().state(), DimState::Disabled);
    }

    #[test]
    fn focus_change_waits_for_the_timer() {
        let mut d = dimmer();
        d.handle_event(Event::FocusChanged(editor()));
        assert_eq!(d.overlays().state(), DimState::Disabled);
        assert!(d.timer.is_armed());

        d.fire_delayed_dim();
        assert_eq!(d.overlays().state(), DimState::Active);
    }

    #[test]
    fn newer_triggers_cancel_a_pending_dim() {
        let mut d = dimmer();
        d.handle_event(Event::FocusChanged(editor()));
        d.handle_event(Event::MouseClicked);
        assert!(!d.timer.is_armed());
        assert_eq!(d.overlays().state(), DimState::Active);

        d.handle_event(Event::FocusChanged(editor()));
        d.handle_event(Event::ToggleRequested(false));
        assert!(!d.timer.is_armed());
        assert_eq!(d.overlays().state(), DimState::Disabled);
    }

    #[test]
    fn focusing_the_desktop_clears_immediately() {
        let mut d = dimmer();
        d.start();
        d.handle_event(Event::FocusChanged(finder()));
        assert!(!d.timer.is_armed());
        assert_eq!(d.overlays().state(), DimState::Disabled);
        assert!(d.settings().values().enabled);
    }

    #[test]
    fn hotkey_toggles_and_persists() {
        let mut d = dimmer();
        d.start();
        d.handle_event(Event::HotkeyPressed);
        assert!(!d.settings().values().enabled);
        assert_eq!(d.overlays().state(), DimState::Disabled);

        d.handle_event(Event::HotkeyPressed);
        assert!(d.settings().values().enabled);
        assert_eq!(d.overlays().state(), DimState::Active);
    }

    #[test]
    fn level_changes_are_clamped_and_reported_to_the_menu() {
        let (menu_tx, mut menu_rx) = actor::channel();
        let mut d = dimmer().with_menu(menu_tx);
        d.start();
        _ = menu_rx.try_recv();

        d.handle_event(Event::LevelAdjusted(-100));
        assert_eq!(d.settings().values().level, DimLevel::MIN);
        let Some((_, menu_bar::Event::SettingsChanged(values))) = menu_rx.try_recv() else {
            panic!("menu was not told about the new level");
        };
        assert_eq!(values.level, DimLevel::MIN);

        d.handle_event(Event::LevelAdjusted(-1));
        assert!(menu_rx.try_recv().is_none());
    }

    #[test]
    fn mode_change_rebuilds_overlays_after_the_delay() {
        let mut d = dimmer();
        d.start();
        let before: Vec<_> = d.overlays().overlays().iter().map(|o| o.id).collect();
        d.handle_event(Event::ModeChanged(DimMode::Parallel));
        assert!(d.timer.is_armed());
        assert_eq!(d.overlays().overlays().iter().map(|o| o.id).collect::<Vec<_>>(), before);

        d.fire_delayed_dim();
        let after: Vec<_> = d.overlays().overlays().iter().map(|o| o.id).collect();
        assert_eq!(after.len(), 2);
        assert!(before.iter().all(|id| !after.contains(id)));
    }

    #[test]
    fn screen_change_follows_the_new_display_list() {
        let mut d = dimmer();
        d.start();
        let before: Vec<_> = d.overlays().overlays().iter().map(|o| o.id).collect();
        assert_eq!(before.len(), 2);

        d.overlays.system_mut().screens = Some(vec![two_displays()[0].clone()]);
        d.handle_event(Event::ScreenConfigChanged);

        let overlays = d.overlays().overlays();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].screen, two_displays()[0].id);
        assert!(!before.contains(&overlays[0].id));
    }

    #[test]
    fn click_with_the_desktop_focused_clears_immediately() {
        let mut d = dimmer();
        d.start();
        assert_eq!(d.overlays().state(), DimState::Active);

        d.overlays.system_mut().frontmost = Some(finder());
        d.handle_event(Event::MouseClicked);
        assert!(!d.timer.is_armed());
        assert_eq!(d.overlays().state(), DimState::Disabled);
        assert!(d.settings().values().enabled);
    }

    #[test]
    fn auto_start_follows_the_setting() {
        let dir = tempfile::tempdir().unwrap();
        let item = LoginItem::new(
            dir.path().join("LaunchAgents").join("agent.plist"),
            "/Applications/Blurred.app/Contents/MacOS/Blurred",
        );
        let mut d = dimmer().with_login_item(item.clone());
        d.start();
        assert!(!item.is_installed());

        d.handle_event(Event::AutoStartChanged(true));
        assert!(d.settings().values().auto_start_at_login);
        assert!(item.is_installed());

        // A stale agent, e.g. from before the app moved, is replaced on start.
        fs::write(item.plist_path(), "stale").unwrap();
        d.start();
        let text = fs::read_to_string(item.plist_path()).unwrap();
        assert!(text.contains("/Applications/Blurred.app/Contents/MacOS/Blurred"));

        d.handle_event(Event::AutoStartChanged(false));
        assert!(!item.is_installed());
    }

    #[test]
    fn open_preferences_on_launch_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let (_tx, rx) = actor::channel();
        let settings = Settings::load(TomlSettingsStore::new(&path));
        let mut d = Dimmer::new(settings, OverlayManager::new(stub()), rx);

        d.handle_event(Event::OpenPreferencesOnLaunchChanged(true));
        assert!(d.settings().values().open_preferences_on_launch);
        let stored = DimSettings::parse(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(stored.open_preferences_on_launch);
    }

    #[test_log::test]
    fn external_edits_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let (_tx, rx) = actor::channel();
        let settings = Settings::load(TomlSettingsStore::new(&path));
        let mut d = Dimmer::new(settings, OverlayManager::new(stub()), rx);
        d.start();
        assert_eq!(d.overlays().state(), DimState::Active);

        fs::write(&path, "enabled = false\n").unwrap();
        d.handle_event(Event::SettingsFileChanged);
        assert_eq!(d.overlays().state(), DimState::Disabled);

        fs::write(&path, "enabled = true\nlevel = 30\n").unwrap();
        d.handle_event(Event::SettingsFileChanged);
        assert_eq!(d.overlays().state(), DimState::Active);
        for overlay in d.overlays().overlays() {
            assert_eq!(overlay.level.get(), DimLevel::new(30));
        }
    }

    #[test]
    fn delayed_dim_runs_on_the_executor() {
        let (tx, rx) = actor::channel();
        let settings = Settings::load(MemorySettingsStore::with(DimSettings {
            enabled: false,
            ..Default::default()
        }));
        let system = stub();
        let registry = system.registry.clone();
        let d = Dimmer::new(settings, OverlayManager::new(system), rx);

        tx.send(Event::ToggleRequested(true));
        tx.send(Event::FocusChanged(editor()));
        thread::spawn(move || {
            thread::sleep(FOCUS_DIM_DELAY * 3);
            drop(tx);
        });
        Executor::run(d.run());

        // Two displays, built once for the toggle and once for the focus change.
        assert_eq!(registry.builds(), 4);
    }
}
