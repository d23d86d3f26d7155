//! The status item and its menu.
//!
//! Every control only sends a [`dimmer::Event`]; the menu is redrawn from the
//! settings the dimmer reports back through [`MenuIcon::update`].

use std::cell::RefCell;

use objc2::rc::Retained;
use objc2::runtime::Sel;
use objc2::{DefinedClass, MainThreadMarker, MainThreadOnly, define_class, msg_send, sel};
use objc2_app_kit::{
    NSAutoresizingMaskOptions, NSControlStateValue, NSControlStateValueOff, NSControlStateValueOn,
    NSEvent,
    NSEventGestureAxis, NSMenu, NSMenuItem, NSResponder, NSSlider, NSSquareStatusItemLength,
    NSStatusBar, NSStatusItem, NSView,
};
use objc2_core_foundation::{CGPoint, CGRect, CGSize};
use objc2_foundation::{NSObject, NSString};
use strum::IntoEnumIterator;
use tracing::{debug, trace};

use crate::actor::dimmer::{self, Event};
use crate::common::config::{DimLevel, DimMode, DimSettings};

const ICON_TITLE: &str = "◐";
const SLIDER_TITLE: &str = "Slide to set dim level";
const SLIDER_FRAME: CGRect = CGRect {
    origin: CGPoint { x: 0.0, y: 0.0 },
    size: CGSize { width: 180.0, height: 28.0 },
};

/// Level change for one scroll event over the icon. Scrolling up dims less.
pub fn scroll_delta(delta_y: f64) -> i32 {
    if delta_y > 0.0 {
        -i32::from(DimLevel::SCROLL_STEP)
    } else if delta_y < 0.0 {
        i32::from(DimLevel::SCROLL_STEP)
    } else {
        0
    }
}

pub fn toggle_title(enabled: bool) -> &'static str { if enabled { "Disable" } else { "Enable" } }

fn check_state(on: bool) -> NSControlStateValue {
    if on { NSControlStateValueOn } else { NSControlStateValueOff }
}

struct TargetIvars {
    events: dimmer::Sender,
    /// What the menu currently shows; checkable items send its opposite.
    shown: RefCell<DimSettings>,
}

define_class! {
    // SAFETY:
    // - NSObject has no subclassing requirements.
    // - `MenuTarget` does not implement `Drop`.
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[ivars = TargetIvars]
    struct MenuTarget;

    // SAFETY: Each action takes its sender as the only argument.
    impl MenuTarget {
        #[unsafe(method(sliderChanged:))]
        fn slider_changed(&self, sender: &NSSlider) {
            let level = DimLevel::from_slider(sender.doubleValue());
            self.send(Event::LevelChanged(level));
        }

        #[unsafe(method(toggleEnabled:))]
        fn toggle_enabled(&self, _sender: &NSMenuItem) {
            let enabled = self.ivars().shown.borrow().enabled;
            self.send(Event::ToggleRequested(!enabled));
        }

        #[unsafe(method(toggleAutoStart:))]
        fn toggle_auto_start(&self, _sender: &NSMenuItem) {
            let on = self.ivars().shown.borrow().auto_start_at_login;
            self.send(Event::AutoStartChanged(!on));
        }

        #[unsafe(method(toggleOpenPreferencesOnLaunch:))]
        fn toggle_open_preferences_on_launch(&self, _sender: &NSMenuItem) {
            let on = self.ivars().shown.borrow().open_preferences_on_launch;
            self.send(Event::OpenPreferencesOnLaunchChanged(!on));
        }

        #[unsafe(method(selectMode:))]
        fn select_mode(&self, sender: &NSMenuItem) {
            let Ok(raw) = u8::try_from(sender.tag()) else { return };
            if let Ok(mode) = DimMode::try_from(raw) {
                self.send(Event::ModeChanged(mode));
            }
        }

        #[unsafe(method(openPreferences:))]
        fn open_preferences(&self, _sender: &NSMenuItem) {
            self.send(Event::OpenPreferences);
        }
    }
}

impl MenuTarget {
    fn new(mtm: MainThreadMarker, events: dimmer::Sender, shown: &DimSettings) -> Retained<Self> {
        let this = mtm.alloc::<Self>().set_ivars(TargetIvars {
            events,
            shown: RefCell::new(shown.clone()),
        });
        unsafe { msg_send![super(this), init] }
    }

    fn send(&self, event: Event) {
        debug!(?event, "menu action");
        self.ivars().events.send(event);
    }
}

define_class! {
    // SAFETY:
    // - NSView may be subclassed to override event handling.
    // - `ScrollCatcher` does not implement `Drop`.
    #[unsafe(super(NSView, NSResponder, NSObject))]
    #[thread_kind = MainThreadOnly]
    #[ivars = dimmer::Sender]
    struct ScrollCatcher;

    impl ScrollCatcher {
        #[unsafe(method(scrollWheel:))]
        fn scroll_wheel(&self, event: &NSEvent) {
            let delta = scroll_delta(event.deltaY());
            trace!(delta, "scroll over status item");
            if delta != 0 {
                self.ivars().send(Event::LevelAdjusted(delta));
            }
        }

        #[unsafe(method(wantsScrollEventsForSwipeTrackingOnAxis:))]
        fn wants_scroll_events(&self, axis: NSEventGestureAxis) -> bool {
            axis == NSEventGestureAxis::Vertical
        }
    }
}

impl ScrollCatcher {
    fn new(mtm: MainThreadMarker, frame: CGRect, events: dimmer::Sender) -> Retained<Self> {
        let this = mtm.alloc::<Self>().set_ivars(events);
        unsafe { msg_send![super(this), initWithFrame: frame] }
    }
}

pub struct MenuIcon {
    mtm: MainThreadMarker,
    status_item: Retained<NSStatusItem>,
    target: Retained<MenuTarget>,
    slider: Retained<NSSlider>,
    toggle_item: Retained<NSMenuItem>,
    mode_items: Vec<(DimMode, Retained<NSMenuItem>)>,
    auto_start_item: Retained<NSMenuItem>,
    open_on_launch_item: Retained<NSMenuItem>,
    // Kept alive for as long as the status button holds it.
    _scroll: Retained<ScrollCatcher>,
    _menu: Retained<NSMenu>,
}

impl MenuIcon {
    pub fn new(mtm: MainThreadMarker, events: dimmer::Sender, settings: &DimSettings) -> Self {
        let status_item =
            NSStatusBar::systemStatusBar().statusItemWithLength(NSSquareStatusItemLength);
        let target = MenuTarget::new(mtm, events.clone(), settings);

        let scroll = match status_item.button(mtm) {
            Some(button) => {
                button.setTitle(&NSString::from_str(ICON_TITLE));
                let scroll = ScrollCatcher::new(mtm, button.bounds(), events);
                scroll.setAutoresizingMask(
                    NSAutoresizingMaskOptions::ViewWidthSizable
                        | NSAutoresizingMaskOptions::ViewHeightSizable,
                );
                button.addSubview(&scroll);
                scroll
            }
            None => ScrollCatcher::new(mtm, CGRect::default(), events),
        };

        let menu = NSMenu::new(mtm);
        menu.setAutoenablesItems(false);

        let title = menu_item(mtm, SLIDER_TITLE, None, "");
        title.setEnabled(false);
        menu.addItem(&title);

        let slider = unsafe {
            NSSlider::sliderWithValue_minValue_maxValue_target_action(
                f64::from(settings.level.get()),
                f64::from(DimLevel::MIN.get()),
                f64::from(DimLevel::MAX.get()),
                Some(&target),
                Some(sel!(sliderChanged:)),
                mtm,
            )
        };
        slider.setFrame(SLIDER_FRAME);
        let slider_item = menu_item(mtm, "", None, "");
        slider_item.setView(Some(&slider));
        menu.addItem(&slider_item);
        menu.addItem(&NSMenuItem::separatorItem(mtm));

        let toggle_item =
            menu_item(mtm, toggle_title(settings.enabled), Some(sel!(toggleEnabled:)), "E");
        unsafe { toggle_item.setTarget(Some(&target)) };
        menu.addItem(&toggle_item);

        let mode_menu = NSMenu::new(mtm);
        let mode_items: Vec<_> = DimMode::iter()
            .map(|mode| {
                let item = menu_item(mtm, mode.label(), Some(sel!(selectMode:)), "");
                item.setTag(u8::from(mode).into());
                unsafe { item.setTarget(Some(&target)) };
                mode_menu.addItem(&item);
                (mode, item)
            })
            .collect();
        let mode_item = menu_item(mtm, "Dim mode", None, "");
        mode_item.setSubmenu(Some(&mode_menu));
        menu.addItem(&mode_item);
        menu.addItem(&NSMenuItem::separatorItem(mtm));

        let auto_start_item = menu_item(mtm, "Start at Login", Some(sel!(toggleAutoStart:)), "");
        unsafe { auto_start_item.setTarget(Some(&target)) };
        menu.addItem(&auto_start_item);
        let open_on_launch_item = menu_item(
            mtm,
            "Open Preferences on Launch",
            Some(sel!(toggleOpenPreferencesOnLaunch:)),
            "",
        );
        unsafe { open_on_launch_item.setTarget(Some(&target)) };
        menu.addItem(&open_on_launch_item);
        menu.addItem(&NSMenuItem::separatorItem(mtm));

        let preferences = menu_item(mtm, "Preferences…", Some(sel!(openPreferences:)), "P");
        unsafe { preferences.setTarget(Some(&target)) };
        menu.addItem(&preferences);

        // No target: `terminate:` travels the responder chain to NSApp.
        menu.addItem(&menu_item(mtm, "Quit", Some(sel!(terminate:)), "q"));

        status_item.setMenu(Some(&menu));

        let icon = MenuIcon {
            mtm,
            status_item,
            target,
            slider,
            toggle_item,
            mode_items,
            auto_start_item,
            open_on_launch_item,
            _scroll: scroll,
            _menu: menu,
        };
        icon.update(settings);
        icon
    }

    pub fn update(&self, settings: &DimSettings) {
        *self.target.ivars().shown.borrow_mut() = settings.clone();
        self.slider.setDoubleValue(f64::from(settings.level.get()));
        self.slider.setEnabled(settings.enabled);
        self.toggle_item.setTitle(&NSString::from_str(toggle_title(settings.enabled)));
        for (mode, item) in &self.mode_items {
            item.setState(check_state(*mode == settings.mode));
        }
        self.auto_start_item.setState(check_state(settings.auto_start_at_login));
        self.open_on_launch_item.setState(check_state(settings.open_preferences_on_launch));
    }
}

impl Drop for MenuIcon {
    fn drop(&mut self) {
        NSStatusBar::systemStatusBar().removeStatusItem(&self.status_item);
    }
}

fn menu_item(
    mtm: MainThreadMarker,
    title: &str,
    action: Option<Sel>,
    key: &str,
) -> Retained<NSMenuItem> {
    unsafe {
        NSMenuItem::initWithTitle_action_keyEquivalent(
            mtm.alloc(),
            &NSString::from_str(title),
            action,
            &NSString::from_str(key),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrolling_up_dims_less() {
        assert_eq!(scroll_delta(1.5), -1);
        assert_eq!(scroll_delta(-0.1), 1);
        assert_eq!(scroll_delta(0.0), 0);
    }

    #[test]
    fn toggle_title_offers_the_opposite_state() {
        assert_eq!(toggle_title(true), "Disable");
        assert_eq!(toggle_title(false), "Enable");
    }
}
