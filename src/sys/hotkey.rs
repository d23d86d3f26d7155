//! Global hotkey registration.
//!
//! A binding is watched with an `NSEvent` global monitor for key-down events.
//! Global monitors only deliver events once the process has been granted
//! Accessibility access; without it the binding is silently inert.

use std::fmt;
use std::ptr::NonNull;
use std::rc::Rc;

use bitflags::bitflags;
use block2::RcBlock;
use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2_app_kit::{NSEvent, NSEventMask, NSEventModifierFlags};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub type KeyCode = u16;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Modifiers: u8 {
        const FUNCTION = 1 << 0;
        const CONTROL = 1 << 1;
        const OPTION = 1 << 2;
        const COMMAND = 1 << 3;
        const SHIFT = 1 << 4;
        const CAPS_LOCK = 1 << 5;
    }
}

impl Modifiers {
    /// Modifiers that must match exactly for a binding to fire. Fn is set by
    /// the system for arrow and function keys, and caps lock is a toggle, so
    /// neither takes part in matching.
    const SIGNIFICANT: Modifiers = Modifiers::CONTROL
        .union(Modifiers::OPTION)
        .union(Modifiers::COMMAND)
        .union(Modifiers::SHIFT);

    pub fn from_event_flags(flags: NSEventModifierFlags) -> Modifiers {
        let mut mods = Modifiers::empty();
        mods.set(Modifiers::FUNCTION, flags.contains(NSEventModifierFlags::Function));
        mods.set(Modifiers::CONTROL, flags.contains(NSEventModifierFlags::Control));
        mods.set(Modifiers::OPTION, flags.contains(NSEventModifierFlags::Option));
        mods.set(Modifiers::COMMAND, flags.contains(NSEventModifierFlags::Command));
        mods.set(Modifiers::SHIFT, flags.contains(NSEventModifierFlags::Shift));
        mods.set(Modifiers::CAPS_LOCK, flags.contains(NSEventModifierFlags::CapsLock));
        mods
    }
}

/// A key combination as persisted in settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HotkeyBinding {
    #[serde(default)]
    pub modifiers: Modifiers,
    pub key_code: KeyCode,
    /// The characters the key produced when it was recorded, for display.
    #[serde(default)]
    pub characters: Option<String>,
}

impl HotkeyBinding {
    pub fn new(modifiers: Modifiers, key_code: KeyCode, characters: Option<String>) -> Self {
        HotkeyBinding { modifiers, key_code, characters }
    }

    /// A binding needs both a key and at least one modifier. A bare key would
    /// swallow ordinary typing.
    pub fn is_valid(&self) -> bool {
        let has_key = self.characters.as_deref().is_some_and(|c| !c.is_empty());
        has_key && !self.modifiers.is_empty()
    }

    pub fn matches(&self, modifiers: Modifiers, key_code: KeyCode) -> bool {
        self.key_code == key_code
            && self.modifiers.intersection(Modifiers::SIGNIFICANT)
                == modifiers.intersection(Modifiers::SIGNIFICANT)
    }
}

impl fmt::Display for HotkeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SYMBOLS: [(Modifiers, &str); 6] = [
            (Modifiers::FUNCTION, "Fn"),
            (Modifiers::CONTROL, "⌃"),
            (Modifiers::OPTION, "⌥"),
            (Modifiers::COMMAND, "⌘"),
            (Modifiers::SHIFT, "⇧"),
            (Modifiers::CAPS_LOCK, "⇪"),
        ];
        for (flag, symbol) in SYMBOLS {
            if self.modifiers.contains(flag) {
                f.write_str(symbol)?;
            }
        }
        if let Some(chars) = &self.characters {
            f.write_str(&chars.to_uppercase())?;
        }
        Ok(())
    }
}

/// Owns the key-down monitor for the current binding.
///
/// Rebinding replaces the monitor; binding `None` removes it.
pub struct HotkeyManager {
    on_press: Rc<dyn Fn()>,
    binding: Option<HotkeyBinding>,
    monitor: Option<Retained<AnyObject>>,
}

impl HotkeyManager {
    pub fn new(on_press: impl Fn() + 'static) -> Self {
        HotkeyManager {
            on_press: Rc::new(on_press),
            binding: None,
            monitor: None,
        }
    }

    pub fn bind(&mut self, binding: Option<HotkeyBinding>) {
        if self.binding == binding {
            return;
        }
        self.remove_monitor();
        self.binding = None;

        let Some(binding) = binding else {
            info!("global hotkey unbound");
            return;
        };
        if !binding.is_valid() {
            warn!(%binding, "ignoring hotkey without both a key and a modifier");
            return;
        }

        let on_press = self.on_press.clone();
        let target = binding.clone();
        let handler = RcBlock::new(move |event: NonNull<NSEvent>| {
            let event = unsafe { event.as_ref() };
            let modifiers = Modifiers::from_event_flags(event.modifierFlags());
            if target.matches(modifiers, event.keyCode()) {
                debug!(binding = %target, "global hotkey pressed");
                on_press();
            }
        });
        let monitor =
            NSEvent::addGlobalMonitorForEventsMatchingMask_handler(NSEventMask::KeyDown, &handler);
        match monitor {
            Some(monitor) => {
                info!(%binding, "global hotkey bound");
                self.monitor = Some(monitor);
                self.binding = Some(binding);
            }
            None => warn!(%binding, "failed to install global hotkey monitor"),
        }
    }

    fn remove_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            unsafe { NSEvent::removeMonitor(&monitor) };
        }
    }
}

impl Drop for HotkeyManager {
    fn drop(&mut self) { self.remove_monitor(); }
}
