//! Translates workspace and application notifications into dimmer events:
//! application activation, display reconfiguration, and wake from sleep.

use std::cell::RefCell;
use std::future;

use objc2::rc::Retained;
use objc2::{DefinedClass, MainThreadMarker, MainThreadOnly, define_class, msg_send, sel};
use objc2_app_kit::{NSApplication, NSRunningApplication, NSWorkspace, NSWorkspaceApplicationKey};
use objc2_foundation::{NSNotification, NSNotificationCenter, NSObject, NSString};
use tracing::{debug, info_span, trace, warn};

use crate::actor::dimmer::{self, Event};
use crate::sys::app::NSRunningApplicationExt;
use crate::sys::screen::ScreenCache;

struct Instance {
    screen_cache: RefCell<ScreenCache>,
    events_tx: dimmer::Sender,
}

define_class! {
    // SAFETY:
    // - The superclass NSObject does not have any subclassing requirements.
    // - `NotificationCenterInner` does not implement `Drop`.
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[ivars = Instance]
    struct NotificationCenterInner;

    // SAFETY: Each of these method signatures must match their invocations.
    impl NotificationCenterInner {
        #[unsafe(method(recvScreenChangedEvent:))]
        fn recv_screen_changed_event(&self, notif: &NSNotification) {
            trace!("{notif:#?}");
            self.send_screen_parameters();
        }

        #[unsafe(method(recvAppEvent:))]
        fn recv_app_event(&self, notif: &NSNotification) {
            trace!("{notif:#?}");
            self.handle_app_event(notif);
        }

        #[unsafe(method(recvWakeEvent:))]
        fn recv_wake_event(&self, notif: &NSNotification) {
            trace!("{notif:#?}");
            // Displays may come back in a different arrangement, and the
            // first parameters notification after wake is not guaranteed.
            let _s = info_span!("notification_center::wake").entered();
            self.ivars().screen_cache.borrow_mut().update_screen_config();
            self.send_event(Event::ScreenConfigChanged);
        }
    }
}

impl NotificationCenterInner {
    fn new(mtm: MainThreadMarker, events_tx: dimmer::Sender) -> Retained<Self> {
        let this = mtm.alloc::<Self>().set_ivars(Instance {
            screen_cache: RefCell::new(ScreenCache::new(mtm)),
            events_tx,
        });
        unsafe { msg_send![super(this), init] }
    }

    fn send_screen_parameters(&self) {
        let _s = info_span!("notification_center::screen_parameters").entered();
        if self.ivars().screen_cache.borrow_mut().update_screen_config().is_none() {
            trace!("screen parameters unchanged; ignoring duplicate notification");
            return;
        }
        self.send_event(Event::ScreenConfigChanged);
    }

    fn handle_app_event(&self, notif: &NSNotification) {
        let Some(app) = running_application(notif) else {
            return;
        };
        let app = app.to_frontmost();
        let _s = info_span!("notification_center::app_activated", pid = app.pid).entered();
        debug!(bundle_id = ?app.bundle_id, "application activated");
        self.send_event(Event::FocusChanged(app));
    }

    fn send_event(&self, event: Event) { self.ivars().events_tx.send(event); }
}

fn running_application(notif: &NSNotification) -> Option<Retained<NSRunningApplication>> {
    let Some(info) = notif.userInfo() else {
        warn!("Got app notification without user info: {notif:?}");
        return None;
    };
    let Some(app) = (unsafe { info.valueForKey(NSWorkspaceApplicationKey) }) else {
        warn!("Got app notification without app object: {notif:?}");
        return None;
    };
    match app.downcast::<NSRunningApplication>() {
        Ok(app) => Some(app),
        Err(other) => {
            warn!("Unexpected app object in notification: {other:?}");
            None
        }
    }
}

pub struct NotificationCenter {
    inner: Retained<NotificationCenterInner>,
}

impl NotificationCenter {
    pub fn new(mtm: MainThreadMarker, events_tx: dimmer::Sender) -> Self {
        let handler = NotificationCenterInner::new(mtm, events_tx);

        // SAFETY: Selector must have signature fn(&self, &NSNotification)
        let register_unsafe =
            |selector, notif_name: &NSString, center: &NSNotificationCenter, object: &NSObject| unsafe {
                center.addObserver_selector_name_object(
                    &handler,
                    selector,
                    Some(notif_name),
                    Some(object),
                );
            };

        let workspace = &NSWorkspace::sharedWorkspace();
        let workspace_center = &workspace.notificationCenter();
        let default_center = &NSNotificationCenter::defaultCenter();
        let shared_app = &NSApplication::sharedApplication(mtm);
        unsafe {
            use objc2_app_kit::*;
            register_unsafe(
                sel!(recvScreenChangedEvent:),
                NSApplicationDidChangeScreenParametersNotification,
                default_center,
                shared_app,
            );
            register_unsafe(
                sel!(recvWakeEvent:),
                NSWorkspaceDidWakeNotification,
                workspace_center,
                workspace,
            );
            register_unsafe(
                sel!(recvAppEvent:),
                NSWorkspaceDidActivateApplicationNotification,
                workspace_center,
                workspace,
            );
        };

        NotificationCenter { inner: handler }
    }

    pub async fn watch_for_notifications(self) {
        // Seeds the cache so the first real change is not mistaken for a
        // duplicate. The dimmer performs the initial dim itself.
        self.inner.ivars().screen_cache.borrow_mut().update_screen_config();
        future::pending().await
    }
}
