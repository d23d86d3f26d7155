//! The handshake between the main app and its launcher helper.
//!
//! The launcher starts the main app if it is not running and then waits. The
//! main app posts [`KILL_LAUNCHER`] once it is up, which tells the launcher to
//! exit.

use std::path::{Path, PathBuf};

use objc2::rc::Retained;
use objc2::runtime::AnyObject;
use objc2::{DefinedClass, MainThreadMarker, MainThreadOnly, define_class, msg_send, sel};
use objc2_foundation::{NSDistributedNotificationCenter, NSNotification, NSObject, NSString};
use tracing::{debug, info};

pub const MAIN_BUNDLE_ID: &str = "foundation.dwarves.blurred";
pub const LAUNCHER_BUNDLE_ID: &str = "foundation.dwarves.blurred.launcher";
pub const KILL_LAUNCHER: &str = "killLauncher";
pub const MAIN_EXECUTABLE: &str = "Blurred";

/// Resolves the main executable from the launcher's bundle, which is nested
/// at `Blurred.app/Contents/Library/LoginItems/BlurredLauncher.app`.
pub fn main_app_path(launcher_bundle: &Path) -> Option<PathBuf> {
    let contents = launcher_bundle.ancestors().nth(3)?;
    if contents.as_os_str().is_empty() {
        return None;
    }
    Some(contents.join("MacOS").join(MAIN_EXECUTABLE))
}

/// Tells a waiting launcher that the main app has started.
pub fn post_kill_launcher() {
    let center = NSDistributedNotificationCenter::defaultCenter();
    let name = NSString::from_str(KILL_LAUNCHER);
    let object = NSString::from_str(MAIN_BUNDLE_ID);
    unsafe { center.postNotificationName_object(&name, Some(&object)) };
    debug!("posted {KILL_LAUNCHER}");
}

define_class! {
    // SAFETY:
    // - NSObject has no subclassing requirements.
    // - `KillObserver` does not implement `Drop`.
    #[unsafe(super(NSObject))]
    #[thread_kind = MainThreadOnly]
    #[ivars = Box<dyn Fn()>]
    struct KillObserver;

    impl KillObserver {
        #[unsafe(method(killLauncher:))]
        fn kill_launcher(&self, _notif: &NSNotification) {
            info!("main app is up");
            (self.ivars())();
        }
    }
}

/// Calls `on_kill` when the main app announces itself. Observing stops when
/// the returned value is dropped.
pub struct KillWatcher {
    observer: Retained<KillObserver>,
}

impl KillWatcher {
    pub fn new(mtm: MainThreadMarker, on_kill: impl Fn() + 'static) -> Self {
        let on_kill: Box<dyn Fn()> = Box::new(on_kill);
        let observer = mtm.alloc::<KillObserver>().set_ivars(on_kill);
        let observer: Retained<KillObserver> = unsafe { msg_send![super(observer), init] };

        let center = NSDistributedNotificationCenter::defaultCenter();
        let name = NSString::from_str(KILL_LAUNCHER);
        let object = NSString::from_str(MAIN_BUNDLE_ID);
        // SAFETY: `killLauncher:` takes a single NSNotification.
        unsafe {
            center.addObserver_selector_name_object(
                &observer,
                sel!(killLauncher:),
                Some(&name),
                Some(&object),
            );
        }
        KillWatcher { observer }
    }
}

impl Drop for KillWatcher {
    fn drop(&mut self) {
        let observer: &AnyObject = &self.observer;
        unsafe { NSDistributedNotificationCenter::defaultCenter().removeObserver(observer) };
    }
}
