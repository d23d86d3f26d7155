use std::io;
use std::path::Path;
use std::process::Command;

use objc2_app_kit::{NSRunningApplication, NSWorkspace};
use serde::{Deserialize, Serialize};

use super::window_server::Pid;

/// Bundle identifier of the Finder, which also owns the desktop.
pub const DESKTOP_SHELL_BUNDLE_ID: &str = "com.apple.finder";

/// The application that triggered a dim, captured when the trigger fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontmostApp {
    pub pid: Pid,
    pub bundle_id: Option<String>,
    pub name: Option<String>,
}

impl FrontmostApp {
    pub fn new(pid: Pid, bundle_id: Option<&str>) -> Self {
        FrontmostApp {
            pid,
            bundle_id: bundle_id.map(str::to_string),
            name: None,
        }
    }

    /// Focusing the desktop shell means the user is looking at the desktop,
    /// so nothing should be dimmed.
    pub fn is_desktop_shell(&self) -> bool {
        self.bundle_id.as_deref() == Some(DESKTOP_SHELL_BUNDLE_ID)
    }
}

pub trait NSRunningApplicationExt {
    fn pid(&self) -> Pid;
    fn bundle_id(&self) -> Option<String>;
    fn localized_name(&self) -> Option<String>;

    fn to_frontmost(&self) -> FrontmostApp {
        FrontmostApp {
            pid: self.pid(),
            bundle_id: self.bundle_id(),
            name: self.localized_name(),
        }
    }
}

impl NSRunningApplicationExt for NSRunningApplication {
    fn pid(&self) -> Pid { self.processIdentifier() }

    fn bundle_id(&self) -> Option<String> { self.bundleIdentifier().map(|id| id.to_string()) }

    fn localized_name(&self) -> Option<String> { self.localizedName().map(|n| n.to_string()) }
}

pub fn frontmost_app() -> Option<FrontmostApp> {
    NSWorkspace::sharedWorkspace().frontmostApplication().map(|app| app.to_frontmost())
}

/// Whether any running process carries `bundle_id`.
pub fn is_running(bundle_id: &str) -> bool {
    NSWorkspace::sharedWorkspace()
        .runningApplications()
        .iter()
        .any(|app| app.bundle_id().as_deref() == Some(bundle_id))
}

/// Opens `path` in the user's default text editor.
pub fn open_in_text_editor(path: &Path) -> io::Result<()> {
    let status = Command::new("/usr/bin/open").arg("-t").arg(path).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("open exited with {status}")))
    }
}
