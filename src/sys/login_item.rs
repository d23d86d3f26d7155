//! Start at login through a per-user LaunchAgent.
//!
//! The agent runs the launcher helper, which starts the main app unless it
//! is already running.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::launcher::LAUNCHER_BUNDLE_ID;

#[derive(Debug, Clone)]
pub struct LoginItem {
    plist: PathBuf,
    program: PathBuf,
}

impl LoginItem {
    pub fn new(plist: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        LoginItem { plist: plist.into(), program: program.into() }
    }

    /// `~/Library/LaunchAgents/<launcher id>.plist`, running the launcher that
    /// sits next to the current executable, or the executable itself if there
    /// is no launcher.
    pub fn for_current_user() -> io::Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no home directory"))?;
        let plist = home
            .join("Library")
            .join("LaunchAgents")
            .join(format!("{LAUNCHER_BUNDLE_ID}.plist"));
        let exe = std::env::current_exe()?;
        let launcher = exe.with_file_name("blurred-launcher");
        let program = if launcher.exists() { launcher } else { exe };
        Ok(LoginItem::new(plist, program))
    }

    #[cfg(test)]
    pub fn plist_path(&self) -> &Path { &self.plist }

    #[cfg(test)]
    pub fn is_installed(&self) -> bool { self.plist.exists() }

    /// Installs or removes the agent. Both directions are idempotent.
    pub fn set_enabled(&self, enabled: bool) -> io::Result<()> {
        if enabled {
            if let Some(dir) = self.plist.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(&self.plist, render_plist(LAUNCHER_BUNDLE_ID, &self.program))?;
            info!(path = %self.plist.display(), "installed login item");
        } else {
            match fs::remove_file(&self.plist) {
                Ok(()) => info!(path = %self.plist.display(), "removed login item"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("login item already absent");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn render_plist(label: &str, program: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <false/>
</dict>
</plist>
"#,
        xml_escape(label),
        xml_escape(&program.to_string_lossy()),
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plist_runs_the_program_at_load() {
        let text = render_plist("foundation.dwarves.blurred.launcher", Path::new("/Apps/B&W/blurred"));
        assert!(text.contains("<string>foundation.dwarves.blurred.launcher</string>"));
        assert!(text.contains("<string>/Apps/B&amp;W/blurred</string>"));
        assert!(text.contains("<key>RunAtLoad</key>\n    <true/>"));
    }

    #[test]
    fn enabling_and_disabling_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let item = LoginItem::new(
            dir.path().join("LaunchAgents").join("agent.plist"),
            "/usr/local/bin/blurred",
        );
        assert!(!item.is_installed());

        item.set_enabled(true).unwrap();
        item.set_enabled(true).unwrap();
        assert!(item.is_installed());
        let text = fs::read_to_string(item.plist_path()).unwrap();
        assert!(text.contains("/usr/local/bin/blurred"));

        item.set_enabled(false).unwrap();
        item.set_enabled(false).unwrap();
        assert!(!item.is_installed());
    }
}
