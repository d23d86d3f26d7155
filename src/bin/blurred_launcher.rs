use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use blurred::common::log::init_logging;
use blurred::sys::app::is_running;
use blurred::sys::launcher::{KillWatcher, MAIN_BUNDLE_ID, main_app_path};
use objc2::MainThreadMarker;
use objc2_app_kit::{NSApplication, NSApplicationActivationPolicy};
use tracing::{info, warn};

/// The main executable for a launcher at `exe`: inside the app bundle when
/// the launcher is bundled, otherwise the sibling `blurred` binary.
fn main_executable(exe: &Path) -> Option<PathBuf> {
    let bundle = exe.ancestors().nth(3)?;
    if bundle.extension().is_some_and(|ext| ext == "app") {
        main_app_path(bundle)
    } else {
        Some(exe.with_file_name("blurred"))
    }
}

fn main() -> anyhow::Result<()> {
    sigpipe::reset();
    init_logging(false);

    if is_running(MAIN_BUNDLE_ID) {
        info!("main app already running");
        return Ok(());
    }

    let mtm = MainThreadMarker::new().context("launcher must run on the main thread")?;
    let app = NSApplication::sharedApplication(mtm);
    app.setActivationPolicy(NSApplicationActivationPolicy::Prohibited);
    let _watcher = KillWatcher::new(mtm, move || {
        NSApplication::sharedApplication(mtm).terminate(None);
    });

    let exe = std::env::current_exe().context("locating the launcher")?;
    let main = main_executable(&exe)
        .with_context(|| format!("no main app next to {}", exe.display()))?;
    match Command::new(&main).spawn() {
        Ok(child) => info!(pid = child.id(), path = %main.display(), "started main app"),
        Err(err) => {
            warn!(%err, path = %main.display(), "failed to start main app");
            return Err(err).context("starting the main app");
        }
    }

    app.run();
    Ok(())
}
