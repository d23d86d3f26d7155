use std::path::PathBuf;

use anyhow::Context;
use blurred::actor::config_watcher::ConfigWatcher;
use blurred::actor::dimmer::{self, Dimmer};
use blurred::actor::dimmer::overlay_manager::{MacSystem, OverlayManager};
use blurred::actor::menu_bar::{self, Menu};
use blurred::actor::notification_center::NotificationCenter;
use blurred::actor;
use blurred::common::config::{Settings, TomlSettingsStore};
use blurred::common::log::init_logging;
use blurred::sys::event::MouseMonitor;
use blurred::sys::executor::Executor;
use blurred::sys::hotkey::HotkeyManager;
use blurred::sys::launcher::post_kill_launcher;
use blurred::sys::login_item::LoginItem;
use clap::{Parser, Subcommand};
use objc2::MainThreadMarker;
use objc2_app_kit::{NSApplication, NSApplicationActivationPolicy};
use tracing::{info, warn};

embed_plist::embed_info_plist!("../../assets/Info.plist");

#[derive(Parser)]
#[command(version, about = "Dims every window except the one you are working in")]
struct Cli {
    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the menu bar app (default).
    Run,
    /// Print the effective settings as JSON.
    Settings,
    /// Overwrite the settings file with defaults.
    Reset,
}

fn main() -> anyhow::Result<()> {
    sigpipe::reset();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let path = match cli.settings {
        Some(path) => path,
        None => TomlSettingsStore::default_path().context("locating the settings file")?,
    };
    let mut settings = Settings::load(TomlSettingsStore::new(&path));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings),
        Command::Settings => {
            let json = serde_json::to_string_pretty(settings.values())
                .context("serializing settings")?;
            println!("{json}");
            Ok(())
        }
        Command::Reset => {
            let changes = settings.reset();
            settings.save().with_context(|| format!("writing {}", path.display()))?;
            info!(?changes, path = %path.display(), "settings reset");
            Ok(())
        }
    }
}

fn run(settings: Settings) -> anyhow::Result<()> {
    let mtm = MainThreadMarker::new().context("blurred must be started on the main thread")?;
    let app = NSApplication::sharedApplication(mtm);
    app.setActivationPolicy(NSApplicationActivationPolicy::Accessory);
    post_kill_launcher();

    let (dimmer_tx, dimmer_rx) = actor::channel::<dimmer::Event>();
    let (menu_tx, menu_rx) = actor::channel::<menu_bar::Event>();

    let mouse_tx = dimmer_tx.clone();
    let _mouse = MouseMonitor::new(move || mouse_tx.send(dimmer::Event::MouseClicked));

    let hotkey_tx = dimmer_tx.clone();
    let hotkeys = HotkeyManager::new(move || hotkey_tx.send(dimmer::Event::HotkeyPressed));

    let _watcher = match settings.path() {
        Some(path) => ConfigWatcher::spawn(path, dimmer_tx.clone())
            .inspect_err(|err| warn!(%err, "live reload disabled"))
            .ok(),
        None => None,
    };

    let menu = Menu::new(mtm, menu_rx, dimmer_tx.clone(), settings.values());
    let notification_center = NotificationCenter::new(mtm, dimmer_tx);

    let mut dimmer = Dimmer::new(settings, OverlayManager::new(MacSystem::new(mtm)), dimmer_rx)
        .with_hotkeys(hotkeys)
        .with_menu(menu_tx);
    match LoginItem::for_current_user() {
        Ok(login_item) => dimmer = dimmer.with_login_item(login_item),
        Err(err) => warn!(%err, "auto start at login unavailable"),
    }

    info!("blurred started");
    Executor::run_main(mtm, async move {
        tokio::join!(
            dimmer.run(),
            menu.run(),
            notification_center.watch_for_notifications(),
        );
    });
    Ok(())
}
