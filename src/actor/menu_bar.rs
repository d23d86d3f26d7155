use std::time::Duration;

use objc2::MainThreadMarker;
use tracing::trace;

use crate::actor::{self, dimmer};
use crate::common::config::DimSettings;
use crate::sys::timer::Timer;
use crate::ui::menu_bar::MenuIcon;

/// Scrolling produces a burst of level changes; only the last one is drawn.
const DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub enum Event {
    SettingsChanged(DimSettings),
}

pub type Sender = actor::Sender<Event>;
pub type Receiver = actor::Receiver<Event>;

pub struct Menu {
    rx: Receiver,
    icon: MenuIcon,
    shown: Option<DimSettings>,
}

impl Menu {
    pub fn new(
        mtm: MainThreadMarker,
        rx: Receiver,
        events: dimmer::Sender,
        initial: &DimSettings,
    ) -> Self {
        Menu {
            rx,
            icon: MenuIcon::new(mtm, events, initial),
            shown: Some(initial.clone()),
        }
    }

    pub async fn run(mut self) {
        let mut pending: Option<DimSettings> = None;
        let mut timer = Timer::manual();

        loop {
            tokio::select! {
                _ = &mut timer, if pending.is_some() => {
                    if let Some(settings) = pending.take() {
                        self.show(settings);
                    }
                }

                maybe = self.rx.recv() => {
                    let Some((span, Event::SettingsChanged(settings))) = maybe else {
                        if let Some(settings) = pending.take() {
                            self.show(settings);
                        }
                        break;
                    };
                    let _enter = span.enter();
                    pending = Some(settings);
                    timer.set_next_fire(DEBOUNCE);
                }
            }
        }
    }

    fn show(&mut self, settings: DimSettings) {
        if self.shown.as_ref() == Some(&settings) {
            trace!("menu already up to date");
            return;
        }
        self.icon.update(&settings);
        self.shown = Some(settings);
    }
}
