//! Actors own a piece of state and are driven by messages on a queue.
//!
//! Every actor runs on the main thread executor and is the single consumer of
//! its queue. Senders may live on any thread. Each message carries the span
//! that was current when it was sent, so the receiver can enter it and keep
//! the trace tree connected across the queue.

use tokio::sync::mpsc;
use tracing::Span;

pub mod config_watcher;
pub mod dimmer;
pub mod menu_bar;
pub mod notification_center;

pub struct Sender<Event>(mpsc::UnboundedSender<(Span, Event)>);

pub struct Receiver<Event>(mpsc::UnboundedReceiver<(Span, Event)>);

pub type SendError<Event> = mpsc::error::SendError<(Span, Event)>;

pub fn channel<Event>() -> (Sender<Event>, Receiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sender(tx), Receiver(rx))
}

impl<Event> Sender<Event> {
    /// Queues an event, dropping it silently if the actor has shut down.
    pub fn send(&self, event: Event) { _ = self.try_send(event); }

    pub fn try_send(&self, event: Event) -> Result<(), SendError<Event>> {
        self.0.send((Span::current(), event))
    }

    pub fn is_closed(&self) -> bool { self.0.is_closed() }
}

impl<Event> Clone for Sender<Event> {
    fn clone(&self) -> Self { Sender(self.0.clone()) }
}

impl<Event> std::fmt::Debug for Sender<Event> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").field("closed", &self.0.is_closed()).finish()
    }
}

impl<Event> Receiver<Event> {
    pub async fn recv(&mut self) -> Option<(Span, Event)> { self.0.recv().await }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<(Span, Event)> { self.0.try_recv().ok() }
}
