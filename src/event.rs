use crate::{ids::GuildId, store::GuildRecord};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};

/// Events a subscriber may fall behind by before the oldest are dropped.
pub const EVENT_CAPACITY: usize = 128;

#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn send(&self, event: Event) {
        // Nobody listening is fine, e.g. before the store task starts
        if let Err(e) = self.tx.send(event) {
            trace!("Event without subscribers: {:?}", e.0);
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscriber {
    rx: Receiver<Event>,
}

impl Subscriber {
    pub fn new(rx: Receiver<Event>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    /// Next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => break Some(event),
                Err(RecvError::Closed) => break None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        "EventBus::Subscriber lagging behind senders, skipping {skipped} messages"
                    );
                }
            }
        }
    }
}

/// Guild configuration mutations, reported outward for persistence.
#[derive(Clone, Debug, PartialEq)]
pub enum GuildAction {
    Upserted(GuildRecord),
    Removed(GuildId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Started(GuildId),
    Stopped(GuildId),
    UtteranceFailed { guild: GuildId, reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Guild(GuildAction),
    Session(SessionEvent),
}

pub fn debug(bus: &EventBus) {
    let bus = bus.clone();
    tokio::spawn(async move {
        let mut bus = bus.subscribe();
        while let Some(event) = bus.recv().await {
            debug!("Received event: {:?}", event);
        }
    });
}
