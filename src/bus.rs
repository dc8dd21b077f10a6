use crate::render::DisplayRecord;
use crate::view::View;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum Event {
    /// The whole conversation was (re)rendered, oldest first.
    Rendered(Vec<DisplayRecord>),

    /// A single message was added to the conversation.
    MessageAppended(DisplayRecord),

    /// The agent is working on a reply.
    Typing,

    /// The page layout changed.
    ViewChanged(View),

    /// Informational text under the form (e.g. after a successful submit).
    Notice(String),

    /// Something the user must acknowledge, like a rejected submission.
    Alert(String),

    /// The conversation should scroll to its end.
    ScrollToEnd,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: Event) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}
