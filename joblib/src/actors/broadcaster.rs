mod actor;
mod messages;
use crate::events::{Output, StreamKind};
use crate::types::OutputBlob;
use actor::Actor;
use messages::Message;

use tokio::sync::mpsc::{self, UnboundedReceiver};

/// A `Broadcaster` which can add subscribers, receive output, and broadcast the output to all subscribers.
///
/// This struct is actually an actor handle. The real work is done in the actor spawned by `BroadcasterHandle::spawn`.
#[derive(Clone)]
pub struct BroadcasterHandle {
    sender: mpsc::UnboundedSender<Message>,
}

impl BroadcasterHandle {
    pub fn spawn(output_rx: UnboundedReceiver<Output>) -> Self {
        let (sender, inbox) = mpsc::unbounded_channel();
        Actor::spawn(inbox, output_rx);
        Self { sender }
    }

    /// Subscribe to a stream. The receiver replays past output first, and closes once the job's output ends.
    pub fn subscribe(&self, kind: StreamKind) -> UnboundedReceiver<OutputBlob> {
        let (subscriber, rx) = mpsc::unbounded_channel();
        let _ = self.sender.send(Message::Subscribe { kind, subscriber });
        rx
    }
}
