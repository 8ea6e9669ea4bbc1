use crate::events::StreamKind;
use crate::types::OutputBlob;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum Message {
    Subscribe {
        kind: StreamKind,
        subscriber: mpsc::UnboundedSender<OutputBlob>,
    },
}
