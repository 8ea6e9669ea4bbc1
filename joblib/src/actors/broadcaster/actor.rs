use super::messages::Message;
use crate::events::{Output, StreamKind};
use crate::types::OutputBlob;

use tokio::select;
use tokio::sync::mpsc;
use tracing::trace;

pub struct Actor {
    inbox: mpsc::UnboundedReceiver<Message>,
    output_rx: mpsc::UnboundedReceiver<Output>,
    output_buffer: Vec<Output>,
    stdout_subscribers: Vec<mpsc::UnboundedSender<OutputBlob>>,
    stderr_subscribers: Vec<mpsc::UnboundedSender<OutputBlob>>,
    output_pending: bool,
}

impl Actor {
    pub fn spawn(
        inbox: mpsc::UnboundedReceiver<Message>,
        output_rx: mpsc::UnboundedReceiver<Output>,
    ) {
        let actor = Actor {
            inbox,
            output_rx,
            output_buffer: Vec::new(),
            stdout_subscribers: Vec::new(),
            stderr_subscribers: Vec::new(),
            output_pending: true,
        };
        tokio::spawn(async move { actor.run().await });
    }

    async fn run(mut self) {
        loop {
            select! {
                Some(msg) = self.inbox.recv() => {
                    let Message::Subscribe { kind, subscriber } = msg;
                    self.subscribe(kind, subscriber);
                }
                maybe_output = self.output_rx.recv(), if self.output_pending => {
                    match maybe_output {
                        Some(output) => self.publish(output),
                        None => {
                            trace!("job output finished");
                            // dropping the senders closes every subscriber's stream
                            self.stdout_subscribers.clear();
                            self.stderr_subscribers.clear();
                            self.output_pending = false;
                        }
                    }
                }
                else => break,
            }
        }
    }

    fn publish(&mut self, output: Output) {
        self.output_buffer.push(output.clone());
        let (blob, subscribers) = match output {
            Output::Stdout(blob) => (blob, &mut self.stdout_subscribers),
            Output::Stderr(blob) => (blob, &mut self.stderr_subscribers),
        };
        // only retain subscribers who have not dropped
        subscribers.retain(|sub| sub.send(blob.clone()).is_ok());
    }

    fn subscribe(&mut self, kind: StreamKind, subscriber: mpsc::UnboundedSender<OutputBlob>) {
        self.output_buffer
            .iter()
            .filter_map(|output| match (kind, output) {
                (StreamKind::Stdout | StreamKind::All, Output::Stdout(blob)) => Some(blob),
                (StreamKind::Stderr | StreamKind::All, Output::Stderr(blob)) => Some(blob),
                _ => None,
            })
            .for_each(|blob| {
                let _ = subscriber.send(blob.clone());
            });
        if !self.output_pending {
            return;
        }
        match kind {
            StreamKind::Stdout => self.stdout_subscribers.push(subscriber),
            StreamKind::Stderr => self.stderr_subscribers.push(subscriber),
            StreamKind::All => {
                self.stdout_subscribers.push(subscriber.clone());
                self.stderr_subscribers.push(subscriber);
            }
        }
    }
}
