use crate::error;
use tokio::sync::oneshot;

#[derive(Debug)]
pub enum WorkerMessage {
    Stop {
        response: oneshot::Sender<error::Result<()>>,
    },
}
