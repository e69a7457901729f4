//! Inbound frame handling seam.

use async_trait::async_trait;
use wsgate_core::BoxError;

use crate::connection::ConnectionHandle;
use crate::transport::Frame;

/// Processes inbound data frames for one connection.
///
/// Calls for a single connection are sequential and in arrival order. An
/// error is logged and the connection keeps going. Handlers reply through
/// `connection`'s outbound queue; waiting on a full queue of the same
/// connection stalls its reads for the duration of the wait.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one frame from `connection`.
    async fn handle(&self, connection: &ConnectionHandle, frame: Frame) -> Result<(), BoxError>;
}

/// Writes every frame back to its sender.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, connection: &ConnectionHandle, frame: Frame) -> Result<(), BoxError> {
        connection.try_enqueue(frame)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use wsgate_core::{Identity, SessionInfo};

    #[tokio::test]
    async fn echo_queues_frame() {
        let (handle, mut rx) =
            ConnectionHandle::new(SessionInfo::new(Identity::new()), 2, &CancellationToken::new());
        EchoHandler.handle(&handle, Frame::from("ping")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().frame, Frame::from("ping"));
    }

    #[tokio::test]
    async fn echo_reports_full_queue() {
        let (handle, _rx) =
            ConnectionHandle::new(SessionInfo::new(Identity::new()), 1, &CancellationToken::new());
        EchoHandler.handle(&handle, Frame::from("1")).await.unwrap();
        let err = EchoHandler.handle(&handle, Frame::from("2")).await.unwrap_err();
        assert_eq!(err.to_string(), "outbound queue full");
    }
}
