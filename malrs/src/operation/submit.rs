//! The Submit pattern: emission acknowledged by a single SUBMIT_ACK.

use std::sync::Arc;

use malrs_core::{InteractionType, Message, ServiceKey, Uri, stage};

use crate::error::MalResult;
use crate::operation::{OperationContext, OperationCore, OperationStatus, common_operation_api};

/// Submit interaction: one emission, one acknowledgement.
pub struct SubmitOperation {
    core: OperationCore,
}

impl SubmitOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::queued(ictx, uri_to, key, InteractionType::Submit),
        }
    }

    common_operation_api!();

    /// Emit the submission and wait for its acknowledgement. The
    /// operation is final on return.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Created`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not a SUBMIT_ACK;
    /// [`MalError::Application`](crate::error::MalError::Application)
    /// carrying the reply when the responder answered with an error.
    pub async fn submit(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::Initiated;

        let msg = self.core.new_message(stage::SUBMIT, body);
        if let Err(error) = self.core.register() {
            self.core.finalize();
            return Err(error);
        }
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::SUBMIT_ACK {
            return Err(self.core.bad_stage(&reply));
        }
        self.core.finalize();
        self.core.into_reply(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::MalError;
    use crate::transport::LoopbackTransport;

    #[tokio::test]
    async fn test_submit_requires_created() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let ictx = OperationContext::new(&ctx, "consumer").expect("endpoint");
        let mut op = ictx.submit_operation(
            Uri::new("malloop://node-a/provider"),
            ServiceKey::new(1, 1, 1, 1),
        );

        op.close();
        assert!(matches!(
            op.submit(&[]).await,
            Err(MalError::BadStatus {
                status: OperationStatus::Closed
            })
        ));
    }

    #[tokio::test]
    async fn test_submit_unblocks_when_context_closes() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let ictx = OperationContext::new(&ctx, "consumer").expect("endpoint");
        let mut op = ictx.submit_operation(
            // Nothing listens here; the ack never comes.
            Uri::new("malloop://node-a/provider"),
            ServiceKey::new(1, 1, 1, 1),
        );

        let closer = Arc::clone(&ictx);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            closer.close().expect("close endpoint");
        });

        assert!(matches!(
            op.submit(&[0x01]).await,
            Err(MalError::OperationEnded)
        ));
        assert_eq!(op.status(), OperationStatus::Final);
        handle.await.expect("join");
    }
}
