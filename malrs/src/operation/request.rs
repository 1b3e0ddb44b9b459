//! The Request pattern: emission answered by a single REQUEST_RESPONSE.

use std::sync::Arc;

use malrs_core::{InteractionType, Message, ServiceKey, Uri, stage};

use crate::error::MalResult;
use crate::operation::{OperationContext, OperationCore, OperationStatus, common_operation_api};

/// Request interaction: one emission, one response.
pub struct RequestOperation {
    core: OperationCore,
}

impl RequestOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::queued(ictx, uri_to, key, InteractionType::Request),
        }
    }

    common_operation_api!();

    /// Emit the request and wait for its response. The operation is
    /// final on return.
    ///
    /// # Errors
    ///
    /// As [`SubmitOperation::submit`](crate::operation::SubmitOperation::submit),
    /// with REQUEST_RESPONSE as the expected stage.
    pub async fn request(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::Initiated;

        let msg = self.core.new_message(stage::REQUEST, body);
        if let Err(error) = self.core.register() {
            self.core.finalize();
            return Err(error);
        }
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::REQUEST_RESPONSE {
            return Err(self.core.bad_stage(&reply));
        }
        self.core.finalize();
        self.core.into_reply(reply)
    }
}
