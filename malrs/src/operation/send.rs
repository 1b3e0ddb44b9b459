//! The Send pattern: one outbound emission, no reply.

use std::sync::Arc;

use malrs_core::{InteractionType, ServiceKey, Uri, stage};

use crate::error::MalResult;
use crate::operation::{OperationContext, OperationCore, OperationStatus, common_operation_api};

/// One-way interaction. Never receives, so it is not registered in the
/// context's demultiplexer.
pub struct SendOperation {
    core: OperationCore,
}

impl SendOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::unqueued(ictx, uri_to, key, InteractionType::Send),
        }
    }

    common_operation_api!();

    /// Emit the message. The operation is final afterwards, whether or
    /// not the transport accepted it.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Created`, or the transport's synchronous failure.
    pub fn send(&mut self, body: &[u8]) -> MalResult<()> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::Initiated;

        let msg = self.core.new_message(stage::SEND, body);
        let result = self.core.ictx.send(msg);
        self.core.status = OperationStatus::Final;
        result
    }
}
