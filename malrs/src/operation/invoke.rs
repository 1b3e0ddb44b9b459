//! The Invoke pattern: emission acknowledged, then answered.

use std::sync::Arc;

use malrs_core::{InteractionType, Message, ServiceKey, Uri, stage};

use crate::error::{MalError, MalResult};
use crate::operation::{OperationContext, OperationCore, OperationStatus, common_operation_api};

/// Invoke interaction: one emission, an acknowledgement, then a final
/// response fetched separately.
pub struct InvokeOperation {
    core: OperationCore,
    response: Option<Message>,
}

impl InvokeOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::queued(ictx, uri_to, key, InteractionType::Invoke),
            response: None,
        }
    }

    common_operation_api!();

    /// Emit the invocation and wait for its acknowledgement. On success
    /// the operation is `Acknowledged` and the response can be fetched
    /// with [`get_response`](Self::get_response).
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Created`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not an INVOKE_ACK (the operation finalizes);
    /// [`MalError::Application`](crate::error::MalError::Application)
    /// when the responder refused the invocation (the operation
    /// finalizes).
    pub async fn invoke(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::Initiated;

        let msg = self.core.new_message(stage::INVOKE, body);
        if let Err(error) = self.core.register() {
            self.core.finalize();
            return Err(error);
        }
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::INVOKE_ACK {
            return Err(self.core.bad_stage(&reply));
        }
        if reply.is_error_message {
            self.core.finalize();
            return Err(MalError::Application(reply));
        }
        self.core.status = OperationStatus::Acknowledged;
        Ok(reply)
    }

    /// Wait for the final response. Legal in `Acknowledged`; once the
    /// operation is final the cached response is returned again.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Acknowledged` with no cached response;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not an INVOKE_RESPONSE;
    /// [`MalError::Application`](crate::error::MalError::Application)
    /// when the response is an error reply.
    pub async fn get_response(&mut self) -> MalResult<Message> {
        if self.core.status() == OperationStatus::Final
            && let Some(response) = &self.response
        {
            return if response.is_error_message {
                Err(MalError::Application(response.clone()))
            } else {
                Ok(response.clone())
            };
        }
        self.core.check(&[OperationStatus::Acknowledged])?;

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::INVOKE_RESPONSE {
            return Err(self.core.bad_stage(&reply));
        }
        self.core.finalize();
        self.response = Some(reply.clone());
        self.core.into_reply(reply)
    }
}
