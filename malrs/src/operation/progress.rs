//! The Progress pattern: acknowledged emission, streamed updates, final
//! response.

use std::sync::Arc;

use malrs_core::{InteractionType, Message, ServiceKey, Uri, stage};

use crate::error::{MalError, MalResult};
use crate::operation::{OperationContext, OperationCore, OperationStatus, common_operation_api};

/// Progress interaction: one emission, an acknowledgement, any number of
/// updates, then a final response.
pub struct ProgressOperation {
    core: OperationCore,
    response: Option<Message>,
}

impl ProgressOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::queued(ictx, uri_to, key, InteractionType::Progress),
            response: None,
        }
    }

    common_operation_api!();

    /// Emit the request and wait for its acknowledgement. On success the
    /// operation is `Acknowledged` and updates can be pulled with
    /// [`get_update`](Self::get_update).
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Created`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not a PROGRESS_ACK;
    /// [`MalError::Application`](crate::error::MalError::Application)
    /// when the responder refused the request.
    pub async fn progress(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::Initiated;

        let msg = self.core.new_message(stage::PROGRESS, body);
        if let Err(error) = self.core.register() {
            self.core.finalize();
            return Err(error);
        }
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::PROGRESS_ACK {
            return Err(self.core.bad_stage(&reply));
        }
        if reply.is_error_message {
            self.core.finalize();
            return Err(MalError::Application(reply));
        }
        self.core.status = OperationStatus::Acknowledged;
        Ok(reply)
    }

    /// Wait for the next update. Returns `None` when the final response
    /// arrives instead; the response is cached for
    /// [`get_response`](Self::get_response) and the operation is final.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Acknowledged`/`Progressing`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on any
    /// other stage;
    /// [`MalError::Application`](crate::error::MalError::Application) on
    /// an error update.
    pub async fn get_update(&mut self) -> MalResult<Option<Message>> {
        self.core.check(&[
            OperationStatus::Acknowledged,
            OperationStatus::Progressing,
        ])?;

        let reply = self.core.next().await?;
        match reply.interaction_stage {
            stage::PROGRESS_UPDATE => {
                self.core.status = OperationStatus::Progressing;
                if reply.is_error_message {
                    self.core.finalize();
                    return Err(MalError::Application(reply));
                }
                Ok(Some(reply))
            }
            stage::PROGRESS_RESPONSE => {
                self.response = Some(reply);
                self.core.finalize();
                Ok(None)
            }
            _ => Err(self.core.bad_stage(&reply)),
        }
    }

    /// Wait for the final response, skipping no updates: an update
    /// arriving here is a protocol error. Once the operation is final the
    /// cached response is returned again.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Acknowledged`/`Progressing` with no cached response;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not a PROGRESS_RESPONSE;
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
        self.core.check(&[
            OperationStatus::Acknowledged,
            OperationStatus::Progressing,
        ])?;

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::PROGRESS_RESPONSE {
            return Err(self.core.bad_stage(&reply));
        }
        self.core.finalize();
        self.response = Some(reply.clone());
        self.core.into_reply(reply)
    }
}
