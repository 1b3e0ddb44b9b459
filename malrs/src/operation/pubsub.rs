//! The Pub/Sub pattern, both halves: the consumer (subscriber) and the
//! producer (publisher) side of a brokered interaction.

use std::sync::Arc;

use malrs_core::{InteractionType, Message, ServiceKey, Uri, stage};

use crate::error::{MalError, MalResult};
use crate::operation::{OperationContext, OperationCore, OperationStatus, common_operation_api};

/// Pub/Sub consumer: registers with a broker, receives notifications,
/// deregisters.
pub struct SubscriberOperation {
    core: OperationCore,
}

impl SubscriberOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::queued(ictx, uri_to, key, InteractionType::PubSub),
        }
    }

    common_operation_api!();

    /// Register with the broker and wait for the acknowledgement. On
    /// success the operation is `Registered`.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Created`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not a REGISTER_ACK;
    /// [`MalError::Application`](crate::error::MalError::Application)
    /// when the broker refused the registration.
    pub async fn register(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::RegisterInitiated;

        let msg = self.core.new_message(stage::PUBSUB_REGISTER, body);
        if let Err(error) = self.core.register() {
            self.core.finalize();
            return Err(error);
        }
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::PUBSUB_REGISTER_ACK {
            return Err(self.core.bad_stage(&reply));
        }
        if reply.is_error_message {
            self.core.finalize();
            return Err(MalError::Application(reply));
        }
        self.core.status = OperationStatus::Registered;
        Ok(reply)
    }

    /// Wait for the next notification.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Registered`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// message that is not a NOTIFY;
    /// [`MalError::Application`](crate::error::MalError::Application) on
    /// an error notification.
    pub async fn get_notify(&mut self) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Registered])?;

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::PUBSUB_NOTIFY {
            return Err(self.core.bad_stage(&reply));
        }
        if reply.is_error_message {
            self.core.finalize();
            return Err(MalError::Application(reply));
        }
        Ok(reply)
    }

    /// Deregister from the broker and wait for the acknowledgement,
    /// silently draining notifications still in flight. The operation is
    /// final on return.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Registered`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is neither a NOTIFY nor a DEREGISTER_ACK;
    /// [`MalError::Application`](crate::error::MalError::Application) on
    /// an error acknowledgement.
    pub async fn deregister(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Registered])?;
        self.core.status = OperationStatus::DeregisterInitiated;

        let msg = self.core.new_message(stage::PUBSUB_DEREGISTER, body);
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        loop {
            let reply = self.core.next().await?;
            if reply.interaction_stage == stage::PUBSUB_NOTIFY {
                // Stale notification racing the deregistration.
                tracing::debug!(
                    tid = self.core.tid(),
                    "draining notify while deregistering"
                );
                continue;
            }
            if reply.interaction_stage != stage::PUBSUB_DEREGISTER_ACK {
                return Err(self.core.bad_stage(&reply));
            }
            self.core.finalize();
            return self.core.into_reply(reply);
        }
    }
}

/// Pub/Sub producer: registers with a broker, publishes, deregisters.
pub struct PublisherOperation {
    core: OperationCore,
}

impl PublisherOperation {
    pub(crate) fn new(ictx: Arc<OperationContext>, uri_to: Uri, key: ServiceKey) -> Self {
        Self {
            core: OperationCore::queued(ictx, uri_to, key, InteractionType::PubSub),
        }
    }

    common_operation_api!();

    /// Register as a publisher and wait for the acknowledgement. On
    /// success the operation is `Registered`.
    ///
    /// # Errors
    ///
    /// As [`SubscriberOperation::register`], with
    /// PUBLISH_REGISTER / PUBLISH_REGISTER_ACK as the stage pair.
    pub async fn register(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Created])?;
        self.core.status = OperationStatus::RegisterInitiated;

        let msg = self.core.new_message(stage::PUBSUB_PUBLISH_REGISTER, body);
        if let Err(error) = self.core.register() {
            self.core.finalize();
            return Err(error);
        }
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::PUBSUB_PUBLISH_REGISTER_ACK {
            return Err(self.core.bad_stage(&reply));
        }
        if reply.is_error_message {
            self.core.finalize();
            return Err(MalError::Application(reply));
        }
        self.core.status = OperationStatus::Registered;
        Ok(reply)
    }

    /// Emit one publication. Never waits: publications are not
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Registered`, or the transport's synchronous failure (which
    /// finalizes the operation).
    pub fn publish(&mut self, body: &[u8]) -> MalResult<()> {
        self.core.check(&[OperationStatus::Registered])?;

        let msg = self.core.new_message(stage::PUBSUB_PUBLISH, body);
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }
        Ok(())
    }

    /// Deregister as a publisher and wait for the acknowledgement. The
    /// operation is final on return.
    ///
    /// # Errors
    ///
    /// [`MalError::BadStatus`](crate::error::MalError::BadStatus) outside
    /// `Registered`;
    /// [`MalError::BadStage`](crate::error::MalError::BadStage) on a
    /// reply that is not a PUBLISH_DEREGISTER_ACK;
    /// [`MalError::Application`](crate::error::MalError::Application) on
    /// an error acknowledgement.
    pub async fn deregister(&mut self, body: &[u8]) -> MalResult<Message> {
        self.core.check(&[OperationStatus::Registered])?;
        self.core.status = OperationStatus::DeregisterInitiated;

        let msg = self.core.new_message(stage::PUBSUB_PUBLISH_DEREGISTER, body);
        if let Err(error) = self.core.ictx.send(msg) {
            self.core.finalize();
            return Err(error);
        }

        let reply = self.core.next().await?;
        if reply.interaction_stage != stage::PUBSUB_PUBLISH_DEREGISTER_ACK {
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
    use crate::transport::LoopbackTransport;

    #[tokio::test]
    async fn test_publish_before_register_rejected() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let ictx = OperationContext::new(&ctx, "producer").expect("endpoint");
        let mut op = ictx.publisher_operation(
            Uri::new("malloop://node-a/broker"),
            ServiceKey::new(1, 1, 1, 1),
        );

        assert!(matches!(
            op.publish(&[0x01]),
            Err(MalError::BadStatus {
                status: OperationStatus::Created
            })
        ));
    }

    #[tokio::test]
    async fn test_notify_and_deregister_require_registered() {
        let ctx = Context::new(LoopbackTransport::new("node-a"));
        let ictx = OperationContext::new(&ctx, "consumer").expect("endpoint");
        let mut op = ictx.subscriber_operation(
            Uri::new("malloop://node-a/broker"),
            ServiceKey::new(1, 1, 1, 1),
        );

        assert!(matches!(
            op.get_notify().await,
            Err(MalError::BadStatus { .. })
        ));
        assert!(matches!(
            op.deregister(&[]).await,
            Err(MalError::BadStatus { .. })
        ));
    }
}
