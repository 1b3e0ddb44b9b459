//! Responder-side transactions: short-lived reply handles.
//!
//! A transaction is built from one inbound message and gives the handler
//! exactly the reply operations its interaction pattern permits. Each
//! reply is a fully addressed message sent back through the owning
//! context; `error` replies carry the pattern's terminal reply stage with
//! the error flag set.

use std::sync::Arc;

use malrs_core::{InteractionType, Message, ServiceKey, Uri, now_millis, stage};

use crate::context::Context;
use crate::error::{MalError, MalResult};

/// Reply routing shared by every transaction variant.
#[derive(Clone)]
struct ReplyRoute {
    ctx: Arc<Context>,
    /// This responder endpoint.
    uri: Uri,
    /// The initiator the replies go to.
    uri_to: Uri,
    tid: u64,
    key: ServiceKey,
    interaction_type: InteractionType,
}

impl ReplyRoute {
    fn reply(&self, interaction_stage: u8, is_error: bool, body: &[u8]) -> MalResult<()> {
        self.ctx.send(Message {
            uri_from: self.uri.clone(),
            uri_to: self.uri_to.clone(),
            timestamp: now_millis(),
            interaction_type: self.interaction_type,
            interaction_stage,
            transaction_id: self.tid,
            service_area: self.key.area,
            area_version: self.key.area_version,
            service: self.key.service,
            operation: self.key.operation,
            is_error_message: is_error,
            body: body.to_vec(),
            ..Message::default()
        })
    }
}

macro_rules! transaction_accessors {
    () => {
        /// The transaction id of the interaction being served.
        pub fn transaction_id(&self) -> u64 {
            self.route.tid
        }

        /// URI of the initiating endpoint.
        pub fn initiator(&self) -> &Uri {
            &self.route.uri_to
        }

        /// Service coordinates of the interaction.
        pub fn service_key(&self) -> ServiceKey {
            self.route.key
        }
    };
}

/// Handle for a Send interaction. Send has no reply operations; the
/// handle only carries the interaction's coordinates.
pub struct SendTransaction {
    route: ReplyRoute,
}

impl SendTransaction {
    transaction_accessors!();
}

/// Handle for a Submit interaction.
pub struct SubmitTransaction {
    route: ReplyRoute,
}

impl SubmitTransaction {
    transaction_accessors!();

    /// Acknowledge the submission.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn ack(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::SUBMIT_ACK, false, body)
    }

    /// Refuse the submission with an application error payload.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn error(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::SUBMIT_ACK, true, body)
    }
}

/// Handle for a Request interaction.
pub struct RequestTransaction {
    route: ReplyRoute,
}

impl RequestTransaction {
    transaction_accessors!();

    /// Answer the request.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn reply(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::REQUEST_RESPONSE, false, body)
    }

    /// Answer the request with an application error payload.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn error(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::REQUEST_RESPONSE, true, body)
    }
}

/// Handle for an Invoke interaction.
pub struct InvokeTransaction {
    route: ReplyRoute,
}

impl InvokeTransaction {
    transaction_accessors!();

    /// Acknowledge the invocation.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn ack(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::INVOKE_ACK, false, body)
    }

    /// Send the final response.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn reply(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::INVOKE_RESPONSE, false, body)
    }

    /// Send an error response with an application error payload.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn error(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::INVOKE_RESPONSE, true, body)
    }
}

/// Handle for a Progress interaction.
pub struct ProgressTransaction {
    route: ReplyRoute,
}

impl ProgressTransaction {
    transaction_accessors!();

    /// Acknowledge the request.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn ack(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PROGRESS_ACK, false, body)
    }

    /// Send one intermediate update.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn update(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PROGRESS_UPDATE, false, body)
    }

    /// Send the final response, ending the stream.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn reply(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PROGRESS_RESPONSE, false, body)
    }

    /// Send an error response with an application error payload.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn error(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PROGRESS_RESPONSE, true, body)
    }
}

/// Handle for the producer half of a Pub/Sub interaction: built for
/// PUBLISH_REGISTER, PUBLISH and PUBLISH_DEREGISTER messages.
pub struct PublisherTransaction {
    route: ReplyRoute,
}

impl PublisherTransaction {
    transaction_accessors!();

    /// Acknowledge a publisher registration.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn register_ack(&self, body: &[u8]) -> MalResult<()> {
        self.route
            .reply(stage::PUBSUB_PUBLISH_REGISTER_ACK, false, body)
    }

    /// Acknowledge a publisher deregistration.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn deregister_ack(&self, body: &[u8]) -> MalResult<()> {
        self.route
            .reply(stage::PUBSUB_PUBLISH_DEREGISTER_ACK, false, body)
    }

    /// Refuse the publisher with an application error payload.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn error(&self, body: &[u8]) -> MalResult<()> {
        self.route
            .reply(stage::PUBSUB_PUBLISH_REGISTER_ACK, true, body)
    }
}

/// Handle for the consumer half of a Pub/Sub interaction: built for
/// REGISTER and DEREGISTER messages, and used afterwards to notify the
/// subscriber.
pub struct SubscriberTransaction {
    route: ReplyRoute,
}

impl SubscriberTransaction {
    transaction_accessors!();

    /// Acknowledge a subscriber registration.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn register_ack(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PUBSUB_REGISTER_ACK, false, body)
    }

    /// Deliver one notification to the subscriber.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn notify(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PUBSUB_NOTIFY, false, body)
    }

    /// Acknowledge a subscriber deregistration.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn deregister_ack(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PUBSUB_DEREGISTER_ACK, false, body)
    }

    /// Refuse the subscriber with an application error payload.
    ///
    /// # Errors
    ///
    /// Propagates the transport's synchronous outcome.
    pub fn error(&self, body: &[u8]) -> MalResult<()> {
        self.route.reply(stage::PUBSUB_REGISTER_ACK, true, body)
    }
}

/// Tagged union over the seven transaction variants, matched by handlers
/// to reach the pattern-specific reply operations.
pub enum Transaction {
    /// Send interaction (no replies).
    Send(SendTransaction),
    /// Submit interaction.
    Submit(SubmitTransaction),
    /// Request interaction.
    Request(RequestTransaction),
    /// Invoke interaction.
    Invoke(InvokeTransaction),
    /// Progress interaction.
    Progress(ProgressTransaction),
    /// Pub/Sub producer half.
    Publisher(PublisherTransaction),
    /// Pub/Sub consumer half.
    Subscriber(SubscriberTransaction),
}

impl Transaction {
    /// Build the transaction matching an inbound message. For Pub/Sub the
    /// variant is chosen by stage: publisher stages yield
    /// [`Transaction::Publisher`], subscriber stages
    /// [`Transaction::Subscriber`].
    ///
    /// # Errors
    ///
    /// Returns [`MalError::BadStage`] for a PUBSUB stage that belongs to
    /// neither half.
    pub(crate) fn for_message(
        ctx: Arc<Context>,
        local_uri: Uri,
        msg: &Message,
    ) -> MalResult<Self> {
        let route = ReplyRoute {
            ctx,
            uri: local_uri,
            uri_to: msg.uri_from.clone(),
            tid: msg.transaction_id,
            key: msg.service_key(),
            interaction_type: msg.interaction_type,
        };
        let transaction = match msg.interaction_type {
            InteractionType::Send => Self::Send(SendTransaction { route }),
            InteractionType::Submit => Self::Submit(SubmitTransaction { route }),
            InteractionType::Request => Self::Request(RequestTransaction { route }),
            InteractionType::Invoke => Self::Invoke(InvokeTransaction { route }),
            InteractionType::Progress => Self::Progress(ProgressTransaction { route }),
            InteractionType::PubSub => match msg.interaction_stage {
                stage::PUBSUB_PUBLISH_REGISTER
                | stage::PUBSUB_PUBLISH
                | stage::PUBSUB_PUBLISH_DEREGISTER => {
                    Self::Publisher(PublisherTransaction { route })
                }
                stage::PUBSUB_REGISTER | stage::PUBSUB_DEREGISTER => {
                    Self::Subscriber(SubscriberTransaction { route })
                }
                other => return Err(MalError::BadStage { stage: other }),
            },
        };
        Ok(transaction)
    }
}
