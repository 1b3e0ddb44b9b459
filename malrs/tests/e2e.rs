//! End-to-end interaction tests.
//!
//! Each scenario wires a consumer (operation context) and a provider
//! (handler context) together and drives one interaction pattern through
//! its full state machine: over the in-process loopback transport for the
//! protocol scenarios, and over TCP on 127.0.0.1 for the wire path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use malrs::{
    Context, HandlerContext, LoopbackTransport, MalError, Message, OperationContext,
    OperationStatus, ServiceKey, TcpConfig, TcpTransport, Transaction, stage,
};

const KEY: ServiceKey = ServiceKey::new(1, 1, 1, 1);

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

struct Testbed {
    ctx: Arc<Context>,
    handlers: Arc<HandlerContext>,
    operations: Arc<OperationContext>,
}

/// Consumer and provider endpoints sharing one loopback context.
fn loopback_testbed(name: &str) -> Testbed {
    init_tracing();
    let ctx = Context::new(LoopbackTransport::new(name));
    let handlers = HandlerContext::new(&ctx, "provider").expect("provider endpoint");
    let operations = OperationContext::new(&ctx, "consumer").expect("consumer endpoint");
    Testbed {
        ctx,
        handlers,
        operations,
    }
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("interaction completed within timeout")
}

#[tokio::test]
async fn test_submit_happy_path() {
    let bed = loopback_testbed("submit-happy");
    bed.handlers
        .register_submit_handler(KEY, |_msg, tx| match tx {
            Transaction::Submit(tx) => tx.ack(&[]),
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .submit_operation(bed.handlers.uri().clone(), KEY);
    let ack = within(op.submit(&[0x01])).await.expect("submit acknowledged");

    assert_eq!(ack.interaction_stage, stage::SUBMIT_ACK);
    assert!(!ack.is_error_message);
    assert!(ack.body.is_empty());
    assert_eq!(op.status(), OperationStatus::Final);
}

#[tokio::test]
async fn test_request_response() {
    let bed = loopback_testbed("request-response");
    bed.handlers
        .register_request_handler(KEY, |msg, tx| match tx {
            Transaction::Request(tx) => {
                // Echo the request body back.
                tx.reply(&msg.body)
            }
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .request_operation(bed.handlers.uri().clone(), KEY);
    let response = within(op.request(&[0x42, 0x43])).await.expect("response");

    assert_eq!(response.interaction_stage, stage::REQUEST_RESPONSE);
    assert_eq!(response.body, vec![0x42, 0x43]);
    assert_eq!(op.status(), OperationStatus::Final);
}

#[tokio::test]
async fn test_invoke_with_application_error() {
    let bed = loopback_testbed("invoke-app-error");
    bed.handlers
        .register_invoke_handler(KEY, |_msg, tx| match tx {
            Transaction::Invoke(tx) => {
                tx.ack(&[])?;
                tx.error(&[0xEE])
            }
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .invoke_operation(bed.handlers.uri().clone(), KEY);
    let ack = within(op.invoke(&[])).await.expect("invoke acknowledged");
    assert_eq!(ack.interaction_stage, stage::INVOKE_ACK);
    assert_eq!(op.status(), OperationStatus::Acknowledged);

    match within(op.get_response()).await {
        Err(MalError::Application(reply)) => {
            assert_eq!(reply.interaction_stage, stage::INVOKE_RESPONSE);
            assert!(reply.is_error_message);
            assert_eq!(reply.body, vec![0xEE]);
        }
        other => panic!("expected application error, got {other:?}"),
    }
    assert_eq!(op.status(), OperationStatus::Final);

    // The error response is cached and surfaced again.
    assert!(matches!(
        within(op.get_response()).await,
        Err(MalError::Application(_))
    ));
}

#[tokio::test]
async fn test_progress_stream() {
    let bed = loopback_testbed("progress-stream");
    bed.handlers
        .register_progress_handler(KEY, |_msg, tx| match tx {
            Transaction::Progress(tx) => {
                tx.ack(&[])?;
                tx.update(&[0x10])?;
                tx.update(&[0x11])?;
                tx.update(&[0x12])?;
                tx.reply(&[0xFF])
            }
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .progress_operation(bed.handlers.uri().clone(), KEY);
    let ack = within(op.progress(&[])).await.expect("progress acknowledged");
    assert_eq!(ack.interaction_stage, stage::PROGRESS_ACK);

    for expected in [0x10u8, 0x11, 0x12] {
        let update = within(op.get_update())
            .await
            .expect("update")
            .expect("stream not finished");
        assert_eq!(update.interaction_stage, stage::PROGRESS_UPDATE);
        assert_eq!(update.body, vec![expected]);
        assert_eq!(op.status(), OperationStatus::Progressing);
    }

    // The fourth pull sees the response and ends the stream.
    assert!(within(op.get_update()).await.expect("stream end").is_none());
    assert_eq!(op.status(), OperationStatus::Final);

    let response = within(op.get_response()).await.expect("cached response");
    assert_eq!(response.interaction_stage, stage::PROGRESS_RESPONSE);
    assert_eq!(response.body, vec![0xFF]);
}

#[tokio::test]
async fn test_subscriber_drains_stale_notifies_on_deregister() {
    let bed = loopback_testbed("subscriber-drain");
    bed.handlers
        .register_broker_handler(KEY, |msg, tx| match tx {
            Transaction::Subscriber(tx) => match msg.interaction_stage {
                stage::PUBSUB_REGISTER => {
                    tx.register_ack(&[])?;
                    // Three notifications race the deregistration below.
                    tx.notify(&[0x01])?;
                    tx.notify(&[0x02])?;
                    tx.notify(&[0x03])
                }
                stage::PUBSUB_DEREGISTER => tx.deregister_ack(&[]),
                _ => Ok(()),
            },
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .subscriber_operation(bed.handlers.uri().clone(), KEY);
    let ack = within(op.register(&[])).await.expect("registered");
    assert_eq!(ack.interaction_stage, stage::PUBSUB_REGISTER_ACK);
    assert_eq!(op.status(), OperationStatus::Registered);

    let notify = within(op.get_notify()).await.expect("first notify");
    assert_eq!(notify.body, vec![0x01]);

    // Two notifies are still queued; deregister must skip them and come
    // back with the acknowledgement.
    let ack = within(op.deregister(&[])).await.expect("deregistered");
    assert_eq!(ack.interaction_stage, stage::PUBSUB_DEREGISTER_ACK);
    assert!(!ack.is_error_message);
    assert_eq!(op.status(), OperationStatus::Final);
}

#[tokio::test]
async fn test_publisher_lifecycle() {
    let bed = loopback_testbed("publisher-lifecycle");
    let published: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&published);
    bed.handlers
        .register_broker_handler(KEY, move |msg, tx| match tx {
            Transaction::Publisher(tx) => match msg.interaction_stage {
                stage::PUBSUB_PUBLISH_REGISTER => tx.register_ack(&[]),
                stage::PUBSUB_PUBLISH => {
                    seen.lock().expect("lock").push(msg.body.clone());
                    Ok(())
                }
                stage::PUBSUB_PUBLISH_DEREGISTER => tx.deregister_ack(&[]),
                _ => Ok(()),
            },
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .publisher_operation(bed.handlers.uri().clone(), KEY);
    within(op.register(&[])).await.expect("registered");
    assert_eq!(op.status(), OperationStatus::Registered);

    op.publish(&[0xAA]).expect("publish");
    op.publish(&[0xBB]).expect("publish");

    // The deregister ack orders us after both publications.
    within(op.deregister(&[])).await.expect("deregistered");
    assert_eq!(op.status(), OperationStatus::Final);
    assert_eq!(
        *published.lock().expect("lock"),
        vec![vec![0xAA], vec![0xBB]]
    );
}

#[tokio::test]
async fn test_send_reaches_handler() {
    let bed = loopback_testbed("send-one-way");
    let received: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&received);
    bed.handlers
        .register_send_handler(KEY, move |msg, tx| {
            assert!(matches!(tx, Transaction::Send(_)));
            seen.lock().expect("lock").push(msg.body.clone());
            Ok(())
        })
        .expect("register handler");

    let mut op = bed.operations.send_operation(bed.handlers.uri().clone(), KEY);
    op.send(&[0x5A]).expect("send");
    assert_eq!(op.status(), OperationStatus::Final);

    within(async {
        loop {
            if !received.lock().expect("lock").is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert_eq!(*received.lock().expect("lock"), vec![vec![0x5A]]);
}

#[tokio::test]
async fn test_bad_stage_finalizes_and_reset_recovers() {
    let bed = loopback_testbed("bad-stage");
    let forge_once = Arc::new(AtomicBool::new(true));
    let forge = Arc::clone(&forge_once);
    let forging_ctx = Arc::clone(&bed.ctx);
    let provider_uri = bed.handlers.uri().clone();

    bed.handlers
        .register_submit_handler(KEY, move |msg, tx| {
            if forge.swap(false, Ordering::SeqCst) {
                // A reply whose stage does not exist in the Submit
                // pattern; bypasses the transaction layer on purpose.
                return forging_ctx.send(Message {
                    uri_from: provider_uri.clone(),
                    uri_to: msg.uri_from.clone(),
                    interaction_type: msg.interaction_type,
                    interaction_stage: stage::INVOKE_RESPONSE,
                    transaction_id: msg.transaction_id,
                    service_area: msg.service_area,
                    area_version: msg.area_version,
                    service: msg.service,
                    operation: msg.operation,
                    ..Message::default()
                });
            }
            match tx {
                Transaction::Submit(tx) => tx.ack(&[]),
                _ => Ok(()),
            }
        })
        .expect("register handler");

    let mut op = bed
        .operations
        .submit_operation(bed.handlers.uri().clone(), KEY);

    // The forged stage finalizes the operation.
    assert!(matches!(
        within(op.submit(&[0x01])).await,
        Err(MalError::BadStage {
            stage: stage::INVOKE_RESPONSE
        })
    ));
    assert_eq!(op.status(), OperationStatus::Final);

    // Re-initiating without a reset is a lifecycle violation.
    assert!(matches!(
        within(op.submit(&[0x01])).await,
        Err(MalError::BadStatus {
            status: OperationStatus::Final
        })
    ));

    // Reset allocates a fresh transaction and the pattern runs clean.
    let tid_before = op.transaction_id();
    op.reset().expect("reset");
    assert!(op.transaction_id() > tid_before);
    let ack = within(op.submit(&[0x01])).await.expect("submit after reset");
    assert_eq!(ack.interaction_stage, stage::SUBMIT_ACK);
}

#[tokio::test]
async fn test_duplicate_endpoint_keeps_first_functional() {
    let bed = loopback_testbed("duplicate-endpoint");
    bed.handlers
        .register_submit_handler(KEY, |_msg, tx| match tx {
            Transaction::Submit(tx) => tx.ack(&[]),
            _ => Ok(()),
        })
        .expect("register handler");

    // Same service path, same URI: rejected.
    assert!(matches!(
        HandlerContext::new(&bed.ctx, "provider"),
        Err(MalError::DuplicateEndpoint { .. })
    ));

    // The original endpoint still serves.
    let mut op = bed
        .operations
        .submit_operation(bed.handlers.uri().clone(), KEY);
    within(op.submit(&[])).await.expect("submit acknowledged");
}

#[tokio::test]
async fn test_concurrent_interactions_on_one_endpoint() {
    let bed = loopback_testbed("concurrent");
    bed.handlers
        .register_submit_handler(KEY, |msg, tx| match tx {
            Transaction::Submit(tx) => tx.ack(&msg.body),
            _ => Ok(()),
        })
        .expect("register handler");

    let mut handles = Vec::new();
    for n in 0..16u8 {
        let operations = Arc::clone(&bed.operations);
        let uri_to = bed.handlers.uri().clone();
        handles.push(tokio::spawn(async move {
            let mut op = operations.submit_operation(uri_to, KEY);
            let ack = op.submit(&[n]).await.expect("submit acknowledged");
            // The ack echoes our body: replies were demultiplexed onto
            // the right transaction.
            assert_eq!(ack.body, vec![n]);
            op.transaction_id()
        }));
    }

    let mut tids = std::collections::HashSet::new();
    for handle in handles {
        let tid = within(handle).await.expect("join");
        assert!(tids.insert(tid), "transaction id {tid} reused");
    }
    assert_eq!(tids.len(), 16);
}

// ---------------------------------------------------------------------------
// The same patterns over real sockets.
// ---------------------------------------------------------------------------

async fn tcp_testbed() -> (Arc<Context>, Arc<Context>, Arc<HandlerContext>, Arc<OperationContext>) {
    init_tracing();
    let provider_ctx = Context::new(
        TcpTransport::bind(TcpConfig::default())
            .await
            .expect("bind provider"),
    );
    let consumer_ctx = Context::new(
        TcpTransport::bind(TcpConfig::default())
            .await
            .expect("bind consumer"),
    );
    let handlers = HandlerContext::new(&provider_ctx, "provider").expect("provider endpoint");
    let operations = OperationContext::new(&consumer_ctx, "consumer").expect("consumer endpoint");
    (provider_ctx, consumer_ctx, handlers, operations)
}

#[tokio::test]
async fn test_submit_over_tcp() {
    let (provider_ctx, consumer_ctx, handlers, operations) = tcp_testbed().await;
    handlers
        .register_submit_handler(KEY, |_msg, tx| match tx {
            Transaction::Submit(tx) => tx.ack(&[]),
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = operations.submit_operation(handlers.uri().clone(), KEY);
    let ack = within(op.submit(&[0x01])).await.expect("submit acknowledged");
    assert_eq!(ack.interaction_stage, stage::SUBMIT_ACK);
    assert!(!ack.is_error_message);
    assert_eq!(op.status(), OperationStatus::Final);

    provider_ctx.close();
    consumer_ctx.close();
}

#[tokio::test]
async fn test_progress_over_tcp() {
    let (provider_ctx, consumer_ctx, handlers, operations) = tcp_testbed().await;
    handlers
        .register_progress_handler(KEY, |_msg, tx| match tx {
            Transaction::Progress(tx) => {
                tx.ack(&[])?;
                tx.update(&[0x10])?;
                tx.update(&[0x11])?;
                tx.reply(&[0xFF])
            }
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = operations.progress_operation(handlers.uri().clone(), KEY);
    within(op.progress(&[])).await.expect("acknowledged");
    for expected in [0x10u8, 0x11] {
        let update = within(op.get_update())
            .await
            .expect("update")
            .expect("stream not finished");
        assert_eq!(update.body, vec![expected]);
    }
    assert!(within(op.get_update()).await.expect("stream end").is_none());
    let response = within(op.get_response()).await.expect("response");
    assert_eq!(response.body, vec![0xFF]);

    provider_ctx.close();
    consumer_ctx.close();
}

#[tokio::test]
async fn test_invoke_over_tcp_with_error_reply() {
    let (provider_ctx, consumer_ctx, handlers, operations) = tcp_testbed().await;
    handlers
        .register_invoke_handler(KEY, |_msg, tx| match tx {
            Transaction::Invoke(tx) => {
                tx.ack(&[])?;
                tx.error(&[0xEE])
            }
            _ => Ok(()),
        })
        .expect("register handler");

    let mut op = operations.invoke_operation(handlers.uri().clone(), KEY);
    within(op.invoke(&[])).await.expect("acknowledged");
    match within(op.get_response()).await {
        Err(MalError::Application(reply)) => {
            assert!(reply.is_error_message);
            assert_eq!(reply.body, vec![0xEE]);
        }
        other => panic!("expected application error, got {other:?}"),
    }

    provider_ctx.close();
    consumer_ctx.close();
}

#[tokio::test]
async fn test_context_close_ends_pending_operations() {
    let (provider_ctx, consumer_ctx, handlers, operations) = tcp_testbed().await;
    // No handler registered: the submit never gets a reply.

    let uri_to = handlers.uri().clone();
    let operations_for_task = Arc::clone(&operations);
    let pending = tokio::spawn(async move {
        let mut op = operations_for_task.submit_operation(uri_to, KEY);
        op.submit(&[0x01]).await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    consumer_ctx.close();

    assert!(matches!(
        within(pending).await.expect("join"),
        Err(MalError::OperationEnded)
    ));
    provider_ctx.close();
}
