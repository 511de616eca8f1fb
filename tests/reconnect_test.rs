//! Reconnection behavior: the host must reopen the connection after an
//! unexpected close, re-initialize, and replay in-flight render state.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{test_config, PipeConnector, ServiceConn};
use opshub::rpc::methods::{IoResponseKind, TransactionStatus};
use opshub::{BuiltinRegistry, Host, Route};

fn routes() -> Vec<Route> {
    vec![Route::action("signup", |io, _ctx| async move {
        let result = io
            .group(vec![
                io.input.text("First").into(),
                io.input.text("Last").into(),
            ])
            .await?;
        Ok(json!(result.values))
    })]
}

#[tokio::test]
async fn test_reconnect_replays_identical_render() {
    common::init_logging();
    let (connector, mut incoming) = PipeConnector::new();
    let host = Host::with_parts(
        test_config(),
        routes(),
        Arc::new(connector),
        Arc::new(BuiltinRegistry::new()),
    );

    let (session, mut service) = tokio::join!(host.listen(), ServiceConn::accept(&mut incoming));
    session.expect("listen failed");

    service.start_transaction("txn-r1", "signup").await;
    let (_txn, first_raw, first_instruction) = service.expect_io_call().await;
    assert_eq!(host.pending_render_count(), 1);

    // The network dies after the render was acked.
    service.sever();

    // The host reconnects on its own; the fresh connection re-initializes
    // and replays the pending render byte-for-byte.
    let mut service2 = ServiceConn::accept(&mut incoming).await;
    let inputs = service2.expect_initialize().await;
    assert_eq!(inputs.actions[0].slug, "signup");

    let (transaction_id, replay_raw, replay_instruction) = service2.expect_io_call().await;
    assert_eq!(transaction_id, "txn-r1");
    assert_eq!(replay_raw, first_raw, "replayed instruction must be identical");
    assert_eq!(replay_instruction.id, first_instruction.id);

    // Pending keys survived the reconnect (subset property: nothing new).
    assert_eq!(host.pending_render_count(), 1);

    // The user reply on the new connection resolves the original handler.
    service2
        .send_io_response(
            "txn-r1",
            &replay_instruction.id,
            IoResponseKind::Return,
            vec![json!("Ada"), json!("Lovelace")],
            None,
        )
        .await;

    let (_txn, result) = service2.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
    assert_eq!(result.data, Some(json!(["Ada", "Lovelace"])));
}

#[tokio::test]
async fn test_reconnect_survives_repeated_drops() {
    let (connector, mut incoming) = PipeConnector::new();
    let host = Host::with_parts(
        test_config(),
        routes(),
        Arc::new(connector),
        Arc::new(BuiltinRegistry::new()),
    );

    let (session, service) = tokio::join!(host.listen(), ServiceConn::accept(&mut incoming));
    session.expect("listen failed");

    // Two consecutive drops; the host must come back each time.
    service.sever();
    let service2 = ServiceConn::accept(&mut incoming).await;
    service2.sever();
    let mut service3 = ServiceConn::accept(&mut incoming).await;

    let inputs = service3.expect_initialize().await;
    assert_eq!(inputs.sdk_name, "opshub-rs");

    // The connection works end to end after the second recovery.
    service3.start_transaction("txn-r2", "signup").await;
    let (_txn, _raw, instruction) = service3.expect_io_call().await;
    service3
        .send_io_response(
            "txn-r2",
            &instruction.id,
            IoResponseKind::Return,
            vec![json!("a"), json!("b")],
            None,
        )
        .await;
    let (_txn, result) = service3.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_no_reconnect_after_deliberate_close() {
    let (connector, mut incoming) = PipeConnector::new();
    let host = Host::with_parts(
        test_config(),
        routes(),
        Arc::new(connector),
        Arc::new(BuiltinRegistry::new()),
    );

    let (session, _service) = tokio::join!(host.listen(), ServiceConn::accept(&mut incoming));
    session.expect("listen failed");

    host.immediately_close();

    // No redial within several retry intervals.
    let redial = tokio::time::timeout(Duration::from_millis(500), incoming.recv()).await;
    assert!(redial.is_err(), "closed host must not reconnect");
}
