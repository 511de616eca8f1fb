//! Graceful shutdown: stop accepting work, drain in-flight transactions,
//! then close.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{test_config, PipeConnector, ServiceConn, ServiceEvent};
use opshub::rpc::methods::{HostAck, IoResponseKind, TransactionStatus};
use opshub::{BuiltinRegistry, Host, Route};

fn routes() -> Vec<Route> {
    vec![Route::action("ask", |io, _ctx| async move {
        let answer = io.input.text("question").await?;
        Ok(json!(answer))
    })]
}

#[tokio::test]
async fn test_graceful_shutdown_drains_in_flight_transactions() {
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

    // Two concurrent transactions, both suspended on input.
    service.start_transaction("txn-a", "ask").await;
    service.start_transaction("txn-b", "ask").await;
    let (first_txn, _raw, first) = service.expect_io_call().await;
    let (second_txn, _raw, second) = service.expect_io_call().await;
    assert_eq!(host.transaction_count(), 2);

    // Begin the graceful close on a separate task; it must not resolve
    // until both transactions report completion.
    let closing_host = host.clone();
    let close_task = tokio::spawn(async move { closing_host.safely_close().await });

    // The service is told to stop dispatching.
    loop {
        if let ServiceEvent::Shutdown = service.next_event().await {
            break;
        }
    }

    // New work is refused locally while draining.
    let ack = service.start_transaction("txn-c", "ask").await;
    assert!(matches!(ack, HostAck::Error { .. }));
    assert_eq!(host.transaction_count(), 2);

    // The close has not resolved yet.
    assert!(!close_task.is_finished());

    // Resolve both transactions.
    service
        .send_io_response(
            &first_txn,
            &first.id,
            IoResponseKind::Return,
            vec![json!("one")],
            None,
        )
        .await;
    service
        .send_io_response(
            &second_txn,
            &second.id,
            IoResponseKind::Return,
            vec![json!("two")],
            None,
        )
        .await;

    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);

    // Now the close resolves.
    tokio::time::timeout(Duration::from_secs(5), close_task)
        .await
        .expect("safely_close never resolved")
        .expect("close task panicked")
        .expect("safely_close failed");

    assert_eq!(host.transaction_count(), 0);
    assert!(!host.is_initialized());
}

#[tokio::test]
async fn test_immediate_close_cancels_in_flight_work() {
    let (connector, mut incoming) = PipeConnector::new();
    let host = Host::with_parts(
        test_config(),
        routes(),
        Arc::new(connector),
        Arc::new(BuiltinRegistry::new()),
    );

    let (session, mut service) = tokio::join!(host.listen(), ServiceConn::accept(&mut incoming));
    session.expect("listen failed");

    service.start_transaction("txn-x", "ask").await;
    let _ = service.expect_io_call().await;
    assert_eq!(host.transaction_count(), 1);

    host.immediately_close();

    assert_eq!(host.transaction_count(), 0);
    assert_eq!(host.pending_render_count(), 0);
    assert!(!host.is_initialized());
}
