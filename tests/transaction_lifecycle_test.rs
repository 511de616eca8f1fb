//! End-to-end transaction scenarios against the in-process stub service.

mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use common::{test_config, PipeConnector, ServiceConn, ServiceEvent};
use opshub::rpc::methods::{HostAck, IoResponseKind, TransactionStatus};
use opshub::{BuiltinRegistry, Host, LoadingOptions, RedirectTarget, Route};

fn test_routes() -> Vec<Route> {
    vec![
        Route::action("hello", |io, _ctx| async move {
            let name = io.input.text("name").await?;
            Ok(json!(format!("Hi, {name}")))
        }),
        Route::action("signup", |io, _ctx| async move {
            let result = io
                .group(vec![
                    io.input.text("First").into(),
                    io.input.text("Last").into(),
                    io.input.email("Email").into(),
                ])
                .await?;
            Ok(json!(result.values))
        }),
        Route::action("guarded-age", |io, _ctx| async move {
            let result = io
                .group(vec![io.input.text("age").into()])
                .validate(|values| {
                    let age = values[0].as_str().unwrap_or("");
                    if age.is_empty() {
                        Some("required".to_string())
                    } else {
                        None
                    }
                })
                .await?;
            Ok(json!(result.values))
        }),
        Route::action("chatty", |_io, ctx| async move {
            ctx.log("step one").await;
            ctx.log("step two").await;
            ctx.log("step three").await;
            Ok(json!("done"))
        }),
        Route::action("batch", |_io, ctx| async move {
            ctx.loading
                .start(LoadingOptions::titled("Crunching").with_items_in_queue(2));
            ctx.loading.complete_one();
            ctx.loading.complete_one();
            Ok(json!("crunched"))
        }),
        Route::action("bouncer", |_io, ctx| async move {
            ctx.redirect(RedirectTarget::Url("https://example.com/next".into()))
                .await?;
            Ok(json!(null))
        }),
        Route::action("explodes", |_io, _ctx| async move {
            anyhow::bail!("database unreachable")
        }),
    ]
}

async fn connect_host() -> (Host, ServiceConn) {
    let (connector, mut incoming) = PipeConnector::new();
    let host = Host::with_parts(
        test_config(),
        test_routes(),
        Arc::new(connector),
        Arc::new(BuiltinRegistry::new()),
    );

    let (session, service) = tokio::join!(host.listen(), ServiceConn::accept(&mut incoming));
    let session = session.expect("listen failed");
    assert_eq!(session.organization.slug, "test-org");
    (host, service)
}

#[tokio::test]
async fn test_hello_world_round_trip() {
    common::init_logging();
    let (host, mut service) = connect_host().await;

    let ack = service.start_transaction("txn-1", "hello").await;
    assert_eq!(ack, HostAck::Success);

    let (transaction_id, _raw, instruction) = service.expect_io_call().await;
    assert_eq!(transaction_id, "txn-1");
    assert_eq!(instruction.to_render.len(), 1);
    assert_eq!(instruction.to_render[0].method_name, "INPUT_TEXT");
    assert_eq!(instruction.to_render[0].label, "name");

    service
        .send_io_response(
            "txn-1",
            &instruction.id,
            IoResponseKind::Return,
            vec![json!("Ada")],
            None,
        )
        .await;

    let (transaction_id, result) = service.expect_complete().await;
    assert_eq!(transaction_id, "txn-1");
    assert_eq!(result.status, TransactionStatus::Success);
    assert_eq!(result.data, Some(json!("Hi, Ada")));

    assert_eq!(host.transaction_count(), 0);
    assert_eq!(host.pending_render_count(), 0);
}

#[tokio::test]
async fn test_group_of_three_single_round_trip() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-2", "signup").await;

    let (_txn, _raw, instruction) = service.expect_io_call().await;
    assert_eq!(instruction.to_render.len(), 3);
    let labels: Vec<&str> = instruction
        .to_render
        .iter()
        .map(|c| c.label.as_str())
        .collect();
    assert_eq!(labels, vec!["First", "Last", "Email"]);

    service
        .send_io_response(
            "txn-2",
            &instruction.id,
            IoResponseKind::Return,
            vec![json!("Ada"), json!("Lovelace"), json!("a@b.c")],
            None,
        )
        .await;

    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
    assert_eq!(
        result.data,
        Some(json!(["Ada", "Lovelace", "a@b.c"]))
    );
}

#[tokio::test]
async fn test_cancel_mid_flight_reports_canceled_and_erases_state() {
    let (host, mut service) = connect_host().await;

    service.start_transaction("txn-3", "hello").await;
    let (_txn, _raw, _instruction) = service.expect_io_call().await;
    assert_eq!(host.transaction_count(), 1);
    assert_eq!(host.pending_render_count(), 1);

    let ack = service.close_transaction("txn-3").await;
    assert_eq!(ack, HostAck::Success);

    let (transaction_id, result) = service.expect_complete().await;
    assert_eq!(transaction_id, "txn-3");
    assert_eq!(result.status, TransactionStatus::Canceled);

    assert_eq!(host.transaction_count(), 0);
    assert_eq!(host.pending_render_count(), 0);
}

#[tokio::test]
async fn test_validator_rejects_then_accepts() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-4", "guarded-age").await;
    let (_txn, _raw, instruction) = service.expect_io_call().await;
    assert!(instruction.has_validator);

    let verdict = service
        .send_io_response(
            "txn-4",
            &instruction.id,
            IoResponseKind::Validate,
            vec![json!("")],
            None,
        )
        .await;
    assert_eq!(
        verdict,
        HostAck::Validation {
            error: Some("required".to_string())
        }
    );

    let verdict = service
        .send_io_response(
            "txn-4",
            &instruction.id,
            IoResponseKind::Validate,
            vec![json!("42")],
            None,
        )
        .await;
    assert_eq!(verdict, HostAck::Validation { error: None });

    service
        .send_io_response(
            "txn-4",
            &instruction.id,
            IoResponseKind::Return,
            vec![json!("42")],
            None,
        )
        .await;

    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
    assert_eq!(result.data, Some(json!(["42"])));
}

#[tokio::test]
async fn test_rejected_validation_rerenders_with_message() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-5", "guarded-age").await;
    let (_txn, _raw, first) = service.expect_io_call().await;

    service
        .send_io_response(
            "txn-5",
            &first.id,
            IoResponseKind::Validate,
            vec![json!("")],
            None,
        )
        .await;

    // The host re-renders the same generation with the rejection attached.
    let (_txn, _raw, second) = service.expect_io_call().await;
    assert_eq!(second.id, first.id);
    assert_eq!(second.validation_error_message.as_deref(), Some("required"));

    service
        .send_io_response(
            "txn-5",
            &first.id,
            IoResponseKind::Return,
            vec![json!("29")],
            None,
        )
        .await;
    service.expect_complete().await;
}

#[tokio::test]
async fn test_logs_arrive_in_index_order() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-6", "chatty").await;

    let mut logs = Vec::new();
    while logs.len() < 3 {
        if let ServiceEvent::Log(inputs) = service.next_event().await {
            logs.push(inputs);
        }
    }

    let indices: Vec<u64> = logs.iter().map(|l| l.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(logs[0].data, "step one");
    assert_eq!(logs[2].data, "step three");

    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
}

#[tokio::test]
async fn test_loading_states_coalesce_and_report_progress() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-7", "batch").await;

    // The three mutations land within one coalescing window, so one call
    // carries the final state.
    let loading = loop {
        if let ServiceEvent::Loading(inputs) = service.next_event().await {
            break inputs;
        }
    };
    assert_eq!(loading.title.as_deref(), Some("Crunching"));
    assert_eq!(loading.items_in_queue, Some(2));
    assert_eq!(loading.items_completed, Some(2));
}

#[tokio::test]
async fn test_redirect_reports_redirected_status() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-8", "bouncer").await;

    let redirect = loop {
        if let ServiceEvent::Redirect(inputs) = service.next_event().await {
            break inputs;
        }
    };
    assert_eq!(redirect.url.as_deref(), Some("https://example.com/next"));

    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Redirected);
}

#[tokio::test]
async fn test_handler_failure_serializes_error_info() {
    let (_host, mut service) = connect_host().await;

    service.start_transaction("txn-9", "explodes").await;

    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Failure);
    let data = result.data.expect("failure carries error info");
    assert_eq!(data["message"], "database unreachable");
}

#[tokio::test]
async fn test_unknown_action_is_refused() {
    let (_host, service) = connect_host().await;

    let ack = service.start_transaction("txn-10", "no-such-action").await;
    assert!(matches!(ack, HostAck::Error { .. }));
}

#[tokio::test]
async fn test_duplicate_start_is_idempotent() {
    let (host, mut service) = connect_host().await;

    service.start_transaction("txn-11", "hello").await;
    let _ = service.expect_io_call().await;

    // Redelivery of the same transaction id must not spawn a second run.
    let ack = service.start_transaction("txn-11", "hello").await;
    assert_eq!(ack, HostAck::Success);
    assert_eq!(host.transaction_count(), 1);

    service
        .send_io_response(
            "txn-11",
            "1",
            IoResponseKind::Return,
            vec![json!("once")],
            None,
        )
        .await;
    let (_txn, result) = service.expect_complete().await;
    assert_eq!(result.status, TransactionStatus::Success);
    assert_eq!(host.transaction_count(), 0);

    // No second completion arrives.
    let extra = tokio::time::timeout(std::time::Duration::from_millis(300), async {
        service.expect_complete().await
    })
    .await;
    assert!(extra.is_err(), "duplicate start produced a second run");
}

#[tokio::test]
async fn test_initialize_announces_flattened_routes() {
    let (_host, mut service) = connect_host().await;

    let inputs = service.expect_initialize().await;
    assert_eq!(inputs.sdk_name, "opshub-rs");
    let slugs: Vec<&str> = inputs.actions.iter().map(|a| a.slug.as_str()).collect();
    assert!(slugs.contains(&"hello"));
    assert!(slugs.contains(&"signup"));
    assert!(slugs.contains(&"guarded-age"));
}

#[tokio::test]
async fn test_choice_buttons_round_trip() {
    let (connector, mut incoming) = PipeConnector::new();
    let routes = vec![Route::action("review", |io, _ctx| async move {
        let result = io
            .group(vec![io.input.text("Notes").into()])
            .with_choices(vec![
                opshub::ChoiceButton {
                    label: "Approve".into(),
                    value: "approve".into(),
                    theme: None,
                },
                opshub::ChoiceButton {
                    label: "Reject".into(),
                    value: "reject".into(),
                    theme: Some("danger".into()),
                },
            ])
            .await?;
        Ok(json!({"choice": result.choice, "notes": result.values[0]}))
    })];
    let host = Host::with_parts(
        test_config(),
        routes,
        Arc::new(connector),
        Arc::new(BuiltinRegistry::new()),
    );
    let (session, mut service) =
        tokio::join!(host.listen(), ServiceConn::accept(&mut incoming));
    session.expect("listen failed");

    service.start_transaction("txn-12", "review").await;
    let (_txn, _raw, instruction) = service.expect_io_call().await;
    let buttons = instruction.choice_buttons.expect("buttons attached");
    assert_eq!(buttons.len(), 2);

    service
        .send_io_response(
            "txn-12",
            &instruction.id,
            IoResponseKind::Return,
            vec![json!("ship it")],
            Some("approve".to_string()),
        )
        .await;

    let (_txn, result) = service.expect_complete().await;
    let data: Value = result.data.unwrap();
    assert_eq!(data["choice"], "approve");
    assert_eq!(data["notes"], "ship it");
}
