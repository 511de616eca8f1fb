//! Inbound RPC dispatch.
//!
//! Implements the responder side of the duplex channel: transaction and
//! page lifecycle calls spawn their tasks here, and `IO_RESPONSE`s are
//! routed to the owning IoClient. Parse failures log and drop; they never
//! kill the connection.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::IoErrorKind;
use crate::io::{Io, IoClient, IoEvent, RenderSender};
use crate::loading::{LoadingHandle, LoadingSender};
use crate::routes::ActionRoute;
use crate::rpc::methods::{
    ClosePageInputs, CloseTransactionInputs, HostAck, IoResponse, IoResponseInputs,
    IoResponseKind, OpenPageInputs, StartTransactionInputs,
};
use crate::rpc::RpcResponder;
use crate::transaction::{self, ActionCtx, PageChannel, TransactionChannel};

use super::channel::HostChannel;
use super::{HostInner, PageEntry, TransactionEntry};

/// How long a validator verdict may take before the service is told the
/// round-trip failed.
const VALIDATE_VERDICT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct HostResponder {
    pub(crate) inner: Weak<HostInner>,
}

#[async_trait]
impl RpcResponder for HostResponder {
    async fn respond(&self, method_name: &str, data: Value) -> Value {
        let Some(inner) = self.inner.upgrade() else {
            return Value::Null;
        };

        let ack = match method_name {
            "START_TRANSACTION" => start_transaction(&inner, data),
            "OPEN_PAGE" => open_page(&inner, data),
            "CLOSE_TRANSACTION" => close_transaction(&inner, data),
            "CLOSE_PAGE" => close_page(&inner, data),
            "IO_RESPONSE" => io_response(&inner, data).await,
            other => {
                log::warn!("[Host] Dropping call for unknown method {other}");
                return Value::Null;
            }
        };

        match ack {
            Some(ack) => serde_json::to_value(ack).unwrap_or(Value::Null),
            None => Value::Null,
        }
    }
}

fn start_transaction(inner: &Arc<HostInner>, data: Value) -> Option<HostAck> {
    let inputs: StartTransactionInputs = match serde_json::from_value(data) {
        Ok(inputs) => inputs,
        Err(e) => {
            log::warn!("[Host] Dropping malformed START_TRANSACTION: {e}");
            return None;
        }
    };

    if inner.shutdown_requested.load(Ordering::SeqCst) {
        log::info!(
            "[Host] Refusing transaction {} during shutdown",
            inputs.transaction_id
        );
        return Some(HostAck::Error {
            message: Some("host is shutting down".to_string()),
        });
    }

    let Some(action) = inner.routes.action(&inputs.action.slug) else {
        log::warn!(
            "[Host] START_TRANSACTION for unknown action {}",
            inputs.action.slug
        );
        return Some(HostAck::Error {
            message: Some(format!("unknown action: {}", inputs.action.slug)),
        });
    };

    // At-least-once delivery: a retry of a transaction we already run is
    // acknowledged without spawning a second handler.
    if inner
        .transactions
        .lock()
        .expect("transactions lock poisoned")
        .contains_key(&inputs.transaction_id)
    {
        log::debug!(
            "[Host] Duplicate START_TRANSACTION for {}, already running",
            inputs.transaction_id
        );
        return Some(HostAck::Success);
    }

    spawn_transaction(inner, inputs, action);
    Some(HostAck::Success)
}

fn spawn_transaction(inner: &Arc<HostInner>, inputs: StartTransactionInputs, action: ActionRoute) {
    let transaction_id = inputs.transaction_id.clone();
    let channel = Arc::new(HostChannel {
        inner: Arc::downgrade(inner),
    });

    let (io_client, event_tx) = IoClient::new(
        transaction_id.clone(),
        Arc::clone(&channel) as Arc<dyn RenderSender>,
        Arc::clone(&inner.registry),
        inputs.display_resolves_immediately,
    );
    let io = Io::new(Arc::clone(&io_client));

    let loading = LoadingHandle::new(
        transaction_id.clone(),
        Arc::clone(&channel) as Arc<dyn LoadingSender>,
    );
    let organization = inner
        .session
        .lock()
        .expect("session lock poisoned")
        .as_ref()
        .map(|s| s.organization.clone());

    let ctx = ActionCtx::new(
        transaction_id.clone(),
        inputs.user.clone(),
        inputs.params.clone(),
        inputs.environment.clone(),
        organization,
        inputs.action.clone(),
        loading,
        Arc::clone(&channel) as Arc<dyn TransactionChannel>,
    );

    inner
        .transactions
        .lock()
        .expect("transactions lock poisoned")
        .insert(
            transaction_id.clone(),
            TransactionEntry {
                event_tx,
                io_client,
            },
        );

    if inner.config.log_level.debug_enabled() {
        log::debug!(
            "[Host] Transaction {transaction_id} started for {}",
            inputs.action.slug
        );
    }

    let weak = Arc::downgrade(inner);
    let on_error = inner.config.on_error.clone();
    tokio::spawn(async move {
        transaction::run_action(
            inputs,
            action,
            io,
            ctx,
            channel as Arc<dyn TransactionChannel>,
            on_error,
        )
        .await;

        // Erase all state keyed by this transaction once the result is
        // reported.
        if let Some(inner) = weak.upgrade() {
            finish_transaction(&inner, &transaction_id);
        }
    });
}

/// Remove a completed transaction's state without firing a cancel.
fn finish_transaction(inner: &Arc<HostInner>, transaction_id: &str) {
    inner
        .transactions
        .lock()
        .expect("transactions lock poisoned")
        .remove(transaction_id);
    inner
        .pending_io_calls
        .lock()
        .expect("pending_io_calls lock poisoned")
        .remove(transaction_id);
    inner
        .loading_states
        .lock()
        .expect("loading_states lock poisoned")
        .remove(transaction_id);
    inner.drained.notify_waiters();

    if inner.config.log_level.debug_enabled() {
        log::debug!("[Host] Transaction {transaction_id} finished");
    }
}

fn open_page(inner: &Arc<HostInner>, data: Value) -> Option<HostAck> {
    let inputs: OpenPageInputs = match serde_json::from_value(data) {
        Ok(inputs) => inputs,
        Err(e) => {
            log::warn!("[Host] Dropping malformed OPEN_PAGE: {e}");
            return None;
        }
    };

    let Some(page) = inner.routes.page(&inputs.page.slug) else {
        log::warn!("[Host] OPEN_PAGE for unknown page {}", inputs.page.slug);
        return Some(HostAck::Error {
            message: Some(format!("unknown page: {}", inputs.page.slug)),
        });
    };

    let page_key = inputs.page_key.clone();
    let channel = Arc::new(HostChannel {
        inner: Arc::downgrade(inner),
    });
    let organization = inner
        .session
        .lock()
        .expect("session lock poisoned")
        .as_ref()
        .map(|s| s.organization.clone());

    let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let weak = Arc::downgrade(inner);
    let key_for_task = page_key.clone();
    let closed_for_task = Arc::clone(&closed);
    let session_task = tokio::spawn(async move {
        let field_tasks = transaction::run_page(
            inputs,
            page,
            organization,
            channel as Arc<dyn PageChannel>,
            closed_for_task,
        )
        .await;

        // Attach the async-field tasks to the session entry, unless the
        // page already closed while the handler ran.
        let Some(inner) = weak.upgrade() else {
            for task in field_tasks {
                task.abort();
            }
            return;
        };
        let mut pages = inner.pages.lock().expect("pages lock poisoned");
        match pages.get_mut(&key_for_task) {
            Some(entry) => entry.tasks.extend(field_tasks),
            None => {
                for task in field_tasks {
                    task.abort();
                }
            }
        }
    });

    inner.pages.lock().expect("pages lock poisoned").insert(
        page_key,
        PageEntry {
            tasks: vec![session_task],
            closed,
        },
    );

    Some(HostAck::Success)
}

fn close_transaction(inner: &Arc<HostInner>, data: Value) -> Option<HostAck> {
    let inputs: CloseTransactionInputs = match serde_json::from_value(data) {
        Ok(inputs) => inputs,
        Err(e) => {
            log::warn!("[Host] Dropping malformed CLOSE_TRANSACTION: {e}");
            return None;
        }
    };

    inner.close_transaction(&inputs.transaction_id, IoErrorKind::Canceled);
    Some(HostAck::Success)
}

fn close_page(inner: &Arc<HostInner>, data: Value) -> Option<HostAck> {
    let inputs: ClosePageInputs = match serde_json::from_value(data) {
        Ok(inputs) => inputs,
        Err(e) => {
            log::warn!("[Host] Dropping malformed CLOSE_PAGE: {e}");
            return None;
        }
    };

    inner.close_page(&inputs.page_key);
    Some(HostAck::Success)
}

async fn io_response(inner: &Arc<HostInner>, data: Value) -> Option<HostAck> {
    let inputs: IoResponseInputs = match serde_json::from_value(data) {
        Ok(inputs) => inputs,
        Err(e) => {
            log::warn!("[Host] Dropping malformed IO_RESPONSE envelope: {e}");
            return None;
        }
    };
    let response: IoResponse = match serde_json::from_str(&inputs.value) {
        Ok(response) => response,
        Err(e) => {
            log::warn!(
                "[Host] Dropping undecodable IO_RESPONSE body for {}: {e}",
                inputs.transaction_id
            );
            return None;
        }
    };

    let event_tx = {
        let transactions = inner
            .transactions
            .lock()
            .expect("transactions lock poisoned");
        transactions
            .get(&inputs.transaction_id)
            .map(|entry| entry.event_tx.clone())
    };
    let Some(event_tx) = event_tx else {
        log::debug!(
            "[Host] IO_RESPONSE for unknown transaction {}",
            inputs.transaction_id
        );
        return Some(HostAck::Error {
            message: Some("unknown transaction".to_string()),
        });
    };

    if response.kind == IoResponseKind::Validate {
        let (verdict_tx, verdict_rx) = tokio::sync::oneshot::channel();
        if event_tx
            .send(IoEvent {
                response,
                verdict: Some(verdict_tx),
            })
            .is_err()
        {
            return Some(HostAck::Error {
                message: Some("transaction ended".to_string()),
            });
        }
        return match tokio::time::timeout(VALIDATE_VERDICT_TIMEOUT, verdict_rx).await {
            Ok(Ok(error)) => Some(HostAck::Validation { error }),
            Ok(Err(_)) | Err(_) => Some(HostAck::Validation {
                error: Some("validation did not complete".to_string()),
            }),
        };
    }

    if event_tx
        .send(IoEvent {
            response,
            verdict: None,
        })
        .is_err()
    {
        return Some(HostAck::Error {
            message: Some("transaction ended".to_string()),
        });
    }
    Some(HostAck::Success)
}
