//! Resend coordinators.
//!
//! After a reconnect, three independent loops replay the last-known state
//! for every active key: render instructions, page layouts, and loading
//! states. Replays are idempotent on the service side because they are
//! keyed by transaction/page id and carry the latest snapshot.
//!
//! Each coordinator walks a working set drawn from its pending table:
//! a successful replay removes the key from the working set only; an
//! unrecoverable reply (`CANCELED`, `TRANSACTION_CLOSED`, or a server
//! error) also evicts the entry from the pending table itself, so the
//! surviving table keys stay a subset of those present before the
//! disconnect.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::IoErrorKind;
use crate::rpc::methods::{
    SendIoCall, SendIoCallInputs, SendLoadingCall, SendLoadingCallInputs, SendPage,
    SendPageInputs,
};

use super::HostInner;

/// Replay everything after a reconnect.
pub(crate) async fn resend_all(inner: &Arc<HostInner>) {
    tokio::join!(
        resend_pending_io_calls(inner, None),
        resend_pending_page_layouts(inner, None),
        resend_transaction_loading_states(inner, None),
    );
}

/// Replay the last render instruction for each live transaction.
pub(crate) async fn resend_pending_io_calls(inner: &Arc<HostInner>, keys: Option<&[String]>) {
    let working: HashMap<String, SendIoCallInputs> = snapshot(
        &inner.pending_io_calls.lock().expect("pending_io_calls lock poisoned"),
        keys,
    );

    for (transaction_id, inputs) in working {
        match inner.call_with_retries::<SendIoCall>(inputs).await {
            Ok(result) => {
                if result.is_unrecoverable() {
                    log::debug!(
                        "[Host] Dropping pending render for closed transaction {transaction_id}"
                    );
                    inner.close_transaction(&transaction_id, IoErrorKind::TransactionClosed);
                }
            }
            Err(e) => {
                log::warn!("[Host] Render replay failed for {transaction_id}: {e}");
            }
        }
    }
}

/// Replay the last layout for each open page session.
pub(crate) async fn resend_pending_page_layouts(inner: &Arc<HostInner>, keys: Option<&[String]>) {
    let working: HashMap<String, SendPageInputs> = snapshot(
        &inner
            .pending_page_layouts
            .lock()
            .expect("pending_page_layouts lock poisoned"),
        keys,
    );

    for (page_key, inputs) in working {
        match inner.call_with_retries::<SendPage>(inputs).await {
            Ok(result) => {
                if result.is_unrecoverable() {
                    log::debug!("[Host] Dropping pending layout for closed page {page_key}");
                    inner.close_page(&page_key);
                }
            }
            Err(e) => {
                log::warn!("[Host] Layout replay failed for {page_key}: {e}");
            }
        }
    }
}

/// Replay the last loading state for each live transaction.
pub(crate) async fn resend_transaction_loading_states(
    inner: &Arc<HostInner>,
    keys: Option<&[String]>,
) {
    let working: Vec<(String, SendLoadingCallInputs)> = {
        let states = inner
            .loading_states
            .lock()
            .expect("loading_states lock poisoned");
        states
            .iter()
            .filter(|(key, _)| keys.map_or(true, |keys| keys.contains(key)))
            .map(|(key, snapshot)| {
                (
                    key.clone(),
                    SendLoadingCallInputs {
                        transaction_id: key.clone(),
                        title: snapshot.title.clone(),
                        description: snapshot.description.clone(),
                        items_in_queue: snapshot.items_in_queue,
                        items_completed: snapshot.items_completed,
                    },
                )
            })
            .collect()
    };

    for (transaction_id, inputs) in working {
        match inner.call_with_retries::<SendLoadingCall>(inputs).await {
            Ok(result) => {
                if result.is_unrecoverable() {
                    inner
                        .loading_states
                        .lock()
                        .expect("loading_states lock poisoned")
                        .remove(&transaction_id);
                }
            }
            Err(e) => {
                log::warn!("[Host] Loading replay failed for {transaction_id}: {e}");
            }
        }
    }
}

fn snapshot<V: Clone>(table: &HashMap<String, V>, keys: Option<&[String]>) -> HashMap<String, V> {
    table
        .iter()
        .filter(|(key, _)| keys.map_or(true, |keys| keys.contains(key)))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
