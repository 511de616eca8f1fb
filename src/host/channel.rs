//! Send paths from transaction tasks up through the connection.
//!
//! [`HostChannel`] is the per-transaction view of the host controller: it
//! records outbound state in the pending tables (so the resend
//! coordinators can replay it after a reconnect) and then ships it with
//! bounded retries.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{IoError, IoErrorKind};
use crate::io::RenderSender;
use crate::loading::{LoadingSender, LoadingSnapshot};
use crate::rpc::methods::{
    ActionResult, MarkTransactionComplete, MarkTransactionCompleteInputs, PageLayout,
    RenderInstruction, SendCallResult, SendIoCall, SendIoCallInputs, SendLoadingCall,
    SendLoadingCallInputs, SendLog, SendLogInputs, SendPage, SendPageInputs, SendRedirect,
    SendRedirectInputs, TransactionErrorKind,
};
use crate::transaction::{PageChannel, RedirectTarget, TransactionChannel};

use super::HostInner;

/// Maps a server error reply to the handler-visible error kind.
fn unrecoverable_kind(result: &SendCallResult) -> Option<IoErrorKind> {
    match result {
        SendCallResult::Error(err) => match err.kind {
            Some(TransactionErrorKind::Canceled) => Some(IoErrorKind::Canceled),
            Some(TransactionErrorKind::TransactionClosed) => {
                Some(IoErrorKind::TransactionClosed)
            }
            None => None,
        },
        SendCallResult::Ok(_) => None,
    }
}

/// Per-transaction send paths, held by IoClients and contexts.
///
/// Holds the host weakly: a transaction outliving the host fails its
/// sends with `TRANSACTION_CLOSED` instead of keeping the controller
/// alive.
pub struct HostChannel {
    pub(crate) inner: Weak<HostInner>,
}

impl HostChannel {
    fn upgrade(&self) -> Result<Arc<HostInner>, IoError> {
        self.inner
            .upgrade()
            .ok_or_else(|| IoError::new(IoErrorKind::TransactionClosed))
    }
}

#[async_trait]
impl RenderSender for HostChannel {
    async fn send_render(
        &self,
        transaction_id: &str,
        instruction: &RenderInstruction,
    ) -> Result<(), IoError> {
        let inner = self.upgrade()?;

        let io_call = serde_json::to_string(instruction).map_err(|e| {
            IoError::with_message(IoErrorKind::RenderError, format!("unserializable render: {e}"))
        })?;
        let inputs = SendIoCallInputs {
            transaction_id: transaction_id.to_string(),
            id: instruction.id.clone(),
            io_call,
        };

        // Record before shipping: a send that dies mid-flight must still
        // be replayable.
        inner
            .pending_io_calls
            .lock()
            .expect("pending_io_calls lock poisoned")
            .insert(transaction_id.to_string(), inputs.clone());

        let result = inner
            .call_with_retries::<SendIoCall>(inputs)
            .await
            .map_err(|e| {
                IoError::with_message(IoErrorKind::RenderError, format!("render delivery failed: {e}"))
            })?;

        if let Some(kind) = unrecoverable_kind(&result) {
            inner
                .pending_io_calls
                .lock()
                .expect("pending_io_calls lock poisoned")
                .remove(transaction_id);
            return Err(IoError::new(kind));
        }
        if let SendCallResult::Error(err) = result {
            return Err(IoError::with_message(
                IoErrorKind::RenderError,
                err.message.unwrap_or_else(|| "render rejected".to_string()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LoadingSender for HostChannel {
    async fn send_loading(
        &self,
        transaction_id: &str,
        snapshot: &LoadingSnapshot,
    ) -> Result<(), IoError> {
        let inner = self.upgrade()?;

        inner
            .loading_states
            .lock()
            .expect("loading_states lock poisoned")
            .insert(transaction_id.to_string(), snapshot.clone());

        let inputs = SendLoadingCallInputs {
            transaction_id: transaction_id.to_string(),
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            items_in_queue: snapshot.items_in_queue,
            items_completed: snapshot.items_completed,
        };
        let result = inner
            .call_with_retries::<SendLoadingCall>(inputs)
            .await
            .map_err(|e| {
                IoError::with_message(IoErrorKind::RenderError, format!("loading send failed: {e}"))
            })?;

        if let Some(kind) = unrecoverable_kind(&result) {
            inner
                .loading_states
                .lock()
                .expect("loading_states lock poisoned")
                .remove(transaction_id);
            return Err(IoError::new(kind));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionChannel for HostChannel {
    async fn send_log(
        &self,
        transaction_id: &str,
        data: String,
        index: u64,
        timestamp: u64,
    ) -> Result<(), IoError> {
        let inner = self.upgrade()?;
        let inputs = SendLogInputs {
            transaction_id: transaction_id.to_string(),
            data,
            index,
            timestamp,
        };
        inner
            .call_with_retries::<SendLog>(inputs)
            .await
            .map_err(|e| {
                IoError::with_message(IoErrorKind::RenderError, format!("log send failed: {e}"))
            })?;
        Ok(())
    }

    async fn send_redirect(
        &self,
        transaction_id: &str,
        target: &RedirectTarget,
    ) -> Result<(), IoError> {
        let inner = self.upgrade()?;
        let inputs = match target {
            RedirectTarget::Url(url) => SendRedirectInputs {
                transaction_id: transaction_id.to_string(),
                url: Some(url.clone()),
                route: None,
                params: None,
            },
            RedirectTarget::Route { route, params } => SendRedirectInputs {
                transaction_id: transaction_id.to_string(),
                url: None,
                route: Some(route.clone()),
                params: params.clone(),
            },
        };
        let result = inner
            .call_with_retries::<SendRedirect>(inputs)
            .await
            .map_err(|e| {
                IoError::with_message(IoErrorKind::RenderError, format!("redirect failed: {e}"))
            })?;
        if let Some(kind) = unrecoverable_kind(&result) {
            return Err(IoError::new(kind));
        }
        Ok(())
    }

    async fn mark_complete(&self, transaction_id: &str, result: &ActionResult) {
        let Ok(inner) = self.upgrade() else { return };

        let serialized = match serde_json::to_string(result) {
            Ok(serialized) => serialized,
            Err(e) => {
                log::error!("[Host] Unserializable result for {transaction_id}: {e}");
                return;
            }
        };
        let inputs = MarkTransactionCompleteInputs {
            transaction_id: transaction_id.to_string(),
            result: serialized,
        };
        if let Err(e) = inner
            .call_with_retries::<MarkTransactionComplete>(inputs)
            .await
        {
            log::error!("[Host] Failed to report completion of {transaction_id}: {e}");
        }
    }
}

#[async_trait]
impl PageChannel for HostChannel {
    async fn send_page(&self, page_key: &str, layout: &PageLayout) -> Result<(), IoError> {
        let inner = self.upgrade()?;

        let page = serde_json::to_string(layout).map_err(|e| {
            IoError::with_message(IoErrorKind::RenderError, format!("unserializable layout: {e}"))
        })?;
        let inputs = SendPageInputs {
            page_key: page_key.to_string(),
            page,
        };

        inner
            .pending_page_layouts
            .lock()
            .expect("pending_page_layouts lock poisoned")
            .insert(page_key.to_string(), inputs.clone());

        let result = inner
            .call_with_retries::<SendPage>(inputs)
            .await
            .map_err(|e| {
                IoError::with_message(IoErrorKind::RenderError, format!("page send failed: {e}"))
            })?;

        if let Some(kind) = unrecoverable_kind(&result) {
            inner
                .pending_page_layouts
                .lock()
                .expect("pending_page_layouts lock poisoned")
                .remove(page_key);
            return Err(IoError::new(kind));
        }
        Ok(())
    }
}
