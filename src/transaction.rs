//! Transaction and page-session lifecycle.
//!
//! One transaction is one execution of an action for one user. The
//! runtime builds the context object, binds it ambiently for the duration
//! of the handler, translates the handler's outcome into an
//! [`ActionResult`], and reports it. Handler errors never propagate past
//! the transaction boundary.
//!
//! Page sessions are the page variant: the handler produces a layout,
//! asynchronously-resolving layout fields trigger additional renders, and
//! the session ends when the service closes the page.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::{ErrorReport, OnErrorFn};
use crate::constants::{LOG_TRUNCATION_MARKER, MAX_LOG_BYTES};
use crate::error::{HostError, IoError, IoErrorKind};
use crate::io::Io;
use crate::loading::LoadingHandle;
use crate::routes::{ActionRoute, Layout, LayoutField, PageRoute};
use crate::rpc::methods::{
    ActionInfo, ActionResult, OpenPageInputs, OrganizationInfo, PageLayout,
    StartTransactionInputs, TransactionStatus, UserInfo,
};

/// Where a redirect points.
#[derive(Debug, Clone, PartialEq)]
pub enum RedirectTarget {
    /// External URL.
    Url(String),
    /// Another dashboard route.
    Route {
        /// Slug path.
        route: String,
        /// Params handed to the target.
        params: Option<Value>,
    },
}

/// Side-channel sends the runtime needs from the host controller.
#[async_trait]
pub trait TransactionChannel: Send + Sync {
    /// Ship one log line.
    async fn send_log(
        &self,
        transaction_id: &str,
        data: String,
        index: u64,
        timestamp: u64,
    ) -> Result<(), IoError>;

    /// Ship a redirect.
    async fn send_redirect(
        &self,
        transaction_id: &str,
        target: &RedirectTarget,
    ) -> Result<(), IoError>;

    /// Report the final result.
    async fn mark_complete(&self, transaction_id: &str, result: &ActionResult);
}

/// Sends page layouts for an open page session.
#[async_trait]
pub trait PageChannel: Send + Sync {
    /// Ship the current layout for a page session.
    async fn send_page(&self, page_key: &str, layout: &PageLayout) -> Result<(), IoError>;
}

/// Truncate a log payload to the byte cap, appending the marker.
///
/// Payloads of exactly the cap pass through untouched; the cut respects
/// UTF-8 boundaries.
pub fn truncate_log(data: &str) -> String {
    if data.len() <= MAX_LOG_BYTES {
        return data.to_string();
    }
    let mut cut = MAX_LOG_BYTES - LOG_TRUNCATION_MARKER.len();
    while !data.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &data[..cut], LOG_TRUNCATION_MARKER)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct CtxInner {
    transaction_id: String,
    channel: Arc<dyn TransactionChannel>,
    log_index: std::sync::atomic::AtomicU64,
    redirected: Mutex<Option<RedirectTarget>>,
}

/// Context handed to every action handler (and readable ambiently via
/// [`current_ctx`]).
#[derive(Clone)]
pub struct ActionCtx {
    /// Invoking user.
    pub user: UserInfo,
    /// Handler params.
    pub params: Value,
    /// Environment of this run.
    pub environment: String,
    /// Owning organization, when known.
    pub organization: Option<OrganizationInfo>,
    /// The action being run.
    pub action: ActionInfo,
    /// Progress reporting.
    pub loading: LoadingHandle,
    inner: Arc<CtxInner>,
}

impl std::fmt::Debug for ActionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCtx")
            .field("transaction_id", &self.inner.transaction_id)
            .field("user", &self.user.email)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

impl ActionCtx {
    /// Build a context for one transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: impl Into<String>,
        user: UserInfo,
        params: Value,
        environment: impl Into<String>,
        organization: Option<OrganizationInfo>,
        action: ActionInfo,
        loading: LoadingHandle,
        channel: Arc<dyn TransactionChannel>,
    ) -> Self {
        Self {
            user,
            params,
            environment: environment.into(),
            organization,
            action,
            loading,
            inner: Arc::new(CtxInner {
                transaction_id: transaction_id.into(),
                channel,
                log_index: std::sync::atomic::AtomicU64::new(0),
                redirected: Mutex::new(None),
            }),
        }
    }

    /// Owning transaction id.
    pub fn transaction_id(&self) -> &str {
        &self.inner.transaction_id
    }

    /// Ship a log line to the transaction's inline log.
    ///
    /// Lines carry a monotonic index so the service can order them even
    /// across delivery attempts; payloads are capped at 10 kB.
    pub async fn log(&self, message: impl Into<String>) {
        let index = self.inner.log_index.fetch_add(1, Ordering::SeqCst);
        let data = truncate_log(&message.into());
        if let Err(e) = self
            .inner
            .channel
            .send_log(&self.inner.transaction_id, data, index, now_millis())
            .await
        {
            log::debug!(
                "[Txn] Log send failed for {}: {e}",
                self.inner.transaction_id
            );
        }
    }

    /// Redirect the user. The transaction reports `REDIRECTED` when the
    /// handler returns afterward.
    pub async fn redirect(&self, target: RedirectTarget) -> Result<(), IoError> {
        self.inner
            .channel
            .send_redirect(&self.inner.transaction_id, &target)
            .await?;
        *self
            .inner
            .redirected
            .lock()
            .expect("redirected lock poisoned") = Some(target);
        Ok(())
    }

    fn was_redirected(&self) -> bool {
        self.inner
            .redirected
            .lock()
            .expect("redirected lock poisoned")
            .is_some()
    }
}

/// Context handed to page handlers.
#[derive(Debug, Clone)]
pub struct PageCtx {
    /// Open page session key.
    pub page_key: String,
    /// Viewing user.
    pub user: UserInfo,
    /// Page params.
    pub params: Value,
    /// Environment.
    pub environment: String,
    /// Owning organization, when known.
    pub organization: Option<OrganizationInfo>,
}

/// The ambient binding: what [`current_io`]/[`current_ctx`] read.
#[derive(Clone)]
pub struct TransactionScope {
    /// The transaction's I/O surface.
    pub io: Io,
    /// The transaction's context.
    pub ctx: ActionCtx,
}

tokio::task_local! {
    static CURRENT_TRANSACTION: TransactionScope;
}

/// The ambient `io` of the current transaction.
///
/// # Errors
///
/// `NoTransactionContext` outside a handler invocation. Tasks the handler
/// spawns do not inherit the binding; pass `io` explicitly instead.
pub fn current_io() -> Result<Io, HostError> {
    CURRENT_TRANSACTION
        .try_with(|scope| scope.io.clone())
        .map_err(|_| HostError::NoTransactionContext)
}

/// The ambient `ctx` of the current transaction.
///
/// # Errors
///
/// `NoTransactionContext` outside a handler invocation.
pub fn current_ctx() -> Result<ActionCtx, HostError> {
    CURRENT_TRANSACTION
        .try_with(|scope| scope.ctx.clone())
        .map_err(|_| HostError::NoTransactionContext)
}

/// Run one transaction to completion and report its result.
///
/// Never panics the surrounding task for handler failures: every outcome
/// maps to an [`ActionResult`] sent via the channel.
pub async fn run_action(
    inputs: StartTransactionInputs,
    action: ActionRoute,
    io: Io,
    ctx: ActionCtx,
    channel: Arc<dyn TransactionChannel>,
    on_error: Option<OnErrorFn>,
) {
    let transaction_id = inputs.transaction_id.clone();
    // The probe shares the ctx inner, so the redirect flag set inside the
    // handler is visible here afterward.
    let ctx_probe = ctx.clone();
    let scope = TransactionScope {
        io: io.clone(),
        ctx: ctx.clone(),
    };

    let handler = Arc::clone(&action.handler);
    let outcome = CURRENT_TRANSACTION
        .scope(scope, async move { handler(io, ctx).await })
        .await;

    let result = match outcome {
        Ok(data) => {
            // A redirect followed by a normal return reports REDIRECTED.
            let status = if ctx_probe.was_redirected() {
                TransactionStatus::Redirected
            } else {
                TransactionStatus::Success
            };
            ActionResult {
                schema_version: ActionResult::SCHEMA_VERSION,
                status,
                data: Some(data),
            }
        }
        Err(err) => classify_error(&inputs, err, on_error.as_ref()),
    };

    channel.mark_complete(&transaction_id, &result).await;
}

/// Map a handler error to a result, firing the `on_error` callback for
/// genuine failures.
fn classify_error(
    inputs: &StartTransactionInputs,
    err: anyhow::Error,
    on_error: Option<&OnErrorFn>,
) -> ActionResult {
    if let Some(io_err) = err.downcast_ref::<IoError>() {
        if matches!(
            io_err.kind,
            IoErrorKind::Canceled | IoErrorKind::TransactionClosed
        ) {
            return ActionResult {
                schema_version: ActionResult::SCHEMA_VERSION,
                status: TransactionStatus::Canceled,
                data: None,
            };
        }
    }

    let message = err.to_string();
    let error_name = err
        .downcast_ref::<IoError>()
        .map(|e| e.kind.as_str().to_string())
        .unwrap_or_else(|| "Error".to_string());

    log::error!(
        "[Txn] Handler for {} failed: {message}",
        inputs.action.slug
    );

    if let Some(on_error) = on_error {
        on_error(ErrorReport {
            route: inputs.action.slug.clone(),
            params: inputs.params.clone(),
            user_email: Some(inputs.user.email.clone()),
            organization_slug: None,
            error: error_name.clone(),
            message: message.clone(),
        });
    }

    let mut data = json!({
        "error": error_name,
        "message": message,
    });
    if let Some(cause) = err.chain().nth(1) {
        data["cause"] = json!(cause.to_string());
    }

    ActionResult {
        schema_version: ActionResult::SCHEMA_VERSION,
        status: TransactionStatus::Failure,
        data: Some(data),
    }
}

/// Run one page session: render the initial layout, then re-render as
/// pending fields resolve. Returns the join handles for the field tasks
/// so the caller can abort them on `CLOSE_PAGE`; `closed` is checked
/// again right before each late render, since a close can land while a
/// field task is already running.
pub async fn run_page(
    inputs: OpenPageInputs,
    page: PageRoute,
    organization: Option<OrganizationInfo>,
    channel: Arc<dyn PageChannel>,
    closed: Arc<std::sync::atomic::AtomicBool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let Some(handler) = page.handler else {
        log::debug!("[Page] {} has no layout handler", inputs.page.slug);
        return Vec::new();
    };

    let ctx = PageCtx {
        page_key: inputs.page_key.clone(),
        user: inputs.user.clone(),
        params: inputs.params.clone(),
        environment: inputs.environment.clone(),
        organization,
    };

    let layout = match handler(ctx).await {
        Ok(layout) => layout,
        Err(e) => {
            log::error!("[Page] Handler for {} failed: {e}", inputs.page.slug);
            let fallback = PageLayout {
                title: Some(page.name.clone()),
                description: Some(format!("Failed to load page: {e}")),
                ..PageLayout::default()
            };
            if let Err(send_err) = channel.send_page(&inputs.page_key, &fallback).await {
                log::warn!("[Page] Layout send failed: {send_err}");
            }
            return Vec::new();
        }
    };

    let Layout {
        title,
        description,
        menu_items,
        children,
    } = layout;

    let current = Arc::new(Mutex::new(PageLayout {
        title: None,
        description: None,
        menu_items,
        children,
    }));
    let mut pending_tasks = Vec::new();

    // Split each field into its resolved value and an optional field task.
    let mut spawn_field = |field: Option<LayoutField>,
                           apply: fn(&mut PageLayout, String)| {
        match field {
            None => {}
            Some(LayoutField::Text(value)) => {
                apply(&mut current.lock().expect("layout lock poisoned"), value);
            }
            Some(LayoutField::Pending(fut)) => {
                let current = Arc::clone(&current);
                let channel = Arc::clone(&channel);
                let page_key = inputs.page_key.clone();
                let closed = Arc::clone(&closed);
                pending_tasks.push(tokio::spawn(async move {
                    let value = fut.await;
                    if closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let snapshot = {
                        let mut layout = current.lock().expect("layout lock poisoned");
                        apply(&mut layout, value);
                        layout.clone()
                    };
                    if let Err(e) = channel.send_page(&page_key, &snapshot).await {
                        log::debug!("[Page] Async field render failed: {e}");
                    }
                }));
            }
        }
    };

    spawn_field(title, |layout, value| layout.title = Some(value));
    spawn_field(description, |layout, value| layout.description = Some(value));

    let initial = current.lock().expect("layout lock poisoned").clone();
    if let Err(e) = channel.send_page(&inputs.page_key, &initial).await {
        log::warn!("[Page] Initial layout send failed: {e}");
    }

    pending_tasks
}
