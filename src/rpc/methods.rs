//! Typed wire schemas for every RPC method.
//!
//! Each method is a marker type implementing [`RpcMethod`], pairing its
//! wire name with concrete input and output shapes. Both directions are
//! declared here: the host calls the `host → service` set and responds to
//! the `service → host` set; a stub service in tests does the reverse.
//!
//! All payloads are camelCase JSON on the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single RPC method: wire name plus input/output shapes.
pub trait RpcMethod {
    /// Wire method name.
    const NAME: &'static str;
    /// Call payload.
    type Input: Serialize + Send + Sync;
    /// Response payload.
    type Output: DeserializeOwned + Send;
}

// ============================================================================
// Shared payload pieces
// ============================================================================

/// One action as announced to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionAnnouncement {
    /// Slug path (`/`-joined page slugs plus the action slug).
    pub slug: String,
    /// Display name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description shown in the dashboard.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Hidden from listings but still invocable by direct link.
    #[serde(default)]
    pub unlisted: bool,
}

/// One page as announced to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageAnnouncement {
    /// Slug path of the page.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Whether the page has its own layout handler.
    #[serde(default)]
    pub has_handler: bool,
    /// Hidden from listings.
    #[serde(default)]
    pub unlisted: bool,
}

/// Organization details returned by the initialization handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationInfo {
    /// Display name.
    pub name: String,
    /// URL slug.
    pub slug: String,
}

/// Optional alert shipped with the initialization reply (for example, a
/// deprecated SDK version notice).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SdkAlert {
    /// Minimum SDK version the service wants to see.
    #[serde(default)]
    pub min_sdk_version: Option<String>,
    /// `INFO` / `WARNING` / `ERROR`.
    #[serde(default)]
    pub severity: Option<String>,
    /// Free-form message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Invoking user, as reported by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Email address.
    pub email: String,
    /// Given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// Role within the organization.
    #[serde(default)]
    pub role: Option<String>,
    /// Team slugs the user belongs to.
    #[serde(default)]
    pub teams: Vec<String>,
}

/// Error kinds a server reply can carry for a transaction-scoped call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionErrorKind {
    /// The end user or service canceled the transaction.
    Canceled,
    /// The transaction no longer exists on the service.
    TransactionClosed,
}

/// Structured error payload in a server reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerError {
    /// Machine-readable kind, when classified.
    #[serde(default)]
    pub kind: Option<TransactionErrorKind>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
}

/// Reply to transaction-scoped sends: a bare ack or a structured error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SendCallResult {
    /// Plain acknowledgement.
    Ok(bool),
    /// Structured error.
    Error(ServerError),
}

impl SendCallResult {
    /// Whether the reply acknowledges the send.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(true))
    }

    /// Whether retrying this send can never succeed (the transaction is
    /// gone on the service side).
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Self::Ok(_) => false,
            Self::Error(err) => matches!(
                err.kind,
                Some(TransactionErrorKind::Canceled)
                    | Some(TransactionErrorKind::TransactionClosed)
            ),
        }
    }
}

// ============================================================================
// host → service methods
// ============================================================================

/// `INITIALIZE_HOST` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeHostInputs {
    /// SDK name, e.g. `opshub-rs`.
    pub sdk_name: String,
    /// SDK semver.
    pub sdk_version: String,
    /// Flattened actions.
    pub actions: Vec<ActionAnnouncement>,
    /// Flattened pages.
    pub pages: Vec<PageAnnouncement>,
}

/// `INITIALIZE_HOST` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InitializeHostReturns {
    /// Host registered.
    #[serde(rename_all = "camelCase")]
    Success {
        /// Environment this host serves (`production`, `development`, ...).
        environment: String,
        /// Owning organization.
        organization: OrganizationInfo,
        /// Dashboard URL for this host's actions.
        dashboard_url: String,
        /// Slugs the service refused to register.
        #[serde(default)]
        invalid_slugs: Vec<String>,
        /// Free-form warnings to surface in host logs.
        #[serde(default)]
        warnings: Vec<String>,
        /// Optional SDK alert.
        #[serde(default)]
        sdk_alert: Option<SdkAlert>,
    },
    /// Host rejected (bad API key, for example).
    #[serde(rename_all = "camelCase")]
    Error {
        /// Why.
        message: String,
    },
}

/// `INITIALIZE_HOST`.
pub struct InitializeHost;

impl RpcMethod for InitializeHost {
    const NAME: &'static str = "INITIALIZE_HOST";
    type Input = InitializeHostInputs;
    type Output = InitializeHostReturns;
}

/// `DECLARE_HOST` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeclareHostReturns {
    /// Route set accepted.
    #[serde(rename_all = "camelCase")]
    Success {
        /// Slugs the service refused.
        #[serde(default)]
        invalid_slugs: Vec<String>,
    },
    /// Route set rejected.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Why.
        message: String,
    },
}

/// `DECLARE_HOST`: re-announce the route set on an already-initialized
/// host without a full re-initialize.
pub struct DeclareHost;

impl RpcMethod for DeclareHost {
    const NAME: &'static str = "DECLARE_HOST";
    type Input = InitializeHostInputs;
    type Output = DeclareHostReturns;
}

/// `SEND_IO_CALL` call payload. The render instruction travels as an
/// opaque serialized string so the pending-render table can replay it
/// byte-for-byte after a reconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendIoCallInputs {
    /// Owning transaction.
    pub transaction_id: String,
    /// Render generation (matches the response's `id`).
    pub id: String,
    /// Serialized [`RenderInstruction`].
    pub io_call: String,
}

/// `SEND_IO_CALL`.
pub struct SendIoCall;

impl RpcMethod for SendIoCall {
    const NAME: &'static str = "SEND_IO_CALL";
    type Input = SendIoCallInputs;
    type Output = SendCallResult;
}

/// `SEND_PAGE` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendPageInputs {
    /// Open page session.
    pub page_key: String,
    /// Serialized [`PageLayout`].
    pub page: String,
}

/// `SEND_PAGE`.
pub struct SendPage;

impl RpcMethod for SendPage {
    const NAME: &'static str = "SEND_PAGE";
    type Input = SendPageInputs;
    type Output = SendCallResult;
}

/// `SEND_LOADING_CALL` call payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendLoadingCallInputs {
    /// Owning transaction.
    pub transaction_id: String,
    /// Headline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Detail line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Total work items, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_in_queue: Option<u64>,
    /// Completed work items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_completed: Option<u64>,
}

/// `SEND_LOADING_CALL`.
pub struct SendLoadingCall;

impl RpcMethod for SendLoadingCall {
    const NAME: &'static str = "SEND_LOADING_CALL";
    type Input = SendLoadingCallInputs;
    type Output = SendCallResult;
}

/// `SEND_LOG` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendLogInputs {
    /// Owning transaction.
    pub transaction_id: String,
    /// Log text (already truncated to the byte cap).
    pub data: String,
    /// Monotonic per-transaction index; orders logs across network
    /// attempts.
    pub index: u64,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// `SEND_LOG`.
pub struct SendLog;

impl RpcMethod for SendLog {
    const NAME: &'static str = "SEND_LOG";
    type Input = SendLogInputs;
    type Output = SendCallResult;
}

/// `SEND_REDIRECT` call payload: exactly one of `url` or `route`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendRedirectInputs {
    /// Owning transaction.
    pub transaction_id: String,
    /// External URL target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Dashboard route target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// Params for a route target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// `SEND_REDIRECT`.
pub struct SendRedirect;

impl RpcMethod for SendRedirect {
    const NAME: &'static str = "SEND_REDIRECT";
    type Input = SendRedirectInputs;
    type Output = SendCallResult;
}

/// `MARK_TRANSACTION_COMPLETE` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkTransactionCompleteInputs {
    /// Completed transaction.
    pub transaction_id: String,
    /// Serialized [`ActionResult`].
    pub result: String,
}

/// `MARK_TRANSACTION_COMPLETE`.
pub struct MarkTransactionComplete;

impl RpcMethod for MarkTransactionComplete {
    const NAME: &'static str = "MARK_TRANSACTION_COMPLETE";
    type Input = MarkTransactionCompleteInputs;
    type Output = SendCallResult;
}

/// `BEGIN_HOST_SHUTDOWN` call payload (empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BeginHostShutdownInputs {}

/// `BEGIN_HOST_SHUTDOWN`: ask the service to stop dispatching new
/// transactions to this host.
pub struct BeginHostShutdown;

impl RpcMethod for BeginHostShutdown {
    const NAME: &'static str = "BEGIN_HOST_SHUTDOWN";
    type Input = BeginHostShutdownInputs;
    type Output = SendCallResult;
}

// ============================================================================
// service → host methods
// ============================================================================

/// Action reference inside `START_TRANSACTION`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionInfo {
    /// Slug path of the action.
    pub slug: String,
    /// Canonical dashboard URL of the action.
    #[serde(default)]
    pub url: Option<String>,
}

/// Page reference inside `OPEN_PAGE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Slug path of the page.
    pub slug: String,
}

/// `START_TRANSACTION` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionInputs {
    /// Fresh transaction id.
    pub transaction_id: String,
    /// Action to run.
    pub action: ActionInfo,
    /// Environment the run belongs to.
    pub environment: String,
    /// Invoking user.
    pub user: UserInfo,
    /// Handler params.
    #[serde(default)]
    pub params: Value,
    /// Param type metadata.
    #[serde(default)]
    pub params_meta: Option<Value>,
    /// Display-only renders resolve locally without a user response.
    #[serde(default)]
    pub display_resolves_immediately: bool,
}

/// `START_TRANSACTION`.
pub struct StartTransaction;

impl RpcMethod for StartTransaction {
    const NAME: &'static str = "START_TRANSACTION";
    type Input = StartTransactionInputs;
    type Output = HostAck;
}

/// `OPEN_PAGE` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenPageInputs {
    /// Fresh page session key.
    pub page_key: String,
    /// Page to open.
    pub page: PageInfo,
    /// Environment.
    pub environment: String,
    /// Viewing user.
    pub user: UserInfo,
    /// Page params.
    #[serde(default)]
    pub params: Value,
}

/// `OPEN_PAGE`.
pub struct OpenPage;

impl RpcMethod for OpenPage {
    const NAME: &'static str = "OPEN_PAGE";
    type Input = OpenPageInputs;
    type Output = HostAck;
}

/// `CLOSE_TRANSACTION` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloseTransactionInputs {
    /// Transaction to close.
    pub transaction_id: String,
}

/// `CLOSE_TRANSACTION`.
pub struct CloseTransaction;

impl RpcMethod for CloseTransaction {
    const NAME: &'static str = "CLOSE_TRANSACTION";
    type Input = CloseTransactionInputs;
    type Output = HostAck;
}

/// `CLOSE_PAGE` call payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClosePageInputs {
    /// Page session to close.
    pub page_key: String,
}

/// `CLOSE_PAGE`.
pub struct ClosePage;

impl RpcMethod for ClosePage {
    const NAME: &'static str = "CLOSE_PAGE";
    type Input = ClosePageInputs;
    type Output = HostAck;
}

/// `IO_RESPONSE` call payload. The response body travels serialized, like
/// the render instruction it answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IoResponseInputs {
    /// Owning transaction.
    pub transaction_id: String,
    /// Serialized [`IoResponse`].
    pub value: String,
}

/// `IO_RESPONSE`.
pub struct IoResponseCall;

impl RpcMethod for IoResponseCall {
    const NAME: &'static str = "IO_RESPONSE";
    type Input = IoResponseInputs;
    type Output = HostAck;
}

/// Host reply to a service-initiated call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostAck {
    /// Call accepted.
    Success,
    /// Call refused.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Why.
        #[serde(default)]
        message: Option<String>,
    },
    /// Validator verdict for a `VALIDATE` round-trip; `error: null` means
    /// the candidate values were accepted.
    #[serde(rename_all = "camelCase")]
    Validation {
        /// Rejection message, if rejected.
        error: Option<String>,
    },
}

// ============================================================================
// Payload bodies carried as serialized strings
// ============================================================================

/// What a component response means.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IoResponseKind {
    /// Final values for this render generation.
    Return,
    /// Interim state update for one or more components.
    SetState,
    /// The user or service canceled.
    Canceled,
    /// Candidate values for validator evaluation.
    Validate,
}

/// Decoded body of an `IO_RESPONSE` value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IoResponse {
    /// Render generation being answered.
    pub id: String,
    /// Owning transaction.
    pub transaction_id: String,
    /// What this response means.
    pub kind: IoResponseKind,
    /// Per-component payloads, positional.
    #[serde(default)]
    pub values: Vec<Value>,
    /// Activated choice button, for `Return` with choices.
    #[serde(default)]
    pub choice: Option<String>,
}

/// One component inside a render instruction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRender {
    /// Component method name (e.g. `INPUT_TEXT`).
    pub method_name: String,
    /// Label shown to the user.
    pub label: String,
    /// Current props (initial props merged with server-state updates).
    pub props: Value,
    /// Component accepts a state-change round-trip.
    #[serde(default)]
    pub is_stateful: bool,
    /// Value may be omitted by the user.
    #[serde(default)]
    pub is_optional: bool,
    /// Value is a list.
    #[serde(default)]
    pub is_multiple: bool,
}

/// A labelled submit button attached to a render group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceButton {
    /// Button label.
    pub label: String,
    /// Value reported back when activated.
    pub value: String,
    /// Visual theme (`primary`, `danger`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

/// The serialized description of the components to display at one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderInstruction {
    /// Render generation, unique and increasing per transaction.
    pub id: String,
    /// Components, in display order. Never empty.
    pub to_render: Vec<ComponentRender>,
    /// Attached submit buttons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_buttons: Option<Vec<ChoiceButton>>,
    /// The host holds a validator for this group; submissions go through a
    /// `VALIDATE` round-trip first.
    #[serde(default)]
    pub has_validator: bool,
    /// Rejection message from the previous validation attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error_message: Option<String>,
}

/// Final status of one transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Handler returned a value.
    Success,
    /// Handler failed.
    Failure,
    /// Transaction canceled before completion.
    Canceled,
    /// Handler redirected the user and ended.
    Redirected,
}

/// Serialized outcome reported via `MARK_TRANSACTION_COMPLETE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Result schema version.
    pub schema_version: u32,
    /// Final status.
    pub status: TransactionStatus,
    /// Return value (Success) or serialized error info (Failure).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ActionResult {
    /// Current result schema version.
    pub const SCHEMA_VERSION: u32 = 2;
}

/// A menu entry on a page layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    /// Label.
    pub label: String,
    /// Dashboard route target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    /// External URL target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Visual theme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

/// Serialized page layout shipped via `SEND_PAGE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageLayout {
    /// Page title, when resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Page description, when resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Menu entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_items: Option<Vec<MenuItem>>,
    /// Arbitrary display children.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Value>,
}
