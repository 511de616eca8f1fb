//! Handler-facing I/O surface.
//!
//! Handlers receive an [`Io`] value whose namespaces mirror the dashboard
//! control set:
//!
//! ```ignore
//! let name = io.input.text("Name").await?;
//! let plan = io.select.single("Plan", plans).await?;
//! io.display.markdown(format!("Provisioning **{name}**...")).await?;
//!
//! let result = io
//!     .group(vec![
//!         io.input.text("First").into(),
//!         io.input.text("Last").into(),
//!         io.input.email("Email").into(),
//!     ])
//!     .await?;
//! ```
//!
//! Every method returns an awaitable promise; a group reduces N awaits to
//! one service round-trip.

pub mod builder;
pub mod client;
pub mod component;
pub mod registry;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IoError, IoErrorKind};
use crate::io::builder::{
    bool_parse, number_parse, string_parse, unit_parse, GroupItem, GroupPromise, IoPromise,
};
use crate::io::component::ComponentSpec;
use crate::io::registry::method_names;

pub use builder::IoFuture;
pub use client::{GroupMember, GroupResult, IoClient, IoEvent, RenderSender};
pub use component::{Component, ComponentState};
pub use registry::{BuiltinRegistry, ComponentRegistry};

/// One choice in a select control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOption {
    /// Label shown to the user.
    pub label: String,
    /// Value reported back.
    pub value: Value,
}

impl SelectOption {
    /// Build an option.
    pub fn new(label: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Text inputs.
#[derive(Clone)]
pub struct InputIo {
    client: Arc<IoClient>,
}

impl InputIo {
    /// Single-line text input.
    pub fn text(&self, label: impl Into<String>) -> IoPromise<String> {
        IoPromise::new(
            Arc::clone(&self.client),
            ComponentSpec::new(method_names::INPUT_TEXT, label),
            string_parse(),
        )
    }

    /// Email input.
    pub fn email(&self, label: impl Into<String>) -> IoPromise<String> {
        IoPromise::new(
            Arc::clone(&self.client),
            ComponentSpec::new(method_names::INPUT_EMAIL, label),
            string_parse(),
        )
    }

    /// Numeric input.
    pub fn number(&self, label: impl Into<String>) -> IoPromise<f64> {
        IoPromise::new(
            Arc::clone(&self.client),
            ComponentSpec::new(method_names::INPUT_NUMBER, label),
            number_parse(),
        )
    }

    /// Checkbox.
    pub fn boolean(&self, label: impl Into<String>) -> IoPromise<bool> {
        IoPromise::new(
            Arc::clone(&self.client),
            ComponentSpec::new(method_names::INPUT_BOOLEAN, label),
            bool_parse(),
        )
    }
}

/// Select controls.
#[derive(Clone)]
pub struct SelectIo {
    client: Arc<IoClient>,
}

impl SelectIo {
    /// Single-choice dropdown.
    pub fn single(
        &self,
        label: impl Into<String>,
        options: Vec<SelectOption>,
    ) -> IoPromise<SelectOption> {
        let spec = ComponentSpec::new(method_names::SELECT_SINGLE, label);
        IoPromise::new(Arc::clone(&self.client), spec, Arc::new(parse_option))
            .with_prop("options", serde_json::to_value(options).unwrap_or_default())
    }

    /// Multi-choice list. The returned value is the selected subset.
    pub fn multiple(
        &self,
        label: impl Into<String>,
        options: Vec<SelectOption>,
    ) -> IoPromise<Vec<SelectOption>> {
        let spec = ComponentSpec::new(method_names::SELECT_MULTIPLE, label);
        IoPromise::new(
            Arc::clone(&self.client),
            spec,
            Arc::new(|raw: Value| {
                let Value::Array(items) = raw else {
                    return Err(IoError::with_message(
                        IoErrorKind::BadResponse,
                        "expected an array of options",
                    ));
                };
                items.into_iter().map(parse_option).collect()
            }),
        )
        .with_prop("options", serde_json::to_value(options).unwrap_or_default())
    }
}

fn parse_option(raw: Value) -> Result<SelectOption, IoError> {
    match raw {
        Value::Object(_) => serde_json::from_value(raw).map_err(|e| {
            IoError::with_message(IoErrorKind::BadResponse, format!("malformed option: {e}"))
        }),
        Value::String(s) => Ok(SelectOption::new(s.clone(), s)),
        other => Err(IoError::with_message(
            IoErrorKind::BadResponse,
            format!("expected an option, got {other}"),
        )),
    }
}

/// Display-only blocks.
#[derive(Clone)]
pub struct DisplayIo {
    client: Arc<IoClient>,
}

impl DisplayIo {
    fn display_spec(method: &str, label: impl Into<String>) -> ComponentSpec {
        let mut spec = ComponentSpec::new(method, label);
        spec.display_only = true;
        spec
    }

    /// Section heading.
    pub fn heading(&self, text: impl Into<String>) -> IoPromise<()> {
        IoPromise::new(
            Arc::clone(&self.client),
            Self::display_spec(method_names::DISPLAY_HEADING, text),
            unit_parse(),
        )
    }

    /// Markdown block.
    pub fn markdown(&self, text: impl Into<String>) -> IoPromise<()> {
        IoPromise::new(
            Arc::clone(&self.client),
            Self::display_spec(method_names::DISPLAY_MARKDOWN, text),
            unit_parse(),
        )
    }

    /// Data table.
    pub fn table(&self, label: impl Into<String>, rows: Vec<Value>) -> IoPromise<()> {
        IoPromise::new(
            Arc::clone(&self.client),
            Self::display_spec(method_names::DISPLAY_TABLE, label),
            unit_parse(),
        )
        .with_prop("data", Value::Array(rows))
    }
}

/// The I/O namespace handed to every handler.
#[derive(Clone)]
pub struct Io {
    client: Arc<IoClient>,
    /// Text inputs.
    pub input: InputIo,
    /// Select controls.
    pub select: SelectIo,
    /// Display-only blocks.
    pub display: DisplayIo,
}

impl std::fmt::Debug for Io {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Io")
            .field("transaction_id", &self.client.transaction_id())
            .finish_non_exhaustive()
    }
}

impl Io {
    /// Wrap a render client.
    pub(crate) fn new(client: Arc<IoClient>) -> Self {
        Self {
            input: InputIo {
                client: Arc::clone(&client),
            },
            select: SelectIo {
                client: Arc::clone(&client),
            },
            display: DisplayIo {
                client: Arc::clone(&client),
            },
            client,
        }
    }

    /// Render several components in one instruction; results come back
    /// positionally.
    pub fn group(&self, items: Vec<GroupItem>) -> GroupPromise {
        GroupPromise::new(Arc::clone(&self.client), items)
    }

    /// Confirmation dialog.
    pub fn confirm(&self, label: impl Into<String>) -> IoPromise<bool> {
        IoPromise::new(
            Arc::clone(&self.client),
            ComponentSpec::new(method_names::CONFIRM, label),
            bool_parse(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::client::RenderSender;
    use crate::rpc::methods::{IoResponse, IoResponseKind, RenderInstruction};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<RenderInstruction>>,
    }

    #[async_trait]
    impl RenderSender for RecordingSender {
        async fn send_render(
            &self,
            _transaction_id: &str,
            instruction: &RenderInstruction,
        ) -> Result<(), IoError> {
            self.sent.lock().unwrap().push(instruction.clone());
            Ok(())
        }
    }

    fn test_io() -> (Io, mpsc::UnboundedSender<IoEvent>, Arc<RecordingSender>) {
        let sender = Arc::new(RecordingSender::default());
        let (client, event_tx) = IoClient::new(
            "txn-io",
            Arc::clone(&sender) as Arc<dyn RenderSender>,
            Arc::new(BuiltinRegistry::new()),
            false,
        );
        (Io::new(client), event_tx, sender)
    }

    fn reply(event_tx: &mpsc::UnboundedSender<IoEvent>, generation: &str, values: Vec<Value>) {
        event_tx
            .send(IoEvent {
                response: IoResponse {
                    id: generation.to_string(),
                    transaction_id: "txn-io".into(),
                    kind: IoResponseKind::Return,
                    values,
                    choice: None,
                },
                verdict: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_text_promise_awaits_typed_value() {
        let (io, event_tx, _sender) = test_io();

        let promise = io.input.text("Name").placeholder("Ada");
        let task = tokio::spawn(async move { promise.await });
        tokio::task::yield_now().await;
        reply(&event_tx, "1", vec![json!("Ada")]);

        assert_eq!(task.await.unwrap().unwrap(), "Ada");
    }

    #[tokio::test]
    async fn test_optional_returns_none_on_null() {
        let (io, event_tx, _sender) = test_io();

        let promise = io.input.text("Nickname").optional();
        let task = tokio::spawn(async move { promise.await });
        tokio::task::yield_now().await;
        reply(&event_tx, "1", vec![Value::Null]);

        assert_eq!(task.await.unwrap().unwrap(), None);
    }

    #[tokio::test]
    async fn test_multiple_collects_values() {
        let (io, event_tx, _sender) = test_io();

        let promise = io.input.text("Tags").multiple();
        let task = tokio::spawn(async move { promise.await });
        tokio::task::yield_now().await;
        reply(&event_tx, "1", vec![json!(["a", "b"])]);

        assert_eq!(task.await.unwrap().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_group_returns_positional_values() {
        let (io, event_tx, sender) = test_io();

        let group = io.group(vec![
            io.input.text("First").into(),
            io.input.text("Last").into(),
            io.input.email("Email").into(),
        ]);
        let task = tokio::spawn(async move { group.await });
        tokio::task::yield_now().await;
        reply(
            &event_tx,
            "1",
            vec![json!("Ada"), json!("Lovelace"), json!("a@b.c")],
        );

        let result = task.await.unwrap().unwrap();
        assert_eq!(
            result.values,
            vec![json!("Ada"), json!("Lovelace"), json!("a@b.c")]
        );

        // All three travelled in a single instruction.
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_render.len(), 3);
    }

    #[tokio::test]
    async fn test_select_single_parses_option() {
        let (io, event_tx, sender) = test_io();

        let options = vec![
            SelectOption::new("Basic", "basic"),
            SelectOption::new("Pro", "pro"),
        ];
        let promise = io.select.single("Plan", options);
        let task = tokio::spawn(async move { promise.await });
        tokio::task::yield_now().await;
        reply(&event_tx, "1", vec![json!({"label": "Pro", "value": "pro"})]);

        let picked = task.await.unwrap().unwrap();
        assert_eq!(picked.value, json!("pro"));

        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].to_render[0].props["options"][1]["label"], "Pro");
    }

    #[tokio::test]
    async fn test_validate_rejects_then_passes() {
        let (io, event_tx, _sender) = test_io();

        let promise = io
            .input
            .text("Age")
            .validate(|age: &String| {
                if age.is_empty() {
                    Some("required".to_string())
                } else {
                    None
                }
            });
        let task = tokio::spawn(async move { promise.await });
        tokio::task::yield_now().await;

        let (verdict_tx, verdict_rx) = tokio::sync::oneshot::channel();
        event_tx
            .send(IoEvent {
                response: IoResponse {
                    id: "1".into(),
                    transaction_id: "txn-io".into(),
                    kind: IoResponseKind::Validate,
                    values: vec![json!("")],
                    choice: None,
                },
                verdict: Some(verdict_tx),
            })
            .unwrap();
        assert_eq!(verdict_rx.await.unwrap(), Some("required".to_string()));

        reply(&event_tx, "1", vec![json!("42")]);
        assert_eq!(task.await.unwrap().unwrap(), "42");
    }

    #[tokio::test]
    async fn test_display_markdown_renders() {
        let (io, event_tx, sender) = test_io();

        let promise = io.display.markdown("**hello**");
        let task = tokio::spawn(async move { promise.await });
        tokio::task::yield_now().await;
        reply(&event_tx, "1", vec![Value::Null]);

        task.await.unwrap().unwrap();
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent[0].to_render[0].method_name, "DISPLAY_MARKDOWN");
    }
}
