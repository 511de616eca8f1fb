//! Per-transaction render loop.
//!
//! One [`IoClient`] exists per transaction (or page session). Handler-side
//! builders compile into component groups; the client ships each group as
//! a render instruction through the host's send path, then waits on the
//! transaction's response stream. State updates re-render the same
//! generation; validation round-trips answer with a verdict; a `RETURN`
//! finishes the generation and resumes the handler.
//!
//! Renders are strictly FIFO within a transaction: issuing a render while
//! one is outstanding fails with `RENDER_ERROR`.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::{IoError, IoErrorKind};
use crate::io::component::{Component, ComponentSpec};
use crate::io::registry::ComponentRegistry;
use crate::rpc::methods::{ChoiceButton, IoResponse, IoResponseKind, RenderInstruction};

/// Validates the whole group's parsed values; `Some` rejects.
pub type GroupValidatorFn = Arc<dyn Fn(&[Value]) -> Option<String> + Send + Sync>;

/// Validates one member's parsed value; `Some` rejects.
pub type MemberValidatorFn = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

/// One member of a render group: the component spec plus its chained
/// validator, compiled from a builder.
pub struct GroupMember {
    /// Component description.
    pub spec: ComponentSpec,
    /// Per-member validator.
    pub validator: Option<MemberValidatorFn>,
}

impl std::fmt::Debug for GroupMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupMember")
            .field("spec", &self.spec)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// Positional result of one render group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupResult {
    /// Parsed per-component values, in group order.
    pub values: Vec<Value>,
    /// Activated choice button, when the group had choices.
    pub choice: Option<String>,
}

/// Send path from the render loop up into the host controller.
///
/// Implementations record the instruction in the pending-render table
/// before shipping it, so it survives for replay after a reconnect.
#[async_trait]
pub trait RenderSender: Send + Sync {
    /// Ship a render instruction for a transaction.
    async fn send_render(
        &self,
        transaction_id: &str,
        instruction: &RenderInstruction,
    ) -> Result<(), IoError>;
}

/// An inbound response event, routed here by the host dispatcher.
pub struct IoEvent {
    /// Decoded response body.
    pub response: IoResponse,
    /// Present for `VALIDATE` responses: where to send the verdict
    /// (`None` accepts, `Some(message)` rejects).
    pub verdict: Option<oneshot::Sender<Option<String>>>,
}

impl std::fmt::Debug for IoEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoEvent")
            .field("kind", &self.response.kind)
            .field("id", &self.response.id)
            .finish_non_exhaustive()
    }
}

/// Resets the FIFO guard when a render finishes, however it finishes.
struct RenderGuard<'a>(&'a AtomicBool);

impl Drop for RenderGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-transaction I/O client.
pub struct IoClient {
    transaction_id: String,
    sender: Arc<dyn RenderSender>,
    registry: Arc<dyn ComponentRegistry>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<IoEvent>>,
    next_generation: AtomicU64,
    render_active: AtomicBool,
    display_resolves_immediately: bool,
    closed: Mutex<Option<IoErrorKind>>,
}

impl std::fmt::Debug for IoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoClient")
            .field("transaction_id", &self.transaction_id)
            .field("render_active", &self.render_active.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl IoClient {
    /// Create a client plus the event sender the host dispatcher uses to
    /// deliver `IO_RESPONSE`s.
    pub fn new(
        transaction_id: impl Into<String>,
        sender: Arc<dyn RenderSender>,
        registry: Arc<dyn ComponentRegistry>,
        display_resolves_immediately: bool,
    ) -> (Arc<Self>, mpsc::UnboundedSender<IoEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            transaction_id: transaction_id.into(),
            sender,
            registry,
            events: tokio::sync::Mutex::new(event_rx),
            next_generation: AtomicU64::new(1),
            render_active: AtomicBool::new(false),
            display_resolves_immediately,
            closed: Mutex::new(None),
        });
        (client, event_tx)
    }

    /// Owning transaction id.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Flag the client closed; subsequent renders fail with `kind`.
    pub fn mark_closed(&self, kind: IoErrorKind) {
        let mut closed = self.closed.lock().expect("closed lock poisoned");
        if closed.is_none() {
            *closed = Some(kind);
        }
    }

    fn closed_kind(&self) -> Option<IoErrorKind> {
        *self.closed.lock().expect("closed lock poisoned")
    }

    /// Render one group and wait for its result.
    ///
    /// # Errors
    ///
    /// `RENDER_ERROR` for an empty group or a render issued while one is
    /// outstanding; `CANCELED`/`TRANSACTION_CLOSED` when the transaction
    /// ends mid-flight; `BAD_RESPONSE` when the service reply fails the
    /// registry's shape checks.
    pub async fn render_group(
        &self,
        members: Vec<GroupMember>,
        choice_buttons: Option<Vec<ChoiceButton>>,
        group_validator: Option<GroupValidatorFn>,
    ) -> Result<GroupResult, IoError> {
        if let Some(kind) = self.closed_kind() {
            return Err(IoError::new(kind));
        }
        if members.is_empty() {
            return Err(IoError::with_message(
                IoErrorKind::RenderError,
                "render group must not be empty",
            ));
        }

        if self
            .render_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(IoError::with_message(
                IoErrorKind::RenderError,
                "a render is already in progress for this transaction",
            ));
        }
        let _guard = RenderGuard(&self.render_active);

        let generation = self
            .next_generation
            .fetch_add(1, Ordering::SeqCst)
            .to_string();

        // Compile specs into live components, validating props through the
        // registry capability.
        let mut components = Vec::with_capacity(members.len());
        let mut validators = Vec::with_capacity(members.len());
        for member in members {
            let props = self
                .registry
                .parse_props(&member.spec.method_name, member.spec.initial_props.clone())
                .map_err(|e| IoError::with_message(IoErrorKind::RenderError, e.to_string()))?;
            let mut spec = member.spec;
            spec.initial_props = props;
            let (component, _future) = Component::new(spec);
            components.push(component);
            validators.push(member.validator);
        }

        let has_validator =
            group_validator.is_some() || validators.iter().any(Option::is_some);
        let all_display = components.iter().all(|c| c.spec().display_only);

        let instruction = self.build_instruction(
            &generation,
            &components,
            choice_buttons.clone(),
            has_validator,
            None,
        );
        self.sender
            .send_render(&self.transaction_id, &instruction)
            .await?;
        for component in &components {
            component.mark_awaiting();
        }

        if all_display && self.display_resolves_immediately {
            let values = vec![Value::Null; components.len()];
            for component in &components {
                component.resolve(Ok(Value::Null));
            }
            return Ok(GroupResult {
                values,
                choice: None,
            });
        }

        self.await_result(
            &generation,
            components,
            validators,
            group_validator,
            choice_buttons,
            has_validator,
        )
        .await
    }

    /// Wait on the event stream until this generation returns or dies.
    async fn await_result(
        &self,
        generation: &str,
        components: Vec<Arc<Component>>,
        validators: Vec<Option<MemberValidatorFn>>,
        group_validator: Option<GroupValidatorFn>,
        choice_buttons: Option<Vec<ChoiceButton>>,
        has_validator: bool,
    ) -> Result<GroupResult, IoError> {
        let mut events = self.events.lock().await;

        loop {
            let Some(event) = events.recv().await else {
                let kind = self.closed_kind().unwrap_or(IoErrorKind::TransactionClosed);
                let err = IoError::new(kind);
                for component in &components {
                    component.resolve(Err(err.clone()));
                }
                return Err(err);
            };

            if event.response.kind == IoResponseKind::Canceled {
                let err = IoError::canceled();
                for component in &components {
                    component.resolve(Err(err.clone()));
                }
                return Err(err);
            }

            if event.response.id != generation {
                log::debug!(
                    "[Io] Ignoring stale response gen={} (current {generation})",
                    event.response.id
                );
                if let Some(verdict) = event.verdict {
                    let _ = verdict.send(Some("stale render generation".to_string()));
                }
                continue;
            }

            match event.response.kind {
                IoResponseKind::Return => {
                    let values =
                        self.parse_return_values(&components, &event.response.values)?;
                    for (component, value) in components.iter().zip(values.iter()) {
                        component.resolve(Ok(value.clone()));
                    }
                    return Ok(GroupResult {
                        values,
                        choice: event.response.choice,
                    });
                }
                IoResponseKind::SetState => {
                    let mut changed = false;
                    for (i, component) in components.iter().enumerate() {
                        let Some(raw) = event.response.values.get(i) else {
                            continue;
                        };
                        if raw.is_null() {
                            continue;
                        }
                        let state = match self
                            .registry
                            .parse_state(&component.spec().method_name, raw.clone())
                        {
                            Ok(state) => state,
                            Err(e) => {
                                log::warn!("[Io] Dropping malformed state update: {e}");
                                continue;
                            }
                        };
                        match component.set_state(state) {
                            Ok(Some(_)) => changed = true,
                            Ok(None) => {}
                            Err(e) => {
                                log::warn!("[Io] State-change hook failed: {e}");
                            }
                        }
                    }
                    if changed {
                        let instruction = self.build_instruction(
                            generation,
                            &components,
                            choice_buttons.clone(),
                            has_validator,
                            None,
                        );
                        self.sender
                            .send_render(&self.transaction_id, &instruction)
                            .await?;
                    }
                }
                IoResponseKind::Validate => {
                    let verdict = self.run_validators(
                        &components,
                        &validators,
                        &group_validator,
                        &event.response.values,
                    );
                    if let Some(message) = &verdict {
                        // Re-render with the rejection attached so the
                        // pending table replays the prompt faithfully.
                        let instruction = self.build_instruction(
                            generation,
                            &components,
                            choice_buttons.clone(),
                            has_validator,
                            Some(message.clone()),
                        );
                        self.sender
                            .send_render(&self.transaction_id, &instruction)
                            .await?;
                    }
                    if let Some(reply) = event.verdict {
                        let _ = reply.send(verdict);
                    }
                }
                IoResponseKind::Canceled => unreachable!("handled above"),
            }
        }
    }

    /// Parse positional return values through the registry.
    fn parse_return_values(
        &self,
        components: &[Arc<Component>],
        raw_values: &[Value],
    ) -> Result<Vec<Value>, IoError> {
        let mut out = Vec::with_capacity(components.len());
        for (i, component) in components.iter().enumerate() {
            let spec = component.spec();
            let raw = raw_values.get(i).cloned().unwrap_or(Value::Null);

            let parsed = if spec.display_only {
                Value::Null
            } else if raw.is_null() && spec.is_optional {
                Value::Null
            } else if spec.is_multiple {
                let Value::Array(items) = raw else {
                    return Err(IoError::with_message(
                        IoErrorKind::BadResponse,
                        format!("{} expected an array of values", spec.method_name),
                    ));
                };
                let mut parsed_items = Vec::with_capacity(items.len());
                for item in items {
                    let parsed_item = self
                        .registry
                        .parse_return(&spec.method_name, item)
                        .map_err(|e| {
                            IoError::with_message(IoErrorKind::BadResponse, e.to_string())
                        })?;
                    parsed_items.push(parsed_item);
                }
                Value::Array(parsed_items)
            } else {
                self.registry
                    .parse_return(&spec.method_name, raw)
                    .map_err(|e| {
                        IoError::with_message(IoErrorKind::BadResponse, e.to_string())
                    })?
            };
            out.push(parsed);
        }
        Ok(out)
    }

    /// Run member validators, then the group validator. First rejection
    /// wins.
    fn run_validators(
        &self,
        components: &[Arc<Component>],
        validators: &[Option<MemberValidatorFn>],
        group_validator: &Option<GroupValidatorFn>,
        raw_values: &[Value],
    ) -> Option<String> {
        let parsed = match self.parse_return_values(components, raw_values) {
            Ok(parsed) => parsed,
            Err(e) => return Some(e.message.unwrap_or_else(|| "invalid value".to_string())),
        };

        for (i, validator) in validators.iter().enumerate() {
            let Some(validator) = validator else { continue };
            let spec = components[i].spec();
            if spec.is_optional && parsed[i].is_null() {
                continue;
            }
            if let Some(message) = validator(&parsed[i]) {
                return Some(message);
            }
        }

        if let Some(validator) = group_validator {
            if let Some(message) = validator(&parsed) {
                return Some(message);
            }
        }

        None
    }

    fn build_instruction(
        &self,
        generation: &str,
        components: &[Arc<Component>],
        choice_buttons: Option<Vec<ChoiceButton>>,
        has_validator: bool,
        validation_error_message: Option<String>,
    ) -> RenderInstruction {
        RenderInstruction {
            id: generation.to_string(),
            to_render: components.iter().map(|c| c.render_form()).collect(),
            choice_buttons,
            has_validator,
            validation_error_message,
        }
    }
}
