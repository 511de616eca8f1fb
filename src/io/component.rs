//! Host-side model of one on-screen control.
//!
//! A component owns its props, a small state machine, and a one-shot
//! return value. State updates from the browser recompute props through
//! the component's `on_state_change` hook; the recomputed props are
//! merged into the next render of the same generation.
//!
//! ```text
//! RENDERING ──render sent──> AWAITING_RESPONSE ──RETURN──> RETURNED
//!                                   │    ▲
//!                          SET_STATE│    │ (stays awaiting)
//!                                   ▼    │
//!                               props recomputed
//!
//! any state ──cancel──> CANCELED
//! ```
//!
//! `RETURNED` and `CANCELED` are terminal for the render generation;
//! later state updates for the same generation are ignored.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::IoError;
use crate::rpc::methods::ComponentRender;

/// Recompute props from a new client state. Returns partial props merged
/// over the current ones.
pub type StateChangeFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// Observer fired after each props update.
pub type PropsUpdateFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// Immutable description a builder compiles into a live [`Component`].
#[derive(Clone)]
pub struct ComponentSpec {
    /// Wire method name.
    pub method_name: String,
    /// Label shown to the user.
    pub label: String,
    /// Props at first render.
    pub initial_props: Value,
    /// Value may be omitted.
    pub is_optional: bool,
    /// Value is a list.
    pub is_multiple: bool,
    /// Renders without producing a value.
    pub display_only: bool,
    /// State-change hook.
    pub on_state_change: Option<StateChangeFn>,
    /// Props observer.
    pub on_props_update: Option<PropsUpdateFn>,
}

impl std::fmt::Debug for ComponentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentSpec")
            .field("method_name", &self.method_name)
            .field("label", &self.label)
            .field("is_optional", &self.is_optional)
            .field("is_multiple", &self.is_multiple)
            .field("display_only", &self.display_only)
            .finish_non_exhaustive()
    }
}

impl ComponentSpec {
    /// Minimal spec for a method/label pair.
    pub fn new(method_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            label: label.into(),
            initial_props: Value::Object(serde_json::Map::new()),
            is_optional: false,
            is_multiple: false,
            display_only: false,
            on_state_change: None,
            on_props_update: None,
        }
    }
}

/// Render-generation lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Created, render not yet shipped.
    Rendering,
    /// Render shipped, waiting for the user.
    AwaitingResponse,
    /// Value received; terminal.
    Returned,
    /// Canceled; terminal.
    Canceled,
}

struct ComponentRuntime {
    state: ComponentState,
    props: Value,
}

/// One live control within a render generation.
pub struct Component {
    spec: ComponentSpec,
    runtime: Mutex<ComponentRuntime>,
    return_tx: Mutex<Option<oneshot::Sender<Result<Value, IoError>>>>,
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("method_name", &self.spec.method_name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Component {
    /// Instantiate a spec. Returns the component and its return future.
    pub fn new(spec: ComponentSpec) -> (Arc<Self>, oneshot::Receiver<Result<Value, IoError>>) {
        let (tx, rx) = oneshot::channel();
        let props = spec.initial_props.clone();
        let component = Arc::new(Self {
            spec,
            runtime: Mutex::new(ComponentRuntime {
                state: ComponentState::Rendering,
                props,
            }),
            return_tx: Mutex::new(Some(tx)),
        });
        (component, rx)
    }

    /// The spec this component was compiled from.
    pub fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ComponentState {
        self.runtime.lock().expect("runtime lock poisoned").state
    }

    /// Current props snapshot.
    pub fn props(&self) -> Value {
        self.runtime
            .lock()
            .expect("runtime lock poisoned")
            .props
            .clone()
    }

    /// Mark the render as shipped.
    pub fn mark_awaiting(&self) {
        let mut runtime = self.runtime.lock().expect("runtime lock poisoned");
        if runtime.state == ComponentState::Rendering {
            runtime.state = ComponentState::AwaitingResponse;
        }
    }

    /// Apply a client state update.
    ///
    /// Runs `on_state_change` to recompute partial props, merges them over
    /// the current props, fires the props observer, and stays in
    /// `AwaitingResponse`. Returns the merged props when they changed, or
    /// `None` when the update was ignored (no hook, or terminal state).
    pub fn set_state(&self, new_state: Value) -> anyhow::Result<Option<Value>> {
        let hook = match &self.spec.on_state_change {
            Some(hook) => Arc::clone(hook),
            None => return Ok(None),
        };

        {
            let runtime = self.runtime.lock().expect("runtime lock poisoned");
            if matches!(
                runtime.state,
                ComponentState::Returned | ComponentState::Canceled
            ) {
                return Ok(None);
            }
        }

        let partial = hook(new_state)?;
        let merged = {
            let mut runtime = self.runtime.lock().expect("runtime lock poisoned");
            merge_props(&mut runtime.props, partial);
            runtime.props.clone()
        };

        if let Some(observer) = &self.spec.on_props_update {
            observer(&merged);
        }

        Ok(Some(merged))
    }

    /// Resolve the return future. Terminal; later calls are ignored.
    ///
    /// Returns whether this call performed the transition.
    pub fn resolve(&self, value: Result<Value, IoError>) -> bool {
        let tx = {
            let mut guard = self.return_tx.lock().expect("return_tx lock poisoned");
            guard.take()
        };
        let Some(tx) = tx else { return false };

        {
            let mut runtime = self.runtime.lock().expect("runtime lock poisoned");
            runtime.state = match value {
                Ok(_) => ComponentState::Returned,
                Err(_) => ComponentState::Canceled,
            };
        }

        let _ = tx.send(value);
        true
    }

    /// Wire form for the next render instruction.
    pub fn render_form(&self) -> ComponentRender {
        ComponentRender {
            method_name: self.spec.method_name.clone(),
            label: self.spec.label.clone(),
            props: self.props(),
            is_stateful: self.spec.on_state_change.is_some(),
            is_optional: self.spec.is_optional,
            is_multiple: self.spec.is_multiple,
        }
    }
}

/// Merge partial props over current ones, object keys shallowly.
fn merge_props(current: &mut Value, partial: Value) {
    match (current, partial) {
        (Value::Object(current_map), Value::Object(partial_map)) => {
            for (key, value) in partial_map {
                current_map.insert(key, value);
            }
        }
        (current_slot, partial) => *current_slot = partial,
    }
}
