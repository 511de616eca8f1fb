//! Chained builders over the render loop.
//!
//! Every `io.*` method returns an [`IoPromise`]: an immutable descriptor
//! of one component plus a typed parse of its return value. Builder
//! methods (`optional`, `multiple`, `validate`, prop setters) each
//! produce a new descriptor; awaiting the promise compiles it into a
//! single-member render group. [`GroupPromise`] does the same for a
//! whole group in one round-trip.

use std::future::IntoFuture;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{IoError, IoErrorKind};
use crate::io::client::{
    GroupMember, GroupResult, GroupValidatorFn, IoClient, MemberValidatorFn,
};
use crate::io::component::ComponentSpec;
use crate::rpc::methods::ChoiceButton;

/// Typed parse of a component's raw return value.
pub type ParseFn<T> = Arc<dyn Fn(Value) -> Result<T, IoError> + Send + Sync>;

/// An awaitable descriptor of one component.
///
/// Builder methods return new descriptors; nothing renders until the
/// promise is awaited (alone or inside a group).
pub struct IoPromise<T> {
    client: Arc<IoClient>,
    spec: ComponentSpec,
    parse: ParseFn<T>,
    validator: Option<MemberValidatorFn>,
}

impl<T> std::fmt::Debug for IoPromise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoPromise").field("spec", &self.spec).finish_non_exhaustive()
    }
}

impl<T: Send + 'static> IoPromise<T> {
    pub(crate) fn new(client: Arc<IoClient>, spec: ComponentSpec, parse: ParseFn<T>) -> Self {
        Self {
            client,
            spec,
            parse,
            validator: None,
        }
    }

    /// Set one initial prop.
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.spec.initial_props {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Help text shown under the control.
    pub fn help_text(self, text: impl Into<String>) -> Self {
        self.with_prop("helpText", text.into())
    }

    /// Placeholder shown in an empty control.
    pub fn placeholder(self, text: impl Into<String>) -> Self {
        self.with_prop("placeholder", text.into())
    }

    /// Pre-filled value.
    pub fn default_value(self, value: impl Into<Value>) -> Self {
        self.with_prop("defaultValue", value)
    }

    /// Recompute props when the client reports new state.
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.spec.on_state_change = Some(Arc::new(hook));
        self
    }

    /// Observe props after each update.
    pub fn on_props_update<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.spec.on_props_update = Some(Arc::new(observer));
        self
    }

    /// Allow the user to skip this component; the value becomes `None`.
    pub fn optional(self) -> IoPromise<Option<T>> {
        let parse = Arc::clone(&self.parse);
        let mut spec = self.spec;
        spec.is_optional = true;
        IoPromise {
            client: self.client,
            spec,
            parse: Arc::new(move |raw| {
                if raw.is_null() {
                    Ok(None)
                } else {
                    parse(raw).map(Some)
                }
            }),
            validator: self.validator,
        }
    }

    /// Collect a list of values instead of one.
    pub fn multiple(self) -> IoPromise<Vec<T>> {
        let parse = Arc::clone(&self.parse);
        let mut spec = self.spec;
        spec.is_multiple = true;
        IoPromise {
            client: self.client,
            spec,
            parse: Arc::new(move |raw| {
                let Value::Array(items) = raw else {
                    return Err(IoError::with_message(
                        IoErrorKind::BadResponse,
                        "expected an array of values",
                    ));
                };
                items.into_iter().map(|item| parse(item)).collect()
            }),
            validator: self.validator,
        }
    }

    /// Chain a validator over the parsed value; `Some(message)` rejects
    /// the submission and the user is re-prompted.
    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&T) -> Option<String> + Send + Sync + 'static,
    {
        let parse = Arc::clone(&self.parse);
        let previous = self.validator.take();
        self.validator = Some(Arc::new(move |raw: &Value| {
            if let Some(previous) = &previous {
                if let Some(message) = previous(raw) {
                    return Some(message);
                }
            }
            match parse(raw.clone()) {
                Ok(value) => validator(&value),
                Err(e) => Some(e.to_string()),
            }
        }));
        self
    }
}

impl<T: Send + 'static> IntoFuture for IoPromise<T> {
    type Output = Result<T, IoError>;
    type IntoFuture = BoxFuture<'static, Result<T, IoError>>;

    fn into_future(self) -> Self::IntoFuture {
        let IoPromise {
            client,
            spec,
            parse,
            validator,
        } = self;
        Box::pin(async move {
            let member = GroupMember { spec, validator };
            let result = client.render_group(vec![member], None, None).await?;
            let raw = result.values.into_iter().next().unwrap_or(Value::Null);
            parse(raw)
        })
    }
}

/// A type-erased group member, built from any promise.
pub struct GroupItem {
    spec: ComponentSpec,
    validator: Option<MemberValidatorFn>,
}

impl std::fmt::Debug for GroupItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupItem").field("spec", &self.spec).finish_non_exhaustive()
    }
}

impl<T> From<IoPromise<T>> for GroupItem {
    fn from(promise: IoPromise<T>) -> Self {
        Self {
            spec: promise.spec,
            validator: promise.validator,
        }
    }
}

/// An awaitable descriptor of a whole render group.
///
/// Results come back positionally as raw values; choices come back as the
/// activated button's value.
pub struct GroupPromise {
    client: Arc<IoClient>,
    items: Vec<GroupItem>,
    choice_buttons: Option<Vec<ChoiceButton>>,
    validator: Option<GroupValidatorFn>,
}

impl std::fmt::Debug for GroupPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupPromise")
            .field("items", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl GroupPromise {
    pub(crate) fn new(client: Arc<IoClient>, items: Vec<GroupItem>) -> Self {
        Self {
            client,
            items,
            choice_buttons: None,
            validator: None,
        }
    }

    /// Attach labelled submit buttons; the result's `choice` reports which
    /// one the user activated.
    pub fn with_choices(mut self, buttons: Vec<ChoiceButton>) -> Self {
        self.choice_buttons = Some(buttons);
        self
    }

    /// Chain a validator over the whole parsed tuple.
    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&[Value]) -> Option<String> + Send + Sync + 'static,
    {
        let previous = self.validator.take();
        self.validator = Some(Arc::new(move |values: &[Value]| {
            if let Some(previous) = &previous {
                if let Some(message) = previous(values) {
                    return Some(message);
                }
            }
            validator(values)
        }));
        self
    }
}

impl IntoFuture for GroupPromise {
    type Output = Result<GroupResult, IoError>;
    type IntoFuture = BoxFuture<'static, Result<GroupResult, IoError>>;

    fn into_future(self) -> Self::IntoFuture {
        let GroupPromise {
            client,
            items,
            choice_buttons,
            validator,
        } = self;
        Box::pin(async move {
            let members = items
                .into_iter()
                .map(|item| GroupMember {
                    spec: item.spec,
                    validator: item.validator,
                })
                .collect();
            client.render_group(members, choice_buttons, validator).await
        })
    }
}

/// Helper used by the `Io` surface to build string-typed promises.
pub(crate) fn string_parse() -> ParseFn<String> {
    Arc::new(|raw| match raw {
        Value::String(s) => Ok(s),
        other => Err(IoError::with_message(
            IoErrorKind::BadResponse,
            format!("expected a string, got {other}"),
        )),
    })
}

/// Helper used by the `Io` surface to build number-typed promises.
pub(crate) fn number_parse() -> ParseFn<f64> {
    Arc::new(|raw| {
        raw.as_f64().ok_or_else(|| {
            IoError::with_message(IoErrorKind::BadResponse, format!("expected a number, got {raw}"))
        })
    })
}

/// Helper used by the `Io` surface to build bool-typed promises.
pub(crate) fn bool_parse() -> ParseFn<bool> {
    Arc::new(|raw| {
        raw.as_bool().ok_or_else(|| {
            IoError::with_message(IoErrorKind::BadResponse, format!("expected a boolean, got {raw}"))
        })
    })
}

/// Helper used by the `Io` surface to build unit-typed display promises.
pub(crate) fn unit_parse() -> ParseFn<()> {
    Arc::new(|_| Ok(()))
}

/// Spawn-friendly alias for futures returned by handler helpers.
pub type IoFuture<T> = BoxFuture<'static, Result<T, IoError>>;
