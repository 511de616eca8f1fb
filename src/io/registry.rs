//! Component registry capability.
//!
//! The registry is the seam between the transaction runtime and the set of
//! concrete on-screen controls: it knows which component method names
//! exist and how to validate their props, return values, and state
//! payloads. The SDK ships a [`BuiltinRegistry`] covering the standard
//! control set; embedders may provide their own implementation to extend
//! or restrict it.

use serde_json::Value;

use crate::error::ValidationError;

/// Method names of the standard control set.
pub mod method_names {
    /// Single-line text input.
    pub const INPUT_TEXT: &str = "INPUT_TEXT";
    /// Email input.
    pub const INPUT_EMAIL: &str = "INPUT_EMAIL";
    /// Numeric input.
    pub const INPUT_NUMBER: &str = "INPUT_NUMBER";
    /// Checkbox.
    pub const INPUT_BOOLEAN: &str = "INPUT_BOOLEAN";
    /// Single-choice dropdown.
    pub const SELECT_SINGLE: &str = "SELECT_SINGLE";
    /// Multi-choice list.
    pub const SELECT_MULTIPLE: &str = "SELECT_MULTIPLE";
    /// Confirmation dialog.
    pub const CONFIRM: &str = "CONFIRM";
    /// Section heading (display-only).
    pub const DISPLAY_HEADING: &str = "DISPLAY_HEADING";
    /// Markdown block (display-only).
    pub const DISPLAY_MARKDOWN: &str = "DISPLAY_MARKDOWN";
    /// Data table (display-only).
    pub const DISPLAY_TABLE: &str = "DISPLAY_TABLE";
}

/// Parses component payloads for a set of known method names.
///
/// All three parse operations return the validated value or a
/// [`ValidationError`]; they never panic on malformed input.
pub trait ComponentRegistry: Send + Sync {
    /// Every method name this registry understands.
    fn component_method_names(&self) -> Vec<&'static str>;

    /// Validate initial or updated props for a component.
    fn parse_props(&self, method_name: &str, raw: Value) -> Result<Value, ValidationError>;

    /// Validate a return value delivered for a component.
    fn parse_return(&self, method_name: &str, raw: Value) -> Result<Value, ValidationError>;

    /// Validate a state payload delivered for a component.
    fn parse_state(&self, method_name: &str, raw: Value) -> Result<Value, ValidationError>;

    /// Whether a method renders without producing a value.
    fn is_display_only(&self, method_name: &str) -> bool {
        method_name.starts_with("DISPLAY_")
    }
}

/// Registry for the standard control set.
#[derive(Debug, Default)]
pub struct BuiltinRegistry;

impl BuiltinRegistry {
    /// Create the builtin registry.
    pub fn new() -> Self {
        Self
    }

    fn known(&self, method_name: &str) -> Result<(), ValidationError> {
        if self.component_method_names().contains(&method_name) {
            Ok(())
        } else {
            Err(ValidationError::new(format!(
                "unknown component method: {method_name}"
            )))
        }
    }
}

impl ComponentRegistry for BuiltinRegistry {
    fn component_method_names(&self) -> Vec<&'static str> {
        use method_names::*;
        vec![
            INPUT_TEXT,
            INPUT_EMAIL,
            INPUT_NUMBER,
            INPUT_BOOLEAN,
            SELECT_SINGLE,
            SELECT_MULTIPLE,
            CONFIRM,
            DISPLAY_HEADING,
            DISPLAY_MARKDOWN,
            DISPLAY_TABLE,
        ]
    }

    fn parse_props(&self, method_name: &str, raw: Value) -> Result<Value, ValidationError> {
        self.known(method_name)?;
        match raw {
            Value::Object(_) => Ok(raw),
            Value::Null => Ok(Value::Object(serde_json::Map::new())),
            other => Err(ValidationError::new(format!(
                "{method_name} props must be an object, got {other}"
            ))),
        }
    }

    fn parse_return(&self, method_name: &str, raw: Value) -> Result<Value, ValidationError> {
        use method_names::*;
        self.known(method_name)?;

        match method_name {
            INPUT_TEXT => match raw {
                Value::String(_) => Ok(raw),
                other => Err(ValidationError::new(format!(
                    "INPUT_TEXT returns a string, got {other}"
                ))),
            },
            INPUT_EMAIL => match &raw {
                Value::String(s) if s.contains('@') => Ok(raw),
                other => Err(ValidationError::new(format!(
                    "INPUT_EMAIL returns an email address, got {other}"
                ))),
            },
            INPUT_NUMBER => match raw {
                Value::Number(_) => Ok(raw),
                other => Err(ValidationError::new(format!(
                    "INPUT_NUMBER returns a number, got {other}"
                ))),
            },
            INPUT_BOOLEAN | CONFIRM => match raw {
                Value::Bool(_) => Ok(raw),
                other => Err(ValidationError::new(format!(
                    "{method_name} returns a boolean, got {other}"
                ))),
            },
            SELECT_SINGLE => match raw {
                Value::Object(_) | Value::String(_) | Value::Number(_) => Ok(raw),
                other => Err(ValidationError::new(format!(
                    "SELECT_SINGLE returns an option, got {other}"
                ))),
            },
            SELECT_MULTIPLE => match raw {
                Value::Array(_) => Ok(raw),
                other => Err(ValidationError::new(format!(
                    "SELECT_MULTIPLE returns an array, got {other}"
                ))),
            },
            DISPLAY_HEADING | DISPLAY_MARKDOWN | DISPLAY_TABLE => match raw {
                Value::Null => Ok(Value::Null),
                other => Err(ValidationError::new(format!(
                    "{method_name} returns no value, got {other}"
                ))),
            },
            _ => Ok(raw),
        }
    }

    fn parse_state(&self, method_name: &str, raw: Value) -> Result<Value, ValidationError> {
        self.known(method_name)?;
        match raw {
            Value::Object(_) => Ok(raw),
            other => Err(ValidationError::new(format!(
                "{method_name} state must be an object, got {other}"
            ))),
        }
    }
}
