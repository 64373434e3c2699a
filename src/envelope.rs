//! Wire envelope and argument shape model.
//!
//! Every frame on the wire is one [`Envelope`]: a JSON object with a
//! `name` and an ordered `args` array. [`ArgShape`] is the dynamic type
//! taxonomy used to validate decoded arguments against a registered
//! handler's parameter list before the handler is ever invoked.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;

/// One decoded unit of inbound or outbound traffic.
///
/// Wire shape (any JSON-compatible structured encoding):
/// ```json
/// {"name": "testmsg", "args": ["hello", 42]}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Event name. Matched case-insensitively against the registry.
    pub name: String,
    /// Ordered, opaque argument values.
    pub args: Vec<Value>,
}

impl Envelope {
    /// Decodes one text frame into an envelope.
    ///
    /// Returns `Ok(None)` for a JSON `null` frame, which is an empty
    /// envelope and is skipped without dispatch.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Frame`] (fatal) if the frame is not valid
    ///   JSON or not an object.
    /// - [`DispatchError::MissingEventName`] /
    ///   [`DispatchError::MissingEventArgs`] (recoverable) if the
    ///   object lacks a string `name` or an array `args`.
    pub fn decode(text: &str) -> Result<Option<Self>, DispatchError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| DispatchError::Frame(e.to_string()))?;
        match value {
            Value::Null => Ok(None),
            Value::Object(mut obj) => {
                let Some(Value::String(name)) = obj.remove("name") else {
                    return Err(DispatchError::MissingEventName);
                };
                let Some(Value::Array(args)) = obj.remove("args") else {
                    return Err(DispatchError::MissingEventArgs);
                };
                Ok(Some(Self { name, args }))
            }
            other => Err(DispatchError::Frame(format!(
                "expected a JSON object, got {:?}",
                ArgShape::of(&other)
            ))),
        }
    }

    /// Serializes the envelope to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, DispatchError> {
        serde_json::to_string(self).map_err(|e| DispatchError::Encode(e.to_string()))
    }
}

/// Dynamic shape of a decoded argument value.
///
/// Used both as the expected parameter shape of a registered handler
/// and as the observed shape of a decoded argument, so that an
/// [`DispatchError::ArgsMismatch`] can describe both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool,
    /// JSON number (integer or float).
    Number,
    /// JSON string.
    String,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
    /// Matches any shape. Used by handlers taking raw [`Value`]s.
    Any,
}

impl ArgShape {
    /// Returns the shape of a decoded JSON value.
    #[must_use]
    pub const fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    /// Returns `true` if a value of shape `actual` is assignable to a
    /// parameter expecting `self`.
    #[must_use]
    pub fn accepts(self, actual: Self) -> bool {
        self == Self::Any || self == actual
    }
}

/// A single typed handler parameter.
///
/// Maps a Rust type to the [`ArgShape`] it expects on the wire.
/// Implemented for the JSON-compatible scalar types plus raw
/// [`Value`], arrays, and objects for structured arguments.
pub trait EventArg: DeserializeOwned {
    /// The wire shape this parameter accepts.
    fn shape() -> ArgShape;
}

impl EventArg for String {
    fn shape() -> ArgShape {
        ArgShape::String
    }
}

impl EventArg for bool {
    fn shape() -> ArgShape {
        ArgShape::Bool
    }
}

impl EventArg for i64 {
    fn shape() -> ArgShape {
        ArgShape::Number
    }
}

impl EventArg for u64 {
    fn shape() -> ArgShape {
        ArgShape::Number
    }
}

impl EventArg for f64 {
    fn shape() -> ArgShape {
        ArgShape::Number
    }
}

impl EventArg for Value {
    fn shape() -> ArgShape {
        ArgShape::Any
    }
}

impl EventArg for Vec<Value> {
    fn shape() -> ArgShape {
        ArgShape::Array
    }
}

impl EventArg for serde_json::Map<String, Value> {
    fn shape() -> ArgShape {
        ArgShape::Object
    }
}

/// A fixed positional parameter list, implemented for tuples of
/// [`EventArg`] up to arity five.
///
/// `shapes` drives the pre-invocation validation; `bind` deserializes
/// an already shape-checked argument list. A `bind` failure (e.g. a
/// float where an `i64` parameter was declared) is reported as an
/// arguments mismatch, never a panic.
pub trait EventArgs: Sized {
    /// Expected wire shapes, in parameter order.
    fn shapes() -> Vec<ArgShape>;

    /// Binds decoded values to the typed parameter list.
    fn bind(args: &[Value]) -> Option<Self>;
}

macro_rules! impl_event_args {
    ($($ty:ident),*) => {
        impl<$($ty: EventArg),*> EventArgs for ($($ty,)*) {
            fn shapes() -> Vec<ArgShape> {
                vec![$($ty::shape()),*]
            }

            fn bind(args: &[Value]) -> Option<Self> {
                let mut iter = args.iter();
                let bound = ($(serde_json::from_value::<$ty>(iter.next()?.clone()).ok()?,)*);
                if iter.next().is_some() {
                    return None;
                }
                Some(bound)
            }
        }
    };
}

impl_event_args!();
impl_event_args!(A0);
impl_event_args!(A0, A1);
impl_event_args!(A0, A1, A2);
impl_event_args!(A0, A1, A2, A3);
impl_event_args!(A0, A1, A2, A3, A4);

/// Outbound argument packing for [`Connection::send`].
///
/// Implemented for tuples of [`Serialize`] values up to arity five and
/// for a pre-built `Vec<Value>`.
///
/// [`Connection::send`]: crate::connection::Connection::send
pub trait IntoArgs {
    /// Serializes the arguments into wire values.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Encode`] if any argument fails to
    /// serialize.
    fn into_args(self) -> Result<Vec<Value>, DispatchError>;
}

impl IntoArgs for Vec<Value> {
    fn into_args(self) -> Result<Vec<Value>, DispatchError> {
        Ok(self)
    }
}

macro_rules! impl_into_args {
    ($($ty:ident : $idx:tt),*) => {
        impl<$($ty: Serialize),*> IntoArgs for ($($ty,)*) {
            fn into_args(self) -> Result<Vec<Value>, DispatchError> {
                Ok(vec![$(
                    serde_json::to_value(self.$idx)
                        .map_err(|e| DispatchError::Encode(e.to_string()))?,
                )*])
            }
        }
    };
}

impl_into_args!();
impl_into_args!(A0: 0);
impl_into_args!(A0: 0, A1: 1);
impl_into_args!(A0: 0, A1: 1, A2: 2);
impl_into_args!(A0: 0, A1: 1, A2: 2, A3: 3);
impl_into_args!(A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_valid_envelope() {
        let env = Envelope::decode(r#"{"name": "testmsg", "args": ["test 123![]{}@"]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(env.name, "testmsg");
        assert_eq!(env.args, vec![json!("test 123![]{}@")]);
    }

    #[test]
    fn decode_null_is_empty_envelope() {
        let decoded = Envelope::decode("null").unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn decode_garbage_is_fatal() {
        let err = Envelope::decode("{not json").unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn decode_non_object_is_fatal() {
        let err = Envelope::decode("42").unwrap_err();
        assert!(matches!(err, DispatchError::Frame(_)));
    }

    #[test]
    fn decode_missing_name_is_recoverable() {
        let err = Envelope::decode(r#"{"args": []}"#).unwrap_err();
        assert!(matches!(err, DispatchError::MissingEventName));
        assert!(err.is_recoverable());
    }

    #[test]
    fn decode_non_string_name_is_recoverable() {
        let err = Envelope::decode(r#"{"name": 5, "args": []}"#).unwrap_err();
        assert!(matches!(err, DispatchError::MissingEventName));
    }

    #[test]
    fn decode_missing_args_is_recoverable() {
        let err = Envelope::decode(r#"{"name": "echo"}"#).unwrap_err();
        assert!(matches!(err, DispatchError::MissingEventArgs));
        assert!(err.is_recoverable());
    }

    #[test]
    fn decode_non_array_args_is_recoverable() {
        let err = Envelope::decode(r#"{"name": "echo", "args": {"a": 1}}"#).unwrap_err();
        assert!(matches!(err, DispatchError::MissingEventArgs));
    }

    #[test]
    fn encode_decode_round_trip_nested() {
        let env = Envelope {
            name: "state".into(),
            args: vec![json!({"k": [1, 2, {"deep": true}]}), json!(null)],
        };
        let text = env.encode().unwrap();
        let back = Envelope::decode(&text).unwrap().unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn shape_of_covers_all_json_types() {
        assert_eq!(ArgShape::of(&json!(null)), ArgShape::Null);
        assert_eq!(ArgShape::of(&json!(true)), ArgShape::Bool);
        assert_eq!(ArgShape::of(&json!(1.5)), ArgShape::Number);
        assert_eq!(ArgShape::of(&json!("s")), ArgShape::String);
        assert_eq!(ArgShape::of(&json!([1])), ArgShape::Array);
        assert_eq!(ArgShape::of(&json!({"a": 1})), ArgShape::Object);
    }

    #[test]
    fn any_accepts_everything() {
        for actual in [
            ArgShape::Null,
            ArgShape::Bool,
            ArgShape::Number,
            ArgShape::String,
            ArgShape::Array,
            ArgShape::Object,
        ] {
            assert!(ArgShape::Any.accepts(actual));
        }
        assert!(!ArgShape::String.accepts(ArgShape::Number));
    }

    #[test]
    fn bind_typed_tuple() {
        let args = vec![json!("hello"), json!(7), json!(true)];
        let (s, n, b) = <(String, i64, bool)>::bind(&args).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(n, 7);
        assert!(b);
    }

    #[test]
    fn bind_rejects_wrong_count() {
        let args = vec![json!("only one")];
        assert!(<(String, String)>::bind(&args).is_none());
        assert!(<()>::bind(&args).is_none());
    }

    #[test]
    fn bind_value_keeps_structure() {
        let args = vec![json!({"nested": [1, 2]})];
        let (v,): (Value,) = EventArgs::bind(&args).unwrap();
        assert_eq!(v, json!({"nested": [1, 2]}));
    }

    #[test]
    fn tuple_shapes_in_order() {
        assert_eq!(
            <(String, f64, Value)>::shapes(),
            vec![ArgShape::String, ArgShape::Number, ArgShape::Any]
        );
        assert!(<()>::shapes().is_empty());
    }

    #[test]
    fn into_args_serializes_each_position() {
        let args = ("hi", 3_u64).into_args().unwrap();
        assert_eq!(args, vec![json!("hi"), json!(3)]);
        let empty = ().into_args().unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn into_args_passes_through_values() {
        let raw = vec![json!(1), json!("two")];
        assert_eq!(raw.clone().into_args().unwrap(), raw);
    }
}
