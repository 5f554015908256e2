use std::sync::Arc;

/// A compile-time constant value carried by a task argument. Scalars and
/// arrays of the three primitive types, per the data model's task-argument
/// union.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Real(f32),
    Bool(bool),
    String(Arc<str>),
    RealArray(Arc<[f32]>),
    BoolArray(Arc<[bool]>),
    StringArray(Arc<[Arc<str>]>),
}

impl Value {
    pub fn as_real(&self) -> Option<f32> {
        match self {
            Value::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }
}
