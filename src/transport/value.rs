//! Typed channel values and native kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Native data kind of a remote process variable.
///
/// Used both to describe what a channel natively carries and to request the
/// kind a monitor should deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// 64-bit float
    Double,
    /// 32-bit float
    Float,
    /// 32-bit integer
    Int,
    /// 16-bit integer
    Short,
    /// 8-bit integer
    Byte,
    /// Text
    String,
    /// Enumerated index with state labels
    Enum,
}

impl ValueKind {
    /// Short label used in logs and error messages
    pub fn label(&self) -> &'static str {
        match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int => "int",
            Self::Short => "short",
            Self::Byte => "byte",
            Self::String => "string",
            Self::Enum => "enum",
        }
    }

    /// Coerce a value into the representation this kind delivers.
    ///
    /// Monitors installed with an explicit kind see values converted the way a
    /// channel-access client would convert them on the wire.
    pub fn coerce(&self, value: &ChannelValue) -> ChannelValue {
        match (self, value) {
            (Self::Double | Self::Float, ChannelValue::Int(v)) => ChannelValue::Double(*v as f64),
            (Self::Int | Self::Short | Self::Byte | Self::Enum, ChannelValue::Double(v)) => {
                ChannelValue::Int(v.round() as i64)
            }
            (Self::String, ChannelValue::Double(_) | ChannelValue::Int(_)) => {
                ChannelValue::Text(value.to_string())
            }
            _ => value.clone(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A value read from or written to a channel.
///
/// Deserializes untagged so configuration files can write initial values as
/// plain TOML scalars and arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    /// Any integer kind, enums included
    Int(i64),
    /// Either float kind
    Double(f64),
    /// String value
    Text(String),
    /// Integer waveform
    IntArray(Vec<i64>),
    /// Float waveform
    DoubleArray(Vec<f64>),
    /// String waveform
    TextArray(Vec<String>),
}

impl ChannelValue {
    /// Name of the variant, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Text(_) => "string",
            Self::IntArray(_) => "int[]",
            Self::DoubleArray(_) => "double[]",
            Self::TextArray(_) => "string[]",
        }
    }

    /// Scalar numeric view; integers widen to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Scalar integer view; doubles are accepted only when integral
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// String view of scalar text values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::IntArray(v) => write!(f, "{v:?}"),
            Self::DoubleArray(v) => write!(f, "{v:?}"),
            Self::TextArray(v) => write!(f, "{v:?}"),
        }
    }
}

impl From<f64> for ChannelValue {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<i64> for ChannelValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ChannelValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ChannelValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}
