//! Operator descriptors.
//!
//! An [`OperatorDef`] is the serialized declaration of one operator in a
//! graph: its unique name, its registry key (`type`), the ordered names of the
//! tensors it reads and writes, the device it runs on, and a list of named
//! [`Argument`]s.
//!
//! Descriptors are normally emitted by a graph compiler. They can be built
//! programmatically through the builder methods below, or loaded from JSON:
//!
//! ```
//! use opcore::proto::{Argument, OperatorDef};
//!
//! let def = OperatorDef::new("Relu", "relu1")
//!     .with_inputs(["x"])
//!     .with_outputs(["y"])
//!     .with_arg(Argument::float("slope", 0.1));
//!
//! let json = def.to_json().unwrap();
//! assert_eq!(OperatorDef::from_json(&json).unwrap(), def);
//! ```

use core::fmt::{self, Write as _};
use std::collections::HashSet;

use briny::prelude::*;
use serde::{Deserialize, Serialize};

use crate::backend::DeviceOption;
use crate::error::Result;

/// Value slot of an [`Argument`].
///
/// Exactly one slot is populated per argument; scalar integers and booleans
/// share the `I` slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgValue {
    /// Scalar integer.
    I(i64),
    /// Scalar float.
    F(f64),
    /// Scalar string.
    S(String),
    /// Repeated integers.
    Ints(Vec<i64>),
    /// Repeated floats.
    Floats(Vec<f64>),
    /// Repeated strings.
    Strings(Vec<String>),
}

impl ArgValue {
    /// Human readable name of the populated slot.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::I(_) => "int",
            Self::F(_) => "float",
            Self::S(_) => "string",
            Self::Ints(_) => "ints",
            Self::Floats(_) => "floats",
            Self::Strings(_) => "strings",
        }
    }
}

/// A named, typed argument attached to an operator descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// Argument name, unique within its descriptor.
    pub name: String,
    /// The populated value slot.
    pub value: ArgValue,
}

impl Argument {
    /// Creates an argument from an already tagged value.
    pub fn new(name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Scalar integer argument.
    pub fn int(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, ArgValue::I(value))
    }

    /// Scalar boolean argument, stored as `0`/`1`.
    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, ArgValue::I(i64::from(value)))
    }

    /// Scalar float argument.
    pub fn float(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, ArgValue::F(value))
    }

    /// Scalar string argument.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, ArgValue::S(value.into()))
    }

    /// Repeated integer argument.
    pub fn ints<I>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<i64>,
    {
        Self::new(name, ArgValue::Ints(values.into_iter().map(Into::into).collect()))
    }

    /// Repeated float argument.
    pub fn floats<I>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<f64>,
    {
        Self::new(name, ArgValue::Floats(values.into_iter().map(Into::into).collect()))
    }

    /// Repeated string argument.
    pub fn strings<I>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::new(name, ArgValue::Strings(values.into_iter().map(Into::into).collect()))
    }
}

/// Serialized declaration of one operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OperatorDef {
    /// Unique name within the graph.
    #[serde(default)]
    pub name: String,
    /// Registry key.
    #[serde(rename = "type")]
    pub op_type: String,
    /// Ordered input tensor names.
    #[serde(default)]
    pub input: Vec<String>,
    /// Ordered output tensor names.
    #[serde(default)]
    pub output: Vec<String>,
    /// Backend and device index.
    #[serde(default)]
    pub device_option: DeviceOption,
    /// Disables the memory-sharing hooks so tensors stay stable for inspection.
    #[serde(default)]
    pub debug_mode: bool,
    /// Ordered named arguments.
    #[serde(default)]
    pub arg: Vec<Argument>,
}

impl OperatorDef {
    /// Starts a descriptor of the given type and name on the CPU.
    pub fn new(op_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            ..Self::default()
        }
    }

    /// Replaces the input list.
    #[must_use]
    pub fn with_inputs<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.input = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the output list.
    #[must_use]
    pub fn with_outputs<I>(mut self, names: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.output = names.into_iter().map(Into::into).collect();
        self
    }

    /// Selects the device.
    #[must_use]
    pub fn with_device(mut self, option: DeviceOption) -> Self {
        self.device_option = option;
        self
    }

    /// Toggles debug mode.
    #[must_use]
    pub fn with_debug_mode(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.arg.push(arg);
        self
    }

    /// Decodes and validates a JSON descriptor.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or when the descriptor does not pass
    /// structural validation.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Self = serde_json::from_str(json)?;
        let trusted = TrustedData::new(raw)?;
        Ok(trusted.into_inner())
    }

    /// Encodes the descriptor as JSON.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Renders the descriptor in protobuf text format.
    pub fn debug_string(&self) -> String {
        self.to_string()
    }
}

impl Validate for OperatorDef {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.op_type.is_empty() {
            return Err(ValidationError);
        }
        if self.input.iter().chain(&self.output).any(String::is_empty) {
            return Err(ValidationError);
        }
        let mut seen = HashSet::with_capacity(self.arg.len());
        if !self.arg.iter().all(|arg| seen.insert(arg.name.as_str())) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl fmt::Display for OperatorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name: {:?}", self.name)?;
        writeln!(f, "type: {:?}", self.op_type)?;
        for name in &self.input {
            writeln!(f, "input: {name:?}")?;
        }
        for name in &self.output {
            writeln!(f, "output: {name:?}")?;
        }
        writeln!(
            f,
            "device_option {{ device_type: {} device_id: {} }}",
            self.device_option.device_type, self.device_option.device_id
        )?;
        if self.debug_mode {
            writeln!(f, "debug_mode: true")?;
        }
        for arg in &self.arg {
            let mut body = String::new();
            match &arg.value {
                ArgValue::I(v) => write!(body, " i: {v}")?,
                ArgValue::F(v) => write!(body, " f: {v}")?,
                ArgValue::S(v) => write!(body, " s: {v:?}")?,
                ArgValue::Ints(vs) => vs.iter().try_for_each(|v| write!(body, " ints: {v}"))?,
                ArgValue::Floats(vs) => {
                    vs.iter().try_for_each(|v| write!(body, " floats: {v}"))?;
                }
                ArgValue::Strings(vs) => {
                    vs.iter().try_for_each(|v| write!(body, " strings: {v:?}"))?;
                }
            }
            writeln!(f, "arg {{ name: {:?}{body} }}", arg.name)?;
        }
        Ok(())
    }
}
