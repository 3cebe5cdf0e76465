//! Typed access to descriptor arguments.
//!
//! [`ArgType`] converts a stored [`ArgValue`] into a Rust value. Integers are
//! narrowed with overflow checks, floats are read from the float slot only,
//! booleans from the integer slot. Asking for a kind the argument does not
//! hold is a [`Coerce::Kind`] failure; the operator turns it into
//! [`OpError::ArgumentKindMismatch`](crate::error::OpError::ArgumentKindMismatch).

use crate::proto::ArgValue;

/// Why a stored value could not be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coerce {
    /// The stored slot is of another kind; carries the expected kind.
    Kind(&'static str),
    /// The value does not fit the target type; carries the target type name.
    Overflow(&'static str),
}

/// Types readable through `get_single_arg` / `get_repeated_arg`.
pub trait ArgType: Sized {
    /// Slot kind expected for a scalar read.
    const SINGLE: &'static str;
    /// Slot kind expected for a repeated read.
    const REPEATED: &'static str;

    /// Reads a scalar slot.
    fn from_single(value: &ArgValue) -> Result<Self, Coerce>;

    /// Reads a repeated slot element-wise.
    fn from_repeated(value: &ArgValue) -> Result<Vec<Self>, Coerce>;
}

macro_rules! impl_int_arg {
    ($($ty:ty),* $(,)?) => {$(
        impl ArgType for $ty {
            const SINGLE: &'static str = "int";
            const REPEATED: &'static str = "ints";

            fn from_single(value: &ArgValue) -> Result<Self, Coerce> {
                match value {
                    ArgValue::I(v) => {
                        <$ty>::try_from(*v).map_err(|_| Coerce::Overflow(stringify!($ty)))
                    }
                    _ => Err(Coerce::Kind(Self::SINGLE)),
                }
            }

            fn from_repeated(value: &ArgValue) -> Result<Vec<Self>, Coerce> {
                match value {
                    ArgValue::Ints(vs) => vs
                        .iter()
                        .map(|&v| <$ty>::try_from(v).map_err(|_| Coerce::Overflow(stringify!($ty))))
                        .collect(),
                    _ => Err(Coerce::Kind(Self::REPEATED)),
                }
            }
        }
    )*};
}

impl_int_arg!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

fn narrow_f32(v: f64) -> Result<f32, Coerce> {
    if v.is_finite() && v.abs() > f64::from(f32::MAX) {
        return Err(Coerce::Overflow("f32"));
    }
    #[allow(clippy::cast_possible_truncation)]
    Ok(v as f32)
}

impl ArgType for f32 {
    const SINGLE: &'static str = "float";
    const REPEATED: &'static str = "floats";

    fn from_single(value: &ArgValue) -> Result<Self, Coerce> {
        match value {
            ArgValue::F(v) => narrow_f32(*v),
            _ => Err(Coerce::Kind(Self::SINGLE)),
        }
    }

    fn from_repeated(value: &ArgValue) -> Result<Vec<Self>, Coerce> {
        match value {
            ArgValue::Floats(vs) => vs.iter().map(|&v| narrow_f32(v)).collect(),
            _ => Err(Coerce::Kind(Self::REPEATED)),
        }
    }
}

impl ArgType for f64 {
    const SINGLE: &'static str = "float";
    const REPEATED: &'static str = "floats";

    fn from_single(value: &ArgValue) -> Result<Self, Coerce> {
        match value {
            ArgValue::F(v) => Ok(*v),
            _ => Err(Coerce::Kind(Self::SINGLE)),
        }
    }

    fn from_repeated(value: &ArgValue) -> Result<Vec<Self>, Coerce> {
        match value {
            ArgValue::Floats(vs) => Ok(vs.clone()),
            _ => Err(Coerce::Kind(Self::REPEATED)),
        }
    }
}

impl ArgType for bool {
    const SINGLE: &'static str = "int";
    const REPEATED: &'static str = "ints";

    fn from_single(value: &ArgValue) -> Result<Self, Coerce> {
        match value {
            ArgValue::I(v) => Ok(*v != 0),
            _ => Err(Coerce::Kind(Self::SINGLE)),
        }
    }

    fn from_repeated(value: &ArgValue) -> Result<Vec<Self>, Coerce> {
        match value {
            ArgValue::Ints(vs) => Ok(vs.iter().map(|&v| v != 0).collect()),
            _ => Err(Coerce::Kind(Self::REPEATED)),
        }
    }
}

impl ArgType for String {
    const SINGLE: &'static str = "string";
    const REPEATED: &'static str = "strings";

    fn from_single(value: &ArgValue) -> Result<Self, Coerce> {
        match value {
            ArgValue::S(v) => Ok(v.clone()),
            _ => Err(Coerce::Kind(Self::SINGLE)),
        }
    }

    fn from_repeated(value: &ArgValue) -> Result<Vec<Self>, Coerce> {
        match value {
            ArgValue::Strings(vs) => Ok(vs.clone()),
            _ => Err(Coerce::Kind(Self::REPEATED)),
        }
    }
}
