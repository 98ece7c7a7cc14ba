use crate::{ExecutionError, Object, Opaque, Result};
use std::io::{Cursor, Read};
use time::PrimitiveDateTime;

/// Runtime shape of a value passed to `Input::set`.
///
/// Input slots dispatch on their category and on this shape, which is how
/// lenient conversions (an integer into a boolean slot) are told apart from
/// mismatches.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Char(char),
    Text(String),
    Bytes(Vec<u8>),
    Date(PrimitiveDateTime),
    Object(Vec<u8>),
}

pub trait IntoArgument {
    fn into_argument(self) -> Result<Argument>;
}

macro_rules! impl_into_argument {
    ($source:ty, $variant:path) => {
        impl IntoArgument for $source {
            fn into_argument(self) -> Result<Argument> {
                Ok($variant(self.into()))
            }
        }
    };
}

impl_into_argument!(bool, Argument::Bool);
impl_into_argument!(i32, Argument::Int);
impl_into_argument!(i64, Argument::Long);
impl_into_argument!(f32, Argument::Float);
impl_into_argument!(f64, Argument::Double);
impl_into_argument!(char, Argument::Char);
impl_into_argument!(String, Argument::Text);
impl_into_argument!(&str, Argument::Text);
impl_into_argument!(Vec<u8>, Argument::Bytes);
impl_into_argument!(&[u8], Argument::Bytes);
impl_into_argument!(Box<[u8]>, Argument::Bytes);
impl_into_argument!(PrimitiveDateTime, Argument::Date);

impl<const N: usize> IntoArgument for [u8; N] {
    fn into_argument(self) -> Result<Argument> {
        Ok(Argument::Bytes(self.to_vec()))
    }
}

impl<const N: usize> IntoArgument for &[u8; N] {
    fn into_argument(self) -> Result<Argument> {
        Ok(Argument::Bytes(self.to_vec()))
    }
}

/// Byte array backed buffer.
impl IntoArgument for Cursor<Vec<u8>> {
    fn into_argument(self) -> Result<Argument> {
        Ok(Argument::Bytes(self.into_inner()))
    }
}

impl<T: IntoArgument> IntoArgument for Option<T> {
    fn into_argument(self) -> Result<Argument> {
        match self {
            Some(v) => v.into_argument(),
            None => Ok(Argument::Null),
        }
    }
}

impl IntoArgument for () {
    fn into_argument(self) -> Result<Argument> {
        Ok(Argument::Null)
    }
}

impl<T: Opaque> IntoArgument for Object<T> {
    fn into_argument(self) -> Result<Argument> {
        self.0
            .encode()
            .map(Argument::Object)
            .map_err(|e| ExecutionError::Codec(e).into())
    }
}

impl<T: Opaque> IntoArgument for &Object<T> {
    fn into_argument(self) -> Result<Argument> {
        self.0
            .encode()
            .map(Argument::Object)
            .map_err(|e| ExecutionError::Codec(e).into())
    }
}

/// A byte producing stream, drained when the value is set.
pub struct Bytes<R: Read>(pub R);

impl<R: Read> IntoArgument for Bytes<R> {
    fn into_argument(mut self) -> Result<Argument> {
        let mut buffer = Vec::new();
        self.0.read_to_end(&mut buffer)?;
        Ok(Argument::Bytes(buffer))
    }
}
