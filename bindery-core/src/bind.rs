use crate::{Category, Error, ExecutionError, Result, Value};
use std::{
    any,
    io::{self, Cursor, Read},
    sync::Arc,
};
use time::PrimitiveDateTime;

/// A type that can be declared for a bound slot.
///
/// The declaration decides the slot [`Category`] once, when the slot is
/// created. Values are converted back from the fetched [`Value`] through
/// [`Bind::from_value`], which is where output casting happens.
///
/// # Normalization
/// Wrappers forward `CATEGORY` and `Normalized` to the wrapped type, so that
/// declaring `Option<i32>` and `i32` under the same key is not a rebinding.
///
/// # Casting contract
/// - A null value of any category converts to `Ok(None)`.
/// - A value of an incompatible category fails with
///   [`ExecutionError::Cast`], the "type cast exception".
pub trait Bind: Sized + Send + 'static {
    /// Category every slot declared with this type gets.
    const CATEGORY: Category;
    /// The type used to compare declarations.
    type Normalized: 'static;
    /// Convert a fetched value into `Self`, `None` when the column was null.
    fn from_value(value: Value) -> Result<Option<Self>>;
}

pub(crate) fn cast_error<T>(value: &Value) -> Error {
    ExecutionError::Cast {
        value: value.to_string(),
        target: any::type_name::<T>(),
    }
    .into()
}

macro_rules! impl_bind {
    ($source:ty, $category:path, $variant:path $(, $pat_rest:pat => $expr_rest:expr)* $(,)?) => {
        impl Bind for $source {
            const CATEGORY: Category = $category;
            type Normalized = $source;
            fn from_value(value: Value) -> Result<Option<Self>> {
                if value.is_null() {
                    return Ok(None);
                }
                match value {
                    $variant(v) => Ok(v),
                    $($pat_rest => $expr_rest,)*
                    #[allow(unreachable_patterns)]
                    _ => Err(cast_error::<Self>(&value)),
                }
            }
        }
    };
}

impl_bind!(String, Category::String, Value::String,
    Value::Character(Some(v)) => Ok(Some(v.to_string())),
);
impl_bind!(f64, Category::Double, Value::Double,
    Value::Float(Some(v)) => Ok(Some(v as f64)),
    Value::Integer(Some(v)) => Ok(Some(v as f64)),
);
impl_bind!(f32, Category::Float, Value::Float);
impl_bind!(i32, Category::Integer, Value::Integer,
    Value::Boolean(Some(v)) => Ok(Some(v as i32)),
    Value::Long(Some(v)) => i32::try_from(v).map(Some).map_err(|_| cast_error::<i32>(&Value::Long(Some(v)))),
);
impl_bind!(i64, Category::Long, Value::Long,
    Value::Integer(Some(v)) => Ok(Some(v as i64)),
);
impl_bind!(bool, Category::Boolean, Value::Boolean,
    Value::Integer(Some(v)) => Ok(Some(v != 0)),
    Value::Long(Some(v)) => Ok(Some(v != 0)),
);
impl_bind!(char, Category::Character, Value::Character);
impl_bind!(PrimitiveDateTime, Category::Date, Value::Date);
impl_bind!(Vec<u8>, Category::Binary, Value::Binary,
    Value::Blob(v) => Ok(v),
    Value::Object(v) => Ok(v),
);

impl Bind for Box<[u8]> {
    const CATEGORY: Category = Category::Binary;
    type Normalized = Vec<u8>;
    fn from_value(value: Value) -> Result<Option<Self>> {
        Ok(Vec::<u8>::from_value(value)?.map(Into::into))
    }
}

impl Bind for () {
    const CATEGORY: Category = Category::Null;
    type Normalized = ();
    fn from_value(value: Value) -> Result<Option<Self>> {
        if value.is_null() {
            Ok(None)
        } else {
            Err(cast_error::<Self>(&value))
        }
    }
}

/// A generic output, keeps whatever the native link produced.
impl Bind for Value {
    const CATEGORY: Category = Category::OpaqueObject;
    type Normalized = Value;
    fn from_value(value: Value) -> Result<Option<Self>> {
        Ok(Some(value))
    }
}

impl<T: Bind> Bind for Option<T> {
    const CATEGORY: Category = T::CATEGORY;
    type Normalized = T::Normalized;
    fn from_value(value: Value) -> Result<Option<Self>> {
        Ok(Some(T::from_value(value)?))
    }
}

impl<T: Bind + Sync> Bind for Arc<T> {
    const CATEGORY: Category = T::CATEGORY;
    type Normalized = T::Normalized;
    fn from_value(value: Value) -> Result<Option<Self>> {
        Ok(T::from_value(value)?.map(Arc::new))
    }
}

/// External byte codec for values without a native category.
///
/// Types implementing it are bound through the [`Object`] wrapper and travel
/// as opaque bytes.
pub trait Opaque: Sized + Send + 'static {
    fn encode(&self) -> anyhow::Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> anyhow::Result<Self>;
}

/// Binds an [`Opaque`] value as [`Category::OpaqueObject`].
#[derive(Debug, Clone, PartialEq)]
pub struct Object<T>(pub T);

impl<T: Opaque> Bind for Object<T> {
    const CATEGORY: Category = Category::OpaqueObject;
    type Normalized = Object<T>;
    fn from_value(value: Value) -> Result<Option<Self>> {
        if value.is_null() {
            return Ok(None);
        }
        let Some(bytes) = value.as_bytes() else {
            return Err(cast_error::<Self>(&value));
        };
        T::decode(bytes)
            .map(|v| Some(Object(v)))
            .map_err(|e| ExecutionError::Codec(e).into())
    }
}

/// Byte reading view over a fetched blob column.
#[derive(Debug, Clone, Default)]
pub struct BlobReader {
    cursor: Cursor<Vec<u8>>,
}

impl BlobReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl Bind for BlobReader {
    const CATEGORY: Category = Category::Blob;
    type Normalized = BlobReader;
    fn from_value(value: Value) -> Result<Option<Self>> {
        Ok(Vec::<u8>::from_value(value)?.map(BlobReader::new))
    }
}
