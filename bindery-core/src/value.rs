use crate::Category;
use std::fmt::{self, Display};
use time::{PrimitiveDateTime, format_description::BorrowedFormatItem, macros::format_description};

/// Dynamically typed value held by a bound slot.
///
/// Each variant corresponds to one non streaming [`Category`], the payload is
/// `None` when the value is null but its category is still known.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Value {
    #[default]
    Null,
    String(Option<String>),
    Double(Option<f64>),
    Float(Option<f32>),
    Integer(Option<i32>),
    Binary(Option<Vec<u8>>),
    Blob(Option<Vec<u8>>),
    Character(Option<char>),
    Boolean(Option<bool>),
    Date(Option<PrimitiveDateTime>),
    Long(Option<i64>),
    Object(Option<Vec<u8>>),
}

/// Textual representation used when a date crosses a text only boundary.
pub const DATE_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");
/// Same as [`DATE_FORMAT`] without the fractional part.
pub const DATE_FORMAT_SECONDS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

impl Value {
    /// A null value of the given category.
    pub fn empty(category: Category) -> Value {
        match category {
            Category::String => Value::String(None),
            Category::Double => Value::Double(None),
            Category::Float => Value::Float(None),
            Category::Integer => Value::Integer(None),
            Category::Binary => Value::Binary(None),
            Category::Blob => Value::Blob(None),
            Category::Character => Value::Character(None),
            Category::Boolean => Value::Boolean(None),
            Category::Date => Value::Date(None),
            Category::Long => Value::Long(None),
            Category::OpaqueObject => Value::Object(None),
            Category::Null | Category::Stream | Category::Direct => Value::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(v) => v.is_none(),
            Value::Double(v) => v.is_none(),
            Value::Float(v) => v.is_none(),
            Value::Integer(v) => v.is_none(),
            Value::Binary(v) | Value::Blob(v) | Value::Object(v) => v.is_none(),
            Value::Character(v) => v.is_none(),
            Value::Boolean(v) => v.is_none(),
            Value::Date(v) => v.is_none(),
            Value::Long(v) => v.is_none(),
        }
    }

    /// Raw bytes of the byte oriented variants.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(Some(v)) | Value::Blob(Some(v)) | Value::Object(Some(v)) => Some(v),
            _ => None,
        }
    }

    pub fn same_type(&self, other: &Self) -> bool {
        self.category() == other.category()
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "{} NULL", self.category());
        }
        match self {
            Value::String(Some(v)) => write!(f, "STRING {:?}", v),
            Value::Double(Some(v)) => write!(f, "DOUBLE {}", v),
            Value::Float(Some(v)) => write!(f, "FLOAT {}", v),
            Value::Integer(Some(v)) => write!(f, "INTEGER {}", v),
            Value::Character(Some(v)) => write!(f, "CHARACTER {:?}", v),
            Value::Boolean(Some(v)) => write!(f, "BOOLEAN {}", v),
            Value::Date(Some(v)) => write!(f, "DATE {}", v),
            Value::Long(Some(v)) => write!(f, "LONG {}", v),
            Value::Binary(Some(v)) | Value::Blob(Some(v)) | Value::Object(Some(v)) => {
                write!(f, "{} ({} bytes)", self.category(), v.len())
            }
            _ => write!(f, "{}", self.category()),
        }
    }
}
