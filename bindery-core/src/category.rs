use crate::{Bind, Value};
use std::{
    any::{self, TypeId},
    fmt::{self, Display},
    marker::PhantomData,
};

/// Wire category a declared type is reduced to.
///
/// The numeric ids are stable and shared with the native link: they are what
/// ends up on the wire when a slot is registered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Null,
    String,
    Double,
    Float,
    Integer,
    Binary,
    Blob,
    Character,
    Boolean,
    Date,
    Long,
    Stream,
    Direct,
    OpaqueObject,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Null,
        Category::String,
        Category::Double,
        Category::Float,
        Category::Integer,
        Category::Binary,
        Category::Blob,
        Category::Character,
        Category::Boolean,
        Category::Date,
        Category::Long,
        Category::Stream,
        Category::Direct,
        Category::OpaqueObject,
    ];

    pub const fn id(self) -> u8 {
        match self {
            Category::Null => 0,
            Category::String => 1,
            Category::Double => 2,
            Category::Float => 3,
            Category::Integer => 4,
            Category::Binary => 5,
            Category::Blob => 6,
            Category::Character => 7,
            Category::Boolean => 8,
            Category::Date => 9,
            Category::Long => 10,
            Category::Stream => 11,
            Category::Direct => 12,
            Category::OpaqueObject => 13,
        }
    }

    pub fn from_id(id: u8) -> Option<Category> {
        Self::ALL.into_iter().find(|v| v.id() == id)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Category::Null => "NULL",
            Category::String => "STRING",
            Category::Double => "DOUBLE",
            Category::Float => "FLOAT",
            Category::Integer => "INTEGER",
            Category::Binary => "BINARY",
            Category::Blob => "BLOB",
            Category::Character => "CHARACTER",
            Category::Boolean => "BOOLEAN",
            Category::Date => "DATE",
            Category::Long => "LONG",
            Category::Stream => "STREAM",
            Category::Direct => "DIRECT",
            Category::OpaqueObject => "OBJECT",
        }
    }

    /// Category of a dynamic value, same as [`Value::category`].
    pub fn of_value(value: &Value) -> Category {
        value.category()
    }

    /// Slots of these categories move their data through a pipe instead of a [`Value`].
    pub const fn is_streaming(self) -> bool {
        matches!(self, Category::Stream | Category::Direct)
    }

    /// Byte oriented categories, they all accept raw bytes on input.
    pub const fn is_bytes(self) -> bool {
        matches!(
            self,
            Category::Binary | Category::Blob | Category::OpaqueObject
        )
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Category of the declared type `T`.
///
/// Wrappers like `Option<T>` are normalized to the wrapped type first. This
/// is a pure function of the type: the same `T` always yields the same
/// category, for input and output slots alike.
pub fn classify<T: Bind>() -> Category {
    T::CATEGORY
}

/// The declaration a slot was created with: its normalized type and category.
///
/// Two declarations are equal when both the normalized type and the category
/// match, this is what decides whether rebinding a key reuses the slot.
#[derive(Clone, Copy, Debug)]
pub struct Declared {
    type_id: TypeId,
    type_name: &'static str,
    category: Category,
}

/// Marker used to declare streamed slots, `T` is the transform payload type.
pub(crate) struct Streamed<T>(PhantomData<T>);

/// Marker used to declare slots fed by a pre-supplied channel.
pub(crate) struct Channeled;

impl Declared {
    pub fn of<T: Bind>() -> Self {
        Self {
            type_id: TypeId::of::<T::Normalized>(),
            type_name: any::type_name::<T::Normalized>(),
            category: T::CATEGORY,
        }
    }

    pub(crate) fn streamed<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<Streamed<T>>(),
            type_name: any::type_name::<T>(),
            category: Category::Stream,
        }
    }

    pub(crate) fn channeled() -> Self {
        Self {
            type_id: TypeId::of::<Channeled>(),
            type_name: "channel",
            category: Category::Direct,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for Declared {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.category == other.category
    }
}

impl Eq for Declared {}

impl Value {
    /// Category of a dynamic value.
    pub fn category(&self) -> Category {
        match self {
            Value::Null => Category::Null,
            Value::String(..) => Category::String,
            Value::Double(..) => Category::Double,
            Value::Float(..) => Category::Float,
            Value::Integer(..) => Category::Integer,
            Value::Binary(..) => Category::Binary,
            Value::Blob(..) => Category::Blob,
            Value::Character(..) => Category::Character,
            Value::Boolean(..) => Category::Boolean,
            Value::Date(..) => Category::Date,
            Value::Long(..) => Category::Long,
            Value::Object(..) => Category::OpaqueObject,
        }
    }
}
