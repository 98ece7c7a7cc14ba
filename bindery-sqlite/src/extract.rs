use anyhow::{Context, Result, anyhow, bail};
use bindery_core::{Category, DATE_FORMAT, DATE_FORMAT_SECONDS, Value};
use libsqlite3_sys::*;
use std::{
    ffi::{CStr, c_int},
    io::{self, Write},
    slice,
};
use time::PrimitiveDateTime;

unsafe fn column_bytes<'a>(statement: *mut sqlite3_stmt, index: c_int, text: bool) -> &'a [u8] {
    unsafe {
        let ptr = if text {
            sqlite3_column_text(statement, index) as *const u8
        } else {
            sqlite3_column_blob(statement, index) as *const u8
        };
        let len = sqlite3_column_bytes(statement, index) as usize;
        if ptr.is_null() || len == 0 {
            return &[];
        }
        slice::from_raw_parts(ptr, len)
    }
}

unsafe fn column_text(statement: *mut sqlite3_stmt, index: c_int) -> Result<String> {
    let bytes = unsafe { column_bytes(statement, index, true) };
    String::from_utf8(bytes.to_vec()).context("The column does not contain valid UTF-8 text")
}

/// Reads the column `index` (0-based) of the current row as `category`.
///
/// Sqlite converts between its storage classes on request, the generic
/// category takes whatever storage class the column holds.
pub(crate) fn extract_value(
    statement: *mut sqlite3_stmt,
    index: c_int,
    category: Category,
) -> Result<Value> {
    unsafe {
        let column_type = sqlite3_column_type(statement, index);
        if column_type == SQLITE_NULL {
            return Ok(Value::empty(category));
        }
        Ok(match category {
            Category::Null => Value::Null,
            Category::String => Value::String(Some(column_text(statement, index)?)),
            Category::Character => {
                let text = column_text(statement, index)?;
                Value::Character(text.chars().next())
            }
            Category::Double => Value::Double(Some(sqlite3_column_double(statement, index))),
            Category::Float => Value::Float(Some(sqlite3_column_double(statement, index) as f32)),
            Category::Integer => Value::Integer(Some(sqlite3_column_int(statement, index))),
            Category::Long => Value::Long(Some(sqlite3_column_int64(statement, index))),
            Category::Boolean => Value::Boolean(Some(sqlite3_column_int64(statement, index) != 0)),
            Category::Binary => Value::Binary(Some(column_bytes(statement, index, false).to_vec())),
            Category::Blob => Value::Blob(Some(column_bytes(statement, index, false).to_vec())),
            Category::Date => {
                let text = column_text(statement, index)?;
                let date = PrimitiveDateTime::parse(&text, DATE_FORMAT)
                    .or_else(|_| PrimitiveDateTime::parse(&text, DATE_FORMAT_SECONDS))
                    .with_context(|| format!("`{}` is not a date", text))?;
                Value::Date(Some(date))
            }
            Category::OpaqueObject => match column_type {
                SQLITE_INTEGER => Value::Long(Some(sqlite3_column_int64(statement, index))),
                SQLITE_FLOAT => Value::Double(Some(sqlite3_column_double(statement, index))),
                SQLITE_TEXT => Value::String(Some(column_text(statement, index)?)),
                SQLITE_BLOB => Value::Binary(Some(column_bytes(statement, index, false).to_vec())),
                _ => bail!("Unexpected column type {}", column_type),
            },
            Category::Stream | Category::Direct => {
                return Err(anyhow!(
                    "Streamed columns are written, not extracted (category {})",
                    category
                ));
            }
        })
    }
}

/// Writes the bytes of the column `index` (0-based) to `writer`.
pub(crate) fn write_column(
    statement: *mut sqlite3_stmt,
    index: c_int,
    writer: &mut dyn Write,
) -> io::Result<()> {
    let bytes = unsafe {
        match sqlite3_column_type(statement, index) {
            SQLITE_NULL => return Ok(()),
            SQLITE_BLOB => column_bytes(statement, index, false),
            _ => column_bytes(statement, index, true),
        }
    };
    writer.write_all(bytes)?;
    writer.flush()
}

pub(crate) fn extract_name(statement: *mut sqlite3_stmt, index: c_int) -> Result<String> {
    unsafe {
        let name = sqlite3_column_name(statement, index);
        if name.is_null() {
            bail!("Column {} has no name", index + 1);
        }
        Ok(CStr::from_ptr(name).to_str()?.into())
    }
}
