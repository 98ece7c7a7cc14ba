use crate::SqlitePrepared;
use anyhow::{Context, Result};
use bindery_core::{DATE_FORMAT, Inbound, InputBinding, Value, truncate_long};
use libsqlite3_sys::{
    SQLITE_OK, SQLITE_TRANSIENT, sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int,
    sqlite3_bind_int64, sqlite3_bind_null, sqlite3_bind_text, sqlite3_stmt,
};
use std::{
    ffi::{c_char, c_int, c_void},
    io::Read,
};

unsafe fn bind_text(statement: *mut sqlite3_stmt, index: c_int, text: &str) -> c_int {
    unsafe {
        sqlite3_bind_text(
            statement,
            index,
            text.as_ptr() as *const c_char,
            text.len() as c_int,
            SQLITE_TRANSIENT(),
        )
    }
}

unsafe fn bind_blob(statement: *mut sqlite3_stmt, index: c_int, bytes: &[u8]) -> c_int {
    unsafe {
        sqlite3_bind_blob(
            statement,
            index,
            bytes.as_ptr() as *const c_void,
            bytes.len() as c_int,
            SQLITE_TRANSIENT(),
        )
    }
}

/// Binds one input to the parameter `index` (1-based).
///
/// Streamed inputs are read to the end and bound as a blob, sqlite has no
/// incremental parameter binding.
pub(crate) fn bind_input(
    prepared: &mut SqlitePrepared,
    index: c_int,
    input: InputBinding,
) -> Result<()> {
    let InputBinding { name, data, .. } = input;
    let value = match data {
        Inbound::Value(value) => value,
        Inbound::Stream(mut reader) => read_stream(&name, &mut reader)?,
        Inbound::Channel(mut reader) => read_stream(&name, &mut reader)?,
    };
    let statement = *prepared.statement;
    let rc = unsafe {
        match &value {
            v if v.is_null() => sqlite3_bind_null(statement, index),
            Value::String(Some(v)) => bind_text(statement, index, v),
            Value::Character(Some(v)) => bind_text(statement, index, v.encode_utf8(&mut [0; 4])),
            Value::Double(Some(v)) => sqlite3_bind_double(statement, index, *v),
            Value::Float(Some(v)) => sqlite3_bind_double(statement, index, *v as f64),
            Value::Integer(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Boolean(Some(v)) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Long(Some(v)) => sqlite3_bind_int64(statement, index, *v),
            Value::Binary(Some(v)) | Value::Blob(Some(v)) | Value::Object(Some(v)) => {
                bind_blob(statement, index, v)
            }
            Value::Date(Some(v)) => {
                let text = v
                    .format(DATE_FORMAT)
                    .with_context(|| format!("Could not format the date of `{}`", name))?;
                bind_text(statement, index, &text)
            }
            _ => sqlite3_bind_null(statement, index),
        }
    };
    if rc != SQLITE_OK {
        let sql = prepared.sql();
        let error = prepared.error().context(format!(
            "Cannot bind parameter `{}` to query:\n{}",
            name,
            truncate_long!(sql)
        ));
        log::error!("{:#}", error);
        return Err(error);
    }
    Ok(())
}

fn read_stream(name: &str, reader: &mut dyn Read) -> Result<Value> {
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .with_context(|| format!("While reading the stream bound to `{}`", name))?;
    log::trace!("Read {} bytes for the parameter `{}`", bytes.len(), name);
    Ok(Value::Blob(Some(bytes)))
}
