mod bind;
mod cbox;
mod driver;
mod extract;

use std::{
    ffi::{CStr, c_char},
    ptr,
};

pub(crate) use cbox::*;
pub use driver::*;

/// Sqlite connection to the given url, `sqlite://path?params`.
pub type SqliteConnection = bindery_core::Connection<SqliteDriver>;
pub type SqliteStatement = bindery_core::Statement<SqliteDriver>;

pub(crate) fn error_message_from_ptr<'a>(ptr: *const c_char) -> &'a str {
    unsafe {
        if ptr != ptr::null() {
            CStr::from_ptr(ptr)
                .to_str()
                .unwrap_or("Unknown error (the error message was not a valid C string)")
        } else {
            "Unknown error (could not extract the error message)"
        }
    }
}
