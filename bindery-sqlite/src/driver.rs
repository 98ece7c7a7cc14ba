use crate::{
    CBox,
    bind::bind_input,
    error_message_from_ptr,
    extract::{extract_name, extract_value, write_column},
};
use anyhow::{Context, Result, anyhow, bail};
use bindery_core::{Category, Credentials, Driver, InputBinding, OutputBinding, truncate_long};
use libsqlite3_sys::{
    SQLITE_DONE, SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_READWRITE,
    SQLITE_OPEN_URI, SQLITE_ROW, sqlite3, sqlite3_bind_parameter_count,
    sqlite3_bind_parameter_index, sqlite3_changes64, sqlite3_clear_bindings,
    sqlite3_column_count, sqlite3_db_handle, sqlite3_errmsg, sqlite3_exec, sqlite3_finalize,
    sqlite3_free, sqlite3_open_v2, sqlite3_prepare_v2, sqlite3_reset, sqlite3_step, sqlite3_stmt,
    sqlite3_total_changes64,
};
use std::{
    collections::HashMap,
    ffi::{CStr, CString, c_char, c_int},
    io::ErrorKind,
    ptr,
};
use url::form_urlencoded;

// Exported by the bundled library, missing from the prebuilt bindings.
// Unlike `sqlite3_close` it defers the close while statements are alive.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// Native link over the bundled sqlite library.
///
/// ```text
/// sqlite://path/to/file.sqlite?mode=rwc
/// sqlite://:memory:
/// ```
/// The location and the parameters not consumed by the binding layer are
/// handed to sqlite as a `file:` URI, so every sqlite URI parameter works.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver {}

impl SqliteDriver {
    pub const fn new() -> Self {
        Self {}
    }
}

pub struct SqliteLink {
    pub(crate) connection: CBox<sqlite3>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Idle,
    /// The execution stepped onto the first row, not handed out yet.
    Pending,
    /// A row was handed out, the next fetch steps.
    Current,
    Done,
}

pub struct SqlitePrepared {
    pub(crate) statement: CBox<sqlite3_stmt>,
    parameters: HashMap<String, c_int>,
    cursor: Cursor,
}

impl SqlitePrepared {
    pub(crate) fn sql(&self) -> String {
        unsafe {
            let sql = libsqlite3_sys::sqlite3_sql(*self.statement);
            if sql.is_null() {
                return String::new();
            }
            CStr::from_ptr(sql).to_string_lossy().into_owned()
        }
    }

    pub(crate) fn error(&self) -> anyhow::Error {
        unsafe {
            let db = sqlite3_db_handle(*self.statement);
            anyhow!(error_message_from_ptr(sqlite3_errmsg(db)).to_string())
        }
    }

    fn step(&mut self) -> Result<bool> {
        match unsafe { sqlite3_step(*self.statement) } {
            SQLITE_ROW => Ok(true),
            SQLITE_DONE => {
                self.cursor = Cursor::Done;
                Ok(false)
            }
            _ => {
                self.cursor = Cursor::Done;
                let error = self.error();
                unsafe {
                    sqlite3_reset(*self.statement);
                }
                Err(error)
            }
        }
    }

    fn column_count(&self) -> usize {
        unsafe { sqlite3_column_count(*self.statement) as usize }
    }
}

fn exec(connection: *mut sqlite3, sql: &CStr) -> Result<()> {
    unsafe {
        let mut message: *mut c_char = ptr::null_mut();
        let rc = sqlite3_exec(connection, sql.as_ptr(), None, ptr::null_mut(), &mut message);
        if rc != SQLITE_OK {
            let error = if message.is_null() {
                anyhow!(error_message_from_ptr(sqlite3_errmsg(connection)).to_string())
            } else {
                let error = anyhow!(error_message_from_ptr(message).to_string());
                sqlite3_free(message.cast());
                error
            };
            return Err(error.context(format!("While running `{}`", sql.to_string_lossy())));
        }
        Ok(())
    }
}

/// `file:` URI sqlite opens, `%`, `?` and `#` are reserved in the path.
fn file_uri(credentials: &Credentials) -> String {
    let path = credentials
        .location
        .replace('%', "%25")
        .replace('?', "%3f")
        .replace('#', "%23");
    let mut uri = format!("file:{}", path);
    if !credentials.params.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(credentials.params.iter())
            .finish();
        uri.push('?');
        uri.push_str(&query);
    }
    uri
}

impl Driver for SqliteDriver {
    type Link = SqliteLink;
    type Statement = SqlitePrepared;

    const NAME: &'static str = "sqlite";

    fn open(&self, credentials: &Credentials) -> Result<Self::Link> {
        let uri = file_uri(credentials);
        let path = CString::new(uri.as_bytes())
            .with_context(|| format!("Invalid sqlite location `{}`", credentials.location))?;
        unsafe {
            let mut connection = CBox::new(ptr::null_mut(), |p| {
                sqlite3_close_v2(p);
            });
            let rc = sqlite3_open_v2(
                path.as_ptr(),
                &mut *connection,
                SQLITE_OPEN_URI | SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE | SQLITE_OPEN_FULLMUTEX,
                ptr::null(),
            );
            if rc != SQLITE_OK {
                let error = if connection.is_null() {
                    anyhow!("Out of memory while opening `{}`", uri)
                } else {
                    anyhow!(error_message_from_ptr(sqlite3_errmsg(*connection)).to_string())
                        .context(format!("Could not open `{}`", uri))
                };
                return Err(error);
            }
            Ok(SqliteLink { connection })
        }
    }

    fn close(&self, link: Self::Link) -> Result<()> {
        let connection = link.connection.into_raw();
        let rc = unsafe { sqlite3_close_v2(connection) };
        if rc != SQLITE_OK {
            bail!("Could not close the sqlite connection (error code {})", rc);
        }
        Ok(())
    }

    fn prepare(&self, link: &mut Self::Link, sql: &str) -> Result<Self::Statement> {
        let query = CString::new(sql.as_bytes())
            .context("Could not create a CString from the query String")?;
        unsafe {
            let mut statement = CBox::new(ptr::null_mut(), |p| {
                sqlite3_finalize(p);
            });
            let mut tail: *const c_char = ptr::null();
            let rc = sqlite3_prepare_v2(
                *link.connection,
                query.as_ptr(),
                -1,
                &mut *statement,
                &mut tail,
            );
            if rc != SQLITE_OK {
                bail!(error_message_from_ptr(sqlite3_errmsg(*link.connection)).to_string());
            }
            if statement.is_null() {
                bail!("The query does not contain any statement");
            }
            let consumed = if tail.is_null() {
                sql.len()
            } else {
                (tail as usize).saturating_sub(query.as_ptr() as usize)
            };
            let rest = sql.get(consumed..).unwrap_or_default();
            let rest = rest.trim_matches(|c: char| c.is_whitespace() || c == ';');
            if !rest.is_empty() {
                bail!(
                    "Cannot prepare more than one statement at a time, found the trailing `{}`",
                    truncate_long!(rest)
                );
            }
            Ok(SqlitePrepared {
                statement,
                parameters: HashMap::new(),
                cursor: Cursor::Idle,
            })
        }
    }

    fn release(&self, statement: Self::Statement) {
        let sql = statement.sql();
        log::trace!("Finalizing `{}`", truncate_long!(sql));
        drop(statement);
    }

    fn register_input(
        &self,
        statement: &mut Self::Statement,
        name: &str,
        _category: Category,
    ) -> Result<()> {
        let count = unsafe { sqlite3_bind_parameter_count(*statement.statement) };
        let index = if let Ok(position) = name.parse::<c_int>() {
            (1..=count).contains(&position).then_some(position)
        } else {
            [":", "@", "$"].iter().find_map(|prefix| {
                let key = CString::new(format!("{}{}", prefix, name)).ok()?;
                let index = unsafe { sqlite3_bind_parameter_index(*statement.statement, key.as_ptr()) };
                (index > 0).then_some(index)
            })
        };
        let Some(index) = index else {
            bail!(
                "The query has no parameter `{}` (it has {} parameters)",
                name,
                count
            );
        };
        statement.parameters.insert(name.into(), index);
        Ok(())
    }

    fn register_output(
        &self,
        statement: &mut Self::Statement,
        index: usize,
        _category: Category,
    ) -> Result<()> {
        let count = statement.column_count();
        if index > count {
            bail!("Column {} does not exist, the query returns {} columns", index, count);
        }
        Ok(())
    }

    fn execute(
        &self,
        link: &mut Self::Link,
        statement: &mut Self::Statement,
        inputs: Vec<InputBinding>,
    ) -> Result<u64> {
        unsafe {
            sqlite3_reset(*statement.statement);
            sqlite3_clear_bindings(*statement.statement);
        }
        statement.cursor = Cursor::Idle;
        for input in inputs {
            let Some(&index) = statement.parameters.get(&input.name) else {
                bail!("The parameter `{}` was never registered", input.name);
            };
            bind_input(statement, index, input)?;
        }
        let before = unsafe { sqlite3_total_changes64(*link.connection) };
        if statement.step()? {
            statement.cursor = Cursor::Pending;
            return Ok(0);
        }
        if statement.column_count() > 0 {
            return Ok(0);
        }
        // `sqlite3_changes64` keeps the count of the last DML across DDL statements
        let after = unsafe { sqlite3_total_changes64(*link.connection) };
        if after == before {
            return Ok(0);
        }
        let changes = unsafe { sqlite3_changes64(*link.connection) };
        Ok(changes.max(0) as u64)
    }

    fn fetch(
        &self,
        _link: &mut Self::Link,
        statement: &mut Self::Statement,
        outputs: &mut [OutputBinding],
    ) -> Result<bool> {
        match statement.cursor {
            Cursor::Idle | Cursor::Done => return Ok(false),
            Cursor::Pending => statement.cursor = Cursor::Current,
            Cursor::Current => {
                if !statement.step()? {
                    return Ok(false);
                }
            }
        }
        for output in outputs {
            let column = (output.index - 1) as c_int;
            if output.category.is_streaming() {
                let written = output
                    .writer()
                    .map(|writer| write_column(*statement.statement, column, writer));
                match written {
                    // The transform stopped reading, its outcome reaches the caller
                    Some(Err(e)) if output.is_stream() && e.kind() == ErrorKind::BrokenPipe => {
                        log::debug!(
                            "The reader of column {} went away before the end: {}",
                            output.index,
                            e
                        );
                    }
                    Some(Err(e)) => {
                        return Err(anyhow::Error::new(e)
                            .context(format!("While writing the column {}", output.index)));
                    }
                    _ => {}
                }
                output.finish();
            } else {
                let value = extract_value(*statement.statement, column, output.category)
                    .with_context(|| format!("While reading the column {}", output.index))?;
                output.set(value);
            }
        }
        Ok(true)
    }

    fn begin(&self, link: &mut Self::Link) -> Result<()> {
        exec(*link.connection, c"BEGIN")
    }

    fn commit(&self, link: &mut Self::Link) -> Result<()> {
        exec(*link.connection, c"COMMIT")
    }

    fn abort(&self, link: &mut Self::Link) -> Result<()> {
        exec(*link.connection, c"ROLLBACK")
    }

    fn begin_procedure(&self, link: &mut Self::Link) -> Result<()> {
        exec(*link.connection, c"SAVEPOINT bindery_procedure")
    }

    fn end_procedure(&self, link: &mut Self::Link) -> Result<()> {
        exec(*link.connection, c"RELEASE SAVEPOINT bindery_procedure")
    }

    fn column_count(&self, statement: &Self::Statement) -> Option<usize> {
        Some(statement.column_count())
    }

    fn column_name(&self, statement: &Self::Statement, index: usize) -> Option<String> {
        extract_name(*statement.statement, (index.checked_sub(1)?) as c_int)
            .inspect_err(|e| log::warn!("{:#}", e))
            .ok()
    }
}
