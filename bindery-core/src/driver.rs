use crate::{Category, Credentials, PipeReader, PipeWriter, Value};
use std::{
    fmt::{self, Debug},
    io::{Read, Write},
};

/// The native link: the primitive operations the binding layer is built on.
///
/// A driver is a stateless entry point, the state lives in the `Link` (one
/// open database link) and in each `Statement` (one parsed statement). Both
/// are owned by the binding layer and handed back to the driver to be
/// released exactly once.
///
/// Every method is called from the single foreground thread driving the
/// connection. Streamed parameters and columns reach the driver as pipe
/// ends, the driver reads a [`PipeReader`] to end-of-stream and writes a
/// [`PipeWriter`] until the column is exhausted, then calls
/// [`OutputBinding::finish`]; the binding layer closes whatever is left open
/// once the call returns.
pub trait Driver: Send + Sync + 'static {
    type Link: Send + 'static;
    type Statement: Send + 'static;

    /// URL scheme of this driver, `name://location?params`.
    const NAME: &'static str;

    fn open(&self, credentials: &Credentials) -> anyhow::Result<Self::Link>;
    fn close(&self, link: Self::Link) -> anyhow::Result<()>;

    fn prepare(&self, link: &mut Self::Link, sql: &str) -> anyhow::Result<Self::Statement>;
    /// Free a statement, called once for every prepared statement.
    fn release(&self, statement: Self::Statement);

    /// Validate a named input before the slot is created.
    fn register_input(
        &self,
        statement: &mut Self::Statement,
        name: &str,
        category: Category,
    ) -> anyhow::Result<()>;
    /// Validate an output column (1-based) before the slot is created.
    fn register_output(
        &self,
        statement: &mut Self::Statement,
        index: usize,
        category: Category,
    ) -> anyhow::Result<()>;

    /// Run the statement with the given inputs, returning the affected row
    /// count. Zero means the statement produced a result to be fetched.
    fn execute(
        &self,
        link: &mut Self::Link,
        statement: &mut Self::Statement,
        inputs: Vec<InputBinding>,
    ) -> anyhow::Result<u64>;
    /// Move to the next row and fill `outputs`, false when there are no more rows.
    fn fetch(
        &self,
        link: &mut Self::Link,
        statement: &mut Self::Statement,
        outputs: &mut [OutputBinding],
    ) -> anyhow::Result<bool>;

    fn begin(&self, link: &mut Self::Link) -> anyhow::Result<()>;
    fn commit(&self, link: &mut Self::Link) -> anyhow::Result<()>;
    fn abort(&self, link: &mut Self::Link) -> anyhow::Result<()>;
    fn begin_procedure(&self, link: &mut Self::Link) -> anyhow::Result<()>;
    fn end_procedure(&self, link: &mut Self::Link) -> anyhow::Result<()>;

    /// Number of result columns, when the driver knows it.
    fn column_count(&self, _statement: &Self::Statement) -> Option<usize> {
        None
    }
    /// Label of the result column `index` (1-based).
    fn column_name(&self, _statement: &Self::Statement, _index: usize) -> Option<String> {
        None
    }
}

/// Data of one input for one execution.
pub enum Inbound {
    Value(Value),
    /// Source end of a pipe fed by a background transform.
    Stream(PipeReader),
    /// A ready reader supplied by the caller.
    Channel(Box<dyn Read + Send>),
}

impl Inbound {
    /// The byte source of streamed inputs.
    pub fn reader(&mut self) -> Option<&mut dyn Read> {
        match self {
            Inbound::Value(..) => None,
            Inbound::Stream(v) => Some(v),
            Inbound::Channel(v) => Some(v.as_mut()),
        }
    }
}

impl Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inbound::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Inbound::Stream(v) => f.debug_tuple("Stream").field(v).finish(),
            Inbound::Channel(..) => f.write_str("Channel"),
        }
    }
}

#[derive(Debug)]
pub struct InputBinding {
    pub name: String,
    pub category: Category,
    pub data: Inbound,
}

/// Destination of one output column for one fetch.
pub enum Outbound {
    Value(Value),
    /// Sink end of a pipe drained by a background transform.
    Stream(PipeWriter),
    /// A ready writer supplied by the caller.
    Channel(Box<dyn Write + Send>),
}

impl Debug for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outbound::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Outbound::Stream(v) => f.debug_tuple("Stream").field(v).finish(),
            Outbound::Channel(..) => f.write_str("Channel"),
        }
    }
}

#[derive(Debug)]
pub struct OutputBinding {
    /// 1-based column index.
    pub index: usize,
    pub category: Category,
    pub target: Outbound,
}

impl OutputBinding {
    /// Store the fetched value, ignored for streamed columns.
    pub fn set(&mut self, value: Value) {
        if let Outbound::Value(target) = &mut self.target {
            *target = value;
        }
    }

    /// The byte sink of streamed columns.
    pub fn writer(&mut self) -> Option<&mut dyn Write> {
        match &mut self.target {
            Outbound::Value(..) => None,
            Outbound::Stream(v) => Some(v),
            Outbound::Channel(v) => Some(v.as_mut()),
        }
    }

    /// True when the sink is a pipe drained by a background transform.
    pub fn is_stream(&self) -> bool {
        matches!(self.target, Outbound::Stream(..))
    }

    /// Closes the pipe of a streamed column once the column is written, the
    /// transform sees end-of-stream without waiting for the rest of the row.
    pub fn finish(&mut self) {
        if self.is_stream() {
            self.target = Outbound::Value(Value::Null);
        }
    }
}
