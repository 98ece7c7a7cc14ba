#![allow(dead_code)]
use anyhow::{Context, anyhow, bail};
use bindery_core::{
    Category, Connection, Credentials, Driver, Inbound, InputBinding, Outbound, OutputBinding,
    Value,
};
use log::LevelFilter;
use std::{
    collections::BTreeMap,
    env,
    io::{Read, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// What the echo link did, shared with the test.
#[derive(Debug, Default, Clone)]
pub struct Journal {
    pub released: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub events: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
    fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

/// In memory link echoing inputs back as columns.
///
/// - `select a, b` has the columns `a` and `b`, each row carries the inputs
///   named like the columns. It returns as many rows as the `times` input
///   (default 1).
/// - `update ...` reports one affected row.
/// - `broken ...` consumes its inputs and then fails.
/// - Inputs whose name starts with `bad` are rejected.
#[derive(Debug, Default, Clone)]
pub struct EchoDriver {
    pub journal: Journal,
}

#[derive(Debug, Default)]
pub struct EchoLink {
    transaction: bool,
    procedure: bool,
}

#[derive(Debug)]
pub struct EchoStatement {
    sql: String,
    columns: Vec<String>,
    inputs: BTreeMap<String, Value>,
    remaining: usize,
}

pub fn connect() -> (Connection<EchoDriver>, Journal) {
    connect_with("")
}

pub fn connect_with(params: &str) -> (Connection<EchoDriver>, Journal) {
    init_logs();
    let driver = EchoDriver::default();
    let journal = driver.journal.clone();
    let url = format!("echo://memory{}", params);
    let connection = Connection::open(driver, &url).expect("Could not open the echo connection");
    (connection, journal)
}

impl Driver for EchoDriver {
    type Link = EchoLink;
    type Statement = EchoStatement;

    const NAME: &'static str = "echo";

    fn open(&self, credentials: &Credentials) -> anyhow::Result<Self::Link> {
        if credentials.location != "memory" {
            bail!("Unknown location `{}`", credentials.location);
        }
        Ok(EchoLink::default())
    }

    fn close(&self, _link: Self::Link) -> anyhow::Result<()> {
        self.journal.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn prepare(&self, _link: &mut Self::Link, sql: &str) -> anyhow::Result<Self::Statement> {
        let columns = match sql.strip_prefix("select ") {
            Some(rest) => rest.split(',').map(|v| v.trim().to_string()).collect(),
            None if sql.starts_with("update") || sql.starts_with("broken") => Vec::new(),
            None => bail!("Syntax error near `{}`", sql),
        };
        Ok(EchoStatement {
            sql: sql.into(),
            columns,
            inputs: Default::default(),
            remaining: 0,
        })
    }

    fn release(&self, statement: Self::Statement) {
        self.journal.record(format!("release {}", statement.sql));
        self.journal.released.fetch_add(1, Ordering::SeqCst);
    }

    fn register_input(
        &self,
        _statement: &mut Self::Statement,
        name: &str,
        _category: Category,
    ) -> anyhow::Result<()> {
        if name.starts_with("bad") {
            bail!("No parameter named `{}`", name);
        }
        Ok(())
    }

    fn register_output(
        &self,
        statement: &mut Self::Statement,
        index: usize,
        _category: Category,
    ) -> anyhow::Result<()> {
        if index > statement.columns.len() {
            bail!(
                "Column {} out of range, the statement has {} columns",
                index,
                statement.columns.len()
            );
        }
        Ok(())
    }

    fn execute(
        &self,
        _link: &mut Self::Link,
        statement: &mut Self::Statement,
        inputs: Vec<InputBinding>,
    ) -> anyhow::Result<u64> {
        statement.inputs.clear();
        for mut input in inputs {
            let value = match input.data {
                Inbound::Value(v) => v,
                mut data => {
                    let mut buffer = Vec::new();
                    if let Some(reader) = data.reader() {
                        reader
                            .read_to_end(&mut buffer)
                            .with_context(|| format!("While reading the input `{}`", input.name))?;
                    }
                    Value::Binary(Some(buffer))
                }
            };
            statement.inputs.insert(input.name, value);
        }
        self.journal.record(format!("execute {}", statement.sql));
        if statement.sql.starts_with("broken") {
            return Err(anyhow!("The statement is broken"));
        }
        if statement.sql.starts_with("update") {
            return Ok(1);
        }
        statement.remaining = match statement.inputs.get("times") {
            Some(Value::Integer(Some(v))) => *v as usize,
            _ => 1,
        };
        Ok(0)
    }

    fn fetch(
        &self,
        _link: &mut Self::Link,
        statement: &mut Self::Statement,
        outputs: &mut [OutputBinding],
    ) -> anyhow::Result<bool> {
        if statement.remaining == 0 {
            return Ok(false);
        }
        statement.remaining -= 1;
        for output in outputs {
            let value = statement
                .columns
                .get(output.index - 1)
                .and_then(|v| statement.inputs.get(v))
                .cloned()
                .unwrap_or_default();
            if matches!(output.target, Outbound::Value(..)) {
                output.set(value);
            } else if let Some(writer) = output.writer() {
                let bytes = match value.as_bytes() {
                    Some(v) => v.to_vec(),
                    None => value.to_string().into_bytes(),
                };
                writer.write_all(&bytes)?;
                output.finish();
            }
        }
        Ok(true)
    }

    fn begin(&self, link: &mut Self::Link) -> anyhow::Result<()> {
        if link.transaction {
            bail!("Nested transactions are not supported");
        }
        link.transaction = true;
        self.journal.record("begin");
        Ok(())
    }

    fn commit(&self, link: &mut Self::Link) -> anyhow::Result<()> {
        if !link.transaction || link.procedure {
            bail!("Cannot commit now");
        }
        link.transaction = false;
        self.journal.record("commit");
        Ok(())
    }

    fn abort(&self, link: &mut Self::Link) -> anyhow::Result<()> {
        link.transaction = false;
        link.procedure = false;
        self.journal.record("abort");
        Ok(())
    }

    fn begin_procedure(&self, link: &mut Self::Link) -> anyhow::Result<()> {
        link.procedure = true;
        self.journal.record("start");
        Ok(())
    }

    fn end_procedure(&self, link: &mut Self::Link) -> anyhow::Result<()> {
        link.procedure = false;
        self.journal.record("end");
        Ok(())
    }

    fn column_count(&self, statement: &Self::Statement) -> Option<usize> {
        Some(statement.columns.len())
    }

    fn column_name(&self, statement: &Self::Statement, index: usize) -> Option<String> {
        statement.columns.get(index.checked_sub(1)?).cloned()
    }
}

macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}
