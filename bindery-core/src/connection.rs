use crate::{
    Bridge, CreationSite, Driver, ExecutionError, Options, ResourceLeakWarning, Result, Rows,
    Scheduler, Statement, TransactionSequence, lock,
};
use std::{
    fmt::{self, Debug},
    io::{self, Read, Write},
    sync::{Arc, Mutex, PoisonError, TryLockError},
};

/// What a connection shares with its statements.
pub(crate) struct Session<D: Driver> {
    pub(crate) driver: D,
    link: Mutex<Option<D::Link>>,
    pub(crate) bridge: Bridge,
    pub(crate) options: Options,
}

impl<D: Driver> Session<D> {
    /// Runs `f` on the native link.
    ///
    /// Overlapping calls fail with [`ExecutionError::Busy`] instead of waiting.
    pub(crate) fn with_link<R>(
        &self,
        f: impl FnOnce(&D, &mut D::Link) -> anyhow::Result<R>,
    ) -> Result<R> {
        let mut guard = match self.link.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
            Err(TryLockError::WouldBlock) => {
                let error = ExecutionError::Busy;
                log::error!("{}", error);
                return Err(error.into());
            }
        };
        let Some(link) = guard.as_mut() else {
            let error = ExecutionError::Closed("connection");
            log::error!("{}", error);
            return Err(error.into());
        };
        f(&self.driver, link).map_err(ExecutionError::native)
    }

    fn take_link(&self) -> Option<D::Link> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Reader shared between the connection and the channel inputs built on it.
#[derive(Clone)]
struct SharedReader(Arc<Mutex<Box<dyn Read + Send>>>);

impl Read for SharedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        lock(&self.0).read(buf)
    }
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Box<dyn Write + Send>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        lock(&self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        lock(&self.0).flush()
    }
}

/// An open link to the database together with its scheduler.
///
/// The connection keeps at most one current statement: asking for a new one
/// with [`statement`](Connection::statement) closes the previous one.
/// Independent statements come from [`prepare`](Connection::prepare).
///
/// # Transactions
/// At most one transaction is open at a time, each one gets an increasing
/// id. Inside it at most one procedure scope can be open.
pub struct Connection<D: Driver> {
    session: Arc<Session<D>>,
    current: Option<Statement<D>>,
    transaction: Option<u64>,
    transactions: u64,
    procedure: bool,
    stdin: Option<SharedReader>,
    stdout: Option<SharedWriter>,
    open: bool,
    created_at: CreationSite,
}

impl<D: Driver> Connection<D> {
    /// Open a connection with the url `name://location?params`, where `name`
    /// is [`Driver::NAME`].
    #[track_caller]
    pub fn open(driver: D, url: &str) -> Result<Self> {
        let created_at = CreationSite::capture();
        let (options, credentials) = Options::parse_url(D::NAME, url)?;
        let scheduler = Arc::new(Scheduler::new(&options)?);
        let link = driver.open(&credentials).map_err(|e| {
            ExecutionError::native(e.context(format!(
                "While opening the {} connection to `{}`",
                D::NAME,
                credentials.location
            )))
        })?;
        log::debug!("Opened the {} connection to `{}`", D::NAME, credentials.location);
        Ok(Self {
            session: Arc::new(Session {
                driver,
                link: Mutex::new(Some(link)),
                bridge: Bridge {
                    scheduler,
                    pipe_capacity: options.pipe_capacity,
                    chunk_size: options.chunk_size,
                },
                options,
            }),
            current: None,
            transaction: None,
            transactions: 0,
            procedure: false,
            stdin: None,
            stdout: None,
            open: true,
            created_at,
        })
    }

    #[track_caller]
    pub fn connect(url: &str) -> Result<Self>
    where
        D: Default,
    {
        Self::open(D::default(), url)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn options(&self) -> &Options {
        &self.session.options
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.session.bridge.scheduler
    }

    pub fn driver(&self) -> &D {
        &self.session.driver
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            let error = ExecutionError::Closed("connection");
            log::error!("{}", error);
            Err(error.into())
        }
    }

    fn close_current(&mut self) {
        if let Some(mut statement) = self.current.take() {
            statement.close();
        }
    }

    /// Parse `sql` into the current statement, closing the previous one.
    #[track_caller]
    pub fn statement(&mut self, sql: &str) -> Result<&mut Statement<D>> {
        self.ensure_open()?;
        self.close_current();
        let statement = Statement::new(self.session.clone(), sql)?;
        Ok(self.current.insert(statement))
    }

    /// The current statement, if still open.
    pub fn current(&mut self) -> Option<&mut Statement<D>> {
        self.current.as_mut().filter(|v| v.is_open())
    }

    /// Parse `sql` into a statement independent from the current one.
    #[track_caller]
    pub fn prepare(&mut self, sql: &str) -> Result<Statement<D>> {
        self.ensure_open()?;
        Statement::new(self.session.clone(), sql)
    }

    /// Run `sql` once, without inputs, and return the affected row count.
    #[track_caller]
    pub fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut statement = self.prepare(sql)?;
        let result = statement.execute();
        statement.close();
        result
    }

    /// Run `sql` once and iterate over its rows with generic outputs.
    #[track_caller]
    pub fn query(&mut self, sql: &str) -> Result<Rows<'static, D>> {
        let mut statement = self.prepare(sql)?;
        match statement.execute() {
            Ok(affected) => Rows::owned(statement, affected),
            Err(e) => {
                statement.close();
                Err(e)
            }
        }
    }

    pub fn transaction_id(&self) -> Option<u64> {
        self.transaction
    }

    pub fn in_procedure(&self) -> bool {
        self.procedure
    }

    /// Open a transaction and return its id.
    pub fn begin(&mut self) -> Result<u64> {
        self.ensure_open()?;
        if let Some(id) = self.transaction {
            return Err(ExecutionError::invalid_state(format!(
                "The transaction {} is already open",
                id
            )));
        }
        self.close_current();
        self.session.with_link(|driver, link| driver.begin(link))?;
        self.transactions += 1;
        self.transaction = Some(self.transactions);
        log::debug!("Transaction {} started", self.transactions);
        Ok(self.transactions)
    }

    /// Commit the open transaction, ending its procedure first if one is open.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(id) = self.transaction else {
            return Err(ExecutionError::invalid_state("No transaction to commit"));
        };
        self.close_current();
        if self.procedure {
            self.end()?;
        }
        self.session.with_link(|driver, link| driver.commit(link))?;
        self.transaction = None;
        log::debug!("Transaction {} committed", id);
        Ok(())
    }

    /// Roll back the open transaction, its procedure included.
    pub fn abort(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(id) = self.transaction.take() else {
            return Err(ExecutionError::invalid_state("No transaction to abort"));
        };
        self.close_current();
        self.procedure = false;
        self.session.with_link(|driver, link| driver.abort(link))?;
        log::debug!("Transaction {} aborted", id);
        Ok(())
    }

    /// Open a procedure scope inside the current transaction.
    pub fn start(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.transaction.is_none() {
            return Err(ExecutionError::invalid_state(
                "A procedure can only start inside a transaction",
            ));
        }
        if self.procedure {
            return Err(ExecutionError::invalid_state("A procedure is already open"));
        }
        self.session
            .with_link(|driver, link| driver.begin_procedure(link))?;
        self.procedure = true;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.procedure {
            return Err(ExecutionError::invalid_state("No procedure to end"));
        }
        self.session
            .with_link(|driver, link| driver.end_procedure(link))?;
        self.procedure = false;
        Ok(())
    }

    /// Begin a transaction scoped to the returned sequence.
    #[track_caller]
    pub fn sequence(&mut self) -> Result<TransactionSequence<'_, D>> {
        let created_at = CreationSite::capture();
        let id = self.begin()?;
        Ok(TransactionSequence::new(self, id, created_at))
    }

    /// Byte streams used by [`pipe`](Connection::pipe).
    pub fn with_stdio(
        &mut self,
        stdin: Option<Box<dyn Read + Send>>,
        stdout: Option<Box<dyn Write + Send>>,
    ) -> &mut Self {
        self.stdin = stdin.map(|v| SharedReader(Arc::new(Mutex::new(v))));
        self.stdout = stdout.map(|v| SharedWriter(Arc::new(Mutex::new(v))));
        self
    }

    /// Run `sql` once wired to the standard streams.
    ///
    /// The stdin stream feeds the input named `input`, the column `output` of
    /// every row is written into stdout. Returns the affected row count, or
    /// the number of rows written when the statement is a query.
    #[track_caller]
    pub fn pipe(&mut self, sql: &str, input: Option<&str>, output: Option<usize>) -> Result<u64> {
        let stdin = match input {
            Some(..) => Some(self.stdin.clone().ok_or_else(|| {
                ExecutionError::invalid_state("Piping an input requires a stdin stream")
            })?),
            None => None,
        };
        let stdout = match output {
            Some(..) => Some(self.stdout.clone().ok_or_else(|| {
                ExecutionError::invalid_state("Piping an output requires a stdout stream")
            })?),
            None => None,
        };
        let mut statement = self.prepare(sql)?;
        let result = Self::run_pipe(&mut statement, input.zip(stdin), output.zip(stdout));
        statement.close();
        result
    }

    fn run_pipe(
        statement: &mut Statement<D>,
        input: Option<(&str, SharedReader)>,
        output: Option<(usize, SharedWriter)>,
    ) -> Result<u64> {
        if let Some((name, stdin)) = input {
            statement.input_channel(name, move || Ok(Box::new(stdin.clone()) as Box<dyn Read + Send>))?;
        }
        let has_output = output.is_some();
        if let Some((index, stdout)) = output {
            statement
                .output_channel(index, move || Ok(Box::new(stdout.clone()) as Box<dyn Write + Send>))?;
        }
        let affected = statement.execute()?;
        if affected != 0 || !has_output {
            return Ok(affected);
        }
        let mut rows = 0;
        while statement.fetch()? {
            rows += 1;
        }
        Ok(rows)
    }

    /// Close the connection, rolling back a transaction left open.
    ///
    /// Outstanding transforms get the configured shutdown timeout to finish.
    /// Calling it again does nothing.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.close_current();
        if let Some(id) = self.transaction {
            log::warn!(
                "Closing the connection while the transaction {} is still open, rolling it back",
                id
            );
            if let Err(e) = self.abort() {
                log::error!("Could not roll back the transaction {}: {}", id, e);
            }
        }
        self.open = false;
        self.session
            .bridge
            .scheduler
            .shutdown(self.session.options.shutdown_timeout);
        if let Some(link) = self.session.take_link() {
            self.session.driver.close(link).map_err(|e| {
                ExecutionError::native(e.context(format!("While closing the {} connection", D::NAME)))
            })?;
        }
        log::debug!("Closed the {} connection", D::NAME);
        Ok(())
    }
}

impl<D: Driver> Debug for Connection<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &D::NAME)
            .field("open", &self.open)
            .field("transaction", &self.transaction)
            .field("procedure", &self.procedure)
            .field("options", &self.session.options)
            .finish()
    }
}

impl<D: Driver> Drop for Connection<D> {
    fn drop(&mut self) {
        if self.open {
            ResourceLeakWarning::report("connection", self.created_at);
            if let Err(e) = self.close() {
                log::error!("While closing the leaked connection: {}", e);
            }
        }
    }
}
