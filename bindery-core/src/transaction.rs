use crate::{CreationSite, Driver, ResourceLeakWarning, Result, Statement, Connection};

/// A transaction scoped to a value.
///
/// [`close`](TransactionSequence::close) commits, but only while the
/// transaction it began is still the current one: when something else
/// already settled it (a procedure commit, an explicit abort) closing is a
/// no-op. Dropping an unsettled sequence rolls the transaction back.
pub struct TransactionSequence<'c, D: Driver> {
    connection: &'c mut Connection<D>,
    id: u64,
    settled: bool,
    created_at: CreationSite,
}

impl<'c, D: Driver> TransactionSequence<'c, D> {
    pub(crate) fn new(connection: &'c mut Connection<D>, id: u64, created_at: CreationSite) -> Self {
        Self {
            connection,
            id,
            settled: false,
            created_at,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while the transaction of this sequence is the open one.
    pub fn is_current(&self) -> bool {
        self.connection.transaction_id() == Some(self.id)
    }

    pub fn connection(&mut self) -> &mut Connection<D> {
        self.connection
    }

    #[track_caller]
    pub fn statement(&mut self, sql: &str) -> Result<&mut Statement<D>> {
        self.connection.statement(sql)
    }

    #[track_caller]
    pub fn execute(&mut self, sql: &str) -> Result<u64> {
        self.connection.execute(sql)
    }

    /// Open a procedure scope nested in this transaction.
    #[track_caller]
    pub fn procedure(&mut self) -> Result<Procedure<'_, D>> {
        let created_at = CreationSite::capture();
        self.connection.start()?;
        Ok(Procedure {
            connection: self.connection,
            transaction: self.id,
            ended: false,
            created_at,
        })
    }

    /// Commit if the transaction is still current.
    pub fn close(&mut self) -> Result<()> {
        if self.settled {
            return Ok(());
        }
        self.settled = true;
        if self.is_current() {
            self.connection.commit()
        } else {
            log::debug!(
                "Transaction {} was already settled, nothing to commit",
                self.id
            );
            Ok(())
        }
    }

    /// Roll back if the transaction is still current.
    pub fn abort(&mut self) -> Result<()> {
        if self.settled {
            return Ok(());
        }
        self.settled = true;
        if self.is_current() {
            self.connection.abort()
        } else {
            Ok(())
        }
    }
}

impl<'c, D: Driver> Drop for TransactionSequence<'c, D> {
    fn drop(&mut self) {
        if !self.settled && self.is_current() {
            ResourceLeakWarning::report("transaction sequence", self.created_at);
            if let Err(e) = self.abort() {
                log::error!("While rolling back the transaction {}: {}", self.id, e);
            }
        }
    }
}

/// A procedure scope opened by [`TransactionSequence::procedure`].
///
/// Dropping it without settling ends the scope.
pub struct Procedure<'t, D: Driver> {
    connection: &'t mut Connection<D>,
    transaction: u64,
    ended: bool,
    created_at: CreationSite,
}

impl<'t, D: Driver> Procedure<'t, D> {
    fn is_open(&self) -> bool {
        !self.ended
            && self.connection.in_procedure()
            && self.connection.transaction_id() == Some(self.transaction)
    }

    #[track_caller]
    pub fn statement(&mut self, sql: &str) -> Result<&mut Statement<D>> {
        self.connection.statement(sql)
    }

    #[track_caller]
    pub fn execute(&mut self, sql: &str) -> Result<u64> {
        self.connection.execute(sql)
    }

    /// Close the scope, the transaction stays open.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        self.connection.end()
    }

    /// End the scope and commit the whole transaction.
    pub fn commit(mut self) -> Result<()> {
        self.ended = true;
        self.connection.commit()
    }

    /// Roll back the whole transaction.
    pub fn abort(mut self) -> Result<()> {
        self.ended = true;
        self.connection.abort()
    }
}

impl<'t, D: Driver> Drop for Procedure<'t, D> {
    fn drop(&mut self) {
        if self.is_open() {
            ResourceLeakWarning::report("procedure", self.created_at);
            self.ended = true;
            if let Err(e) = self.connection.end() {
                log::error!("While ending the procedure: {}", e);
            }
        }
    }
}
