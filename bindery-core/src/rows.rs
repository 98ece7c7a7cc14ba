use crate::{Driver, Result, Statement, Value};
use std::{iter::FusedIterator, sync::Arc};

/// Shared reference-counted column name list.
pub type RowNames = Arc<[String]>;

/// One fetched row: the values of the bound (non streamed) outputs with their labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column names.
    pub labels: RowNames,
    /// Data values (aligned by index with `labels`).
    pub values: Box<[Value]>,
}

impl Row {
    pub fn new(labels: RowNames, values: Box<[Value]>) -> Self {
        Self { labels, values }
    }
    pub fn names(&self) -> &[String] {
        &self.labels
    }
    pub fn values(&self) -> &[Value] {
        &self.values
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// Value at the 0-based position.
    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }
    pub fn get_column(&self, name: &str) -> Option<&Value> {
        self.labels
            .iter()
            .position(|v| v == name)
            .and_then(|i| self.values.get(i))
    }
}

impl From<Row> for Box<[Value]> {
    fn from(value: Row) -> Self {
        value.values
    }
}

enum Source<'s, D: Driver> {
    Borrowed(&'s mut Statement<D>),
    Owned(Statement<D>),
}

/// Lazy cursor over the rows of an executed statement.
///
/// Each call to `next` fetches one row. Once the results are over the
/// statement is closed, a cursor that owns its statement also closes it when
/// dropped early.
pub struct Rows<'s, D: Driver> {
    source: Source<'s, D>,
    affected: u64,
    done: bool,
}

impl<'s, D: Driver> Rows<'s, D> {
    pub(crate) fn borrowed(statement: &'s mut Statement<D>, affected: u64) -> Result<Self> {
        Self::new(Source::Borrowed(statement), affected)
    }

    pub(crate) fn owned(statement: Statement<D>, affected: u64) -> Result<Self> {
        Self::new(Source::Owned(statement), affected)
    }

    fn new(source: Source<'s, D>, affected: u64) -> Result<Self> {
        let mut rows = Self {
            source,
            affected,
            done: false,
        };
        if affected != 0 {
            rows.finish();
        } else {
            rows.statement().bind_generic_outputs()?;
        }
        Ok(rows)
    }

    fn statement(&mut self) -> &mut Statement<D> {
        match &mut self.source {
            Source::Borrowed(v) => v,
            Source::Owned(v) => v,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        self.statement().close();
    }

    /// The count returned by the execution, nonzero means there are no rows.
    pub fn affected(&self) -> u64 {
        self.affected
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

impl<'s, D: Driver> Iterator for Rows<'s, D> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.statement().fetch() {
            Ok(true) => Some(Ok(self.statement().row())),
            Ok(false) => {
                self.finish();
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<'s, D: Driver> FusedIterator for Rows<'s, D> {}

impl<'s, D: Driver> Drop for Rows<'s, D> {
    fn drop(&mut self) {
        if let Source::Owned(statement) = &mut self.source {
            statement.close();
        }
    }
}
