use crate::{Category, Declared, Inbound, Outbound, PipeReader, PipeWriter, Result, Scheduler, Value, pipe};
use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

/// State common to every bound slot.
#[derive(Debug)]
pub(crate) struct SlotHeader {
    key: String,
    declared: Declared,
    orphaned: AtomicBool,
}

impl SlotHeader {
    pub(crate) fn new(key: impl Into<String>, declared: Declared) -> Self {
        Self {
            key: key.into(),
            declared,
            orphaned: AtomicBool::new(false),
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn declared(&self) -> &Declared {
        &self.declared
    }

    pub(crate) fn category(&self) -> Category {
        self.declared.category()
    }

    pub(crate) fn orphan(&self) {
        self.orphaned.store(true, Ordering::Release);
    }

    pub(crate) fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::Acquire)
    }
}

/// An input slot as seen by its statement.
pub(crate) trait InboundSlot: Send + Sync {
    fn header(&self) -> &SlotHeader;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// The data handed to the native link for the next execution.
    fn inbound(&self) -> Result<Inbound>;
    /// Called after the native execution returned, surfaces deferred failures.
    fn complete(&self) -> Result<()> {
        Ok(())
    }
    /// Drops any pending cycle without waiting for it.
    fn discard(&self) {}
}

/// An output slot as seen by its statement.
pub(crate) trait OutboundSlot: Send + Sync {
    fn header(&self) -> &SlotHeader;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    /// Clears the previous value and prepares the destination of the next fetch.
    fn reset(&self) -> Result<Outbound>;
    /// Takes back the destination once the native fetch returned.
    fn store(&self, target: Outbound) -> Result<()>;
    /// The value for row materialization, `None` for streamed columns.
    fn current(&self) -> Option<Value> {
        None
    }
    /// The fetch found no row, settle whatever `reset` started.
    fn exhausted(&self) {}
    fn discard(&self) {}
}

/// What a streamed slot needs to open a cycle: pipe sizing and the scheduler.
#[derive(Clone, Debug)]
pub(crate) struct Bridge {
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) pipe_capacity: usize,
    pub(crate) chunk_size: usize,
}

impl Bridge {
    pub(crate) fn pipe(&self) -> (PipeWriter, PipeReader) {
        pipe(self.pipe_capacity, self.chunk_size)
    }
}
