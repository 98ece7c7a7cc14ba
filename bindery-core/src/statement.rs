use crate::{
    Bind, BindingError, ChannelInputSlot, ChannelOutputSlot, CreationSite, Declared, Driver,
    Error, ExecutionError, InboundSlot, Input, InputBinding, InputChannel, InputStream,
    InputTransform, OutboundSlot, Output, OutputBinding, OutputChannel, OutputStream,
    OutputTransform, PipeReader, PipeWriter, ResourceLeakWarning, Result, Row, RowNames, Rows,
    Session, SlotHeader, StreamInputSlot, StreamOutputSlot, Value, ValueInputSlot,
    ValueOutputSlot, truncate_long,
};
use anyhow::Context;
use std::{
    collections::BTreeMap,
    fmt::{self, Debug},
    io::{Read, Write},
    sync::Arc,
};

/// A statement parsed once by the native link, executed any number of times.
///
/// Inputs are bound by name, outputs by 1-based column index. Declaring a key
/// again with the same type returns the slot already there, a different type
/// orphans it and binds a fresh one, the statement is never parsed again.
///
/// The native handle is released exactly once, by [`close`](Statement::close)
/// or, failing that, when the statement is dropped (with a
/// [`ResourceLeakWarning`]).
pub struct Statement<D: Driver> {
    session: Arc<Session<D>>,
    handle: Option<D::Statement>,
    sql: Arc<str>,
    inputs: BTreeMap<String, Arc<dyn InboundSlot>>,
    outputs: BTreeMap<usize, Arc<dyn OutboundSlot>>,
    labels: Option<RowNames>,
    created_at: CreationSite,
}

impl<D: Driver> Statement<D> {
    #[track_caller]
    pub(crate) fn new(session: Arc<Session<D>>, sql: &str) -> Result<Self> {
        let created_at = CreationSite::capture();
        let handle = session.with_link(|driver, link| {
            driver
                .prepare(link, sql)
                .with_context(|| format!("While preparing the query:\n{}", truncate_long!(sql)))
        })?;
        Ok(Self {
            session,
            handle: Some(handle),
            sql: sql.into(),
            inputs: Default::default(),
            outputs: Default::default(),
            labels: None,
            created_at,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    fn closed() -> Error {
        ExecutionError::invalid_state("The statement is closed")
    }

    /// Returns the slot already bound under `name` when the declaration
    /// matches, otherwise registers the declaration and orphans the old slot.
    fn claim_input<S: InboundSlot + 'static>(
        &mut self,
        name: &str,
        declared: &Declared,
    ) -> Result<Option<Arc<S>>> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(Self::closed());
        };
        if let Some(existing) = self.inputs.get(name)
            && existing.header().declared() == declared
            && let Ok(slot) = existing.clone().into_any().downcast::<S>()
        {
            return Ok(Some(slot));
        }
        self.session
            .driver
            .register_input(handle, name, declared.category())
            .map_err(|cause| {
                let error = BindingError::Rejected {
                    key: name.into(),
                    category: declared.category(),
                    cause,
                };
                log::error!("{}", error);
                error
            })?;
        if let Some(previous) = self.inputs.remove(name) {
            log::debug!(
                "Input `{}` rebound from `{}` to `{}`, the previous slot is orphaned",
                name,
                previous.header().declared().type_name(),
                declared.type_name()
            );
            previous.header().orphan();
            previous.discard();
        }
        Ok(None)
    }

    fn insert_input<S: InboundSlot + 'static>(&mut self, name: &str, slot: S) -> Arc<S> {
        let slot = Arc::new(slot);
        self.inputs
            .insert(name.into(), slot.clone() as Arc<dyn InboundSlot>);
        slot
    }

    /// Like `claim_input`, rejections are not logged here because
    /// [`bind_generic_outputs`](Self::bind_generic_outputs) inspects the columns.
    fn claim_output<S: OutboundSlot + 'static>(
        &mut self,
        index: usize,
        declared: &Declared,
    ) -> Result<Option<Arc<S>>> {
        if index == 0 {
            return Err(BindingError::InvalidIndex(index).into());
        }
        let Some(handle) = self.handle.as_mut() else {
            return Err(Self::closed());
        };
        if let Some(existing) = self.outputs.get(&index)
            && existing.header().declared() == declared
            && let Ok(slot) = existing.clone().into_any().downcast::<S>()
        {
            return Ok(Some(slot));
        }
        self.session
            .driver
            .register_output(handle, index, declared.category())
            .map_err(|cause| BindingError::Rejected {
                key: index.to_string(),
                category: declared.category(),
                cause,
            })?;
        if let Some(previous) = self.outputs.remove(&index) {
            log::debug!(
                "Output {} rebound from `{}` to `{}`, the previous slot is orphaned",
                index,
                previous.header().declared().type_name(),
                declared.type_name()
            );
            previous.header().orphan();
            previous.discard();
        }
        self.labels = None;
        Ok(None)
    }

    fn insert_output<S: OutboundSlot + 'static>(&mut self, index: usize, slot: S) -> Arc<S> {
        let slot = Arc::new(slot);
        self.outputs
            .insert(index, slot.clone() as Arc<dyn OutboundSlot>);
        self.labels = None;
        slot
    }

    /// Bind the named input `name` with the declared type `T`.
    pub fn input<T: Bind>(&mut self, name: &str) -> Result<Input> {
        let declared = Declared::of::<T>();
        let slot = match self.claim_input::<ValueInputSlot>(name, &declared)? {
            Some(slot) => slot,
            None => self.insert_input(name, ValueInputSlot::new(SlotHeader::new(name, declared))),
        };
        Ok(Input::new(slot))
    }

    /// Bind `name` as a streamed input fed by `transform`.
    ///
    /// Rebinding the same payload type keeps the slot and replaces the transform.
    pub fn input_stream<T, F>(&mut self, name: &str, transform: F) -> Result<InputStream<T>>
    where
        T: Send + 'static,
        F: Fn(T, &mut PipeWriter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let declared = Declared::streamed::<T>();
        let transform: Arc<InputTransform<T>> = Arc::new(transform);
        let slot = match self.claim_input::<StreamInputSlot<T>>(name, &declared)? {
            Some(slot) => {
                slot.relink(transform);
                slot
            }
            None => {
                let slot = StreamInputSlot::new(
                    SlotHeader::new(name, declared),
                    self.session.bridge.clone(),
                    transform,
                );
                self.insert_input(name, slot)
            }
        };
        Ok(InputStream::new(slot))
    }

    /// Bind `name` as an input read straight from the reader `factory`
    /// returns before each execution.
    pub fn input_channel<F>(&mut self, name: &str, factory: F) -> Result<InputChannel>
    where
        F: FnMut() -> anyhow::Result<Box<dyn Read + Send>> + Send + 'static,
    {
        let declared = Declared::channeled();
        let slot = match self.claim_input::<ChannelInputSlot>(name, &declared)? {
            Some(slot) => {
                slot.relink(Box::new(factory));
                slot
            }
            None => self.insert_input(
                name,
                ChannelInputSlot::new(SlotHeader::new(name, declared), Box::new(factory)),
            ),
        };
        Ok(InputChannel::new(slot))
    }

    /// Bind the output column `index` (1-based) with the declared type `T`.
    pub fn output<T: Bind>(&mut self, index: usize) -> Result<Output<T>> {
        let declared = Declared::of::<T>();
        let slot = match self
            .claim_output::<ValueOutputSlot>(index, &declared)
            .inspect_err(|e| log::error!("{}", e))?
        {
            Some(slot) => slot,
            None => self.insert_output(
                index,
                ValueOutputSlot::new(index, SlotHeader::new(index.to_string(), declared)),
            ),
        };
        Ok(Output::new(slot))
    }

    /// Bind the column `index` as a streamed output drained by `transform`.
    pub fn output_stream<T, F>(&mut self, index: usize, transform: F) -> Result<OutputStream<T>>
    where
        T: Send + 'static,
        F: Fn(&mut PipeReader) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let declared = Declared::streamed::<T>();
        let transform: Arc<OutputTransform<T>> = Arc::new(transform);
        let slot = match self
            .claim_output::<StreamOutputSlot<T>>(index, &declared)
            .inspect_err(|e| log::error!("{}", e))?
        {
            Some(slot) => {
                slot.relink(transform);
                slot
            }
            None => {
                let slot = StreamOutputSlot::new(
                    index,
                    SlotHeader::new(index.to_string(), declared),
                    self.session.bridge.clone(),
                    transform,
                );
                self.insert_output(index, slot)
            }
        };
        Ok(OutputStream::new(slot))
    }

    /// Bind the column `index` as an output written straight into the writer
    /// `factory` returns before each fetch.
    pub fn output_channel<F>(&mut self, index: usize, factory: F) -> Result<OutputChannel>
    where
        F: FnMut() -> anyhow::Result<Box<dyn Write + Send>> + Send + 'static,
    {
        let declared = Declared::channeled();
        let slot = match self
            .claim_output::<ChannelOutputSlot>(index, &declared)
            .inspect_err(|e| log::error!("{}", e))?
        {
            Some(slot) => {
                slot.relink(Box::new(factory));
                slot
            }
            None => self.insert_output(
                index,
                ChannelOutputSlot::new(
                    index,
                    SlotHeader::new(index.to_string(), declared),
                    Box::new(factory),
                ),
            ),
        };
        Ok(OutputChannel::new(slot))
    }

    /// Binds generic [`Value`] outputs when no output was declared, up to
    /// the column count (when the native link knows it) and the configured
    /// maximum.
    pub(crate) fn bind_generic_outputs(&mut self) -> Result<()> {
        if !self.outputs.is_empty() {
            return Ok(());
        }
        let Some(handle) = self.handle.as_ref() else {
            return Err(Self::closed());
        };
        let limit = self.session.options.max_generic_outputs;
        let columns = self.session.driver.column_count(handle);
        let count = columns.map_or(limit, |v| v.min(limit));
        for index in 1..=count {
            match self.claim_output::<ValueOutputSlot>(index, &Declared::of::<Value>()) {
                Ok(..) => {
                    self.insert_output(
                        index,
                        ValueOutputSlot::new(
                            index,
                            SlotHeader::new(index.to_string(), Declared::of::<Value>()),
                        ),
                    );
                }
                Err(Error::Binding(..)) if columns.is_none() => break,
                Err(e) => {
                    log::error!("{}", e);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn settle_inputs(&self) -> Result<()> {
        let mut result = Ok(());
        for slot in self.inputs.values() {
            let completed = slot.complete();
            if result.is_ok() {
                result = completed;
            }
        }
        result
    }

    /// Run the statement with the current input values.
    ///
    /// Returns the affected row count, zero when the statement produced rows
    /// to [`fetch`](Statement::fetch). Streamed inputs are transferred while
    /// the native link executes, a failing transform fails the execution even
    /// when the native link reported success.
    pub fn execute(&mut self) -> Result<u64> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(Self::closed());
        };
        let mut bindings = Vec::with_capacity(self.inputs.len());
        for (name, slot) in &self.inputs {
            match slot.inbound() {
                Ok(data) => bindings.push(InputBinding {
                    name: name.clone(),
                    category: slot.header().category(),
                    data,
                }),
                Err(e) => {
                    drop(bindings);
                    let _ = self.settle_inputs();
                    return Err(e);
                }
            }
        }
        let sql = &self.sql;
        let executed = self.session.with_link(|driver, link| {
            driver
                .execute(link, handle, bindings)
                .with_context(|| format!("While executing the query:\n{}", truncate_long!(sql)))
        });
        let settled = self.settle_inputs();
        match (executed, settled) {
            (Err(e), _) if !matches!(e, Error::Execution(ExecutionError::Native(..))) => Err(e),
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Ok(count), Ok(())) => Ok(count),
        }
    }

    fn discard_outputs(&self) {
        for slot in self.outputs.values() {
            slot.discard();
        }
    }

    /// Move to the next row, false once the results are over.
    ///
    /// Every output is reset first. Streamed outputs get a fresh pipe whose
    /// sink is closed once its column is written, at the latest when the native
    /// fetch returns.
    pub fn fetch(&mut self) -> Result<bool> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(Self::closed());
        };
        let mut bindings = Vec::with_capacity(self.outputs.len());
        for (index, slot) in &self.outputs {
            match slot.reset() {
                Ok(target) => bindings.push(OutputBinding {
                    index: *index,
                    category: slot.header().category(),
                    target,
                }),
                Err(e) => {
                    drop(bindings);
                    self.discard_outputs();
                    return Err(e);
                }
            }
        }
        let sql = &self.sql;
        let fetched = self.session.with_link(|driver, link| {
            driver
                .fetch(link, handle, &mut bindings)
                .with_context(|| format!("While fetching the rows of:\n{}", truncate_long!(sql)))
        });
        let fetched = match fetched {
            Ok(v) => v,
            Err(e) => {
                drop(bindings);
                self.discard_outputs();
                return Err(e);
            }
        };
        let mut stored = Ok(());
        for (slot, binding) in self.outputs.values().zip(bindings) {
            let result = slot.store(binding.target);
            if stored.is_ok() {
                stored = result;
            }
        }
        if !fetched {
            for slot in self.outputs.values() {
                slot.exhausted();
            }
        }
        stored.map(|_| fetched)
    }

    /// The current row, made of the non streamed outputs in column order.
    pub fn row(&mut self) -> Row {
        let labels = match &self.labels {
            Some(labels) => labels.clone(),
            None => {
                let labels: RowNames = self
                    .outputs
                    .iter()
                    .filter(|(_, slot)| slot.current().is_some())
                    .map(|(index, _)| {
                        self.handle
                            .as_ref()
                            .and_then(|v| self.session.driver.column_name(v, *index))
                            .unwrap_or_else(|| index.to_string())
                    })
                    .collect();
                self.labels = Some(labels.clone());
                labels
            }
        };
        let values = self
            .outputs
            .values()
            .filter_map(|slot| slot.current())
            .collect();
        Row::new(labels, values)
    }

    /// Cursor over the rows of the last execution, the statement stays
    /// usable after the cursor is dropped.
    pub fn rows(&mut self) -> Result<Rows<'_, D>> {
        Rows::borrowed(self, 0)
    }

    /// Cursor owning the statement, which is closed together with the cursor.
    pub fn into_rows(self) -> Result<Rows<'static, D>> {
        Rows::owned(self, 0)
    }

    /// Execute and return the cursor over the results.
    ///
    /// A nonzero count means the statement was not a query: the statement is
    /// closed and the cursor is empty.
    pub fn query(&mut self) -> Result<Rows<'_, D>> {
        let affected = self.execute()?;
        Rows::borrowed(self, affected)
    }

    /// Release the native statement, calling it again does nothing.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        for slot in self.inputs.values() {
            slot.discard();
        }
        for slot in self.outputs.values() {
            slot.discard();
        }
        self.inputs.clear();
        self.outputs.clear();
        self.session.driver.release(handle);
    }
}

impl<D: Driver> Debug for Statement<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &truncate_long!(self.sql))
            .field("open", &self.is_open())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<D: Driver> Drop for Statement<D> {
    fn drop(&mut self) {
        if self.is_open() {
            ResourceLeakWarning::report("statement", self.created_at);
            self.close();
        }
    }
}
