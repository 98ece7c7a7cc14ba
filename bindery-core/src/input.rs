use crate::{
    Argument, Bridge, Category, ExecutionError, Inbound, InboundSlot, IntoArgument, PipeReader,
    PipeWriter, Result, SlotHeader, Task, Value, lock,
};
use std::{
    any::{self, Any},
    fmt::{self, Debug},
    io::Read,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
};

/// Transform feeding a streamed input: writes the bytes of `T` into the pipe.
pub type InputTransform<T> = dyn Fn(T, &mut PipeWriter) -> anyhow::Result<()> + Send + Sync;
/// Produces the reader of a channel input before each execution.
pub type ReaderFactory = dyn FnMut() -> anyhow::Result<Box<dyn Read + Send>> + Send;

#[derive(Debug)]
pub(crate) struct ValueInputSlot {
    header: SlotHeader,
    value: Mutex<Value>,
}

impl ValueInputSlot {
    pub(crate) fn new(header: SlotHeader) -> Self {
        let value = Value::empty(header.category());
        Self {
            header,
            value: Mutex::new(value),
        }
    }
}

impl InboundSlot for ValueInputSlot {
    fn header(&self) -> &SlotHeader {
        &self.header
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn inbound(&self) -> Result<Inbound> {
        Ok(Inbound::Value(lock(&self.value).clone()))
    }
}

/// Handle to a named input parameter.
///
/// The value set here persists across executions until it is set again.
#[derive(Clone)]
pub struct Input {
    slot: Arc<ValueInputSlot>,
}

impl Input {
    pub(crate) fn new(slot: Arc<ValueInputSlot>) -> Self {
        Self { slot }
    }

    pub fn name(&self) -> &str {
        self.slot.header.key()
    }

    pub fn category(&self) -> Category {
        self.slot.header.category()
    }

    /// True once the parameter was rebound with a different declared type.
    pub fn is_orphaned(&self) -> bool {
        self.slot.header.is_orphaned()
    }

    /// The value that the next execution will send.
    pub fn value(&self) -> Value {
        lock(&self.slot.value).clone()
    }

    /// True when both handles point to the very same slot.
    pub fn same_slot(&self, other: &Input) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Set the parameter value.
    ///
    /// Byte categories (binary, blob, object) accept any byte source, boolean
    /// accepts integers (nonzero is true) and integer accepts booleans (true
    /// is 1). Every other category requires its exact type. `None` stores
    /// null in any category.
    pub fn set<V: IntoArgument>(&self, value: V) -> Result<&Self> {
        let actual = any::type_name::<V>();
        let category = self.category();
        if self.is_orphaned() {
            log::warn!(
                "Setting the input `{}` that was orphaned by a rebinding, the value will not be sent",
                self.name()
            );
        }
        let value = match (category, value.into_argument()?) {
            (_, Argument::Null) => Value::empty(category),
            (Category::Binary, Argument::Bytes(v)) => Value::Binary(Some(v)),
            (Category::Blob, Argument::Bytes(v)) => Value::Blob(Some(v)),
            (Category::OpaqueObject, Argument::Bytes(v) | Argument::Object(v)) => {
                Value::Object(Some(v))
            }
            (Category::Boolean, Argument::Bool(v)) => Value::Boolean(Some(v)),
            (Category::Boolean, Argument::Int(v)) => Value::Boolean(Some(v != 0)),
            (Category::Integer, Argument::Int(v)) => Value::Integer(Some(v)),
            (Category::Integer, Argument::Bool(v)) => Value::Integer(Some(v as i32)),
            (Category::Character, Argument::Char(v)) => Value::Character(Some(v)),
            (Category::Date, Argument::Date(v)) => Value::Date(Some(v)),
            (Category::Long, Argument::Long(v)) => Value::Long(Some(v)),
            (Category::Double, Argument::Double(v)) => Value::Double(Some(v)),
            (Category::Float, Argument::Float(v)) => Value::Float(Some(v)),
            (Category::String, Argument::Text(v)) => Value::String(Some(v)),
            (
                Category::Null
                | Category::String
                | Category::Double
                | Category::Float
                | Category::Integer
                | Category::Binary
                | Category::Blob
                | Category::Character
                | Category::Boolean
                | Category::Date
                | Category::Long
                | Category::Stream
                | Category::Direct
                | Category::OpaqueObject,
                _,
            ) => {
                let error = ExecutionError::TypeMismatch {
                    expected: category,
                    actual,
                };
                log::error!("While setting the input `{}`: {}", self.name(), error);
                return Err(error.into());
            }
        };
        *lock(&self.slot.value) = value;
        Ok(self)
    }
}

impl Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("name", &self.name())
            .field("category", &self.category())
            .field("orphaned", &self.is_orphaned())
            .finish()
    }
}

struct PendingInput {
    source: Option<PipeReader>,
    task: Task<()>,
}

pub(crate) struct StreamInputSlot<T> {
    header: SlotHeader,
    bridge: Bridge,
    transform: Mutex<Arc<InputTransform<T>>>,
    pending: Mutex<Option<PendingInput>>,
}

impl<T: Send + 'static> StreamInputSlot<T> {
    pub(crate) fn new(header: SlotHeader, bridge: Bridge, transform: Arc<InputTransform<T>>) -> Self {
        Self {
            header,
            bridge,
            transform: Mutex::new(transform),
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn relink(&self, transform: Arc<InputTransform<T>>) {
        *lock(&self.transform) = transform;
    }

    fn put(&self, value: T) -> Result<()> {
        let previous = lock(&self.pending).take();
        if previous.is_some() {
            log::debug!(
                "Input `{}` was put twice before executing, the previous payload is dropped",
                self.header.key()
            );
        }
        drop(previous);
        let transform = lock(&self.transform).clone();
        let (mut sink, source) = self.bridge.pipe();
        let task = self.bridge.scheduler.schedule(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| transform(value, &mut sink))) {
                Ok(Ok(())) => {
                    sink.close();
                    Ok(())
                }
                Ok(Err(e)) => {
                    sink.fail(format!("{:#}", e));
                    Err(e)
                }
                Err(payload) => {
                    // A plain drop would look like a complete payload to the reader
                    sink.fail("The transform panicked");
                    panic::resume_unwind(payload)
                }
            }
        })?;
        *lock(&self.pending) = Some(PendingInput {
            source: Some(source),
            task,
        });
        Ok(())
    }
}

impl<T: Send + 'static> InboundSlot for StreamInputSlot<T> {
    fn header(&self) -> &SlotHeader {
        &self.header
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn inbound(&self) -> Result<Inbound> {
        let source = lock(&self.pending).as_mut().and_then(|v| v.source.take());
        Ok(match source {
            Some(source) => Inbound::Stream(source),
            None => Inbound::Value(Value::Null),
        })
    }

    fn complete(&self) -> Result<()> {
        let Some(pending) = lock(&self.pending).take() else {
            return Ok(());
        };
        drop(pending.source);
        pending.task.join().inspect_err(|e| {
            log::error!("While streaming the input `{}`: {}", self.header.key(), e);
        })
    }

    fn discard(&self) {
        lock(&self.pending).take();
    }
}

/// Handle to a streamed input parameter.
///
/// Each [`put`](InputStream::put) opens a fresh pipe and schedules the
/// transform, the native link reads the other end during the next
/// execution. A failing transform closes the pipe with an error and makes
/// that execution fail.
pub struct InputStream<T> {
    slot: Arc<StreamInputSlot<T>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + 'static> InputStream<T> {
    pub(crate) fn new(slot: Arc<StreamInputSlot<T>>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.slot.header.key()
    }

    pub fn is_orphaned(&self) -> bool {
        self.slot.header.is_orphaned()
    }

    pub fn same_slot(&self, other: &InputStream<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Schedule the transform of `value` for the next execution.
    pub fn put(&self, value: T) -> Result<()> {
        self.slot.put(value)
    }
}

impl<T> Clone for InputStream<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

pub(crate) struct ChannelInputSlot {
    header: SlotHeader,
    factory: Mutex<Box<ReaderFactory>>,
}

impl ChannelInputSlot {
    pub(crate) fn new(header: SlotHeader, factory: Box<ReaderFactory>) -> Self {
        Self {
            header,
            factory: Mutex::new(factory),
        }
    }

    pub(crate) fn relink(&self, factory: Box<ReaderFactory>) {
        *lock(&self.factory) = factory;
    }
}

impl InboundSlot for ChannelInputSlot {
    fn header(&self) -> &SlotHeader {
        &self.header
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn inbound(&self) -> Result<Inbound> {
        let reader = (lock(&self.factory))().map_err(|e| {
            let error = ExecutionError::Channel(e);
            log::error!("While opening the input `{}`: {}", self.header.key(), error);
            error
        })?;
        Ok(Inbound::Channel(reader))
    }
}

/// Handle to an input fed by a pre-supplied reader, no background task involved.
#[derive(Clone)]
pub struct InputChannel {
    slot: Arc<ChannelInputSlot>,
}

impl InputChannel {
    pub(crate) fn new(slot: Arc<ChannelInputSlot>) -> Self {
        Self { slot }
    }

    pub fn name(&self) -> &str {
        self.slot.header.key()
    }

    pub fn is_orphaned(&self) -> bool {
        self.slot.header.is_orphaned()
    }
}
