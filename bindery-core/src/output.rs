use crate::{
    Bind, Bridge, Category, ExecutionError, Outbound, OutboundSlot, PipeReader, Result,
    SlotHeader, Task, Value, lock,
};
use std::{
    any::Any,
    fmt::{self, Debug},
    io::Write,
    marker::PhantomData,
    sync::{Arc, Mutex},
};

/// Transform draining a streamed output column into a `T`.
pub type OutputTransform<T> = dyn Fn(&mut PipeReader) -> anyhow::Result<T> + Send + Sync;
/// Produces the writer of a channel output before each fetch.
pub type WriterFactory = dyn FnMut() -> anyhow::Result<Box<dyn Write + Send>> + Send;

#[derive(Debug)]
pub(crate) struct ValueOutputSlot {
    header: SlotHeader,
    index: usize,
    value: Mutex<Value>,
}

impl ValueOutputSlot {
    pub(crate) fn new(index: usize, header: SlotHeader) -> Self {
        Self {
            header,
            index,
            value: Mutex::new(Value::Null),
        }
    }
}

impl OutboundSlot for ValueOutputSlot {
    fn header(&self) -> &SlotHeader {
        &self.header
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn reset(&self) -> Result<Outbound> {
        *lock(&self.value) = Value::Null;
        Ok(Outbound::Value(Value::Null))
    }

    fn store(&self, target: Outbound) -> Result<()> {
        if let Outbound::Value(value) = target {
            *lock(&self.value) = value;
        }
        Ok(())
    }

    fn current(&self) -> Option<Value> {
        Some(lock(&self.value).clone())
    }
}

/// Handle to an output column, typed by the declaration it was created with.
pub struct Output<T> {
    slot: Arc<ValueOutputSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Bind> Output<T> {
    pub(crate) fn new(slot: Arc<ValueOutputSlot>) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// 1-based column index.
    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn category(&self) -> Category {
        self.slot.header.category()
    }

    pub fn is_orphaned(&self) -> bool {
        self.slot.header.is_orphaned()
    }

    pub fn same_slot<U>(&self, other: &Output<U>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// The raw value of the last fetch.
    pub fn value(&self) -> Value {
        lock(&self.slot.value).clone()
    }

    /// The last fetched value cast to `T`, `None` when the column was null.
    pub fn get(&self) -> Result<Option<T>> {
        T::from_value(self.value()).inspect_err(|e| {
            log::error!("While reading the output {}: {}", self.index(), e);
        })
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("index", &self.slot.index)
            .field("declared", &self.slot.header.declared().type_name())
            .field("orphaned", &self.slot.header.is_orphaned())
            .finish()
    }
}

pub(crate) struct StreamOutputSlot<T> {
    header: SlotHeader,
    index: usize,
    bridge: Bridge,
    transform: Mutex<Arc<OutputTransform<T>>>,
    pending: Mutex<Option<Task<T>>>,
}

impl<T: Send + 'static> StreamOutputSlot<T> {
    pub(crate) fn new(
        index: usize,
        header: SlotHeader,
        bridge: Bridge,
        transform: Arc<OutputTransform<T>>,
    ) -> Self {
        Self {
            header,
            index,
            bridge,
            transform: Mutex::new(transform),
            pending: Mutex::new(None),
        }
    }

    pub(crate) fn relink(&self, transform: Arc<OutputTransform<T>>) {
        *lock(&self.transform) = transform;
    }

    fn settle_unread(&self) {
        let Some(task) = lock(&self.pending).take() else {
            return;
        };
        if let Err(e) = task.join() {
            log::warn!(
                "The previous value of the streamed output {} was never read and it failed: {}",
                self.header.key(),
                e
            );
        }
    }
}

impl<T: Send + 'static> OutboundSlot for StreamOutputSlot<T> {
    fn header(&self) -> &SlotHeader {
        &self.header
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn reset(&self) -> Result<Outbound> {
        self.settle_unread();
        let transform = lock(&self.transform).clone();
        let (sink, mut source) = self.bridge.pipe();
        let task = self.bridge.scheduler.schedule(move || {
            let result = transform(&mut source);
            drop(source);
            result
        })?;
        *lock(&self.pending) = Some(task);
        Ok(Outbound::Stream(sink))
    }

    fn store(&self, target: Outbound) -> Result<()> {
        drop(target);
        Ok(())
    }

    fn exhausted(&self) {
        let Some(task) = lock(&self.pending).take() else {
            return;
        };
        if let Err(e) = task.join() {
            log::debug!(
                "Transform of the streamed output {} on the empty cycle: {}",
                self.header.key(),
                e
            );
        }
    }

    fn discard(&self) {
        lock(&self.pending).take();
    }
}

/// Handle to a streamed output column.
///
/// Every fetch opens a fresh pipe: the native link writes the column into it
/// while the transform reads it on the scheduler. [`value`](OutputStream::value)
/// waits for the transform of the current row.
pub struct OutputStream<T> {
    slot: Arc<StreamOutputSlot<T>>,
}

impl<T: Send + 'static> OutputStream<T> {
    pub(crate) fn new(slot: Arc<StreamOutputSlot<T>>) -> Self {
        Self { slot }
    }

    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn is_orphaned(&self) -> bool {
        self.slot.header.is_orphaned()
    }

    pub fn same_slot(&self, other: &OutputStream<T>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// True when a row was fetched and its transform is done.
    pub fn is_ready(&self) -> bool {
        lock(&self.slot.pending)
            .as_ref()
            .is_some_and(|v| v.is_finished())
    }

    /// Blocks until the transform of the current row completes.
    ///
    /// The outcome can be taken once per fetched row, asking again fails
    /// with an invalid state error.
    pub fn value(&self) -> Result<T> {
        let Some(task) = lock(&self.slot.pending).take() else {
            return Err(ExecutionError::invalid_state(format!(
                "No streamed value pending for the output {}, fetch a row first",
                self.index()
            )));
        };
        task.join().inspect_err(|e| {
            log::error!("While streaming the output {}: {}", self.index(), e);
        })
    }
}

impl<T> Clone for OutputStream<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

pub(crate) struct ChannelOutputSlot {
    header: SlotHeader,
    index: usize,
    factory: Mutex<Box<WriterFactory>>,
}

impl ChannelOutputSlot {
    pub(crate) fn new(index: usize, header: SlotHeader, factory: Box<WriterFactory>) -> Self {
        Self {
            header,
            index,
            factory: Mutex::new(factory),
        }
    }

    pub(crate) fn relink(&self, factory: Box<WriterFactory>) {
        *lock(&self.factory) = factory;
    }
}

impl OutboundSlot for ChannelOutputSlot {
    fn header(&self) -> &SlotHeader {
        &self.header
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn reset(&self) -> Result<Outbound> {
        let writer = (lock(&self.factory))().map_err(|e| {
            let error = ExecutionError::Channel(e);
            log::error!("While opening the output {}: {}", self.header.key(), error);
            error
        })?;
        Ok(Outbound::Channel(writer))
    }

    fn store(&self, target: Outbound) -> Result<()> {
        if let Outbound::Channel(mut writer) = target {
            writer.flush().map_err(|e| {
                log::error!("While flushing the output {}: {}", self.header.key(), e);
                ExecutionError::Io(e)
            })?;
        }
        Ok(())
    }
}

/// Handle to an output column written into a pre-supplied writer.
#[derive(Clone)]
pub struct OutputChannel {
    slot: Arc<ChannelOutputSlot>,
}

impl OutputChannel {
    pub(crate) fn new(slot: Arc<ChannelOutputSlot>) -> Self {
        Self { slot }
    }

    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn is_orphaned(&self) -> bool {
        self.slot.header.is_orphaned()
    }
}

#[cfg(test)]
mod tests {
    use super::{Output, ValueOutputSlot};
    use crate::{
        BlobReader, Declared, Error, ExecutionError, Object, Opaque, Outbound, OutboundSlot,
        SlotHeader, Value,
    };
    use std::{io::Read, sync::Arc};

    fn output<T: crate::Bind>(value: Value) -> Output<T> {
        let slot = Arc::new(ValueOutputSlot::new(1, SlotHeader::new("1", Declared::of::<T>())));
        slot.store(Outbound::Value(value)).unwrap();
        Output::new(slot)
    }

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i16,
        y: i16,
    }

    impl Opaque for Point {
        fn encode(&self) -> anyhow::Result<Vec<u8>> {
            Ok([self.x.to_le_bytes(), self.y.to_le_bytes()].concat())
        }
        fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
            let [a, b, c, d] = bytes else {
                anyhow::bail!("Expected 4 bytes, got {}", bytes.len());
            };
            Ok(Point {
                x: i16::from_le_bytes([*a, *b]),
                y: i16::from_le_bytes([*c, *d]),
            })
        }
    }

    #[test]
    fn casts_compatible_values() {
        assert_eq!(output::<i32>(Value::Integer(Some(7))).get().unwrap(), Some(7));
        assert_eq!(output::<i64>(Value::Integer(Some(7))).get().unwrap(), Some(7));
        assert_eq!(output::<bool>(Value::Long(Some(2))).get().unwrap(), Some(true));
        assert_eq!(
            output::<String>(Value::Character(Some('x'))).get().unwrap(),
            Some("x".into())
        );
        assert_eq!(output::<i32>(Value::Integer(None)).get().unwrap(), None);
        assert_eq!(output::<Option<i32>>(Value::Null).get().unwrap(), Some(None));
    }

    #[test]
    fn incompatible_value_is_a_cast_error() {
        let error = output::<i32>(Value::String(Some("seven".into())))
            .get()
            .unwrap_err();
        assert!(matches!(error, Error::Execution(ExecutionError::Cast { .. })));
        assert!(output::<i32>(Value::Long(Some(i64::MAX))).get().is_err());
    }

    #[test]
    fn blob_is_readable() {
        let mut reader = output::<BlobReader>(Value::Blob(Some(b"blob bytes".to_vec())))
            .get()
            .unwrap()
            .unwrap();
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "blob bytes");
    }

    #[test]
    fn object_goes_through_the_codec() {
        let point = Point { x: -3, y: 300 };
        let bytes = point.encode().unwrap();
        assert_eq!(
            output::<Object<Point>>(Value::Object(Some(bytes))).get().unwrap(),
            Some(Object(point))
        );
        assert!(matches!(
            output::<Object<Point>>(Value::Object(Some(vec![1, 2, 3]))).get(),
            Err(Error::Execution(ExecutionError::Codec(..)))
        ));
    }

    #[test]
    fn reset_clears_the_previous_value() {
        let slot = Arc::new(ValueOutputSlot::new(
            1,
            SlotHeader::new("1", Declared::of::<i32>()),
        ));
        slot.store(Outbound::Value(Value::Integer(Some(1)))).unwrap();
        assert_eq!(slot.current(), Some(Value::Integer(Some(1))));
        let _ = slot.reset().unwrap();
        assert_eq!(slot.current(), Some(Value::Null));
    }
}
