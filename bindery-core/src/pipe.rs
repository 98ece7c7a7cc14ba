use std::{
    cmp::min,
    fmt::Display,
    io::{self, ErrorKind, Read, Write},
    sync::Arc,
};

type Chunk = std::result::Result<Vec<u8>, Arc<str>>;

/// Opens a bounded pipe.
///
/// At most `capacity` chunks of at most `chunk_size` bytes are in flight:
/// writes block while the pipe is full and reads block while it is empty.
/// This is the only flow control between a streamed slot and the native
/// link. Dropping the writer is end-of-stream for the reader, dropping the
/// reader makes further writes fail with [`ErrorKind::BrokenPipe`].
pub fn pipe(capacity: usize, chunk_size: usize) -> (PipeWriter, PipeReader) {
    let (sender, receiver) = flume::bounded(capacity.max(1));
    (
        PipeWriter {
            sender: Some(sender),
            chunk_size: chunk_size.max(1),
            written: 0,
        },
        PipeReader {
            receiver,
            current: Vec::new(),
            position: 0,
            read: 0,
        },
    )
}

/// Sink end of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    sender: Option<flume::Sender<Chunk>>,
    chunk_size: usize,
    written: u64,
}

impl PipeWriter {
    /// Number of bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Closes the pipe, the reader sees end-of-stream once it drained the queued chunks.
    pub fn close(mut self) {
        self.sender.take();
    }

    /// Closes the pipe with an error, the reader gets it after the queued chunks.
    pub fn fail(mut self, message: impl Display) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(message.to_string().into()));
        }
    }

    /// True when the reader is gone and writes can no longer succeed.
    pub fn is_disconnected(&self) -> bool {
        self.sender.as_ref().is_none_or(|v| v.is_disconnected())
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(sender) = &self.sender else {
            return Err(io::Error::new(ErrorKind::BrokenPipe, "The pipe is closed"));
        };
        if buf.is_empty() {
            return Ok(0);
        }
        let len = min(buf.len(), self.chunk_size);
        sender
            .send(Ok(buf[..len].to_vec()))
            .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "The pipe reader is closed"))?;
        self.written += len as u64;
        Ok(len)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Source end of a [`pipe`].
#[derive(Debug)]
pub struct PipeReader {
    receiver: flume::Receiver<Chunk>,
    current: Vec<u8>,
    position: usize,
    read: u64,
}

impl PipeReader {
    /// Number of bytes consumed so far.
    pub fn read_bytes(&self) -> u64 {
        self.read
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.position >= self.current.len() {
            match self.receiver.recv() {
                Ok(Ok(chunk)) => {
                    self.current = chunk;
                    self.position = 0;
                }
                Ok(Err(message)) => {
                    return Err(io::Error::other(message.to_string()));
                }
                Err(flume::RecvError::Disconnected) => return Ok(0),
            }
        }
        let len = min(buf.len(), self.current.len() - self.position);
        buf[..len].copy_from_slice(&self.current[self.position..self.position + len]);
        self.position += len;
        self.read += len as u64;
        Ok(len)
    }
}
