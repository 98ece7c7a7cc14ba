use anyhow::bail;
use bindery::{Connection, Driver, Error, ExecutionError, PipeReader, PipeWriter};
use sha2::{Digest, Sha256};
use std::{
    io::{self, Cursor, Read, Write},
    sync::{Arc, Mutex},
};

static MUTEX: Mutex<()> = Mutex::new(());

const PAYLOAD_SIZE: usize = 1024 * 1024;

/// Deterministic payload of `len` bytes, different for every `seed`.
fn payload(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

/// Hashes whatever is written into it.
#[derive(Clone, Default)]
struct Hasher(Arc<Mutex<(Sha256, usize)>>);

impl Hasher {
    fn finish(&self) -> (Vec<u8>, usize) {
        let state = self.0.lock().unwrap();
        (state.0.clone().finalize().to_vec(), state.1)
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.0.lock().unwrap();
        state.0.update(buf);
        state.1 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn setup<D: Driver>(connection: &mut Connection<D>) {
    connection
        .execute("DROP TABLE IF EXISTS streams")
        .expect("Failed to drop streams table");
    connection
        .execute("CREATE TABLE streams (id INTEGER PRIMARY KEY, payload BLOB)")
        .expect("Failed to create streams table");
}

/// Payloads go in and come back through background transforms.
pub fn streaming<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    setup(connection);

    let insert = connection
        .statement("INSERT INTO streams (id, payload) VALUES (:id, :payload)")
        .expect("Failed to prepare the insert");
    let id = insert.input::<i32>("id").unwrap();
    let data = insert
        .input_stream("payload", |value: Vec<u8>, sink: &mut PipeWriter| {
            for chunk in value.chunks(3000) {
                sink.write_all(chunk)?;
            }
            Ok(())
        })
        .unwrap();
    let mut digests = Vec::new();
    for i in 0..3 {
        let bytes = payload(i, PAYLOAD_SIZE - i as usize);
        digests.push(Sha256::digest(&bytes).to_vec());
        id.set(i as i32).unwrap();
        data.put(bytes).unwrap();
        assert_eq!(insert.execute().expect("Failed to insert a stream"), 1);
    }

    let select = connection
        .statement("SELECT id, payload FROM streams ORDER BY id")
        .unwrap();
    let id = select.output::<i32>(1).unwrap();
    let digest = select
        .output_stream(2, |source: &mut PipeReader| {
            let mut hasher = Sha256::new();
            let mut buffer = [0; 4096];
            let mut total = 0;
            loop {
                let read = source.read(&mut buffer)?;
                if read == 0 {
                    break;
                }
                total += read;
                hasher.update(&buffer[..read]);
            }
            Ok((hasher.finalize().to_vec(), total))
        })
        .unwrap();
    select.execute().unwrap();
    let mut rows = 0;
    while select.fetch().expect("Failed to fetch a stream") {
        let i = id.get().unwrap().expect("The id is never null") as usize;
        let (actual, len) = digest.value().expect("Failed to hash the stream");
        assert_eq!(len, PAYLOAD_SIZE - i);
        assert_eq!(actual, digests[i], "Digest mismatch for the stream {}", i);
        rows += 1;
    }
    assert_eq!(rows, 3);
}

pub fn streaming_failures<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    setup(connection);

    let insert = connection
        .statement("INSERT INTO streams (id, payload) VALUES (:id, :payload)")
        .unwrap();
    insert.input::<i32>("id").unwrap().set(1).unwrap();
    let data = insert
        .input_stream("payload", |value: usize, sink: &mut PipeWriter| {
            sink.write_all(&vec![7; value])?;
            if value > 100 {
                bail!("The source dried up after {} bytes", value);
            }
            Ok(())
        })
        .unwrap();
    data.put(1000).unwrap();
    crate::silent_logs! {
        let error = insert.execute().unwrap_err();
        assert!(error.transform_error().is_some(), "Unexpected {:?}", error);
        assert!(error.to_string().contains("dried up after 1000 bytes"));
    }
    data.put(10).unwrap();
    assert_eq!(insert.execute().expect("The statement stays usable"), 1);

    let select = connection
        .statement("SELECT payload FROM streams WHERE id = 1")
        .unwrap();
    let parsed = select
        .output_stream(1, |source: &mut PipeReader| {
            let mut text = String::new();
            source.read_to_string(&mut text)?;
            Ok(text.parse::<u64>()?)
        })
        .unwrap();
    select.execute().unwrap();
    assert!(select.fetch().unwrap());
    crate::silent_logs! {
        assert!(matches!(
            parsed.value(),
            Err(Error::Execution(ExecutionError::Transform(..)))
        ));
    }
    assert!(!select.fetch().unwrap());
}

/// Caller supplied readers and writers, no transform in between.
pub fn streaming_channels<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    setup(connection);

    let bytes = payload(42, PAYLOAD_SIZE);
    let expected = Sha256::digest(&bytes).to_vec();
    let insert = connection
        .statement("INSERT INTO streams (id, payload) VALUES (1, :payload)")
        .unwrap();
    insert
        .input_channel("payload", move || {
            Ok(Box::new(Cursor::new(bytes.clone())) as Box<dyn Read + Send>)
        })
        .unwrap();
    assert_eq!(insert.execute().unwrap(), 1);

    let hasher = Hasher::default();
    let select = connection
        .statement("SELECT payload FROM streams WHERE id = 1")
        .unwrap();
    select
        .output_channel(1, {
            let hasher = hasher.clone();
            move || Ok(Box::new(hasher.clone()) as Box<dyn Write + Send>)
        })
        .unwrap();
    select.execute().unwrap();
    assert!(select.fetch().unwrap());
    assert!(!select.fetch().unwrap());
    let (actual, len) = hasher.finish();
    assert_eq!(len, PAYLOAD_SIZE);
    assert_eq!(actual, expected);
}
