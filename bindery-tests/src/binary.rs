use anyhow::{Context, ensure};
use bindery::{BlobReader, Bytes, Connection, Driver, Object, Opaque, Value};
use indoc::indoc;
use std::{
    io::{Cursor, Read},
    sync::Mutex,
};

static MUTEX: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, PartialEq)]
struct Point {
    x: i32,
    y: i32,
}

impl Opaque for Point {
    fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = self.x.to_be_bytes().to_vec();
        bytes.extend_from_slice(&self.y.to_be_bytes());
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> anyhow::Result<Self> {
        ensure!(bytes.len() == 8, "A point is 8 bytes, got {}", bytes.len());
        let x = bytes[..4].try_into().context("x coordinate")?;
        let y = bytes[4..].try_into().context("y coordinate")?;
        Ok(Point {
            x: i32::from_be_bytes(x),
            y: i32::from_be_bytes(y),
        })
    }
}

pub fn binary<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    connection
        .execute("DROP TABLE IF EXISTS binaries")
        .expect("Failed to drop binaries table");
    connection
        .execute(indoc! {"
            CREATE TABLE binaries (
                id INTEGER PRIMARY KEY,
                payload BLOB,
                point BLOB
            )
        "})
        .expect("Failed to create binaries table");

    let payload = (0..=255u8).cycle().take(4000).collect::<Vec<_>>();
    let insert = connection
        .statement("INSERT INTO binaries (id, payload, point) VALUES (:id, :payload, :point)")
        .expect("Failed to prepare the insert");
    let id = insert.input::<i32>("id").unwrap();
    let bytes = insert.input::<Vec<u8>>("payload").unwrap();
    let point = insert.input::<Object<Point>>("point").unwrap();
    id.set(1).unwrap();
    bytes.set(payload.as_slice()).unwrap();
    point.set(Object(Point { x: -3, y: 70000 })).unwrap();
    assert_eq!(insert.execute().expect("Failed to insert binary 1"), 1);

    id.set(2).unwrap();
    bytes.set(Bytes(Cursor::new(b"read from a stream".to_vec()))).unwrap();
    point.set(None::<Object<Point>>).unwrap();
    assert_eq!(insert.execute().expect("Failed to insert binary 2"), 1);

    id.set(3).unwrap();
    bytes.set(Vec::<u8>::new()).unwrap();
    assert_eq!(insert.execute().expect("Failed to insert binary 3"), 1);

    let select = connection
        .statement("SELECT payload, point FROM binaries WHERE id = :id")
        .expect("Failed to prepare the select");
    let id = select.input::<i32>("id").unwrap();
    let reader = select.output::<BlobReader>(1).unwrap();
    let point = select.output::<Object<Point>>(2).unwrap();

    id.set(1).unwrap();
    select.execute().unwrap();
    assert!(select.fetch().unwrap());
    let mut read = Vec::new();
    reader
        .get()
        .unwrap()
        .expect("The payload should not be null")
        .read_to_end(&mut read)
        .unwrap();
    assert_eq!(read, payload);
    assert_eq!(point.get().unwrap(), Some(Object(Point { x: -3, y: 70000 })));
    assert!(!select.fetch().unwrap());

    id.set(2).unwrap();
    select.execute().unwrap();
    assert!(select.fetch().unwrap());
    assert_eq!(
        reader.get().unwrap().map(BlobReader::into_inner),
        Some(b"read from a stream".to_vec())
    );
    assert_eq!(point.get().unwrap(), None);
    assert!(!select.fetch().unwrap());

    // Redeclaring the column as plain bytes orphans the reader
    let raw = select.output::<Vec<u8>>(1).unwrap();
    assert!(reader.is_orphaned());
    id.set(3).unwrap();
    select.execute().unwrap();
    assert!(select.fetch().unwrap());
    assert!(
        matches!(raw.value(), Value::Binary(Some(ref v)) if v.is_empty())
            || raw.value().is_null(),
        "Unexpected {:?}",
        raw.value()
    );
    assert!(!select.fetch().unwrap());
}
