use bindery::{Connection, Driver};
use std::{
    io::{self, Cursor, Write},
    sync::{Arc, Mutex},
};

static MUTEX: Mutex<()> = Mutex::new(());

#[derive(Clone, Default)]
struct Stdout(Arc<Mutex<Vec<u8>>>);

impl Write for Stdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Standard streams wired to a statement input and a result column.
pub fn pipe<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    connection
        .execute("DROP TABLE IF EXISTS documents")
        .expect("Failed to drop documents table");
    connection
        .execute("CREATE TABLE documents (id INTEGER PRIMARY KEY, body BLOB)")
        .expect("Failed to create documents table");

    let stdout = Stdout::default();
    connection.with_stdio(
        Some(Box::new(Cursor::new(b"piped from stdin\n".to_vec()))),
        Some(Box::new(stdout.clone())),
    );
    let inserted = connection
        .pipe("INSERT INTO documents (id, body) VALUES (1, :body)", Some("body"), None)
        .expect("Failed to pipe stdin into the table");
    assert_eq!(inserted, 1);
    connection
        .execute("INSERT INTO documents (id, body) VALUES (2, 'second line\n')")
        .unwrap();

    let rows = connection
        .pipe("SELECT body FROM documents ORDER BY id", None, Some(1))
        .expect("Failed to pipe the table into stdout");
    assert_eq!(rows, 2);
    assert_eq!(
        stdout.0.lock().unwrap().as_slice(),
        b"piped from stdin\nsecond line\n"
    );

    connection.with_stdio(None, None);
    crate::silent_logs! {
        assert!(
            connection.pipe("SELECT body FROM documents", None, Some(1)).is_err(),
            "Piping requires a stdout stream"
        );
    }
}
