#[cfg(test)]
mod tests {
    use bindery_core::{PipeReader, PipeWriter, Value};
    use bindery_sqlite::SqliteConnection;
    use bindery_tests::{init_logs, silent_logs};
    use std::io::{self, Read, Write};

    const MIB: usize = 1024 * 1024;

    fn count_bytes(source: &mut PipeReader) -> anyhow::Result<u64> {
        Ok(io::copy(source, &mut io::sink())?)
    }

    fn write_bytes(value: Vec<u8>, sink: &mut PipeWriter) -> anyhow::Result<()> {
        sink.write_all(&value)?;
        Ok(())
    }

    #[test]
    fn stream_columns_beyond_the_pool() {
        init_logs();
        let mut connection =
            SqliteConnection::connect("sqlite://:memory:?max_blocking_threads=1&pipe_capacity=2")
                .unwrap();
        let statement = connection
            .statement("SELECT zeroblob(1048576), zeroblob(1048576), zeroblob(1048576)")
            .unwrap();
        let columns = [1, 2, 3].map(|index| statement.output_stream(index, count_bytes).unwrap());
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        for column in &columns {
            assert_eq!(column.value().unwrap(), MIB as u64);
        }
        assert!(!statement.fetch().unwrap());
        connection.close().unwrap();
    }

    #[test]
    fn many_stream_columns_with_defaults() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:").unwrap();
        let sql = format!(
            "SELECT {}",
            vec!["zeroblob(262144)"; 70].join(", ")
        );
        let statement = connection.statement(&sql).unwrap();
        let columns = (1..=70)
            .map(|index| statement.output_stream(index, count_bytes).unwrap())
            .collect::<Vec<_>>();
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        for column in &columns {
            assert_eq!(column.value().unwrap(), 262144);
        }
        connection.close().unwrap();
    }

    #[test]
    fn puts_in_any_order() {
        init_logs();
        let mut connection =
            SqliteConnection::connect("sqlite://:memory:?max_blocking_threads=1").unwrap();
        connection
            .execute("CREATE TABLE pairs (a BLOB, b BLOB)")
            .unwrap();
        let insert = connection
            .statement("INSERT INTO pairs VALUES (:a, :b)")
            .unwrap();
        let a = insert.input_stream("a", write_bytes).unwrap();
        let b = insert.input_stream("b", write_bytes).unwrap();
        b.put(vec![2; MIB]).unwrap();
        a.put(vec![1; MIB]).unwrap();
        assert_eq!(insert.execute().unwrap(), 1);

        let row = connection
            .query("SELECT length(a), length(b), sum(a = b) FROM pairs")
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Value::Long(Some(MIB as i64))));
        assert_eq!(row.get(1), Some(&Value::Long(Some(MIB as i64))));
        assert_eq!(row.get(2), Some(&Value::Long(Some(0))));
        connection.close().unwrap();
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_output_channel() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:").unwrap();
        let statement = connection.statement("SELECT 'lost bytes'").unwrap();
        statement
            .output_channel(1, || Ok(Box::new(FullDisk) as Box<dyn Write + Send>))
            .unwrap();
        statement.execute().unwrap();
        silent_logs! {
            let error = statement.fetch().unwrap_err();
            assert!(format!("{:#}", error).contains("disk full"), "{:#}", error);
        }
        connection.close().unwrap();
    }

    #[test]
    fn output_transform_may_stop_reading() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:?pipe_capacity=1").unwrap();
        let statement = connection.statement("SELECT zeroblob(1048576), 7").unwrap();
        let head = statement
            .output_stream(1, |source: &mut PipeReader| {
                let mut buffer = [0xffu8; 16];
                source.read_exact(&mut buffer)?;
                Ok(buffer)
            })
            .unwrap();
        let seven = statement.output::<i32>(2).unwrap();
        statement.execute().unwrap();
        assert!(statement.fetch().expect("A reader going away is not a fetch failure"));
        assert_eq!(head.value().unwrap(), [0u8; 16]);
        assert_eq!(seven.get().unwrap(), Some(7));
        connection.close().unwrap();
    }

    #[test]
    fn panicking_transform_leaves_no_row() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:").unwrap();
        connection
            .execute("CREATE TABLE chunks (payload BLOB)")
            .unwrap();
        let insert = connection
            .statement("INSERT INTO chunks VALUES (:payload)")
            .unwrap();
        let payload = insert
            .input_stream("payload", |value: usize, sink: &mut PipeWriter| {
                sink.write_all(&vec![5u8; value])?;
                panic!("Lost the source after {} bytes", value)
            })
            .unwrap();
        payload.put(100).unwrap();
        silent_logs! {
            let error = insert.execute().unwrap_err();
            assert!(error.to_string().contains("Lost the source"), "{}", error);
        }
        let row = connection
            .query("SELECT COUNT(*) FROM chunks")
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(row.get(0), Some(&Value::Long(Some(0))));
        connection.close().unwrap();
    }
}
