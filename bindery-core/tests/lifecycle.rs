#[macro_use]
mod common;

#[cfg(test)]
mod tests {
    use crate::common::{connect, connect_with};
    use bindery_core::{Error, ExecutionError, PipeWriter};
    use std::{
        io::Write,
        sync::{Arc, Mutex},
    };

    #[test]
    fn statement_is_released_once() {
        let (mut connection, journal) = connect();
        let mut statement = connection.prepare("update things").unwrap();
        assert!(statement.is_open());
        assert_eq!(statement.execute().unwrap(), 1);
        statement.close();
        statement.close();
        assert!(!statement.is_open());
        assert_eq!(journal.released(), 1);
        silent_logs! {
            assert!(statement.execute().is_err());
        }
        drop(statement);
        assert_eq!(journal.released(), 1);
        connection.close().unwrap();
    }

    #[test]
    fn dropped_statement_is_released() {
        let (mut connection, journal) = connect();
        {
            let _statement = connection.prepare("select a").unwrap();
        }
        assert_eq!(journal.released(), 1);
        connection.close().unwrap();
    }

    #[test]
    fn new_current_statement_closes_the_previous() {
        let (mut connection, journal) = connect();
        connection.statement("select a").unwrap();
        connection.statement("select b").unwrap();
        assert_eq!(journal.released(), 1);
        assert_eq!(connection.current().unwrap().sql(), "select b");
        connection.close().unwrap();
        assert_eq!(journal.released(), 2);
        assert_eq!(journal.closed(), 1);
    }

    #[test]
    fn repeated_execution_reuses_the_slots() {
        let (mut connection, journal) = connect();
        let statement = connection.statement("select id").unwrap();
        let id = statement.input::<i64>("id").unwrap();
        let output = statement.output::<i64>(1).unwrap();
        for value in 1..=5 {
            id.set(value).unwrap();
            assert_eq!(statement.execute().unwrap(), 0);
            assert!(statement.fetch().unwrap());
            assert_eq!(output.get().unwrap(), Some(value));
        }
        assert_eq!(
            journal
                .events()
                .iter()
                .filter(|v| v.starts_with("execute"))
                .count(),
            5
        );
        assert!(statement.is_open());
        connection.close().unwrap();
    }

    #[test]
    fn closed_connection() {
        let (mut connection, journal) = connect();
        let mut statement = connection.prepare("select a").unwrap();
        connection.close().unwrap();
        connection.close().unwrap();
        assert_eq!(journal.closed(), 1);
        assert!(!connection.is_open());
        silent_logs! {
            assert!(matches!(
                statement.execute(),
                Err(Error::Execution(ExecutionError::Closed("connection")))
            ));
            assert!(connection.statement("select a").is_err());
            assert!(connection.begin().is_err());
        }
        statement.close();
        assert_eq!(journal.released(), 1);
    }

    #[test]
    fn dropped_connection_is_closed() {
        let (connection, journal) = connect();
        drop(connection);
        assert_eq!(journal.closed(), 1);
    }

    #[test]
    fn overlapping_calls_are_busy() {
        // One chunk in flight: the second write returns only once the link
        // is reading, that is while it holds the connection
        let (mut connection, _) = connect_with("?pipe_capacity=1&chunk_size=1");
        let other = Arc::new(Mutex::new(connection.prepare("update other").unwrap()));
        let observed = Arc::new(Mutex::new(None));
        let statement = connection.statement("select payload").unwrap();
        let payload = statement
            .input_stream("payload", {
                let other = other.clone();
                let observed = observed.clone();
                move |value: Vec<u8>, sink: &mut PipeWriter| {
                    sink.write_all(&value)?;
                    let result = other.lock().unwrap().execute();
                    *observed.lock().unwrap() = Some(result);
                    Ok(())
                }
            })
            .unwrap();
        payload.put(b"ab".to_vec()).unwrap();
        silent_logs! {
            statement.execute().unwrap();
        }
        assert!(matches!(
            observed.lock().unwrap().take(),
            Some(Err(Error::Execution(ExecutionError::Busy)))
        ));
        other.lock().unwrap().close();
        connection.close().unwrap();
    }

    #[test]
    fn transform_error_wins_over_native_error() {
        let (mut connection, _) = connect();
        let statement = connection.statement("broken payload").unwrap();
        let payload = statement
            .input_stream("payload", |_: (), _: &mut PipeWriter| {
                anyhow::bail!("No payload")
            })
            .unwrap();
        payload.put(()).unwrap();
        silent_logs! {
            let error = statement.execute().unwrap_err();
            assert!(error.transform_error().is_some());
        }
        statement.input::<i32>("payload").unwrap();
        silent_logs! {
            let error = statement.execute().unwrap_err();
            assert!(matches!(error, Error::Execution(ExecutionError::Native(..))));
            assert!(error.to_string().contains("The statement is broken"));
        }
        connection.close().unwrap();
    }
}
