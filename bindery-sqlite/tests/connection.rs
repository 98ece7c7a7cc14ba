#[cfg(test)]
mod tests {
    use bindery_core::{Error, ExecutionError, Value};
    use bindery_sqlite::{SqliteConnection, SqliteDriver};
    use bindery_tests::{init_logs, silent_logs};
    use std::{fs, path::Path, sync::Mutex};

    static MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn create_database() {
        init_logs();
        const DB_PATH: &'static str = "../target/debug/creation.sqlite";
        let _guard = MUTEX.lock().unwrap();
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH)
                .expect(format!("Failed to remove test database file {}", DB_PATH).as_str());
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        SqliteConnection::connect(&format!("sqlite://{}?mode=rwc", DB_PATH))
            .expect("Could not open the database")
            .close()
            .expect("Could not close the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        let mut connection = SqliteConnection::connect(&format!("sqlite://{}?mode=ro", DB_PATH))
            .expect("Could not open the database");
        silent_logs! {
            assert!(
                connection.execute("CREATE TABLE nope (id INTEGER)").is_err(),
                "A read only database rejects writes"
            );
        }
        connection.close().unwrap();
        fs::remove_file(DB_PATH)
            .expect(format!("Failed to remove existing test database file {}", DB_PATH).as_str());
        silent_logs! {
            assert!(
                SqliteConnection::connect(&format!("sqlite://{}?mode=ro", DB_PATH)).is_err(),
                "Should not be able to open in read only unexisting database"
            );
        }
    }

    #[test]
    fn wrong_url() {
        silent_logs! {
            assert!(SqliteConnection::connect("duckdb://some_value").is_err());
            assert!(SqliteConnection::connect("sqlite://:memory:?chunk_size=0").is_err());
        }
    }

    #[test]
    fn prepare_errors() {
        init_logs();
        let mut connection = SqliteConnection::open(SqliteDriver::new(), "sqlite://:memory:")
            .expect("Could not open the in memory database");
        silent_logs! {
            assert!(connection.statement("SELEC 1").is_err());
            assert!(connection.statement("SELECT 1; SELECT 2").is_err());
            assert!(connection.statement("   ").is_err());
        }
        assert!(connection.statement("SELECT 1;  ").is_ok());
        let statement = connection.statement("SELECT :a + ?2").unwrap();
        silent_logs! {
            assert!(statement.input::<i32>("missing").unwrap_err().is_binding());
            assert!(statement.input::<i32>("3").unwrap_err().is_binding());
            assert!(statement.output::<i32>(2).unwrap_err().is_binding());
        }
        statement.input::<i32>("a").unwrap().set(40).unwrap();
        statement.input::<i64>("2").unwrap().set(2i64).unwrap();
        let sum = statement.output::<i32>(1).unwrap();
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        assert_eq!(sum.get().unwrap(), Some(42));
        connection.close().unwrap();
    }

    #[test]
    fn casts_follow_the_declared_type() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:").unwrap();
        let statement = connection
            .statement("SELECT 3000000000, 'text', 2.5, NULL")
            .unwrap();
        let long = statement.output::<i64>(1).unwrap();
        let text = statement.output::<String>(2).unwrap();
        let float = statement.output::<f32>(3).unwrap();
        let generic = statement.output::<Value>(4).unwrap();
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        assert_eq!(long.get().unwrap(), Some(3_000_000_000));
        assert_eq!(text.get().unwrap(), Some("text".into()));
        assert_eq!(float.get().unwrap(), Some(2.5));
        assert!(generic.value().is_null());

        let narrow = statement.output::<i32>(1).unwrap();
        assert!(long.is_orphaned());
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        // sqlite truncates to the low 32 bits
        assert_eq!(narrow.get().unwrap(), Some(3_000_000_000u32 as i32));
        connection.close().unwrap();
    }

    #[test]
    fn closed_connection() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:").unwrap();
        connection.close().unwrap();
        connection.close().expect("Closing twice does nothing");
        silent_logs! {
            assert!(matches!(
                connection.execute("SELECT 1"),
                Err(Error::Execution(ExecutionError::Closed(..)))
            ));
        }
    }

    #[test]
    fn close_with_live_statement() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:").unwrap();
        let mut statement = connection.prepare("SELECT 1").unwrap();
        statement.execute().unwrap();
        assert!(statement.fetch().unwrap());
        connection
            .close()
            .expect("Closing with a prepared statement alive succeeds");
        silent_logs! {
            assert!(matches!(
                statement.execute(),
                Err(Error::Execution(ExecutionError::Closed(..)))
            ));
        }
        // Finalizing after the close completes the deferred one
        statement.close();
        assert!(!statement.is_open());
    }
}
