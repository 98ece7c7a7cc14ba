#[cfg(test)]
mod tests {
    use bindery_sqlite::SqliteConnection;
    use bindery_tests::{execute_tests, init_logs};
    use std::{fs, path::Path, sync::Mutex};

    static MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn sqlite() {
        init_logs();
        const DB_PATH: &'static str = "../target/debug/tests.sqlite";
        let _guard = MUTEX.lock().unwrap();
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH).expect(
                format!("Failed to remove existing test database file {}", DB_PATH).as_str(),
            );
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        let mut connection = SqliteConnection::connect(&format!("sqlite://{}?mode=rwc", DB_PATH))
            .expect("Could not open the database");
        execute_tests(&mut connection);
        connection.close().expect("Could not close the database");
    }

    #[test]
    fn sqlite_memory() {
        init_logs();
        let mut connection = SqliteConnection::connect("sqlite://:memory:?pipe_capacity=2&chunk_size=1000")
            .expect("Could not open the in memory database");
        execute_tests(&mut connection);
        connection.close().expect("Could not close the database");
    }
}
