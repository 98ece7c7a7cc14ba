mod common;

#[cfg(test)]
mod tests {
    use crate::common::connect;
    use bindery_core::Value;

    #[test]
    fn generic_outputs_are_bound_automatically() {
        let (mut connection, journal) = connect();
        let statement = connection.statement("select name, times").unwrap();
        statement.input::<String>("name").unwrap().set("row").unwrap();
        statement.input::<i32>("times").unwrap().set(2).unwrap();
        let rows = statement
            .query()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.names(), ["name", "times"]);
            assert_eq!(
                row.get_column("name"),
                Some(&Value::String(Some("row".into())))
            );
            assert_eq!(row.get(1), Some(&Value::Integer(Some(2))));
        }
        // The statement closes at the end of the results
        assert!(connection.current().is_none());
        assert_eq!(journal.released(), 1);
        connection.close().unwrap();
    }

    #[test]
    fn declared_outputs_shape_the_row() {
        let (mut connection, _) = connect();
        let statement = connection.statement("select a, b, c").unwrap();
        statement.input::<i64>("c").unwrap().set(3i64).unwrap();
        statement.output::<i64>(3).unwrap();
        let mut rows = statement.query().unwrap();
        let row = rows.next().unwrap().unwrap();
        assert_eq!(row.names(), ["c"]);
        assert_eq!(row.values(), [Value::Long(Some(3))]);
        assert!(rows.next().is_none());
        assert!(rows.next().is_none());
        drop(rows);
        connection.close().unwrap();
    }

    #[test]
    fn nonzero_count_closes_the_statement() {
        let (mut connection, journal) = connect();
        let statement = connection.statement("update things").unwrap();
        let mut rows = statement.query().unwrap();
        assert_eq!(rows.affected(), 1);
        assert!(rows.is_done());
        assert!(rows.next().is_none());
        drop(rows);
        assert!(connection.current().is_none());
        assert_eq!(journal.released(), 1);
        connection.close().unwrap();
    }

    #[test]
    fn borrowed_cursor_leaves_the_statement_open() {
        let (mut connection, journal) = connect();
        let statement = connection.statement("select a, times").unwrap();
        statement.input::<i32>("times").unwrap().set(3).unwrap();
        {
            let mut rows = statement.query().unwrap();
            assert!(rows.next().unwrap().is_ok());
        }
        assert!(statement.is_open());
        assert_eq!(journal.released(), 0);
        connection.close().unwrap();
        assert_eq!(journal.released(), 1);
    }

    #[test]
    fn owned_cursor_closes_with_the_statement() {
        let (mut connection, journal) = connect();
        let mut statement = connection.prepare("select a, times").unwrap();
        statement.input::<i32>("a").unwrap().set(1).unwrap();
        statement.input::<i32>("times").unwrap().set(5).unwrap();
        statement.execute().unwrap();
        let mut rows = statement.into_rows().unwrap();
        assert!(rows.next().unwrap().is_ok());
        drop(rows);
        assert_eq!(journal.released(), 1);

        let rows = connection.query("select a").unwrap();
        assert_eq!(rows.count(), 1);
        assert_eq!(journal.released(), 2);
        connection.close().unwrap();
    }
}
