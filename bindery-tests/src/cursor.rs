use bindery::{Connection, Driver, Row, Value};
use indoc::indoc;
use std::sync::Mutex;

static MUTEX: Mutex<()> = Mutex::new(());

pub fn cursor<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    connection
        .execute("DROP TABLE IF EXISTS books")
        .expect("Failed to drop books table");
    connection
        .execute(indoc! {"
            CREATE TABLE books (
                isbn TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                year INTEGER,
                rating REAL
            )
        "})
        .expect("Failed to create books table");
    let inserted = connection
        .execute(indoc! {"
            INSERT INTO books (isbn, title, year, rating) VALUES
                ('9780441013593', 'Dune', 1965, 4.3),
                ('9780547928227', 'The Hobbit', 1937, 4.7),
                ('9780553293357', 'Foundation', 1951, NULL)
        "})
        .expect("Failed to insert the books");
    assert_eq!(inserted, 3);

    // Generic outputs, labeled by the column names
    let rows = connection
        .query("SELECT title, year, rating FROM books ORDER BY year")
        .expect("Failed to query the books")
        .collect::<Result<Vec<Row>, _>>()
        .expect("Failed to fetch the books");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].names(), ["title", "year", "rating"]);
    assert_eq!(
        rows[0].get_column("title"),
        Some(&Value::String(Some("The Hobbit".into())))
    );
    assert_eq!(rows[1].get_column("year"), Some(&Value::Long(Some(1951))));
    assert!(rows[1].get_column("rating").is_some_and(Value::is_null));
    assert_eq!(rows[2].get(2), Some(&Value::Double(Some(4.3))));
    assert_eq!(rows[2].get_column("isbn"), None);

    // Declared outputs shape the row
    let statement = connection
        .statement("SELECT isbn, title, year FROM books WHERE year > :year ORDER BY year DESC")
        .unwrap();
    let year = statement.input::<i32>("year").unwrap();
    let title = statement.output::<String>(2).unwrap();
    statement.output::<i32>(3).unwrap();
    year.set(1940).unwrap();
    let mut titles = Vec::new();
    for row in statement.query().expect("Failed to query the recent books") {
        let row = row.expect("Failed to fetch a recent book");
        assert_eq!(row.len(), 2);
        assert_eq!(row.names(), ["title", "year"]);
        titles.push(title.get().unwrap().expect("Every book has a title"));
    }
    assert_eq!(titles, ["Dune", "Foundation"]);
    assert!(!statement.is_open(), "The exhausted cursor closes the statement");

    // Borrowed cursor stopped early, the statement survives
    let statement = connection.statement("SELECT title FROM books ORDER BY title").unwrap();
    statement.execute().unwrap();
    {
        let mut rows = statement.rows().unwrap();
        let first = rows.next().unwrap().unwrap();
        assert_eq!(first.get(0), Some(&Value::String(Some("Dune".into()))));
    }
    assert!(statement.is_open());
    let rest = statement.rows().unwrap().count();
    assert_eq!(rest, 2);

    // Owning cursor
    let mut statement = connection
        .prepare("SELECT isbn FROM books WHERE rating IS NULL")
        .unwrap();
    statement.execute().unwrap();
    let isbns = statement
        .into_rows()
        .unwrap()
        .map(|row| row.map(Box::<[Value]>::from))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(
        isbns,
        vec![vec![Value::String(Some("9780553293357".into()))].into_boxed_slice()]
    );

    // Not a query, the cursor is empty and reports the count
    let mut statement = connection
        .prepare("DELETE FROM books WHERE year < :year")
        .unwrap();
    statement.input::<i32>("year").unwrap().set(1960).unwrap();
    let rows = statement.query().unwrap();
    assert_eq!(rows.affected(), 2);
    assert!(rows.is_done());
    drop(rows);
    assert!(!statement.is_open());

    let remaining = connection
        .query("SELECT COUNT(*) FROM books")
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(remaining.get(0), Some(&Value::Long(Some(1))));
}
