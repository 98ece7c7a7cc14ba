use bindery::{Connection, Driver, Value};
use indoc::indoc;
use std::sync::Mutex;
use time::macros::datetime;

static MUTEX: Mutex<()> = Mutex::new(());

fn setup<D: Driver>(connection: &mut Connection<D>) {
    connection
        .execute("DROP TABLE IF EXISTS simple_fields")
        .expect("Failed to drop simple_fields table");
    connection
        .execute(indoc! {"
            CREATE TABLE simple_fields (
                id INTEGER PRIMARY KEY,
                name TEXT,
                amount REAL,
                quantity INTEGER,
                flag INTEGER,
                initial TEXT,
                created TEXT
            )
        "})
        .expect("Failed to create simple_fields table");
}

pub fn simple<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    setup(connection);

    // Insert
    let mut insert = connection
        .prepare(indoc! {"
            INSERT INTO simple_fields (id, name, amount, quantity, flag, initial, created)
            VALUES (:id, :name, :amount, :quantity, :flag, :initial, :created)
        "})
        .expect("Failed to prepare the insert");
    let id = insert.input::<i32>("id").expect("Failed to bind id");
    let name = insert.input::<String>("name").expect("Failed to bind name");
    let amount = insert.input::<f64>("amount").expect("Failed to bind amount");
    let quantity = insert.input::<i64>("quantity").expect("Failed to bind quantity");
    let flag = insert.input::<bool>("flag").expect("Failed to bind flag");
    let initial = insert.input::<char>("initial").expect("Failed to bind initial");
    let created = insert.input::<time::PrimitiveDateTime>("created").expect("Failed to bind created");

    id.set(1).unwrap();
    name.set("first").unwrap();
    amount.set(1.5).unwrap();
    quantity.set(10i64).unwrap();
    flag.set(true).unwrap();
    initial.set('a').unwrap();
    created.set(datetime!(2024-02-29 12:00:10.5)).unwrap();
    assert_eq!(insert.execute().expect("Failed to insert simple 1"), 1);

    id.set(2).unwrap();
    name.set("second").unwrap();
    amount.set(None::<f64>).unwrap();
    quantity.set(9876543210i64).unwrap();
    // Integers are accepted by boolean inputs
    flag.set(0).unwrap();
    initial.set('è').unwrap();
    created.set(datetime!(1999-12-31 23:59:59)).unwrap();
    assert_eq!(insert.execute().expect("Failed to insert simple 2"), 1);

    id.set(3).unwrap();
    name.set(None::<String>).unwrap();
    quantity.set(None::<i64>).unwrap();
    flag.set(None::<bool>).unwrap();
    initial.set(None::<char>).unwrap();
    created.set(None::<time::PrimitiveDateTime>).unwrap();
    assert_eq!(insert.execute().expect("Failed to insert simple 3"), 1);
    insert.close();

    // Select one
    let select = connection
        .statement(indoc! {"
            SELECT name, amount, quantity, flag, initial, created
            FROM simple_fields
            WHERE id = :id
        "})
        .expect("Failed to prepare the select");
    let id = select.input::<i32>("id").unwrap();
    let name = select.output::<String>(1).unwrap();
    let amount = select.output::<f64>(2).unwrap();
    let quantity = select.output::<i64>(3).unwrap();
    let flag = select.output::<bool>(4).unwrap();
    let initial = select.output::<char>(5).unwrap();
    let created = select.output::<time::PrimitiveDateTime>(6).unwrap();

    id.set(2).unwrap();
    assert_eq!(select.execute().expect("Failed to query simple 2"), 0);
    assert!(select.fetch().unwrap(), "Expected the row with id 2");
    assert_eq!(name.get().unwrap(), Some("second".into()));
    assert_eq!(amount.get().unwrap(), None);
    assert_eq!(quantity.get().unwrap(), Some(9876543210));
    assert_eq!(flag.get().unwrap(), Some(false));
    assert_eq!(initial.get().unwrap(), Some('è'));
    assert_eq!(created.get().unwrap(), Some(datetime!(1999-12-31 23:59:59)));
    assert!(!select.fetch().unwrap());

    id.set(1).unwrap();
    select.execute().expect("Failed to query simple 1");
    assert!(select.fetch().unwrap(), "Expected the row with id 1");
    assert_eq!(name.get().unwrap(), Some("first".into()));
    assert_eq!(amount.get().unwrap(), Some(1.5));
    assert_eq!(flag.get().unwrap(), Some(true));
    assert_eq!(created.get().unwrap(), Some(datetime!(2024-02-29 12:00:10.5)));
    assert!(!select.fetch().unwrap());

    id.set(3).unwrap();
    select.execute().expect("Failed to query simple 3");
    assert!(select.fetch().unwrap(), "Expected the row with id 3");
    assert_eq!(name.get().unwrap(), None);
    assert_eq!(quantity.get().unwrap(), None);
    assert_eq!(initial.get().unwrap(), None);
    assert_eq!(created.value(), Value::Date(None));
    assert!(!select.fetch().unwrap());

    id.set(4).unwrap();
    select.execute().expect("Failed to query a missing id");
    assert!(!select.fetch().unwrap(), "There is no row with id 4");

    let updated = connection
        .execute("UPDATE simple_fields SET amount = 2.25 WHERE id <= 2")
        .expect("Failed to update");
    assert_eq!(updated, 2);
}

/// One statement executed many times with the same slots.
pub fn simple_repeated<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    connection
        .execute("DROP TABLE IF EXISTS counters")
        .expect("Failed to drop counters table");
    connection
        .execute("CREATE TABLE counters (id INTEGER PRIMARY KEY, label TEXT, value INTEGER)")
        .expect("Failed to create counters table");
    let insert = connection
        .statement("INSERT INTO counters (id, label, value) VALUES (?1, ?2, ?3)")
        .expect("Failed to prepare the insert");
    let id = insert.input::<i32>("1").unwrap();
    let label = insert.input::<String>("2").unwrap();
    let value = insert.input::<i64>("3").unwrap();
    for i in 0..100 {
        id.set(i).unwrap();
        label.set(format!("counter {}", i)).unwrap();
        value.set(i as i64 * 1_000_000_007).unwrap();
        assert_eq!(insert.execute().unwrap(), 1);
    }

    // Rebinding with the same type keeps the slot
    let same = insert.input::<Option<i32>>("1").unwrap();
    assert!(same.same_slot(&id));
    assert!(!id.is_orphaned());

    let statement = connection
        .statement("SELECT COUNT(*), SUM(id), MAX(value) FROM counters")
        .unwrap();
    let count = statement.output::<i64>(1).unwrap();
    let sum = statement.output::<i64>(2).unwrap();
    let max = statement.output::<i64>(3).unwrap();
    statement.execute().unwrap();
    assert!(statement.fetch().unwrap());
    assert_eq!(count.get().unwrap(), Some(100));
    assert_eq!(sum.get().unwrap(), Some(4950));
    assert_eq!(max.get().unwrap(), Some(99 * 1_000_000_007));
    assert!(!statement.fetch().unwrap());
}
