use bindery::{Connection, Driver, Value};
use std::sync::Mutex;

static MUTEX: Mutex<()> = Mutex::new(());

fn count<D: Driver>(connection: &mut Connection<D>) -> i64 {
    let row = connection
        .query("SELECT COUNT(*) FROM ledger")
        .expect("Failed to count the ledger entries")
        .next()
        .expect("A count always returns one row")
        .expect("Failed to fetch the count");
    match row.get(0) {
        Some(Value::Long(Some(v))) => *v,
        other => panic!("Unexpected count {:?}", other),
    }
}

fn setup<D: Driver>(connection: &mut Connection<D>) {
    connection
        .execute("DROP TABLE IF EXISTS ledger")
        .expect("Failed to drop ledger table");
    connection
        .execute("CREATE TABLE ledger (id INTEGER PRIMARY KEY, entry TEXT)")
        .expect("Failed to create ledger table");
}

pub fn transactions<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    setup(connection);

    // Commit
    let id = connection.begin().expect("Could not begin a transaction");
    assert_eq!(connection.transaction_id(), Some(id));
    crate::silent_logs! {
        assert!(connection.begin().is_err(), "Transactions do not nest");
    }
    connection
        .execute("INSERT INTO ledger (entry) VALUES ('first')")
        .unwrap();
    connection.commit().expect("Failed to commit");
    assert_eq!(connection.transaction_id(), None);
    assert_eq!(count(connection), 1);

    // Abort
    let next = connection.begin().unwrap();
    assert!(next > id);
    connection
        .execute("INSERT INTO ledger (entry) VALUES ('discarded')")
        .unwrap();
    connection.abort().expect("Failed to abort");
    assert_eq!(count(connection), 1);

    // Scoped sequence, committed on close
    {
        let mut sequence = connection.sequence().unwrap();
        let statement = sequence
            .statement("INSERT INTO ledger (entry) VALUES (:entry)")
            .unwrap();
        let entry = statement.input::<String>("entry").unwrap();
        for text in ["second", "third"] {
            entry.set(text).unwrap();
            assert_eq!(statement.execute().unwrap(), 1);
        }
        sequence.close().expect("Failed to close the sequence");
        assert!(!sequence.is_current());
    }
    assert_eq!(count(connection), 3);

    // Dropped sequence rolls back
    {
        let mut sequence = connection.sequence().unwrap();
        sequence
            .execute("INSERT INTO ledger (entry) VALUES ('lost')")
            .unwrap();
        crate::silent_logs! {
            drop(sequence);
        }
    }
    assert_eq!(connection.transaction_id(), None);
    assert_eq!(count(connection), 3);
}

#[cfg(not(feature = "disable-procedures"))]
pub fn procedures<D: Driver>(connection: &mut Connection<D>) {
    let _lock = MUTEX.lock().unwrap();
    setup(connection);

    crate::silent_logs! {
        assert!(connection.start().is_err(), "A procedure needs a transaction");
    }

    // Procedure ended, transaction committed by the sequence
    {
        let mut sequence = connection.sequence().unwrap();
        let mut procedure = sequence.procedure().expect("Failed to start a procedure");
        procedure
            .execute("INSERT INTO ledger (entry) VALUES ('inside')")
            .unwrap();
        procedure.end().expect("Failed to end the procedure");
        sequence
            .execute("INSERT INTO ledger (entry) VALUES ('after')")
            .unwrap();
        sequence.close().unwrap();
    }
    assert_eq!(count(connection), 2);

    // Committing through the procedure settles the sequence too
    {
        let mut sequence = connection.sequence().unwrap();
        let mut procedure = sequence.procedure().unwrap();
        procedure
            .execute("INSERT INTO ledger (entry) VALUES ('committed')")
            .unwrap();
        procedure.commit().expect("Failed to commit the procedure");
        assert!(!sequence.is_current());
        sequence.close().expect("Closing a settled sequence does nothing");
    }
    assert_eq!(connection.transaction_id(), None);
    assert!(!connection.in_procedure());
    assert_eq!(count(connection), 3);

    // Aborting through the procedure discards everything
    {
        let mut sequence = connection.sequence().unwrap();
        sequence
            .execute("INSERT INTO ledger (entry) VALUES ('before')")
            .unwrap();
        let mut procedure = sequence.procedure().unwrap();
        procedure
            .execute("INSERT INTO ledger (entry) VALUES ('inside')")
            .unwrap();
        procedure.abort().expect("Failed to abort the procedure");
        sequence.close().unwrap();
    }
    assert_eq!(count(connection), 3);

    // A procedure left open is ended, the transaction still commits
    {
        let mut sequence = connection.sequence().unwrap();
        {
            let mut procedure = sequence.procedure().unwrap();
            procedure
                .execute("INSERT INTO ledger (entry) VALUES ('forgotten')")
                .unwrap();
            crate::silent_logs! {
                drop(procedure);
            }
        }
        assert!(!sequence.connection().in_procedure());
        sequence.close().unwrap();
    }
    assert_eq!(count(connection), 4);
}
