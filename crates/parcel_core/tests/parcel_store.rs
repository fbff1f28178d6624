use parcel_core::db::migrations::latest_version;
use parcel_core::db::{open_db, open_db_in_memory};
use parcel_core::{
    Parcel, ParcelOp, ParcelRepository, ParcelStatus, RepoError, RepoKey, SqliteParcelStore,
};
use rusqlite::Connection;
use std::collections::HashMap;
use std::thread;

const CREATED_AT: &str = "2024-01-01T00:00:00Z";

fn test_parcel() -> Parcel {
    Parcel::new(1000, ParcelStatus::Registered, "test", CREATED_AT)
}

#[test]
fn add_get_delete_roundtrip() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let parcel = test_parcel();

    let number = store.add(&parcel).unwrap();
    assert!(number > 0);

    let loaded = store.get(number).unwrap();
    assert_eq!(loaded.number, number);
    assert_eq!(loaded.client, parcel.client);
    assert_eq!(loaded.status, parcel.status);
    assert_eq!(loaded.address, parcel.address);
    assert_eq!(loaded.created_at, parcel.created_at);

    store.delete(number).unwrap();
    let err = store.get(number).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound { op: ParcelOp::Get, number: n } if n == number
    ));
}

#[test]
fn add_ignores_caller_number() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let mut parcel = test_parcel();
    parcel.number = 777;
    let number = store.add(&parcel).unwrap();

    assert_eq!(number, 1);
    assert!(store.get(777).unwrap_err().is_not_found());
}

#[test]
fn get_missing_parcel_reports_number() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let err = store.get(404).unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("404"));
}

#[test]
fn set_address_updates_registered_parcel() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();

    store.set_address(number, "new test address").unwrap();

    let loaded = store.get(number).unwrap();
    assert_eq!(loaded.address, "new test address");
    assert_eq!(loaded.status, ParcelStatus::Registered);
}

#[test]
fn set_address_is_rejected_when_not_registered() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();
    store.set_status(number, &ParcelStatus::Sent).unwrap();

    let err = store.set_address(number, "blocked").unwrap_err();
    match err {
        RepoError::NotRegistered { op, number: n, status } => {
            assert_eq!(op, ParcelOp::SetAddress);
            assert_eq!(n, number);
            assert_eq!(status, ParcelStatus::Sent);
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(store.get(number).unwrap().address, "test");
}

#[test]
fn set_address_on_missing_parcel_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let err = store.set_address(99, "nowhere").unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound {
            op: ParcelOp::SetAddress,
            number: 99
        }
    ));
}

#[test]
fn delete_is_rejected_when_not_registered() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();
    store.set_status(number, &ParcelStatus::Delivered).unwrap();

    let err = store.delete(number).unwrap_err();
    assert!(err.is_status_gate());

    let loaded = store.get(number).unwrap();
    assert_eq!(loaded.status, ParcelStatus::Delivered);
}

#[test]
fn delete_missing_parcel_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let err = store.delete(5).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound {
            op: ParcelOp::Delete,
            number: 5
        }
    ));
}

#[test]
fn set_status_changes_any_status() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();

    for status in ["Delivered", "sent", "lost in transit", "registered"] {
        let status = ParcelStatus::from(status);
        store.set_status(number, &status).unwrap();
        assert_eq!(store.get(number).unwrap().status, status);
    }
}

#[test]
fn set_status_on_missing_parcel_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let err = store.set_status(12, &ParcelStatus::Sent).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound {
            op: ParcelOp::SetStatus,
            number: 12
        }
    ));
}

#[test]
fn returning_to_registered_reopens_the_gate() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();

    store.set_status(number, &ParcelStatus::Sent).unwrap();
    assert!(store.set_address(number, "a").unwrap_err().is_status_gate());

    store.set_status(number, &ParcelStatus::Registered).unwrap();
    store.set_address(number, "b").unwrap();
    store.delete(number).unwrap();
}

#[test]
fn get_by_client_returns_exactly_the_client_parcels() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let client = 4_242_424;

    let mut expected = HashMap::new();
    for address in ["first", "second", "third"] {
        let mut parcel = Parcel::new(client, ParcelStatus::Registered, address, CREATED_AT);
        parcel.number = store.add(&parcel).unwrap();
        expected.insert(parcel.number, parcel);
    }
    store.add(&test_parcel()).unwrap();

    let stored = store.get_by_client(client).unwrap();
    assert_eq!(stored.len(), expected.len());
    for parcel in stored {
        let original = expected
            .get(&parcel.number)
            .expect("retrieved parcel was not added for this client");
        assert_eq!(original, &parcel);
    }
}

#[test]
fn get_by_client_without_parcels_is_empty() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    store.add(&test_parcel()).unwrap();

    assert!(store.get_by_client(1).unwrap().is_empty());
}

#[test]
fn get_by_client_wraps_storage_failure_with_client() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    store.add(&test_parcel()).unwrap();
    // A blob timestamp cannot be decoded as text.
    conn.execute("UPDATE parcel SET created_at = x'00ff' WHERE client = 1000;", [])
        .unwrap();

    let err = store.get_by_client(1000).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Storage {
            op: ParcelOp::GetByClient,
            key: RepoKey::Client(1000),
            ..
        }
    ));
}

#[test]
fn get_wraps_decode_failure_instead_of_not_found() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();
    conn.execute(
        "UPDATE parcel SET created_at = x'00ff' WHERE number = ?1;",
        [number],
    )
    .unwrap();

    let err = store.get(number).unwrap_err();
    assert!(
        matches!(
            err,
            RepoError::Storage {
                op: ParcelOp::Get,
                key: RepoKey::Number(n),
                ..
            } if n == number
        ),
        "unexpected error: {err}"
    );
    assert!(err.to_string().contains(&format!("number {number}")));
}

#[test]
fn writes_wrap_storage_failure_with_operation_and_key() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();
    conn.execute_batch("DROP TABLE parcel;").unwrap();

    let failures = [
        (store.add(&test_parcel()).unwrap_err(), ParcelOp::Add, RepoKey::None),
        (
            store.set_status(number, &ParcelStatus::Sent).unwrap_err(),
            ParcelOp::SetStatus,
            RepoKey::Number(number),
        ),
        (
            store.set_address(number, "moved").unwrap_err(),
            ParcelOp::SetAddress,
            RepoKey::Number(number),
        ),
        (
            store.delete(number).unwrap_err(),
            ParcelOp::Delete,
            RepoKey::Number(number),
        ),
    ];

    for (err, expected_op, expected_key) in failures {
        match err {
            RepoError::Storage { op, key, .. } => {
                assert_eq!(op, expected_op);
                assert_eq!(key, expected_key);
            }
            other => panic!("expected storage error for {expected_op}, got: {other}"),
        }
    }
}

#[test]
fn registered_tag_from_text_opens_the_gate() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let parcel = Parcel::new(1, ParcelStatus::from("registered"), "a", CREATED_AT);
    assert!(parcel.is_registered());

    let number = store.add(&parcel).unwrap();
    let loaded = store.get(number).unwrap();
    assert_eq!(loaded.status, parcel.status);
    assert!(loaded.is_registered());
    store.set_address(number, "b").unwrap();
}

#[test]
fn replace_status_applies_only_from_expected_status() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();
    let number = store.add(&test_parcel()).unwrap();

    store
        .replace_status(number, &ParcelStatus::Registered, &ParcelStatus::Sent)
        .unwrap();

    let err = store
        .replace_status(number, &ParcelStatus::Registered, &ParcelStatus::Sent)
        .unwrap_err();
    match err {
        RepoError::StatusChanged {
            op,
            number: n,
            expected,
            actual,
        } => {
            assert_eq!(op, ParcelOp::SetStatus);
            assert_eq!(n, number);
            assert_eq!(expected, ParcelStatus::Registered);
            assert_eq!(actual, ParcelStatus::Sent);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.get(number).unwrap().status, ParcelStatus::Sent);

    let missing = store
        .replace_status(99, &ParcelStatus::Sent, &ParcelStatus::Delivered)
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[test]
fn numbers_are_not_reused_after_delete() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let first = store.add(&test_parcel()).unwrap();
    store.delete(first).unwrap();
    let second = store.add(&test_parcel()).unwrap();

    assert!(second > first);
}

#[test]
fn documented_lifecycle_scenario() {
    let conn = open_db_in_memory().unwrap();
    let store = SqliteParcelStore::try_new(&conn).unwrap();

    let number = store.add(&test_parcel()).unwrap();
    assert_eq!(number, 1);

    store.set_address(1, "new address").unwrap();
    assert_eq!(store.get(1).unwrap().address, "new address");

    store.set_status(1, &ParcelStatus::from("Delivered")).unwrap();
    assert!(store.set_address(1, "blocked").unwrap_err().is_status_gate());
    assert!(store.delete(1).unwrap_err().is_status_gate());

    let loaded = store.get(1).unwrap();
    assert_eq!(loaded.address, "new address");
    assert_eq!(loaded.status.as_str(), "Delivered");
}

#[test]
fn gated_mutation_joins_caller_transaction() {
    let mut conn = open_db_in_memory().unwrap();
    let number = SqliteParcelStore::try_new(&conn)
        .unwrap()
        .add(&test_parcel())
        .unwrap();

    let tx = conn.transaction().unwrap();
    {
        let store = SqliteParcelStore::try_new(&tx).unwrap();
        store.set_address(number, "inside").unwrap();
    }
    drop(tx);

    let store = SqliteParcelStore::try_new(&conn).unwrap();
    assert_eq!(store.get(number).unwrap().address, "test");
}

#[test]
fn concurrent_deletes_succeed_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracker.db");
    let number = {
        let conn = open_db(&path).unwrap();
        SqliteParcelStore::try_new(&conn)
            .unwrap()
            .add(&test_parcel())
            .unwrap()
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let store = SqliteParcelStore::try_new(&conn).unwrap();
                store.delete(number)
            })
        })
        .collect();

    let mut deleted = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(()) => deleted += 1,
            Err(err) => assert!(err.is_not_found(), "unexpected error: {err}"),
        }
    }
    assert_eq!(deleted, 1);
}

#[test]
fn store_rejects_uninitialized_connection() {
    let conn = Connection::open_in_memory().unwrap();

    match SqliteParcelStore::try_new(&conn) {
        Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version: 0,
        }) => assert_eq!(expected_version, latest_version()),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected uninitialized connection error"),
    }
}

#[test]
fn store_rejects_connection_without_parcel_table() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version()))
        .unwrap();

    assert!(matches!(
        SqliteParcelStore::try_new(&conn),
        Err(RepoError::MissingRequiredTable("parcel"))
    ));
}

#[test]
fn store_rejects_connection_missing_parcel_column() {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE parcel (
            number INTEGER PRIMARY KEY AUTOINCREMENT,
            client INTEGER NOT NULL,
            status TEXT NOT NULL,
            address TEXT NOT NULL
        );",
    )
    .unwrap();
    conn.execute_batch(&format!("PRAGMA user_version = {};", latest_version()))
        .unwrap();

    assert!(matches!(
        SqliteParcelStore::try_new(&conn),
        Err(RepoError::MissingRequiredColumn {
            table: "parcel",
            column: "created_at"
        })
    ));
}
