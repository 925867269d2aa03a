//! Integration tests for explicit transactions, savepoints and scopes.

use kenobix_core::{Collection, CoreError, Database, ErrorKind, TransactionState};
use kenobix_testkit::scenarios::accounts_database;
use kenobix_testkit::TestDatabase;
use serde_json::{json, Value};
use std::panic::{self, AssertUnwindSafe};

fn values(collection: &Collection) -> Vec<Value> {
    collection
        .all()
        .unwrap()
        .into_iter()
        .map(|doc| doc["n"].clone())
        .collect()
}

fn balance(accounts: &Collection, name: &str) -> i64 {
    accounts.search("name", name).unwrap()[0]["balance"]
        .as_i64()
        .unwrap()
}

/// Moves `amount` between two accounts, failing if the sender would go
/// negative. Both updates land or neither does.
fn transfer(db: &Database, from: &str, to: &str, amount: i64) -> Result<(), CoreError> {
    let accounts = db.collection("accounts")?;
    db.transaction(|_| {
        let sender = balance(&accounts, from);
        let receiver = balance(&accounts, to);
        accounts.update("name", to, &json!({"balance": receiver + amount}))?;
        if sender < amount {
            return Err(CoreError::invalid_query("insufficient funds"));
        }
        accounts.update("name", from, &json!({"balance": sender - amount}))?;
        Ok(())
    })
}

#[test]
fn explicit_commit_persists() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    db.begin().unwrap();
    assert_eq!(db.transaction_state(), TransactionState::Active);
    items.insert(&json!({"n": 1})).unwrap();
    items.insert(&json!({"n": 2})).unwrap();
    db.commit().unwrap();

    assert_eq!(db.transaction_state(), TransactionState::Idle);
    assert_eq!(values(&items), vec![json!(1), json!(2)]);
}

#[test]
fn explicit_rollback_discards_every_collection() {
    let db = Database::open_in_memory().unwrap();
    let a = db.collection("a").unwrap();
    let b = db.collection("b").unwrap();
    a.insert(&json!({"n": 0})).unwrap();

    db.begin().unwrap();
    a.insert(&json!({"n": 1})).unwrap();
    b.insert(&json!({"n": 1})).unwrap();
    db.rollback().unwrap();

    assert_eq!(values(&a), vec![json!(0)]);
    assert!(values(&b).is_empty());
}

#[test]
fn state_guards_reject_misuse() {
    let db = Database::open_in_memory().unwrap();

    assert!(matches!(db.commit(), Err(CoreError::NotInTransaction)));
    assert!(matches!(db.rollback(), Err(CoreError::NotInTransaction)));
    assert!(matches!(db.savepoint(None), Err(CoreError::NotInTransaction)));

    db.begin().unwrap();
    let err = db.begin().unwrap_err();
    assert!(matches!(err, CoreError::AlreadyInTransaction));
    assert_eq!(err.kind(), ErrorKind::TransactionState);

    // The failed begin must not disturb the open transaction.
    assert!(db.in_transaction());
    db.commit().unwrap();
}

#[test]
fn rollback_to_savepoint_keeps_transaction_open() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    db.begin().unwrap();
    items.insert(&json!({"n": 1})).unwrap();
    let sp = db.savepoint(None).unwrap();
    items.insert(&json!({"n": 2})).unwrap();
    db.rollback_to(&sp).unwrap();

    assert!(db.in_transaction());
    items.insert(&json!({"n": 3})).unwrap();

    // The handle survives a rollback and can be used again.
    db.rollback_to(&sp).unwrap();
    db.release_savepoint(&sp).unwrap();
    db.commit().unwrap();

    assert_eq!(values(&items), vec![json!(1)]);
}

#[test]
fn released_and_rolled_past_handles_fail_loudly() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    db.begin().unwrap();
    let outer = db.savepoint(Some("outer")).unwrap();
    items.insert(&json!({"n": 1})).unwrap();
    let inner = db.savepoint(None).unwrap();
    items.insert(&json!({"n": 2})).unwrap();

    db.rollback_to(&outer).unwrap();
    assert!(matches!(
        db.release_savepoint(&inner),
        Err(CoreError::UnknownSavepoint { .. })
    ));

    db.release_savepoint(&outer).unwrap();
    assert!(matches!(
        db.rollback_to(&outer),
        Err(CoreError::UnknownSavepoint { .. })
    ));
    db.commit().unwrap();

    assert!(values(&items).is_empty());
}

#[test]
fn savepoint_names_are_validated() {
    let db = Database::open_in_memory().unwrap();
    db.begin().unwrap();

    let first = db.savepoint(Some("checkpoint")).unwrap();
    assert_eq!(first.name(), "checkpoint");
    assert!(matches!(
        db.savepoint(Some("checkpoint")),
        Err(CoreError::DuplicateSavepoint { .. })
    ));

    let err = db.savepoint(Some("bad name; DROP TABLE x")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let generated = db.savepoint(None).unwrap();
    assert_ne!(generated.name(), first.name());
    db.rollback().unwrap();
}

#[test]
fn savepoints_are_cleared_by_commit() {
    let db = Database::open_in_memory().unwrap();

    db.begin().unwrap();
    let sp = db.savepoint(None).unwrap();
    db.commit().unwrap();

    db.begin().unwrap();
    assert!(matches!(
        db.release_savepoint(&sp),
        Err(CoreError::UnknownSavepoint { .. })
    ));
    db.rollback().unwrap();
}

#[test]
fn failing_scope_restores_previous_state() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();
    items.insert_many(&[json!({"n": 1}), json!({"n": 2})]).unwrap();
    let before = items.all().unwrap();

    let result: Result<(), CoreError> = db.transaction(|_| {
        items.insert(&json!({"n": 3}))?;
        items.update("n", 1, &json!({"changed": true}))?;
        items.remove("n", 2)?;
        Err(CoreError::invalid_query("abort"))
    });

    assert!(result.is_err());
    assert_eq!(items.all().unwrap(), before);
    assert!(!db.in_transaction());
}

#[test]
fn inner_failure_only_undoes_inner_writes() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    db.transaction(|db| {
        items.insert(&json!({"n": 1}))?;
        let inner: Result<(), CoreError> = db.transaction(|_| {
            items.insert(&json!({"n": 2}))?;
            assert_eq!(db.transaction_depth(), 2);
            Err(CoreError::invalid_query("inner"))
        });
        assert!(inner.is_err());
        items.insert(&json!({"n": 3}))?;
        Ok::<_, CoreError>(())
    })
    .unwrap();

    assert_eq!(values(&items), vec![json!(1), json!(3)]);
    assert_eq!(db.transaction_depth(), 0);
}

#[test]
fn outer_failure_undoes_committed_inner_scope() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    let result: Result<(), CoreError> = db.transaction(|db| {
        db.transaction(|_| {
            items.insert(&json!({"n": 1}))?;
            Ok::<_, CoreError>(())
        })?;
        Err(CoreError::invalid_query("outer"))
    });

    assert!(result.is_err());
    assert!(values(&items).is_empty());
}

#[test]
fn scope_inside_explicit_transaction_leaves_it_open() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    db.begin().unwrap();
    items.insert(&json!({"n": 1})).unwrap();
    let result: Result<(), CoreError> = db.transaction(|_| {
        items.insert(&json!({"n": 2}))?;
        Err(CoreError::invalid_query("inner"))
    });
    assert!(result.is_err());
    assert!(db.in_transaction());
    db.commit().unwrap();

    assert_eq!(values(&items), vec![json!(1)]);
}

#[test]
fn insert_many_joins_enclosing_transaction() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    db.begin().unwrap();
    items
        .insert_many(&[json!({"n": 1}), json!({"n": 2})])
        .unwrap();
    db.rollback().unwrap();

    assert!(values(&items).is_empty());
}

#[test]
fn insert_many_rejects_whole_batch() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    let err = items
        .insert_many(&[json!({"n": 1}), json!([1, 2]), json!({"n": 3})])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDocument);
    assert!(values(&items).is_empty());
}

#[test]
fn panic_inside_scope_rolls_back() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), CoreError> = db.transaction(|_| {
            items.insert(&json!({"n": 1}))?;
            panic!("boom");
        });
    }));

    assert!(outcome.is_err());
    assert!(!db.in_transaction());
    assert!(values(&items).is_empty());

    items.insert(&json!({"n": 2})).unwrap();
    assert_eq!(values(&items), vec![json!(2)]);
}

#[test]
fn transfer_is_all_or_nothing() {
    let test_db = accounts_database();
    let accounts = test_db.collection("accounts").unwrap();

    transfer(&test_db, "Alice", "Bob", 30).unwrap();
    assert_eq!(balance(&accounts, "Alice"), 70);
    assert_eq!(balance(&accounts, "Bob"), 80);

    // Bob's credit is written before the check fails and must not survive.
    assert!(transfer(&test_db, "Bob", "Alice", 500).is_err());
    assert_eq!(balance(&accounts, "Alice"), 70);
    assert_eq!(balance(&accounts, "Bob"), 80);
}

#[test]
fn committed_transaction_survives_reopen() {
    let test_db = TestDatabase::file();
    let items = test_db.collection("items").unwrap();

    test_db
        .transaction(|_| {
            items.insert(&json!({"n": 1}))?;
            items.insert(&json!({"n": 2}))?;
            Ok::<_, CoreError>(())
        })
        .unwrap();

    test_db.begin().unwrap();
    items.insert(&json!({"n": 3})).unwrap();
    drop(items);

    // Closing with an open transaction discards it.
    let test_db = test_db.reopen();
    let items = test_db.collection("items").unwrap();
    assert_eq!(values(&items), vec![json!(1), json!(2)]);
}

#[test]
fn operations_after_close_fail() {
    let db = Database::open_in_memory().unwrap();
    let items = db.collection("items").unwrap();
    db.close().unwrap();
    db.close().unwrap();

    assert!(!db.is_open());
    assert!(matches!(
        items.insert(&json!({"n": 1})),
        Err(CoreError::DatabaseClosed)
    ));
    assert!(matches!(db.begin(), Err(CoreError::DatabaseClosed)));
}
