mod common;

use lowkeydb::transaction::IsolationLevel;
use lowkeydb::{DbConfig, Database, Error};

#[test]
fn s1_basic_crud() {
    let (_dir, db) = common::fresh_db();

    db.put(b"hello", b"world").unwrap();
    db.put(b"foo", b"bar").unwrap();

    assert_eq!(db.get(b"hello").unwrap(), Some(b"world".to_vec()));
    assert_eq!(db.key_count(), 2);

    assert!(db.delete(b"hello").unwrap());
    assert_eq!(db.get(b"hello").unwrap(), None);
    assert_eq!(db.key_count(), 1);
}

#[test]
fn s2_commit_visibility() {
    let (_dir, db) = common::fresh_db();

    let t = db.begin(IsolationLevel::Serializable).unwrap();
    db.put_tx(t, b"a", b"1").unwrap();

    // another reader, outside the transaction, sees nothing yet.
    assert_eq!(db.get(b"a").unwrap(), None);

    db.commit(t).unwrap();
    assert_eq!(db.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn s3_rollback() {
    let (_dir, db) = common::fresh_db();

    let t = db.begin(IsolationLevel::ReadCommitted).unwrap();
    db.put_tx(t, b"k", b"v").unwrap();
    assert_eq!(db.get_tx(t, b"k").unwrap(), Some(b"v".to_vec()));

    db.rollback(t).unwrap();
    assert_eq!(db.get(b"k").unwrap(), None);
    assert_eq!(db.active_transaction_count(), 0);
}

#[test]
fn s4_conflict_is_resolved_by_wait_die() {
    let (_dir, db) = common::fresh_db();

    let t1 = db.begin(IsolationLevel::Serializable).unwrap();
    let t2 = db.begin(IsolationLevel::Serializable).unwrap();
    assert!(t1 < t2);

    db.put_tx(t1, b"x", b"A").unwrap();
    let result = db.put_tx(t2, b"x", b"B");
    assert!(matches!(result, Err(Error::TransactionConflict)));

    db.commit(t1).unwrap();
    assert_eq!(db.get(b"x").unwrap(), Some(b"A".to_vec()));
}

#[test]
fn s5_crash_recovery_with_two_thousand_keys() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = common::db_path(&dir);

    {
        let db = Database::create(&path, DbConfig::default()).unwrap();
        for i in 0..2000u32 {
            let key = format!("recovery_key_{:04}", i);
            let value = format!("recovery_value_{:04}", i);
            db.put(key.as_bytes(), value.as_bytes()).unwrap();
        }
        db.flush_wal().unwrap();
        // dropped without calling close(): simulates a crash after the
        // wal is durable but before any checkpoint flushes data pages.
    }

    let db = Database::open(&path, DbConfig::default()).unwrap();
    assert_eq!(db.key_count(), 2000);
    for i in 0..2000u32 {
        let key = format!("recovery_key_{:04}", i);
        let expected = format!("recovery_value_{:04}", i);
        assert_eq!(db.get(key.as_bytes()).unwrap(), Some(expected.into_bytes()));
    }
}

#[test]
fn s6_large_value_boundary() {
    let (_dir, db) = common::fresh_db();

    let at_limit = vec![9u8; 3072];
    db.put(b"k", &at_limit).unwrap();

    let over_limit = vec![9u8; 3073];
    let result = db.put(b"k", &over_limit);
    assert!(matches!(result, Err(Error::ValueTooLarge { len: 3073, max: 3072 })));
}
