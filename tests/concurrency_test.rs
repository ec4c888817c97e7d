mod common;

use std::sync::Arc;
use std::thread;

use lowkeydb::transaction::IsolationLevel;
use lowkeydb::Error;

/// Invariant 7: wait-die never deadlocks. Many threads hammer a small
/// set of keys with serializable transactions; every transaction either
/// commits or dies with `TransactionConflict`, and the whole run
/// finishes (a true deadlock would hang the test until the harness
/// times it out).
#[test]
fn many_threads_contending_on_few_keys_never_deadlock() {
    let (_dir, db) = common::fresh_db();
    let db = Arc::new(db);
    let keys: Vec<&[u8]> = vec![b"k0", b"k1", b"k2"];

    let mut handles = Vec::new();
    for worker in 0..8u32 {
        let db = db.clone();
        let keys = keys.to_vec();
        handles.push(thread::spawn(move || {
            for round in 0..20u32 {
                let t = db.begin(IsolationLevel::Serializable).unwrap();
                let key = keys[(round as usize + worker as usize) % keys.len()];
                let value = format!("w{}r{}", worker, round);
                match db.put_tx(t, key, value.as_bytes()) {
                    Ok(()) => {
                        let _ = db.commit(t);
                    }
                    Err(Error::TransactionConflict) => {
                        let _ = db.rollback(t);
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(db.active_transaction_count(), 0);
}

#[test]
fn concurrent_readers_and_writer_do_not_corrupt_state() {
    let (_dir, db) = common::fresh_db();
    let db = Arc::new(db);

    for i in 0..200u32 {
        db.put(format!("seed{}", i).as_bytes(), b"v").unwrap();
    }

    let writer_db = db.clone();
    let writer = thread::spawn(move || {
        for i in 0..200u32 {
            writer_db
                .put(format!("seed{}", i).as_bytes(), b"updated")
                .unwrap();
        }
    });

    let mut readers = Vec::new();
    for _ in 0..4 {
        let db = db.clone();
        readers.push(thread::spawn(move || {
            for i in 0..200u32 {
                let value = db.get(format!("seed{}", i).as_bytes()).unwrap();
                assert!(value == Some(b"v".to_vec()) || value == Some(b"updated".to_vec()));
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(db.key_count(), 200);
}
