mod common;

use std::collections::BTreeMap;

use lowkeydb::transaction::IsolationLevel;
use lowkeydb::{DbConfig, Database};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

fn small_key() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..8)
}

fn small_value() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..16)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (small_key(), small_value()).prop_map(|(k, v)| Op::Put(k, v)),
        small_key().prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant 1: replaying any sequence of non-transactional
    /// put/delete/get against the engine matches a plain ordered map.
    #[test]
    fn matches_an_ordered_map(ops in prop::collection::vec(op_strategy(), 0..60)) {
        common::init_log();
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::create(common::db_path(&dir), DbConfig::default()).unwrap();
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    db.put(&k, &v).unwrap();
                    model.insert(k, v);
                }
                Op::Delete(k) => {
                    let existed = db.delete(&k).unwrap();
                    let removed = model.remove(&k);
                    prop_assert_eq!(existed, removed.is_some());
                }
            }
        }

        for (k, v) in &model {
            let got = db.get(k).unwrap();
            prop_assert_eq!(got.as_ref(), Some(v));
        }
        prop_assert_eq!(db.key_count() as usize, model.len());
    }

    /// Invariant 5: every accepted (key, value) pair survives a close/open cycle unchanged.
    #[test]
    fn round_trips_through_close_and_reopen(
        pairs in prop::collection::vec((small_key(), prop::collection::vec(any::<u8>(), 0..3072)), 1..30)
    ) {
        common::init_log();
        let dir = tempfile::TempDir::new().unwrap();
        let path = common::db_path(&dir);
        let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        {
            let db = Database::create(&path, DbConfig::default()).unwrap();
            for (k, v) in &pairs {
                db.put(k, v).unwrap();
                model.insert(k.clone(), v.clone());
            }
            db.close().unwrap();
        }

        let db = Database::open(&path, DbConfig::default()).unwrap();
        for (k, v) in &model {
            let got = db.get(k).unwrap();
            prop_assert_eq!(got.as_ref(), Some(v));
        }
    }

    /// Invariant 2 (commit half): every write inside a committed
    /// transaction becomes visible to a reader that starts after commit.
    #[test]
    fn committed_writes_are_visible_after_commit(
        pairs in prop::collection::vec((small_key(), small_value()), 1..20)
    ) {
        common::init_log();
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::create(common::db_path(&dir), DbConfig::default()).unwrap();

        let t = db.begin(IsolationLevel::ReadCommitted).unwrap();
        for (k, v) in &pairs {
            db.put_tx(t, k, v).unwrap();
        }
        db.commit(t).unwrap();

        for (k, v) in &pairs {
            let got = db.get(k).unwrap();
            prop_assert_eq!(got.as_ref(), Some(v));
        }
    }

    /// Invariant 2 (abort half): no write from a rolled-back transaction
    /// is visible to any later reader.
    #[test]
    fn aborted_writes_are_never_visible(
        pairs in prop::collection::vec((small_key(), small_value()), 1..20)
    ) {
        common::init_log();
        let dir = tempfile::TempDir::new().unwrap();
        let db = Database::create(common::db_path(&dir), DbConfig::default()).unwrap();

        let t = db.begin(IsolationLevel::ReadCommitted).unwrap();
        for (k, v) in &pairs {
            db.put_tx(t, k, v).unwrap();
        }
        db.rollback(t).unwrap();

        for (k, _) in &pairs {
            prop_assert_eq!(db.get(k).unwrap(), None);
        }
    }
}
