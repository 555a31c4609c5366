//! Integration tests for the multi-module scenarios in spec.md §8, driven
//! against the storage layer's public surface (`Table`, `Index`, `Catalog`,
//! the KV engine) rather than any single module's internals.

use reldb_common::codec::encode_key;
use reldb_common::range::TypedRange;
use reldb_common::row::Row;
use reldb_common::schema::{Column, DataType, IndexInfo, TableInfo};
use reldb_common::value::Value;
use reldb_common::CancellationToken;
use reldb_storage::catalog::Catalog;
use reldb_storage::kv::memory::MemoryEngine;
use reldb_storage::kv::{Engine, Transaction as _};
use reldb_storage::table;

fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect(),
    )
}

fn all_range(reverse: bool) -> TypedRange {
    TypedRange {
        min: None,
        max: None,
        exclusive: false,
        exact: false,
        reverse,
    }
}

/// Scenario 1: create `t(a INT PRIMARY KEY)`, insert `1,2,3`; within a
/// write transaction, scan, observe `1`, delete `2` mid-scan, and see the
/// scan report only `3` remaining. After commit, a fresh scan sees `{1,3}`.
#[test]
fn concurrent_iteration_and_delete() {
    let engine = MemoryEngine::new();
    let catalog = Catalog::new();
    let token = CancellationToken::new();

    let txn = engine.begin(true, &token).unwrap();
    let cat_txn = catalog.begin(true);
    cat_txn
        .create_table(TableInfo::new(
            "t",
            vec![Column::new("a", DataType::Integer).primary_key()],
            vec!["a".to_string()],
        ))
        .unwrap();
    txn.create_store("t").unwrap();
    {
        let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
        for a in [1, 2, 3] {
            t.insert(&row(&[("a", Value::Integer(a))]), &cat_txn, &token)
                .unwrap();
        }
    }
    cat_txn.commit().unwrap();
    txn.commit().unwrap();

    let txn = engine.begin(true, &token).unwrap();
    let cat_txn = catalog.begin(true);
    let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();

    let mut seen_first = false;
    let mut remaining = Vec::new();
    t.scan(&all_range(false), &token, |r| {
        if !seen_first {
            assert_eq!(r.get("a"), Some(&Value::Integer(1)));
            seen_first = true;
            // Delete key 2 mid-iteration; the scan must not surface it.
            let key = t.key_for(&row(&[("a", Value::Integer(2))])).unwrap();
            t.delete(&key).unwrap();
        } else {
            remaining.push(r.get("a").cloned().unwrap());
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(remaining, vec![Value::Integer(3)]);

    cat_txn.commit().unwrap();
    txn.commit().unwrap();

    let txn = engine.begin(false, &token).unwrap();
    let cat_txn = catalog.begin(false);
    let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
    let mut after_commit = Vec::new();
    t.scan(&all_range(false), &token, |r| {
        after_commit.push(r.get("a").cloned().unwrap());
        Ok(())
    })
    .unwrap();
    assert_eq!(after_commit, vec![Value::Integer(1), Value::Integer(3)]);
}

/// Scenario 2: `t(a INT, b INT)` with `UNIQUE INDEX x ON t(a, b)`.
/// `(1, NULL)` can be inserted twice (NULL skips uniqueness); `(1, 2)`
/// inserted twice fails the second time.
#[test]
fn unique_index_with_null() {
    let engine = MemoryEngine::new();
    let catalog = Catalog::new();
    let token = CancellationToken::new();

    let txn = engine.begin(true, &token).unwrap();
    let cat_txn = catalog.begin(true);
    cat_txn
        .create_table(TableInfo::new(
            "t",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("a", DataType::Integer),
                Column::new("b", DataType::Integer),
            ],
            vec!["id".to_string()],
        ))
        .unwrap();
    cat_txn
        .create_index(IndexInfo::new(
            "x",
            "t",
            vec!["a".to_string(), "b".to_string()],
            true,
        ))
        .unwrap();
    txn.create_store("t").unwrap();
    txn.create_store("x").unwrap();

    let mut next_id = 0;
    let mut insert = |t: &table::Table<'_>, a: Value, b: Value| {
        next_id += 1;
        t.insert(
            &row(&[("id", Value::Integer(next_id)), ("a", a), ("b", b)]),
            &cat_txn,
            &token,
        )
    };

    {
        let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
        insert(&t, Value::Integer(1), Value::Null).unwrap(); // id=1
        insert(&t, Value::Integer(1), Value::Null).unwrap(); // id=2

        insert(&t, Value::Integer(1), Value::Integer(2)).unwrap();
        let err = insert(&t, Value::Integer(1), Value::Integer(2)).unwrap_err();
        assert!(err.is_unique_violation());
    }

    // Both NULL-bearing rows must keep their own index entry rather than
    // colliding onto a single stored key (spec §3, §8 universal invariant:
    // "for every row ... and every index ... exactly one entry for that
    // row").
    let null_tuple_range = TypedRange {
        min: Some(vec![Value::Integer(1), Value::Null]),
        max: None,
        exclusive: false,
        exact: true,
        reverse: false,
    };
    {
        let index_info = cat_txn.index("x").unwrap();
        let index_store = txn.get_store("x").unwrap();
        let index = reldb_storage::index::Index::new(index_info, index_store);
        let mut owners = Vec::new();
        index
            .iterate_on_range(&null_tuple_range, &token, |row_key| {
                owners.push(row_key.to_vec());
                Ok(())
            })
            .unwrap();
        owners.sort();
        assert_eq!(
            owners,
            vec![
                encode_key(&[Value::Integer(1)]),
                encode_key(&[Value::Integer(2)]),
            ]
        );
    }

    // Deleting id=1's row must leave id=2's entry in the index intact.
    {
        let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
        let key = encode_key(&[Value::Integer(1)]);
        t.delete(&key).unwrap();
    }
    {
        let index_info = cat_txn.index("x").unwrap();
        let index_store = txn.get_store("x").unwrap();
        let index = reldb_storage::index::Index::new(index_info, index_store);
        let mut owners = Vec::new();
        index
            .iterate_on_range(&null_tuple_range, &token, |row_key| {
                owners.push(row_key.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(owners, vec![encode_key(&[Value::Integer(2)])]);
    }

    cat_txn.commit().unwrap();
    txn.commit().unwrap();
}

/// Scenario 8: `t(a INT PRIMARY KEY)` plus a unique index on `a`. Insert
/// `1`, roll back; insert `1` again in a fresh transaction succeeds,
/// proving rollback undid both the row and its index entry.
#[test]
fn rollback_of_index_mutation() {
    let engine = MemoryEngine::new();
    let catalog = Catalog::new();
    let token = CancellationToken::new();

    let setup_txn = engine.begin(true, &token).unwrap();
    let setup_cat = catalog.begin(true);
    setup_cat
        .create_table(TableInfo::new(
            "t",
            vec![Column::new("a", DataType::Integer).primary_key()],
            vec!["a".to_string()],
        ))
        .unwrap();
    setup_cat
        .create_index(IndexInfo::new("ix", "t", vec!["a".to_string()], true))
        .unwrap();
    setup_txn.create_store("t").unwrap();
    setup_txn.create_store("ix").unwrap();
    setup_cat.commit().unwrap();
    setup_txn.commit().unwrap();

    let txn = engine.begin(true, &token).unwrap();
    let cat_txn = catalog.begin(true);
    {
        let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
        t.insert(&row(&[("a", Value::Integer(1))]), &cat_txn, &token)
            .unwrap();
    }
    cat_txn.rollback().unwrap();
    txn.rollback().unwrap();

    let txn2 = engine.begin(true, &token).unwrap();
    let cat_txn2 = catalog.begin(true);
    {
        let t = table::open(txn2.as_ref(), &cat_txn2, "t").unwrap();
        t.insert(&row(&[("a", Value::Integer(1))]), &cat_txn2, &token)
            .unwrap();
    }
    cat_txn2.commit().unwrap();
    txn2.commit().unwrap();
}

/// Scenario 10: cancelling a token mid-scan surfaces `Cancelled` from the
/// in-flight iteration without touching transaction state; the transaction
/// remains open and a subsequent rollback still restores the pre-tx state.
#[test]
fn cancellation_mid_scan_then_rollback() {
    let engine = MemoryEngine::new();
    let catalog = Catalog::new();
    let token = CancellationToken::new();

    let txn = engine.begin(true, &token).unwrap();
    let cat_txn = catalog.begin(true);
    cat_txn
        .create_table(TableInfo::new(
            "t",
            vec![Column::new("a", DataType::Integer).primary_key()],
            vec!["a".to_string()],
        ))
        .unwrap();
    txn.create_store("t").unwrap();
    {
        let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
        for a in [1, 2, 3] {
            t.insert(&row(&[("a", Value::Integer(a))]), &cat_txn, &token)
                .unwrap();
        }
    }
    cat_txn.commit().unwrap();
    txn.commit().unwrap();

    let txn = engine.begin(true, &token).unwrap();
    let cat_txn = catalog.begin(true);
    let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();

    let scan_token = CancellationToken::new();
    let mut seen = 0;
    let result = t.scan(&all_range(false), &scan_token, |_row| {
        seen += 1;
        if seen == 1 {
            scan_token.cancel();
        }
        Ok(())
    });
    assert!(result.is_err());
    assert_eq!(seen, 1);

    // The transaction is not auto-rolled-back; the caller must do it.
    cat_txn.rollback().unwrap();
    txn.rollback().unwrap();

    let txn = engine.begin(false, &token).unwrap();
    let cat_txn = catalog.begin(false);
    let t = table::open(txn.as_ref(), &cat_txn, "t").unwrap();
    let mut after = Vec::new();
    t.scan(&all_range(false), &token, |r| {
        after.push(r.get("a").cloned().unwrap());
        Ok(())
    })
    .unwrap();
    assert_eq!(
        after,
        vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
    );
}
