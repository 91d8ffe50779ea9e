//! Snapshot isolation and read consistency

use crate::common::*;
use revo::prelude::*;
use std::time::Duration;

#[test]
fn test_reader_does_not_see_later_commit() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 1)]);
    engine.transaction("warm", |tx| tx.write(o, "x", 2i64)).unwrap();

    let (before, after) = engine
        .transaction("reader", |tx| {
            let before = tx.read(o, "x")?;
            tx.isolated("writer", |w| w.write(o, "x", 3i64))?;
            let after = tx.read(o, "x")?;
            Ok((before, after))
        })
        .unwrap();
    assert_eq!(before, Value::Int(2));
    assert_eq!(after, Value::Int(2));
    assert_eq!(int(&engine, o, "x"), 3);
}

#[test]
fn test_uncommitted_writes_are_private() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 1)]);
    engine
        .transaction("writer", |tx| {
            tx.write(o, "x", 10i64)?;
            assert_eq!(tx.read(o, "x")?, Value::Int(10));
            assert_eq!(tx.engine().read(o, "x")?, Value::Int(1));
            Ok(())
        })
        .unwrap();
    assert_eq!(int(&engine, o, "x"), 10);
}

#[test]
fn test_created_object_is_visible_after_commit() {
    let engine = engine();
    let o = engine
        .transaction("create", |tx| {
            let o = tx.create("Fresh", [("v", 1i64)])?;
            assert!(tx.engine().read(o, "v").unwrap_err().is_not_found());
            Ok(o)
        })
        .unwrap();
    assert_eq!(int(&engine, o, "v"), 1);
}

#[test]
fn test_timestamps_advance() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    let first = engine.run("a", |tx| tx.write(o, "x", 1i64)).unwrap().timestamp;
    let second = engine.run("b", |tx| tx.write(o, "x", 2i64)).unwrap().timestamp;
    assert!(second > first);
}

#[tokio::test]
async fn test_overlapping_async_transactions_merge() {
    let engine = engine();
    let o = object(&engine, "Pair", &[("left", 0), ("right", 0)]);
    engine.transaction("warm", |tx| tx.write(o, "left", 1i64)).unwrap();

    let a = engine.run_async("left", |tx| async move {
        tx.write(o, "left", 10i64)?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(())
    });
    let b = engine.run_async("right", |tx| async move {
        tx.write(o, "right", 20i64)?;
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(())
    });
    let (a, b) = tokio::join!(a, b);
    assert!(!a.unwrap().has_conflicts());
    assert!(!b.unwrap().has_conflicts());
    assert_eq!(int(&engine, o, "left"), 10);
    assert_eq!(int(&engine, o, "right"), 20);
}

#[tokio::test]
async fn test_failed_async_transaction_leaves_heads_untouched() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 1)]);
    let r = engine
        .run_async("fail", |tx| async move {
            tx.write(o, "x", 2i64)?;
            tokio::task::yield_now().await;
            Err::<(), _>(Error::user("gave up"))
        })
        .await;
    assert!(r.is_err());
    assert_eq!(int(&engine, o, "x"), 1);
    assert_eq!(engine.stats().running_snapshots, 0);
}
