//! History reclamation

use crate::common::*;
use revo::prelude::*;
use std::time::Duration;

#[test]
fn test_history_is_reclaimed_after_commits() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    for v in 1..=20i64 {
        engine.transaction("set", |tx| tx.write(o, "x", v)).unwrap();
    }
    let stats = engine.stats();
    assert_eq!(stats.revisions, 1);
    assert_eq!(stats.pending_snapshots, 0);
    assert_eq!(stats.running_snapshots, 0);
}

#[test]
fn test_open_snapshot_keeps_its_history() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    engine
        .transaction("reader", |tx| {
            for v in 1..=5i64 {
                tx.isolated("writer", |w| w.write(o, "x", v))?;
            }
            assert!(tx.engine().stats().revisions >= 6);
            assert_eq!(tx.read(o, "x")?, Value::Int(0));
            Ok(())
        })
        .unwrap();
    assert_eq!(engine.stats().revisions, 1);
    assert_eq!(int(&engine, o, "x"), 5);
}

#[test]
fn test_disposed_objects_are_removed() {
    let engine = engine();
    let a = object(&engine, "A", &[("x", 0)]);
    let b = object(&engine, "B", &[("x", 0)]);
    assert_eq!(engine.stats().objects, 2);
    engine.dispose(a).unwrap();
    assert_eq!(engine.stats().objects, 1);
    assert_eq!(int(&engine, b, "x"), 0);
}

#[test]
fn test_rolled_back_revisions_are_discarded() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    for _ in 0..5 {
        let _ = engine.transaction("fail", |tx| {
            tx.write(o, "x", 1i64)?;
            Err::<(), _>(Error::user("rollback"))
        });
    }
    assert_eq!(engine.stats().revisions, 1);
}

#[tokio::test]
async fn test_async_reader_holds_history_until_done() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    engine.transaction("warm", |tx| tx.write(o, "x", 1i64)).unwrap();

    let reader = engine.run_async("reader", |tx| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.read(o, "x")
    });
    let writer = async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        for v in 2..=4i64 {
            engine.transaction("set", |tx| tx.write(o, "x", v)).unwrap();
        }
        assert!(engine.stats().revisions > 1);
    };
    let (seen, _) = tokio::join!(reader, writer);
    assert_eq!(seen.unwrap().value, Value::Int(1));
    assert_eq!(engine.stats().revisions, 1);
}
