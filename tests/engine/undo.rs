//! Undo journal

use crate::common::*;
use revo::prelude::*;

fn set(engine: &Engine, journal: &UndoJournal, o: ObjectId, member: &str, v: i64) {
    engine
        .run(
            TransactionOptions::hint(format!("set {}", v)).with_journal(journal),
            |tx| tx.write(o, member, v),
        )
        .unwrap();
}

#[test]
fn test_undo_steps_back() {
    let engine = engine();
    let journal = UndoJournal::new(10);
    let o = object(&engine, "Doc", &[("x", 0)]);
    for v in 1..=3 {
        set(&engine, &journal, o, "x", v);
    }
    assert_eq!(journal.hints(), vec!["set 1", "set 2", "set 3"]);

    engine.undo(&journal, 2).unwrap();
    assert_eq!(int(&engine, o, "x"), 1);
    assert_eq!(journal.len(), 1);
    assert!(journal.can_undo());
}

#[test]
fn test_capacity_evicts_oldest() {
    let engine = engine();
    let journal = UndoJournal::new(2);
    let o = object(&engine, "Doc", &[("x", 0)]);
    for v in 1..=4 {
        set(&engine, &journal, o, "x", v);
    }
    assert_eq!(engine.undo(&journal, 10).unwrap(), 2);
    assert_eq!(int(&engine, o, "x"), 2);
    assert!(!journal.can_undo());
}

#[test]
fn test_undo_spans_objects() {
    let engine = engine();
    let journal = UndoJournal::default();
    let a = object(&engine, "A", &[("v", 1)]);
    let b = object(&engine, "B", &[("v", 1)]);
    engine
        .run(TransactionOptions::hint("both").with_journal(&journal), |tx| {
            tx.write(a, "v", 2i64)?;
            tx.write(b, "v", 3i64)
        })
        .unwrap();
    assert_eq!(journal.len(), 1);
    engine.undo(&journal, 1).unwrap();
    assert_eq!(int(&engine, a, "v"), 1);
    assert_eq!(int(&engine, b, "v"), 1);
}

#[test]
fn test_failed_transactions_are_not_remembered() {
    let engine = engine();
    let journal = UndoJournal::default();
    let o = object(&engine, "Doc", &[("x", 0)]);
    let r = engine.run(TransactionOptions::hint("bad").with_journal(&journal), |tx| {
        tx.write(o, "x", 1i64)?;
        Err::<(), _>(Error::user("no"))
    });
    assert!(r.is_err());
    assert!(journal.is_empty());
}

#[test]
fn test_undo_is_observed_by_reactions() {
    let engine = engine();
    let journal = UndoJournal::default();
    let o = object(&engine, "Doc", &[("x", 0), ("mirror", 0)]);
    engine
        .define(
            o,
            "mirror",
            MemberOptions::of(Kind::Reaction),
            MethodBody::sync(|tx, this, _| {
                let x = tx.read(this, "x")?;
                tx.write(this, "mirror", x)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    set(&engine, &journal, o, "x", 5);
    assert_eq!(int(&engine, o, "mirror"), 5);
    engine.undo(&journal, 1).unwrap();
    assert_eq!(int(&engine, o, "mirror"), 0);
}
