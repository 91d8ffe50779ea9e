//! Rebase and conflict reporting

use crate::common::*;
use revo::prelude::*;

/// Outer writes `x = ours`; an isolated transaction commits `x = theirs` first
fn race(ours: i64, theirs: i64) -> (Engine, ObjectId, Outcome<()>) {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0), ("y", 0)]);
    let outcome = engine
        .run("ours", |tx| {
            tx.write(o, "x", ours)?;
            tx.isolated("theirs", |t| t.write(o, "x", theirs))
        })
        .unwrap();
    (engine, o, outcome)
}

#[test]
fn test_different_value_conflicts_and_ours_wins() {
    let (engine, o, outcome) = race(1, 2);
    assert_eq!(outcome.conflicts.len(), 1);
    let c = &outcome.conflicts[0];
    assert_eq!(c.object, o);
    assert_eq!(c.member.as_ref(), "x");
    assert_eq!(int(&engine, o, "x"), 1);
}

#[test]
fn test_same_value_as_ours_still_conflicts() {
    let (engine, o, outcome) = race(5, 5);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(int(&engine, o, "x"), 5);
}

#[test]
fn test_theirs_equal_to_base_does_not_conflict() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0), ("y", 0)]);
    let outcome = engine
        .run("ours", |tx| {
            tx.write(o, "x", 1i64)?;
            tx.isolated("theirs", |t| {
                t.write(o, "x", 9i64)?;
                t.write(o, "y", 1i64)
            })?;
            tx.isolated("back", |t| t.write(o, "x", 0i64))
        })
        .unwrap();
    assert!(!outcome.has_conflicts());
    assert_eq!(int(&engine, o, "x"), 1);
    assert_eq!(int(&engine, o, "y"), 1);
}

#[test]
fn test_disposed_head_conflicts() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    let outcome = engine
        .run("ours", |tx| {
            tx.write(o, "x", 1i64)?;
            tx.isolated("dispose", |t| t.dispose(o))
        })
        .unwrap();
    assert!(outcome
        .conflicts
        .iter()
        .any(|c| c.object == o && c.member.as_ref() == "x"));
    assert!(engine.read(o, "x").unwrap_err().is_not_found());
}

#[test]
fn test_many_writers_to_disjoint_members() {
    let engine = engine();
    let o = object(&engine, "Wide", &[]);
    let outcome = engine
        .run("outer", |tx| {
            tx.write(o, "m0", 0i64)?;
            for i in 1..5i64 {
                tx.isolated("inner", |t| t.write(o, &format!("m{}", i), i))?;
            }
            Ok(())
        })
        .unwrap();
    assert!(!outcome.has_conflicts());
    let members = engine.snapshot(o).unwrap();
    assert_eq!(members.len(), 5);
}
