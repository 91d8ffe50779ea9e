//! Property tests: isolation and conflict soundness

use crate::common::*;
use proptest::prelude::*;
use revo::prelude::*;

fn member(i: usize) -> String {
    format!("m{}", i)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Overlapping transactions on disjoint members both land
    #[test]
    fn prop_disjoint_writes_both_land(
        ours in prop::collection::btree_map(0usize..8, any::<i64>(), 1..5),
        theirs in prop::collection::btree_map(8usize..16, any::<i64>(), 1..5),
    ) {
        let engine = engine();
        let initial: Vec<(String, i64)> = (0..16).map(|i| (member(i), 0)).collect();
        let o = engine.transaction("create", |tx| tx.create("Obj", initial)).unwrap();

        let outcome = engine.run("ours", |tx| {
            for (i, v) in &ours {
                tx.write(o, &member(*i), *v)?;
            }
            tx.isolated("theirs", |t| {
                for (i, v) in &theirs {
                    t.write(o, &member(*i), *v)?;
                }
                Ok(())
            })
        }).unwrap();

        prop_assert!(!outcome.has_conflicts());
        for (i, v) in ours.iter().chain(theirs.iter()) {
            prop_assert_eq!(engine.read(o, &member(*i)).unwrap(), Value::Int(*v));
        }
    }

    /// A conflict is reported iff the concurrent value differs from the base
    #[test]
    fn prop_conflict_iff_head_moved(base in -3i64..3, ours in -3i64..3, theirs in -3i64..3) {
        let engine = engine();
        let o = object(&engine, "Obj", &[("x", base)]);
        let outcome = engine.run("ours", |tx| {
            tx.write(o, "x", ours)?;
            tx.isolated("theirs", |t| t.write(o, "x", theirs))
        }).unwrap();

        let conflicting = ours != base && theirs != base;
        prop_assert_eq!(outcome.has_conflicts(), conflicting);
        let expected = if ours != base { ours } else { theirs };
        prop_assert_eq!(int(&engine, o, "x"), expected);
    }

    /// A reader never sees commits newer than its snapshot
    #[test]
    fn prop_reader_is_stable(values in prop::collection::vec(any::<i64>(), 1..6)) {
        let engine = engine();
        let o = object(&engine, "Obj", &[("x", -1)]);
        engine.transaction("warm", |tx| tx.write(o, "x", 0i64)).unwrap();
        engine.transaction("reader", |tx| {
            for v in &values {
                tx.isolated("writer", |w| w.write(o, "x", *v))?;
                assert_eq!(tx.read(o, "x")?, Value::Int(0));
            }
            Ok(())
        }).unwrap();
        prop_assert_eq!(int(&engine, o, "x"), *values.last().unwrap());
    }
}
