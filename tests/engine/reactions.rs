//! Reactions re-run after relevant commits

use crate::common::*;
use parking_lot::Mutex;
use revo::prelude::*;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

fn editor(log: Log) -> ObjectType {
    ObjectType::new("Editor")
        .member("title", "Title")
        .member("content", "x")
        .member("cursor", 0i64)
        .cached("headline", |tx, this, _| {
            let title = tx.read(this, "title")?;
            let content = tx.read(this, "content")?;
            Ok(Value::from(format!(
                "{}/{}",
                title.as_str().unwrap_or(""),
                content.as_str().map(str::len).unwrap_or(0)
            )))
        })
        .reaction("render", move |tx, this, _| {
            let headline = tx.call(this, "headline", &[])?;
            log.lock().push(headline.as_str().unwrap_or("").to_string());
            Ok(Value::Null)
        })
}

#[test]
fn test_reaction_follows_cached_dependency() {
    let engine = engine();
    let log: Log = Arc::default();
    let ty = editor(log.clone());
    let e = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    assert_eq!(*log.lock(), vec!["Title/1"]);

    engine
        .transaction("type", |tx| tx.write(e, "content", "hi"))
        .unwrap();
    assert_eq!(*log.lock(), vec!["Title/1", "Title/2"]);

    engine
        .transaction("cursor", |tx| tx.write(e, "cursor", 3i64))
        .unwrap();
    assert_eq!(log.lock().len(), 2);
}

#[test]
fn test_one_run_per_commit() {
    let engine = engine();
    let log: Log = Arc::default();
    let ty = editor(log.clone());
    let e = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    engine
        .transaction("both", |tx| {
            tx.write(e, "title", "Content")?;
            tx.write(e, "content", "abc")
        })
        .unwrap();
    assert_eq!(*log.lock(), vec!["Title/1", "Content/3"]);
}

#[test]
fn test_reaction_writes_feed_other_reactions() {
    let engine = engine();
    let source = object(&engine, "Source", &[("v", 1)]);
    let middle = object(&engine, "Middle", &[("v", 0)]);
    let sink = object(&engine, "Sink", &[("v", 0)]);
    engine
        .define(
            middle,
            "copy",
            MemberOptions::of(Kind::Reaction),
            MethodBody::sync(move |tx, this, _| {
                let v = tx.read(source, "v")?.as_int().unwrap_or(0);
                tx.write(this, "v", v * 10)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine
        .define(
            sink,
            "copy",
            MemberOptions::of(Kind::Reaction),
            MethodBody::sync(move |tx, this, _| {
                let v = tx.read(middle, "v")?.as_int().unwrap_or(0);
                tx.write(this, "v", v + 1)?;
                Ok(Value::Null)
            }),
        )
        .unwrap();
    assert_eq!(int(&engine, sink, "v"), 11);
    engine.transaction("v", |tx| tx.write(source, "v", 2i64)).unwrap();
    assert_eq!(int(&engine, middle, "v"), 20);
    assert_eq!(int(&engine, sink, "v"), 21);
}

#[test]
fn test_disposed_owner_stops_reacting() {
    let engine = engine();
    let log: Log = Arc::default();
    let source = object(&engine, "Source", &[("v", 1)]);
    let watcher = object(&engine, "Watcher", &[]);
    let l = log.clone();
    engine
        .define(
            watcher,
            "watch",
            MemberOptions::of(Kind::Reaction),
            MethodBody::sync(move |tx, _, _| {
                let v = tx.read(source, "v")?;
                l.lock().push(v.to_string());
                Ok(Value::Null)
            }),
        )
        .unwrap();
    assert_eq!(log.lock().len(), 1);
    engine.dispose(watcher).unwrap();
    engine.transaction("v", |tx| tx.write(source, "v", 2i64)).unwrap();
    assert_eq!(log.lock().len(), 1);
}

#[test]
fn test_invalidate_reruns_reaction() {
    let engine = engine();
    let log: Log = Arc::default();
    let ty = editor(log.clone());
    let e = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();
    let render = engine.controller(e, "render").unwrap();
    render.invalidate();
    assert_eq!(log.lock().len(), 2);
    assert!(render.is_up_to_date());
}

#[tokio::test]
async fn test_reaction_sees_monitor_busy_state() {
    let engine = engine();
    let monitor = engine.monitor("saving").unwrap();
    let log: Log = Arc::default();
    let holder = object(&engine, "Indicator", &[]);
    let l = log.clone();
    let m = monitor.clone();
    engine
        .define(
            holder,
            "spinner",
            MemberOptions::of(Kind::Reaction),
            MethodBody::sync(move |tx, _, _| {
                l.lock().push(format!("busy={}", m.is_busy(tx)?));
                Ok(Value::Null)
            }),
        )
        .unwrap();
    let ty = ObjectType::new("Doc")
        .member("saved", 0i64)
        .transaction_async("save", |tx, this, _| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tx.write(this, "saved", 1i64)?;
            Ok(Value::Null)
        })
        .options(
            "save",
            MemberOptions::default().with_monitor("saving"),
        );
    let doc = engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap();

    let save = engine.invoke_async(doc, "save", vec![]);
    let poke = async {
        tokio::time::sleep(Duration::from_millis(2)).await;
        engine.transaction("poke", |_| Ok(())).unwrap();
    };
    let (saved, _) = tokio::join!(save, poke);
    saved.unwrap();
    assert_eq!(*log.lock(), vec!["busy=false", "busy=true", "busy=false"]);
    assert!(!monitor.is_active());
    assert_eq!(int(&engine, doc, "saved"), 1);
}
