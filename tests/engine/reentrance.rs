//! Reentrance policies under overlapping asynchronous calls

use crate::common::*;
use parking_lot::Mutex;
use revo::prelude::*;
use std::sync::Arc;
use std::time::Duration;

type Log = Arc<Mutex<Vec<String>>>;

/// A loader whose `load(n)` sleeps, then stores `n` as its result
fn loader(engine: &Engine, policy: Reentrance, log: Log) -> ObjectId {
    let ty = ObjectType::new("Loader")
        .member("result", 0i64)
        .transaction_async("load", move |tx, this, args| {
            let log = log.clone();
            async move {
                let n = args.first().and_then(|v| v.as_int()).unwrap_or(0);
                let busy = tx.engine().monitor("loading")?.count();
                log.lock().push(format!("start {} busy={}", n, busy));
                tokio::time::sleep(Duration::from_millis(10)).await;
                if tx.is_canceled() {
                    log.lock().push(format!("canceled {}", n));
                    return Err(Error::Canceled(format!("load {}", n)));
                }
                tx.write(this, "result", n)?;
                log.lock().push(format!("end {}", n));
                Ok(Value::Int(n))
            }
        })
        .options(
            "load",
            MemberOptions::default()
                .with_reentrance(policy)
                .with_monitor("loading"),
        );
    engine.transaction("new", |tx| tx.instantiate(&ty)).unwrap()
}

fn load(engine: &Engine, o: ObjectId, n: i64) -> impl std::future::Future<Output = Result<Value>> + '_ {
    engine.invoke_async(o, "load", vec![Value::Int(n)])
}

#[tokio::test]
async fn test_wait_and_restart_runs_calls_in_order() {
    let engine = engine();
    let log: Log = Arc::default();
    let o = loader(&engine, Reentrance::WaitAndRestart, log.clone());
    let monitor = engine.monitor("loading").unwrap();

    let (a, b, c) = tokio::join!(load(&engine, o, 1), load(&engine, o, 2), load(&engine, o, 3));
    assert_eq!(a.unwrap(), Value::Int(1));
    assert_eq!(b.unwrap(), Value::Int(2));
    assert_eq!(c.unwrap(), Value::Int(3));
    assert_eq!(
        *log.lock(),
        vec![
            "start 1 busy=1",
            "end 1",
            "start 2 busy=1",
            "end 2",
            "start 3 busy=1",
            "end 3"
        ]
    );
    assert_eq!(int(&engine, o, "result"), 3);
    assert_eq!(monitor.count(), 0);
    assert!(!monitor.is_active());
}

#[tokio::test]
async fn test_prevent_with_error_rejects_without_starting() {
    let engine = engine();
    let log: Log = Arc::default();
    let o = loader(&engine, Reentrance::PreventWithError, log.clone());
    let controller = engine.controller(o, "load").unwrap();

    let second = async {
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(controller.in_flight(), 1);
        let pending = engine.stats().pending_snapshots;
        let r = load(&engine, o, 2).await;
        assert_eq!(engine.stats().pending_snapshots, pending);
        r
    };
    let (first, second) = tokio::join!(load(&engine, o, 1), second);
    assert_eq!(first.unwrap(), Value::Int(1));
    assert!(second.unwrap_err().is_reentrance());
    assert_eq!(*log.lock(), vec!["start 1 busy=1", "end 1"]);
    assert_eq!(controller.in_flight(), 0);
}

#[tokio::test]
async fn test_cancel_previous_supersedes_running_call() {
    let engine = engine();
    let log: Log = Arc::default();
    let o = loader(&engine, Reentrance::CancelPrevious, log.clone());

    let second = async {
        tokio::time::sleep(Duration::from_millis(2)).await;
        load(&engine, o, 2).await
    };
    let (first, second) = tokio::join!(load(&engine, o, 1), second);
    assert!(first.unwrap_err().is_canceled());
    assert_eq!(second.unwrap(), Value::Int(2));
    assert_eq!(int(&engine, o, "result"), 2);
    assert_eq!(
        *log.lock(),
        vec!["start 1 busy=1", "start 2 busy=2", "canceled 1", "end 2"]
    );
}

#[tokio::test]
async fn test_run_side_by_side_overlaps() {
    let engine = engine();
    let log: Log = Arc::default();
    let o = loader(&engine, Reentrance::RunSideBySide, log.clone());
    let (a, b) = tokio::join!(load(&engine, o, 1), load(&engine, o, 2));
    a.unwrap();
    b.unwrap();
    let log = log.lock();
    assert_eq!(log[0], "start 1 busy=1");
    assert_eq!(log[1], "start 2 busy=2");
    assert_eq!(engine.monitor("loading").unwrap().count(), 0);
}

#[tokio::test]
async fn test_configure_changes_policy() {
    let engine = engine();
    let log: Log = Arc::default();
    let o = loader(&engine, Reentrance::PreventWithError, log.clone());
    let controller = engine.controller(o, "load").unwrap();
    engine
        .configure(
            &controller,
            ControllerOptions::new().reentrance(Reentrance::RunSideBySide),
        )
        .unwrap();
    let (a, b) = tokio::join!(load(&engine, o, 1), load(&engine, o, 2));
    assert!(a.is_ok());
    assert!(b.is_ok());
}

#[test]
fn test_sync_invoke_of_waiting_policy_fails_fast() {
    let engine = engine();
    let o = object(&engine, "Obj", &[("x", 0)]);
    engine
        .define(
            o,
            "op",
            MemberOptions::of(Kind::Transaction).with_reentrance(Reentrance::WaitAndRestart),
            MethodBody::sync(|tx, this, args| {
                if args.is_empty() {
                    let inner = tx.engine().invoke(this, "op", &[Value::Int(1)]);
                    assert!(inner.unwrap_err().is_reentrance());
                }
                Ok(Value::Null)
            }),
        )
        .unwrap();
    engine.invoke(o, "op", &[]).unwrap();
}

/// A page model whose `load(url, delay)` appends `url/delay` to its log
fn page_type() -> ObjectType {
    ObjectType::new("Page")
        .member("url", "home")
        .member("log", Value::Array(vec![Value::from("init")]))
        .transaction_async("load", |tx, this, args| async move {
            let url = args.first().and_then(|v| v.as_str()).unwrap_or_default().to_string();
            let delay = args.get(1).and_then(|v| v.as_int()).unwrap_or(0);
            tx.write(this, "url", url.as_str())?;
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            let mut log = tx
                .read(this, "log")?
                .as_array()
                .map(<[Value]>::to_vec)
                .unwrap_or_default();
            log.push(Value::from(format!("{}/{}", url, delay)));
            tx.write(this, "log", log)?;
            Ok(Value::Null)
        })
        .options("load", MemberOptions::default().with_monitor("busy"))
}

/// A view that prints the rendering of its page whenever it changes
fn view_type(output: Log) -> ObjectType {
    ObjectType::new("View")
        .member("page", Value::Null)
        .cached_async("render", |tx, this, _| async move {
            let page = tx
                .read(this, "page")?
                .as_ref_id()
                .ok_or_else(|| Error::misuse("view has no page"))?;
            let busy = tx.engine().monitor("busy")?;
            let prefix = |busy: bool| if busy { "[...] " } else { "" };
            let url = tx.read(page, "url")?;
            let first = format!("{}Url: {}", prefix(busy.is_busy(&tx)?), url.as_str().unwrap_or_default());
            tokio::time::sleep(Duration::from_millis(5)).await;
            let log = tx.read(page, "log")?;
            let entries: Vec<&str> = log
                .as_array()
                .unwrap_or_default()
                .iter()
                .filter_map(|v| v.as_str())
                .collect();
            let second = format!("{}Log: {}", prefix(busy.is_busy(&tx)?), entries.join(", "));
            Ok(Value::Array(vec![first.into(), second.into()]))
        })
        .options("render", MemberOptions::default().with_sensitive_args(false))
        .reaction_async("print", move |tx, this, _| {
            let output = output.clone();
            async move {
                let lines = tx.call_async(this, "render", Vec::new()).await?;
                if !tx.is_canceled() {
                    let mut output = output.lock();
                    for line in lines.as_array().unwrap_or_default() {
                        output.push(line.as_str().unwrap_or_default().to_string());
                    }
                }
                Ok(Value::Null)
            }
        })
}

fn strip(line: &str) -> (bool, &str) {
    match line.strip_prefix("[...] ") {
        Some(rest) => (true, rest),
        None => (false, line),
    }
}

#[tokio::test]
async fn test_reactions_follow_restarted_loads() {
    let engine = engine();
    let output: Log = Arc::default();
    let monitor = engine.monitor("busy").unwrap();
    let page_ty = page_type();
    let view_ty = view_type(output.clone());
    let (page, view) = engine
        .transaction("new", |tx| {
            let page = tx.instantiate(&page_ty)?;
            let view = tx.instantiate_with(&view_ty, [("page", page)])?;
            Ok((page, view))
        })
        .unwrap();
    let load = engine.controller(page, "load").unwrap();
    load.configure(ControllerOptions::new().reentrance(Reentrance::WaitAndRestart))
        .unwrap();

    engine.settle().await;
    assert_eq!(*output.lock(), vec!["Url: home", "Log: init"]);

    let call = |url: &str, delay: i64| {
        engine.invoke_async(page, "load", vec![Value::from(url), Value::Int(delay)])
    };
    let check = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(monitor.count(), 1);
        assert_eq!(monitor.workers().len(), 1);
    };
    let (a, b, c, ()) = tokio::join!(call("a", 30), call("b", 20), call("c", 50), check);
    a.unwrap();
    b.unwrap();
    c.unwrap();
    engine.settle().await;

    let output = output.lock().clone();
    assert_eq!(output.len() % 2, 0, "{:?}", output);
    assert_eq!(output[output.len() - 2..], ["Url: c", "Log: init, a/30, b/20, c/50"]);
    assert!(output.iter().any(|l| l.starts_with("[...] ")), "{:?}", output);

    let mut previous = String::new();
    for pair in output.chunks(2) {
        let (busy, url) = strip(&pair[0]);
        let (also_busy, log) = strip(&pair[1]);
        assert_eq!(busy, also_busy, "{:?}", pair);
        let url = url.trim_start_matches("Url: ");
        let log = log.trim_start_matches("Log: ");
        // url and log come from one snapshot
        let last = log.rsplit(", ").next().unwrap_or_default();
        let expected = if last == "init" { "home" } else { last.split('/').next().unwrap_or_default() };
        assert_eq!(url, expected, "{:?}", pair);
        assert!(log.starts_with(previous.as_str()), "{:?}", output);
        previous = log.to_string();
    }

    assert_eq!(monitor.count(), 0);
    assert!(monitor.workers().is_empty());
    assert_eq!(load.in_flight(), 0);

    engine
        .transaction("dispose", |tx| {
            tx.dispose(view)?;
            tx.dispose(page)
        })
        .unwrap();
    assert_eq!(engine.stats().methods, 0);
}
