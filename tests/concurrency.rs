//! Concurrency tests: many callers, one engine thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, ThreadId};

use engine_proxy::engine::EngineOutcome;
use engine_proxy::{Callable, LocalProxy, Proxy, ProxyError, ProxyIdentifier, Returns};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const CALLERS: usize = 50;
const CALLS_PER_CALLER: usize = 20;

/// What the engine thread saw, in the order it ran things.
#[derive(Default)]
struct Record {
    commands: Vec<String>,
    threads: HashSet<ThreadId>,
}

/// Engine that logs each `eval` command and echoes `feval` arguments.
fn recording_engine(
    record: Arc<Mutex<Record>>,
) -> impl FnMut(&Callable) -> EngineOutcome + Send + 'static {
    let mut in_flight = 0usize;
    move |callable: &Callable| {
        in_flight += 1;
        assert_eq!(in_flight, 1, "engine entered concurrently");

        let outcome = {
            let mut record = record.lock().unwrap();
            record.threads.insert(thread::current().id());
            match callable {
                Callable::Eval { command, .. } => {
                    record.commands.push(command.clone());
                    Ok(None)
                }
                Callable::Feval {
                    args,
                    returns: Returns::Default,
                    ..
                } => Ok(args.first().cloned()),
                _ => Ok(None),
            }
        };
        in_flight -= 1;
        outcome
    }
}

#[test]
fn test_concurrent_evals_keep_per_caller_order() {
    let record = Arc::new(Mutex::new(Record::default()));
    let proxy = Arc::new(LocalProxy::spawn(recording_engine(Arc::clone(&record))).unwrap());
    let start = Arc::new(Barrier::new(CALLERS));

    let callers: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let proxy = Arc::clone(&proxy);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for call in 0..CALLS_PER_CALLER {
                    proxy.eval(&format!("c{} = {}", caller, call)).unwrap();
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().unwrap();
    }

    let record = record.lock().unwrap();
    assert_eq!(record.commands.len(), CALLERS * CALLS_PER_CALLER);

    // Every call ran exactly once, and each caller's calls ran in issue order.
    for caller in 0..CALLERS {
        let prefix = format!("c{} = ", caller);
        let seen: Vec<usize> = record
            .commands
            .iter()
            .filter_map(|c| c.strip_prefix(&prefix))
            .map(|n| n.parse().unwrap())
            .collect();
        assert_eq!(seen, (0..CALLS_PER_CALLER).collect::<Vec<_>>());
    }

    assert_eq!(record.threads.len(), 1, "engine must run on exactly one thread");
    assert!(!record.threads.contains(&thread::current().id()));
}

#[test]
fn test_no_cross_delivery_between_callers() {
    let record = Arc::new(Mutex::new(Record::default()));
    let proxy = Arc::new(LocalProxy::spawn(recording_engine(Arc::clone(&record))).unwrap());
    let start = Arc::new(Barrier::new(CALLERS));

    let callers: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let proxy = Arc::clone(&proxy);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for call in 0..CALLS_PER_CALLER {
                    let tag = json!({"caller": caller, "call": call});
                    let reply = proxy.returning_feval("tag", vec![tag.clone()]).unwrap();
                    assert_eq!(reply, tag);
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().unwrap();
    }
    assert_eq!(record.lock().unwrap().threads.len(), 1);
}

#[test]
fn test_concurrent_disconnect_has_single_winner() {
    for _ in 0..20 {
        let engine = |_: &Callable| -> EngineOutcome { Ok(None) };
        let proxy = Arc::new(LocalProxy::spawn(engine).unwrap());
        let notified = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&notified);
        proxy.add_disconnection_listener(Arc::new(move |_: &ProxyIdentifier| {
            n.fetch_add(1, Ordering::SeqCst);
        }));

        let start = Arc::new(Barrier::new(8));
        let racers: Vec<_> = (0..8)
            .map(|_| {
                let proxy = Arc::clone(&proxy);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    proxy.disconnect()
                })
            })
            .collect();

        let winners = racers
            .into_iter()
            .map(|r| r.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn test_calls_racing_disconnect_either_complete_or_fail_fast() {
    let proxy = Arc::new(LocalProxy::spawn(|c: &Callable| -> EngineOutcome {
        match c {
            Callable::GetVariable { name } => Ok(Some(Value::String(name.clone()))),
            _ => Ok(None),
        }
    })
    .unwrap());
    let start = Arc::new(Barrier::new(CALLERS + 1));

    let callers: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let proxy = Arc::clone(&proxy);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let name = format!("v{}", caller);
                let mut outcomes = Vec::new();
                for _ in 0..CALLS_PER_CALLER {
                    outcomes.push(proxy.get_variable(&name).map(|v| v == json!(name)));
                }
                outcomes
            })
        })
        .collect();

    start.wait();
    proxy.disconnect();

    for caller in callers {
        for outcome in caller.join().unwrap() {
            match outcome {
                Ok(matched) => assert!(matched, "reply delivered to the wrong caller"),
                Err(err) => assert_eq!(err, ProxyError::NotConnected),
            }
        }
    }
    assert_eq!(proxy.eval("anything"), Err(ProxyError::NotConnected));
}
