//! Unit tests for dispatch.rs

use super::*;
use std::sync::Arc;

// ============================================================================
// MESSAGE QUEUE
// ============================================================================

#[test]
fn test_message_queue_runs_in_fifo_order() {
    let queue = MessageQueue::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let seen = seen.clone();
        queue.push(move || seen.lock().unwrap().push(i));
    }
    assert_eq!(queue.len(), 3);
    assert_eq!(queue.flush(), 3);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    assert!(queue.is_empty());
}

#[test]
fn test_message_queue_flush_includes_calls_pushed_while_flushing() {
    let queue = Arc::new(MessageQueue::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let queue_inner = queue.clone();
        let seen = seen.clone();
        queue.push(move || {
            seen.lock().unwrap().push("outer");
            let seen = seen.clone();
            queue_inner.push(move || seen.lock().unwrap().push("inner"));
        });
    }
    assert_eq!(queue.flush(), 2);
    assert_eq!(*seen.lock().unwrap(), vec!["outer", "inner"]);
}

#[test]
fn test_message_queue_accepts_pushes_from_other_threads() {
    let queue = Arc::new(MessageQueue::new());
    let counter = Arc::new(Mutex::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let counter = counter.clone();
            std::thread::spawn(move || {
                queue.push(move || *counter.lock().unwrap() += 1);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    queue.flush();
    assert_eq!(*counter.lock().unwrap(), 4);
}

// ============================================================================
// EVENT SINKS
// ============================================================================

#[test]
fn test_event_sinks_emit_and_unsubscribe() {
    let mut sinks: EventSinks<u32> = EventSinks::new();
    let total = Arc::new(Mutex::new(0));

    let t = total.clone();
    let first = sinks.subscribe(move |v| *t.lock().unwrap() += *v);
    let t = total.clone();
    sinks.subscribe(move |v| *t.lock().unwrap() += *v * 10);

    sinks.emit(&2);
    assert_eq!(*total.lock().unwrap(), 22);

    assert!(sinks.unsubscribe(first));
    assert!(!sinks.unsubscribe(first));
    sinks.emit(&1);
    assert_eq!(*total.lock().unwrap(), 32);
    assert_eq!(sinks.len(), 1);
}
