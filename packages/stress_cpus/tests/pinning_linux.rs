//! Pins real threads through the operating system and reads the affinity back.
//!
//! Tests either pin a thread they spawned themselves or restore the affinity of the test thread
//! before returning, so the test harness threads keep their affinity.

#![cfg(target_os = "linux")]

use std::thread;

use stress_cpus::{
    LogicalProcessorSet, ambient_logical_processor_set, current_os_thread_id,
    pin_thread_to_logical_processor, pin_to_logical_processor, pin_to_logical_processors,
};

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn ambient_set_is_not_empty() {
    let ambient = ambient_logical_processor_set().unwrap();

    assert!(!ambient.is_empty());
    assert!(ambient.count() <= 1 << 20);
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn pinned_thread_reports_single_processor() {
    let ambient = ambient_logical_processor_set().unwrap();
    let last = ambient.iter().last().unwrap();

    thread::spawn(move || {
        assert!(pin_to_logical_processor(last, "pinned worker"));

        // The cached ambient set must not reflect the pin.
        assert_eq!(ambient_logical_processor_set().unwrap(), ambient);
    })
    .join()
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn pins_other_thread_by_id() {
    let ambient = ambient_logical_processor_set().unwrap();
    let first = ambient.first().unwrap();

    let (id_tx, id_rx) = std::sync::mpsc::channel();
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();

    let target = thread::spawn(move || {
        id_tx.send(current_os_thread_id()).unwrap();

        // Stay alive until the other side has pinned us.
        done_rx.recv().unwrap();
    });

    let thread_id = id_rx.recv().unwrap();
    assert!(thread_id > 0);
    assert_ne!(thread_id, current_os_thread_id());

    let pinned = pin_thread_to_logical_processor(first, thread_id, "remote worker");

    done_tx.send(()).unwrap();
    target.join().unwrap();

    assert!(pinned);
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn pins_to_whole_set() {
    let ambient = ambient_logical_processor_set().unwrap();

    thread::spawn(move || {
        assert!(pin_to_logical_processors(&ambient, "helper"));
    })
    .join()
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn empty_set_is_refused() {
    thread::spawn(|| {
        assert!(!pin_to_logical_processors(&LogicalProcessorSet::new(), "helper"));
    })
    .join()
    .unwrap();
}

#[test]
#[cfg_attr(miri, ignore)] // Miri cannot call platform APIs.
fn repins_calling_thread() {
    let ambient = ambient_logical_processor_set().unwrap();
    let first = ambient.first().unwrap();

    // Give the test thread its full affinity back even if an assertion fails.
    let _restore = scopeguard::guard(ambient.clone(), |ambient| {
        _ = pin_to_logical_processors(&ambient, "test thread");
    });

    assert!(pin_to_logical_processor(first, "test thread"));

    // Moving between processors more than once must keep working.
    let last = ambient.iter().last().unwrap();
    assert!(pin_to_logical_processor(last, "test thread"));
}
