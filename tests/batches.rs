//! Batched writes: revert detection, shared revision bump, nesting,
//! rollback on panic.

use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use cell_flow::{Memo, Runtime, Signal};

#[test]
fn batch_defers_writes_until_exit() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);

    rt.batch(|| {
        s.set(5);
        // Reads inside the batch still see the pre-batch value.
        assert_eq!(s.get(), 1);
    });
    assert_eq!(s.get(), 5);
}

#[test]
fn batch_commits_under_one_revision() {
    let rt = Runtime::new();
    let a = Signal::new(&rt, 1);
    let b = Signal::new(&rt, 2);

    let before = rt.current_revision();
    rt.batch(|| {
        a.set(10);
        b.set(20);
    });
    let after = rt.current_revision();
    assert_eq!(after, before.next());

    let a_info = rt.cell_info(a.id()).expect("registered");
    let b_info = rt.cell_info(b.id()).expect("registered");
    assert_eq!(a_info.changed_at, after);
    assert_eq!(b_info.changed_at, after);
}

#[test]
fn dependent_memo_recomputes_once_after_a_batch() {
    let rt = Runtime::new();
    let a = Signal::new(&rt, 1);
    let b = Signal::new(&rt, 2);

    let runs = Rc::new(Cell::new(0));
    let probe = runs.clone();
    let (a2, b2) = (a.clone(), b.clone());
    let sum = Memo::new(&rt, move || {
        probe.set(probe.get() + 1);
        a2.get() + b2.get()
    });
    assert_eq!(sum.get(), 3);

    rt.batch(|| {
        a.set(10);
        b.set(20);
    });
    assert_eq!(sum.get(), 30);
    assert_eq!(runs.get(), 2);
}

#[test]
fn reverted_write_has_zero_effect() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);

    let runs = Rc::new(Cell::new(0));
    let probe = runs.clone();
    let s2 = s.clone();
    let m = Memo::new(&rt, move || {
        probe.set(probe.get() + 1);
        s2.get()
    });
    m.get();

    let before = rt.current_revision();
    rt.batch(|| {
        s.set(99);
        s.set(1); // back to the original: the write nets out
    });
    assert_eq!(rt.current_revision(), before);
    m.get();
    assert_eq!(runs.get(), 1);
}

#[test]
fn mixed_batch_commits_only_net_changes() {
    let rt = Runtime::new();
    let reverted = Signal::new(&rt, 1);
    let changed = Signal::new(&rt, 2);

    rt.batch(|| {
        reverted.set(5);
        changed.set(5);
        reverted.set(1);
    });

    assert_eq!(reverted.get(), 1);
    assert_eq!(changed.get(), 5);
    let info = rt.cell_info(changed.id()).expect("registered");
    assert_eq!(info.changed_at, rt.current_revision());
    let info = rt.cell_info(reverted.id()).expect("registered");
    assert!(info.changed_at < rt.current_revision());
}

#[test]
fn forced_write_survives_a_revert() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);

    let before = rt.current_revision();
    rt.batch(|| {
        s.set_unconditional(5);
        s.set(1);
    });
    // One write in the batch demanded an unconditional bump.
    assert!(rt.current_revision() > before);
}

#[test]
fn callbacks_fire_in_first_write_order_then_global_once() {
    let rt = Runtime::new();
    let events: Rc<RefCell<Vec<&'static str>>> = Rc::default();

    let global = events.clone();
    rt.set_on_change(move || global.borrow_mut().push("global"));

    let a = Signal::new(&rt, 1);
    let b = Signal::new(&rt, 2);
    let ea = events.clone();
    a.set_on_change(move || ea.borrow_mut().push("a"));
    let eb = events.clone();
    b.set_on_change(move || eb.borrow_mut().push("b"));

    rt.batch(|| {
        b.set(20); // first write wins the ordering
        a.set(10);
        b.set(21);
    });
    assert_eq!(events.borrow().as_slice(), &["b", "a", "global"]);
}

#[test]
fn empty_batch_fires_nothing() {
    let rt = Runtime::new();
    let fired = Rc::new(Cell::new(0));
    let probe = fired.clone();
    rt.set_on_change(move || probe.set(probe.get() + 1));

    let s = Signal::new(&rt, 1);
    let before = rt.current_revision();
    rt.batch(|| {
        s.set(1); // equal to the current value: nets out
    });
    assert_eq!(rt.current_revision(), before);
    assert_eq!(fired.get(), 0);
}

#[test]
fn nested_batches_commit_at_the_outermost_exit() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);

    rt.batch(|| {
        rt.batch(|| {
            s.set(5);
        });
        // The inner exit must not have committed.
        assert_eq!(s.get(), 1);
        s.set(6);
    });
    assert_eq!(s.get(), 6);
}

#[test]
fn last_write_in_a_batch_wins() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);
    rt.batch(|| {
        s.set(2);
        s.set(3);
        s.set(4);
    });
    assert_eq!(s.get(), 4);
}

#[test]
fn panicking_batch_body_rolls_back() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);

    let result = catch_unwind(AssertUnwindSafe(|| {
        rt.batch(|| {
            s.set(99);
            panic!("batch body failed");
        })
    }));
    assert!(result.is_err());

    // The aborted batch left nothing behind: no value change, no stray
    // pending write, no open batch depth.
    assert_eq!(s.get(), 1);
    let before = rt.current_revision();
    s.set(2);
    assert!(rt.current_revision() > before, "set applies immediately");
    assert_eq!(s.get(), 2);
}

#[test]
fn panicking_inner_batch_rolls_back_the_outer_one_too() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 1);

    let result = catch_unwind(AssertUnwindSafe(|| {
        rt.batch(|| {
            s.set(10);
            rt.batch(|| {
                s.set(20);
                panic!("inner batch failed");
            })
        })
    }));
    assert!(result.is_err());
    assert_eq!(s.get(), 1);

    // The runtime is back to normal operation.
    rt.batch(|| s.set(3));
    assert_eq!(s.get(), 3);
}

#[test]
fn batch_returns_the_body_value() {
    let rt = Runtime::new();
    let s = Signal::new(&rt, 2);
    let doubled = rt.batch(|| {
        let v = s.get() * 2;
        s.set(v);
        v
    });
    assert_eq!(doubled, 4);
    assert_eq!(s.get(), 4);
}
