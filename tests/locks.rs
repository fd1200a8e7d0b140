//! Lock semantics: mutual exclusion, fairness, reentrancy.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::{postpone, Clock, Lock, Scope};

/// Scenario: three tasks acquire the same lock in creation order, each
/// holding it for 5 units; total elapsed time is 15 and the acquisition
/// order equals the creation order.
#[test]
fn lock_handoff_is_fair_and_serializes() {
    common::sim(async {
        let lock = Lock::new();
        let order: Rc<RefCell<Vec<(usize, f64)>>> = Rc::new(RefCell::new(Vec::new()));
        let observed = Rc::clone(&order);
        Scope::enter(|scope| async move {
            for worker in 0..3 {
                let lock = lock.clone();
                let order = Rc::clone(&order);
                scope.spawn(async move {
                    let _guard = lock.acquire().await?;
                    order.borrow_mut().push((worker, Clock::now()));
                    Clock::delay(5.0).wait().await?;
                    Ok(())
                });
            }
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 15.0);
        assert_eq!(*observed.borrow(), vec![(0, 0.0), (1, 5.0), (2, 10.0)]);
        Ok(())
    });
}

#[test]
fn acquisition_order_matches_arrival() {
    common::sim(async {
        let lock = Lock::new();
        let order: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let observed = Rc::clone(&order);
        Scope::enter(|scope| async move {
            for worker in 0..4 {
                let lock = lock.clone();
                let order = Rc::clone(&order);
                scope.spawn(async move {
                    let _guard = lock.acquire().await?;
                    order.borrow_mut().push(worker);
                    Clock::delay(1.0).wait().await?;
                    Ok(())
                });
            }
            Ok(())
        })
        .await?;
        assert_eq!(*observed.borrow(), vec![0, 1, 2, 3]);
        Ok(())
    });
}

#[test]
fn locks_are_reentrant_for_their_owner() {
    common::sim(async {
        let lock = Lock::new();
        let outer = lock.acquire().await?;
        assert!(lock.available(), "the owner can always re-acquire");
        let inner = lock.acquire().await?;
        assert_eq!(Clock::now(), 0.0, "reentrant acquisition must not wait");
        drop(inner);
        assert!(lock.available());
        drop(outer);
        assert!(lock.available());
        Ok(())
    });
}

#[test]
fn availability_reflects_foreign_ownership() {
    common::sim(async {
        let lock = Lock::new();
        let taken = lock.clone();
        Scope::enter(|scope| async move {
            scope.spawn(async move {
                let _guard = taken.acquire().await?;
                Clock::delay(2.0).wait().await?;
                Ok(())
            });
            postpone().await?;
            assert!(!lock.available(), "another activity owns the lock");
            let _guard = lock.acquire().await?;
            assert_eq!(Clock::now(), 2.0);
            Ok(())
        })
        .await?;
        Ok(())
    });
}
