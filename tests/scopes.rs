//! Structured concurrency: scopes, tasks, cancellation, aggregation.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::{
    postpone, until, Clock, Concurrent, Eternity, Flag, Scope, Task, TaskCancelled, TaskState,
};

#[derive(Debug, thiserror::Error)]
#[error("key missing")]
struct KeyMissing;

#[derive(Debug, thiserror::Error)]
#[error("index out of range")]
struct IndexOutOfRange;

/// Scenario: three concurrent delays of 20 units in one scope; the scope
/// exits exactly when all of them are done.
#[test]
fn scope_waits_for_all_children() {
    common::sim(async {
        Scope::enter(|scope| async move {
            for _ in 0..3 {
                scope.spawn(async { Clock::delay(20.0).wait().await });
            }
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 20.0);
        Ok(())
    });
}

/// Scenario: nested scopes with delays of 7, 10 and 5; every scope exits
/// once the longest transitive child is done, at t=10.
#[test]
fn nested_scopes_exit_together() {
    common::sim(async {
        Scope::enter(|outer| async move {
            outer.spawn(async { Clock::delay(7.0).wait().await });
            outer.spawn(async {
                Scope::enter(|inner| async move {
                    inner.spawn(async { Clock::delay(10.0).wait().await });
                    inner.spawn(async {
                        Scope::enter(|innermost| async move {
                            innermost.spawn(async { Clock::delay(5.0).wait().await });
                            Ok(())
                        })
                        .await?;
                        Ok(())
                    });
                    Ok(())
                })
                .await?;
                Ok(())
            });
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 10.0);
        Ok(())
    });
}

#[test]
fn task_results_are_observable() {
    common::sim(async {
        Scope::enter(|scope| async move {
            let task = scope.spawn(async {
                Clock::delay(4.0).wait().await?;
                Ok(42)
            });
            assert_eq!(task.state(), TaskState::Created);
            let value = task.join().await?;
            assert_eq!(value, 42);
            assert_eq!(task.state(), TaskState::Success);
            assert_eq!(Clock::now(), 4.0);
            Ok(())
        })
        .await?;
        Ok(())
    });
}

#[test]
fn delayed_children_start_late() {
    common::sim(async {
        let started: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&started);
        Scope::enter(|scope| async move {
            let early = Rc::clone(&log);
            scope.spawn_after(3.0, async move {
                early.borrow_mut().push(Clock::now());
                Ok(())
            });
            let late = Rc::clone(&log);
            scope.spawn_at(5.0, async move {
                late.borrow_mut().push(Clock::now());
                Ok(())
            });
            Ok(())
        })
        .await?;
        assert_eq!(*started.borrow(), vec![3.0, 5.0]);
        assert_eq!(Clock::now(), 5.0);
        Ok(())
    });
}

#[test]
fn cancellation_is_idempotent_and_first_wins() {
    common::sim(async {
        Scope::enter(|scope| async move {
            let task = scope.spawn(async { Clock::delay(10.0).wait().await });
            postpone().await?;
            task.cancel_with("first");
            task.cancel_with("second");
            let result = task.join().await;
            let abort = result.expect_err("cancelled tasks re-raise");
            let cause = abort
                .downcast_ref::<TaskCancelled>()
                .expect("stored cause is the cancellation");
            assert_eq!(cause.token, "first");
            assert_eq!(task.state(), TaskState::Cancelled);
            assert_eq!(Clock::now(), 0.0);
            Ok(())
        })
        .await?;
        Ok(())
    });
}

#[test]
fn cancelling_an_unstarted_task_prevents_any_execution() {
    common::sim(async {
        let ran = Rc::new(RefCell::new(false));
        let witness = Rc::clone(&ran);
        Scope::enter(|scope| async move {
            let task = scope.spawn(async move {
                *witness.borrow_mut() = true;
                Ok(())
            });
            task.cancel();
            assert_eq!(task.state(), TaskState::Cancelled);
            let result = task.join().await;
            assert!(result.is_err());
            Ok(())
        })
        .await?;
        assert!(!*ran.borrow(), "a task cancelled before starting must not run");
        Ok(())
    });
}

#[test]
fn suppressing_a_cancellation_fails_the_task() {
    common::sim(async {
        let handle: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));
        let smuggled = Rc::clone(&handle);
        let result = Scope::enter(|scope| async move {
            let task = scope.spawn(async {
                // swallow whatever interrupts the sleep
                let _ = Clock::delay(10.0).wait().await;
                Ok(())
            });
            smuggled.replace(Some(task.clone()));
            postpone().await?;
            task.cancel();
            task.done().wait().await?;
            Ok(())
        })
        .await;
        assert!(result.is_err(), "the suppressed cancellation surfaces as failure");
        let state = handle.borrow().as_ref().map(Task::state);
        assert_eq!(state, Some(TaskState::Failed));
        Ok(())
    });
}

#[test]
fn volatile_children_are_closed_at_scope_exit() {
    common::sim(async {
        let handle: Rc<RefCell<Option<Task<()>>>> = Rc::new(RefCell::new(None));
        let smuggled = Rc::clone(&handle);
        Scope::enter(|scope| async move {
            let task = scope.spawn_volatile(async {
                Eternity::new().wait().await?;
                Ok(())
            });
            smuggled.replace(Some(task));
            Clock::delay(1.0).wait().await?;
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 1.0);
        let state = handle.borrow().as_ref().map(Task::state);
        assert_eq!(state, Some(TaskState::Cancelled));
        Ok(())
    });
}

/// Scenario: one child fails with `KeyMissing`, another with
/// `IndexOutOfRange`; the scope raises a `Concurrent` matching the exact
/// pair, the inclusive single, and the bare type, but not the exact single.
#[test]
fn concurrent_failures_aggregate_and_specialise() {
    common::sim(async {
        let result = Scope::enter(|scope| async move {
            scope.spawn(async {
                Err(KeyMissing)?;
                Ok(())
            });
            scope.spawn(async {
                Err(IndexOutOfRange)?;
                Ok(())
            });
            Ok(())
        })
        .await;
        let abort = result.expect_err("child failures abort the scope");
        let concurrent = abort
            .downcast_ref::<Concurrent>()
            .expect("scopes aggregate into Concurrent");
        assert_eq!(concurrent.children().len(), 2);
        assert!(concurrent.matches::<(KeyMissing, IndexOutOfRange)>());
        assert!(concurrent.matches::<(IndexOutOfRange, KeyMissing)>());
        assert!(concurrent.matches_inclusive::<(KeyMissing,)>());
        assert!(!concurrent.matches::<(KeyMissing,)>());
        Ok(())
    });
}

#[test]
fn body_failures_win_over_child_shutdown() {
    common::sim(async {
        let result = Scope::enter(|scope| async move {
            scope.spawn(async {
                Eternity::new().wait().await?;
                Ok(())
            });
            postpone().await?;
            Err(KeyMissing)?;
            Ok(())
        })
        .await;
        let abort = result.expect_err("the body failure propagates");
        assert!(abort.failure_is::<KeyMissing>());
        assert!(abort.downcast_ref::<Concurrent>().is_none());
        Ok(())
    });
}

#[test]
fn until_flag_cancels_the_body_cleanly() {
    common::sim(async {
        let flag = Flag::new();
        let trigger = flag.clone();
        let outcome = Scope::enter(|scope| async move {
            scope.spawn(async move {
                Clock::delay(2.0).wait().await?;
                trigger.set().await?;
                Ok(())
            });
            let inner: Option<()> = until(&flag, |_scope| async move {
                Eternity::new().wait().await?;
                Ok(())
            })
            .await?;
            assert!(inner.is_none());
            assert_eq!(Clock::now(), 2.0);
            Ok(())
        })
        .await;
        assert!(outcome.is_ok());
        Ok(())
    });
}

#[test]
fn until_returns_the_value_of_a_completed_body() {
    common::sim(async {
        let flag = Flag::new();
        let outcome = until(&flag, |_scope| async move {
            Clock::delay(1.0).wait().await?;
            Ok("finished")
        })
        .await?;
        assert_eq!(outcome, Some("finished"));
        Ok(())
    });
}

#[test]
fn children_can_await_their_scope() {
    common::sim(async {
        let observed: Rc<RefCell<Option<f64>>> = Rc::new(RefCell::new(None));
        let log = Rc::clone(&observed);
        Scope::enter(|scope| async move {
            let parent = scope.clone();
            scope.spawn(async move {
                parent.join().await?;
                log.borrow_mut().replace(Clock::now());
                Ok(())
            });
            Clock::delay(3.0).wait().await?;
            Ok(())
        })
        .await?;
        assert_eq!(*observed.borrow(), Some(3.0));
        Ok(())
    });
}

#[test]
fn tasks_spawned_while_waiting_are_awaited_too() {
    common::sim(async {
        Scope::enter(|scope| async move {
            let sibling = scope.clone();
            scope.spawn(async move {
                Clock::delay(1.0).wait().await?;
                sibling.spawn(async { Clock::delay(5.0).wait().await });
                Ok(())
            });
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 6.0);
        Ok(())
    });
}
