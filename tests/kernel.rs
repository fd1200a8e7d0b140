//! Event loop and state handler behaviour.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::{boxed, postpone, run, run_from, Clock, KernelError, Scope};

#[derive(Debug, thiserror::Error)]
#[error("boiler exploded")]
struct BoilerExploded;

#[test]
fn an_empty_simulation_terminates_immediately() {
    run(async { Ok(()) }).expect("nothing can fail here");
}

#[test]
fn simulations_can_start_at_any_time() {
    common::sim(async { Ok(()) });
    run_from(
        1986.0,
        [boxed(async {
            assert_eq!(Clock::now(), 1986.0);
            Clock::delay(14.0).wait().await?;
            assert_eq!(Clock::now(), 2000.0);
            Ok(())
        })],
    )
    .expect("simulation failed");
}

#[test]
fn root_activities_run_in_seeding_order() {
    let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
    let first = Rc::clone(&order);
    let second = Rc::clone(&order);
    run_from(
        0.0,
        [
            boxed(async move {
                first.borrow_mut().push(1);
                Ok(())
            }),
            boxed(async move {
                second.borrow_mut().push(2);
                Ok(())
            }),
        ],
    )
    .expect("simulation failed");
    assert_eq!(*order.borrow(), vec![1, 2]);
}

#[test]
fn an_unhandled_root_failure_is_a_kernel_fault() {
    let outcome = run(async {
        Err(BoilerExploded)?;
        Ok(())
    });
    match outcome {
        Err(KernelError::ActivityError { activity, cause }) => {
            assert!(activity.contains("root-activity"));
            assert!(cause.is::<BoilerExploded>());
        }
        other => panic!("expected an activity fault, got {other:?}"),
    }
}

#[test]
fn a_fault_aborts_before_later_activations() {
    let survived = Rc::new(RefCell::new(false));
    let witness = Rc::clone(&survived);
    let outcome = run_from(
        0.0,
        [
            boxed(async {
                postpone().await?;
                Err(BoilerExploded)?;
                Ok(())
            }),
            boxed(async move {
                postpone().await?;
                postpone().await?;
                *witness.borrow_mut() = true;
                Ok(())
            }),
        ],
    );
    assert!(outcome.is_err());
    assert!(!*survived.borrow(), "fatal-first: nothing runs after a fault");
}

#[test]
#[should_panic(expected = "no active simulation")]
fn the_clock_requires_an_active_simulation() {
    let _ = Clock::now();
}

#[test]
fn the_handler_is_restored_after_a_run() {
    assert!(!chronoflow::is_active());
    run(async {
        assert!(chronoflow::is_active());
        Ok(())
    })
    .expect("simulation failed");
    assert!(!chronoflow::is_active());
}

#[test]
fn nested_simulations_shadow_the_outer_loop() {
    common::sim(async {
        Clock::delay(5.0).wait().await?;
        // a nested simulation has its own clock and does not disturb ours
        run(async {
            assert_eq!(Clock::now(), 0.0);
            Clock::delay(1.0).wait().await?;
            Ok(())
        })?;
        assert_eq!(Clock::now(), 5.0);
        Ok(())
    });
}

#[test]
fn same_instant_activations_run_in_fifo_order() {
    common::sim(async {
        let order: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        let observed = Rc::clone(&order);
        Scope::enter(|scope| async move {
            for index in 0..5 {
                let order = Rc::clone(&order);
                scope.spawn(async move {
                    order.borrow_mut().push(index);
                    Ok(())
                });
            }
            Ok(())
        })
        .await?;
        assert_eq!(*observed.borrow(), vec![0, 1, 2, 3, 4]);
        Ok(())
    });
}
