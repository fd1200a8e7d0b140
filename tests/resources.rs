//! Resource supplies: borrowing, claiming, conservation, tracked values.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::{Capacities, Clock, Resources, ResourcesUnavailable, Scope, Tracked};

/// Scenario: a `Capacities(cores=8, memory=16000)` supply with two borrow
/// requests of `(cores=6, memory=4000)` for 10 units each; the second is
/// queued behind the first, so the total elapsed time is 20.
#[test]
fn contended_borrows_queue_up() {
    common::sim(async {
        let pool = Capacities::new(&[("cores", 8.0), ("memory", 16000.0)]);
        let windows: Rc<RefCell<Vec<(f64, f64)>>> = Rc::new(RefCell::new(Vec::new()));
        let observed = Rc::clone(&windows);
        let conserved = pool.clone();
        Scope::enter(|scope| async move {
            for _ in 0..2 {
                let pool = pool.clone();
                let windows = Rc::clone(&windows);
                scope.spawn(async move {
                    let grant = pool.borrow(&[("cores", 6.0), ("memory", 4000.0)]).await?;
                    let acquired = Clock::now();
                    Clock::delay(10.0).wait().await?;
                    grant.release().await?;
                    windows.borrow_mut().push((acquired, Clock::now()));
                    Ok(())
                });
            }
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 20.0);
        assert_eq!(*observed.borrow(), vec![(0.0, 10.0), (10.0, 20.0)]);
        // conservation: everything has been returned
        assert_eq!(conserved.levels(), *conserved.limits());
        Ok(())
    });
}

#[test]
fn uncontended_borrows_share_the_supply() {
    common::sim(async {
        let pool = Capacities::new(&[("cores", 8.0)]);
        Scope::enter(|scope| async move {
            for _ in 0..2 {
                let pool = pool.clone();
                scope.spawn(async move {
                    let grant = pool.borrow(&[("cores", 4.0)]).await?;
                    Clock::delay(10.0).wait().await?;
                    grant.release().await?;
                    Ok(())
                });
            }
            Ok(())
        })
        .await?;
        assert_eq!(Clock::now(), 10.0);
        Ok(())
    });
}

#[test]
fn claim_fails_fast_when_levels_are_insufficient() {
    common::sim(async {
        let pool = Capacities::new(&[("cores", 2.0)]);
        let grant = pool.borrow(&[("cores", 2.0)]).await?;
        let denied = pool.claim(&[("cores", 1.0)]).await;
        let abort = denied.expect_err("claims never wait");
        assert!(abort.failure_is::<ResourcesUnavailable>());
        assert_eq!(Clock::now(), 0.0);
        grant.release().await?;
        let granted = pool.claim(&[("cores", 1.0)]).await?;
        granted.release().await?;
        Ok(())
    });
}

#[test]
fn borrowed_amounts_form_a_limited_subpool() {
    common::sim(async {
        let pool = Capacities::new(&[("cores", 8.0), ("memory", 16.0)]);
        let outer = pool.borrow(&[("cores", 4.0), ("memory", 8.0)]).await?;
        assert_eq!(outer.limits().get("cores"), Some(4.0));
        let inner = outer.borrow(&[("cores", 2.0)]).await?;
        assert_eq!(outer.levels().get("cores"), Some(2.0));
        inner.release().await?;
        assert_eq!(outer.levels().get("cores"), Some(4.0));
        outer.release().await?;
        assert_eq!(pool.levels(), *pool.limits());
        Ok(())
    });
}

#[test]
fn open_supplies_can_change_their_levels() {
    common::sim(async {
        let supply = Resources::new(&[("water", 10.0)]);
        supply.increase(&[("water", 5.0)]).await?;
        assert_eq!(supply.levels().get("water"), Some(15.0));
        supply.decrease(&[("water", 12.0)]).await?;
        assert_eq!(supply.levels().get("water"), Some(3.0));
        supply.set(&[("water", 7.0)]).await?;
        assert_eq!(supply.levels().get("water"), Some(7.0));
        Ok(())
    });
}

#[test]
fn borrowing_from_an_open_supply_waits_for_production() {
    common::sim(async {
        let supply = Resources::new(&[("parts", 0.0)]);
        let producer = supply.clone();
        Scope::enter(|scope| async move {
            scope.spawn(async move {
                Clock::delay(4.0).wait().await?;
                producer.increase(&[("parts", 3.0)]).await?;
                Ok(())
            });
            let grant = supply.borrow(&[("parts", 2.0)]).await?;
            assert_eq!(Clock::now(), 4.0);
            grant.release().await?;
            Ok(())
        })
        .await?;
        Ok(())
    });
}

#[test]
fn tracked_comparisons_wake_watchers_on_change() {
    common::sim(async {
        let coffee = Tracked::new(1.0_f64);
        let refills: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let observed = Rc::clone(&refills);
        let watched = coffee.clone();
        Scope::enter(|scope| async move {
            scope.spawn(async move {
                watched.below(0.1).wait().await?;
                refills.borrow_mut().push(Clock::now());
                Ok(())
            });
            Clock::delay(3.0).wait().await?;
            coffee.set(0.05).await?;
            assert_eq!(coffee.get(), 0.05);
            Ok(())
        })
        .await?;
        assert_eq!(*observed.borrow(), vec![3.0]);
        Ok(())
    });
}

#[test]
fn tracked_arithmetic_reduces_to_set() {
    common::sim(async {
        let level = Tracked::new(10.0_f64);
        level.add(5.0).await?;
        assert_eq!(level.get(), 15.0);
        level.sub(3.0).await?;
        assert_eq!(level.get(), 12.0);
        level.mul(2.0).await?;
        assert_eq!(level.get(), 24.0);
        level.div(4.0).await?;
        assert_eq!(level.get(), 6.0);
        Ok(())
    });
}

#[test]
fn comparisons_between_two_tracked_values() {
    common::sim(async {
        let demand = Tracked::new(5.0_f64);
        let supply = Tracked::new(1.0_f64);
        let satisfied = supply.at_least(&demand);
        assert!(!satisfied.probe());
        let waiting = satisfied.clone();
        let production = supply.clone();
        Scope::enter(|scope| async move {
            scope.spawn(async move {
                waiting.wait().await?;
                assert_eq!(Clock::now(), 2.0);
                Ok(())
            });
            Clock::delay(2.0).wait().await?;
            production.set(6.0).await?;
            Ok(())
        })
        .await?;
        assert!(satisfied.probe());
        Ok(())
    });
}
