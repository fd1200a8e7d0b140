//! Timing behaviour: delays, time conditions, and tick iterators.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use chronoflow::{
    each_delay, each_interval, postpone, suspend_for, suspend_until, until, Clock, Eternity,
};

#[test]
fn suspension_advances_virtual_time() {
    common::sim(async {
        assert_eq!(Clock::now(), 0.0);
        suspend_for(5.0).await?;
        assert_eq!(Clock::now(), 5.0);
        suspend_until(7.5).await?;
        assert_eq!(Clock::now(), 7.5);
        Ok(())
    });
}

#[test]
fn postpone_stays_within_the_instant() {
    common::sim(async {
        let before = Clock::stamp();
        postpone().await?;
        let after = Clock::stamp();
        assert_eq!(before.time, after.time);
        assert!(after.turn > before.turn, "postpone must yield a turn");
        Ok(())
    });
}

#[test]
fn delay_wait_takes_exactly_its_duration() {
    common::sim(async {
        Clock::delay(20.0).wait().await?;
        assert_eq!(Clock::now(), 20.0);
        Ok(())
    });
}

#[test]
fn moment_at_the_current_time_only_postpones() {
    common::sim(async {
        suspend_for(3.0).await?;
        let before = Clock::stamp();
        Clock::at(3.0).wait().await?;
        let after = Clock::stamp();
        assert_eq!(after.time, 3.0);
        assert!(after.turn > before.turn);
        Ok(())
    });
}

#[test]
fn after_condition_probes_inclusively() {
    common::sim(async {
        suspend_for(2.0).await?;
        assert!(!chronoflow::Cond::from(Clock::before(2.0)).probe());
        assert!(chronoflow::Cond::from(Clock::after(2.0)).probe());
        Clock::after(2.0).wait().await?;
        assert_eq!(Clock::now(), 2.0);
        Clock::after(1.0).wait().await?;
        assert_eq!(Clock::now(), 2.0);
        Ok(())
    });
}

/// Scenario: a metronome ticking every unit inside `until(time == 5)`
/// produces ticks at {1, 2, 3, 4, 5} and the block exits at t=5.
#[test]
fn metronome_ticks_until_deadline() {
    common::sim(async {
        let ticks: Rc<RefCell<Vec<f64>>> = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&ticks);
        let outcome: Option<()> = until(Clock::at(5.0), |_scope| async move {
            let mut beat = each_delay(1.0);
            loop {
                let now = beat.next().await?;
                seen.borrow_mut().push(now);
            }
        })
        .await?;
        assert!(outcome.is_none(), "the metronome must be interrupted");
        assert_eq!(Clock::now(), 5.0);
        assert_eq!(*ticks.borrow(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        Ok(())
    });
}

#[test]
fn until_a_delay_interrupts_eternal_waits() {
    common::sim(async {
        let outcome: Option<()> = until(Clock::delay(2.0), |_scope| async move {
            Eternity::new().wait().await?;
            Ok(())
        })
        .await?;
        assert!(outcome.is_none());
        assert_eq!(Clock::now(), 2.0);
        Ok(())
    });
}

#[test]
fn interval_ticks_align_to_boundaries() {
    common::sim(async {
        let mut boundaries = each_interval(2.0);
        // anchored to the first call, which ticks immediately
        assert_eq!(boundaries.next().await?, 0.0);
        assert_eq!(boundaries.next().await?, 2.0);
        // overrun the next boundary; the iterator re-anchors forward
        suspend_for(3.0).await?;
        assert_eq!(Clock::now(), 5.0);
        assert_eq!(boundaries.next().await?, 6.0);
        Ok(())
    });
}

#[test]
fn delay_ticks_space_from_each_iteration() {
    common::sim(async {
        let mut beat = each_delay(1.5);
        assert_eq!(beat.next().await?, 1.5);
        suspend_for(0.5).await?;
        assert_eq!(beat.next().await?, 3.5);
        Ok(())
    });
}
