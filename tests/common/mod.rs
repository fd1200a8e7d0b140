//! Shared test harness: run a test body as the root activity of a fresh
//! simulation and fail the test if the body never finished.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use chronoflow::{run, SimResult};

/// Run `body` under a simulation started at time `0`.
///
/// Panics when the simulation faults or when the body suspends forever.
pub fn sim<F>(body: F)
where
    F: Future<Output = SimResult<()>> + 'static,
{
    let completed = Rc::new(Cell::new(false));
    let witness = Rc::clone(&completed);
    run(async move {
        body.await?;
        witness.set(true);
        Ok(())
    })
    .expect("simulation failed");
    assert!(completed.get(), "test body did not finish");
}
