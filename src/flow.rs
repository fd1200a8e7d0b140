//! Flow helpers over scopes and streams

use futures::future::LocalBoxFuture;

use crate::error::{Abort, SimResult};
use crate::resources::streams::Queue;
use crate::scope::Scope;

/// Run all activities concurrently and provide all results, in the order
/// the activities were given.
///
/// Results only become available after every activity finished; failures
/// are collapsed into a [`Concurrent`](crate::Concurrent) by the
/// surrounding scope.
pub async fn collect<R: 'static>(
    activities: Vec<LocalBoxFuture<'static, SimResult<R>>>,
) -> SimResult<Vec<R>> {
    let tasks = Scope::enter(|scope| async move {
        Ok(activities
            .into_iter()
            .map(|activity| scope.spawn(activity))
            .collect::<Vec<_>>())
    })
    .await?;
    let mut results = Vec::with_capacity(tasks.len());
    for task in tasks {
        results.push(task.join().await?);
    }
    Ok(results)
}

/// Run all activities concurrently and yield the first `winners` results in
/// completion order; the remaining activities are closed afterwards.
///
/// With fewer activities than `winners`, all results are returned.
pub async fn race<R: 'static>(
    activities: Vec<LocalBoxFuture<'static, SimResult<R>>>,
    winners: usize,
) -> SimResult<Vec<R>> {
    let podium = winners.min(activities.len());
    let results: Queue<R> = Queue::new();
    Scope::enter(|scope| {
        let results = results.clone();
        async move {
            for activity in activities {
                let finish_line = results.clone();
                scope.spawn_volatile(async move {
                    let result = activity.await?;
                    finish_line.put(result).await?;
                    Ok(())
                });
            }
            let mut winners = Vec::with_capacity(podium);
            for _ in 0..podium {
                winners.push(results.get().await?);
            }
            Ok(winners)
        }
    })
    .await
}

/// Run all activities concurrently and return the single first result; the
/// losers are closed.
pub async fn first<R: 'static>(
    activities: Vec<LocalBoxFuture<'static, SimResult<R>>>,
) -> SimResult<R> {
    let mut winners = race(activities, 1).await?;
    match winners.pop() {
        Some(winner) => Ok(winner),
        None => Err(Abort::Failed(std::sync::Arc::new(anyhow::anyhow!(
            "nothing to race: no activities were given"
        )))),
    }
}
