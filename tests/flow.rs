//! Flow helpers: collect and race.

mod common;

use chronoflow::{boxed, collect, first, race, Clock, Concurrent};

#[derive(Debug, thiserror::Error)]
#[error("contestant stumbled")]
struct Stumbled;

#[test]
fn collect_returns_results_in_input_order() {
    common::sim(async {
        let results = collect(vec![
            boxed(async {
                Clock::delay(3.0).wait().await?;
                Ok("slow")
            }),
            boxed(async {
                Clock::delay(1.0).wait().await?;
                Ok("fast")
            }),
        ])
        .await?;
        assert_eq!(results, vec!["slow", "fast"]);
        assert_eq!(Clock::now(), 3.0);
        Ok(())
    });
}

#[test]
fn collect_aggregates_failures() {
    common::sim(async {
        let outcome = collect(vec![
            boxed(async {
                Clock::delay(1.0).wait().await?;
                Ok(1)
            }),
            boxed(async {
                Err(Stumbled)?;
                Ok(2)
            }),
        ])
        .await;
        let abort = outcome.expect_err("one contestant failed");
        let concurrent = abort
            .downcast_ref::<Concurrent>()
            .expect("failures are aggregated");
        assert!(concurrent.matches::<(Stumbled,)>());
        Ok(())
    });
}

#[test]
fn race_yields_winners_in_completion_order() {
    common::sim(async {
        let winners = race(
            vec![
                boxed(async {
                    Clock::delay(3.0).wait().await?;
                    Ok(3.0)
                }),
                boxed(async {
                    Clock::delay(1.0).wait().await?;
                    Ok(1.0)
                }),
                boxed(async {
                    Clock::delay(2.0).wait().await?;
                    Ok(2.0)
                }),
            ],
            2,
        )
        .await?;
        assert_eq!(winners, vec![1.0, 2.0]);
        // the loser was closed with the scope, never reaching t=3
        assert_eq!(Clock::now(), 2.0);
        Ok(())
    });
}

#[test]
fn first_returns_the_single_winner() {
    common::sim(async {
        let winner = first(vec![
            boxed(async {
                Clock::delay(5.0).wait().await?;
                Ok("tortoise")
            }),
            boxed(async {
                Clock::delay(2.0).wait().await?;
                Ok("hare")
            }),
        ])
        .await?;
        assert_eq!(winner, "hare");
        assert_eq!(Clock::now(), 2.0);
        Ok(())
    });
}

#[test]
fn race_with_more_winners_than_contestants_returns_everything() {
    common::sim(async {
        let winners = race(
            vec![boxed(async {
                Clock::delay(1.0).wait().await?;
                Ok(1)
            })],
            5,
        )
        .await?;
        assert_eq!(winners, vec![1]);
        Ok(())
    });
}
