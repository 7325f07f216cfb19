//! Worker pool behaviour seen through the public API

use aimine_client::crypto::solution_digest;
use aimine_client::worker::{PoolConfig, SolverProgress, WorkerPool};
use aimine_client::{CandidateText, Seed, SolverIdentity, Target};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn candidates(count: usize) -> Vec<CandidateText> {
    (0..count)
        .map(|i| CandidateText::new(format!("candidate {:0>110}", i).into_bytes()).unwrap())
        .collect()
}

fn pool(workers: usize, max_nonce: u64) -> WorkerPool {
    WorkerPool::new(PoolConfig {
        workers,
        max_nonce,
        report_interval: 1_000,
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn trivial_target_is_found_immediately() {
    let seed = Seed([7; 32]);
    let solver = SolverIdentity([1; 20]);
    let texts = candidates(2);

    let result = pool(4, 1_000_000)
        .solve(&seed, 3, &solver, &texts, &Target::max(), None, &CancellationToken::new())
        .await;

    let solution = result.solution.expect("every digest but all-ones meets the max target");
    assert!(result.total_hashes_tried <= 4);

    let digest = solution_digest(&seed, 3, &solver, &texts[solution.candidate_index], solution.nonce);
    assert_eq!(digest, solution.digest);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn impossible_target_exhausts_every_range() {
    // 3 workers on 2 candidates, 2 on the first and 1 on the second
    let result = pool(3, 20_000)
        .solve(&Seed([2; 32]), 1, &SolverIdentity::ZERO, &candidates(2), &Target::from_u64(1), None, &CancellationToken::new())
        .await;
    assert!(!result.found());
    assert_eq!(result.total_hashes_tried, 40_000);

    // uneven split floors each span: 3 * 3333 + 2 * 5000
    let result = pool(5, 10_000)
        .solve(&Seed([2; 32]), 1, &SolverIdentity::ZERO, &candidates(2), &Target::min(), None, &CancellationToken::new())
        .await;
    assert_eq!(result.total_hashes_tried, 19_999);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn candidates_beyond_worker_count_are_not_searched() {
    let result = pool(2, 5_000)
        .solve(&Seed([2; 32]), 1, &SolverIdentity::ZERO, &candidates(5), &Target::min(), None, &CancellationToken::new())
        .await;
    assert_eq!(result.total_hashes_tried, 10_000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_is_monotonic_and_sums_to_total() {
    let (tx, mut rx) = mpsc::channel::<SolverProgress>(1024);

    let result = pool(4, 50_000)
        .solve(&Seed([5; 32]), 2, &SolverIdentity::ZERO, &candidates(3), &Target::min(), Some(tx), &CancellationToken::new())
        .await;

    let mut last_total = 0;
    let mut deltas = 0;
    while let Ok(update) = rx.try_recv() {
        assert!(update.total_tried >= last_total);
        assert_eq!(update.total_tried, last_total + update.tried_delta);
        last_total = update.total_tried;
        deltas += update.tried_delta;
    }

    assert_eq!(last_total, result.total_hashes_tried);
    assert_eq!(deltas, result.total_hashes_tried);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_includes_the_winning_delta() {
    let (tx, mut rx) = mpsc::channel::<SolverProgress>(1024);

    let result = pool(4, 1_000_000)
        .solve(&Seed([6; 32]), 2, &SolverIdentity::ZERO, &candidates(2), &Target::max(), Some(tx), &CancellationToken::new())
        .await;
    assert!(result.found());

    let mut last_total = 0;
    let mut deltas = 0;
    while let Ok(update) = rx.try_recv() {
        assert!(update.total_tried >= last_total);
        last_total = update.total_tried;
        deltas += update.tried_delta;
    }

    assert!(deltas > 0);
    assert_eq!(deltas, result.total_hashes_tried);
    assert_eq!(last_total, result.total_hashes_tried);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_an_endless_search() {
    let cancellation = CancellationToken::new();
    let stopper = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stopper.cancel();
    });

    let started = Instant::now();
    let result = pool(2, u64::MAX / 4)
        .solve(&Seed([9; 32]), 1, &SolverIdentity::ZERO, &candidates(1), &Target::min(), None, &cancellation)
        .await;

    assert!(!result.found());
    assert!(result.total_hashes_tried > 0);
    assert!(started.elapsed() < Duration::from_secs(10));
}
