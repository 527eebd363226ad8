use ediacaran::config::MasterConfigBuilder;
use ediacaran::monitor::Monitor;
use ediacaran::testutil::{shared_scalars, wait_for_workers, FakeWorker, ScalarCandidate};
use float_cmp::assert_approx_eq;
use std::time::Duration;

/// Kills a worker after it completed 3 of 10 jobs, then brings up a
/// replacement: the remaining 7 jobs must all complete elsewhere, none may be
/// dropped, and no candidate may be merged twice.
#[tokio::test(flavor = "multi_thread")]
async fn unfinished_jobs_move_to_a_surviving_worker() {
    let config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .max_jobs_per_worker(16)
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(config).await.unwrap();
    let addr = monitor.local_addr();

    let mut first = FakeWorker::connect(addr, "doomed").await;
    wait_for_workers(&monitor, 1).await;

    let genomes: Vec<f64> = (1..=10).map(f64::from).collect();
    let candidates = shared_scalars(&genomes);
    let mut client = monitor.client();
    for candidate in &candidates {
        client
            .submit(std::slice::from_ref(candidate), &[0])
            .await
            .unwrap();
    }

    for _ in 0..3 {
        let job = first.read_job().await;
        let fitness = job.items[0].candidate.genome * 100.0;
        first.reply_fitness(&[Some(fitness)]).await;
    }

    // Sever the connection with 7 jobs still outstanding.
    drop(first);
    wait_for_workers(&monitor, 0).await;

    let drain_monitor = monitor.clone();
    let drained = tokio::spawn(async move {
        drain_monitor.await_drain().await;
    });

    let mut second = FakeWorker::connect(addr, "replacement").await;
    wait_for_workers(&monitor, 1).await;

    // Redistributed jobs arrive ahead of anything else, in original order.
    for expected_genome in 4..=10 {
        let job = tokio::time::timeout(Duration::from_secs(5), second.read_job())
            .await
            .expect("redistributed job did not arrive");
        assert_approx_eq!(f64, job.items[0].candidate.genome, f64::from(expected_genome));
        let fitness = job.items[0].candidate.genome * 10.0;
        second.reply_fitness(&[Some(fitness)]).await;
    }

    tokio::time::timeout(Duration::from_secs(5), drained)
        .await
        .expect("await_drain did not return after redistribution")
        .unwrap();

    for (candidate, genome) in candidates.iter().zip(&genomes) {
        let expected = if *genome <= 3.0 {
            genome * 100.0
        } else {
            genome * 10.0
        };
        assert!(candidate.is_evaluated());
        assert_approx_eq!(f64, candidate.fitness(), expected);
        assert_eq!(candidate.with(|c| c.merge_count), 1);
    }
}

/// A drain that started while nothing could run must still complete once a
/// worker registers later and takes the work.
#[tokio::test(flavor = "multi_thread")]
async fn drain_covers_workers_registered_after_the_wait_began() {
    let config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .max_jobs_per_worker(4)
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(config).await.unwrap();
    let addr = monitor.local_addr();

    let candidates = shared_scalars(&[42.0]);
    let submitted = candidates.clone();
    let mut client = monitor.client();
    let finished = tokio::spawn(async move {
        client
            .submit(std::slice::from_ref(&submitted[0]), &[0])
            .await
            .unwrap();
        client.await_all().await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!finished.is_finished());

    let mut fake = FakeWorker::connect(addr, "late").await;
    let job = tokio::time::timeout(Duration::from_secs(5), fake.read_job())
        .await
        .expect("job was not assigned to the late worker");
    assert_approx_eq!(f64, job.items[0].candidate.genome, 42.0);
    fake.reply_fitness(&[Some(42.0)]).await;

    tokio::time::timeout(Duration::from_secs(5), finished)
        .await
        .expect("await_all did not observe the late completion")
        .unwrap();
    assert_approx_eq!(f64, candidates[0].fitness(), 42.0);
}
