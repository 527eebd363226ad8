use ediacaran::config::MasterConfigBuilder;
use ediacaran::error::Error;
use ediacaran::job::JobKind;
use ediacaran::monitor::Monitor;
use ediacaran::testutil::{shared_scalars, wait_for_workers, FakeWorker, ScalarCandidate};
use float_cmp::assert_approx_eq;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn a_group_travels_as_one_job_and_merges_selectively() {
    let config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .max_jobs_per_worker(4)
        .batch_size(10)
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(config).await.unwrap();
    let mut fake = FakeWorker::connect(monitor.local_addr(), "f1").await;
    wait_for_workers(&monitor, 1).await;

    let candidates = shared_scalars(&[1.0, 2.0, 3.0]);
    let mut client = monitor.client();
    client
        .submit_grouped(&candidates, &[true, false, true], true, &[0, 1, 2])
        .await
        .unwrap();

    // Despite the configured batch size, the group is dispatched immediately
    // and contains exactly the submitted candidates.
    let job = tokio::time::timeout(Duration::from_secs(5), fake.read_job())
        .await
        .expect("grouped job was not dispatched immediately");
    assert_eq!(job.kind, JobKind::Grouped);
    assert!(job.count_victories_only);
    assert_eq!(job.items.len(), 3);
    let update_flags: Vec<bool> = job.items.iter().map(|item| item.update_fitness).collect();
    assert_eq!(update_flags, vec![true, false, true]);
    let slots: Vec<usize> = job.items.iter().map(|item| item.slot).collect();
    assert_eq!(slots, vec![0, 1, 2]);

    fake.reply_fitness(&[Some(10.0), None, Some(30.0)]).await;
    client.await_all().await;

    assert_approx_eq!(f64, candidates[0].fitness(), 10.0);
    assert!(candidates[0].is_evaluated());
    assert!(!candidates[1].is_evaluated());
    assert_eq!(candidates[1].with(|c| c.merge_count), 0);
    assert_approx_eq!(f64, candidates[2].fitness(), 30.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_slots_are_rejected_at_submission() {
    let config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .num_slots(2)
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(config).await.unwrap();

    let candidates = shared_scalars(&[1.0]);
    let mut client = monitor.client();
    let result = client.submit(&candidates, &[5]).await;
    assert!(matches!(
        result.unwrap_err(),
        Error::SlotOutOfRange { slot: 5, num_slots: 2 }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_notifies_connected_workers() {
    let config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(config).await.unwrap();
    let mut fake = FakeWorker::connect(monitor.local_addr(), "f1").await;
    wait_for_workers(&monitor, 1).await;

    monitor.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), fake.expect_shutdown())
        .await
        .expect("worker was not told to shut down");

    // Jobs scheduled during shutdown are dropped silently and the caller
    // returns instead of blocking forever.
    let candidates = shared_scalars(&[1.0]);
    let mut client = monitor.client();
    tokio::time::timeout(
        Duration::from_secs(5),
        client.submit(std::slice::from_ref(&candidates[0]), &[0]),
    )
    .await
    .expect("submit blocked during shutdown")
    .unwrap();
    assert!(!candidates[0].is_evaluated());
}
