use ediacaran::config::{MasterConfigBuilder, WorkerConfigBuilder};
use ediacaran::monitor::Monitor;
use ediacaran::testutil::{shared_scalars, wait_for_workers, IdentityEvaluator, ScalarCandidate};
use ediacaran::worker::run_worker;
use float_cmp::assert_approx_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

fn spawn_worker(
    addr: std::net::SocketAddr,
    name: &str,
) -> JoinHandle<Result<(), ediacaran::error::Error>> {
    let config = WorkerConfigBuilder::new(addr.to_string(), name)
        .eval_threads(2)
        .one_shot(true)
        .retry_backoff(Duration::from_millis(50))
        .build()
        .unwrap();
    tokio::spawn(run_worker(config, Arc::new(IdentityEvaluator)))
}

#[tokio::test(flavor = "multi_thread")]
async fn two_workers_evaluate_five_candidates() {
    let master_config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .max_jobs_per_worker(4)
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(master_config)
        .await
        .unwrap();
    let addr = monitor.local_addr();

    let workers = vec![spawn_worker(addr, "w0"), spawn_worker(addr, "w1")];
    wait_for_workers(&monitor, 2).await;

    let genomes = [1.0, 2.0, 3.0, 4.0, 5.0];
    let candidates = shared_scalars(&genomes);
    let mut client = monitor.client();
    assert!(client.can_evaluate().await);

    for (candidate, _) in candidates.iter().zip(genomes) {
        client
            .submit(std::slice::from_ref(candidate), &[0])
            .await
            .unwrap();
    }
    client.await_all().await;

    for (candidate, genome) in candidates.iter().zip(genomes) {
        assert!(candidate.is_evaluated());
        assert_approx_eq!(f64, candidate.fitness(), genome);
        assert_eq!(candidate.with(|c| c.merge_count), 1);
    }

    monitor.shutdown().await;
    for worker in workers {
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not exit after master shutdown")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_candidates_replace_the_originals_in_place() {
    let master_config = MasterConfigBuilder::new()
        .bind_addr("127.0.0.1:0")
        .max_jobs_per_worker(4)
        .return_candidates(true)
        .build()
        .unwrap();
    let monitor = Monitor::<ScalarCandidate>::bind(master_config)
        .await
        .unwrap();

    let worker = spawn_worker(monitor.local_addr(), "w0");
    wait_for_workers(&monitor, 1).await;

    let candidates = shared_scalars(&[7.5, 8.5]);
    let handles = candidates.clone();
    let mut client = monitor.client();
    client.submit(&candidates, &[0, 1]).await.unwrap();
    client.await_all().await;

    // The caller-held handles observe the results without being re-submitted.
    for (handle, genome) in handles.iter().zip([7.5, 8.5]) {
        assert!(handle.is_evaluated());
        assert_approx_eq!(f64, handle.with(|c| c.genome), genome);
        assert_approx_eq!(f64, handle.fitness(), genome);
    }

    monitor.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker did not exit after master shutdown")
        .unwrap()
        .unwrap();
}
