use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use alloy_signer_local::PrivateKeySigner;
use axon_chain::MockChainClient;
use axon_driver::client_tasks::settle_finished_client_tasks;
use axon_driver::{Dispatcher, DriverConfig, DriverError, ResultSink, TaskDriver};
use axon_lib::{
    task_id_commitment, vrf, ClientTask, ClientTaskStatus, InferenceTask, TaskAbortReason,
    TaskStatus, TaskType,
};
use axon_relay::MockRelayClient;
use axon_taskdb::{InMemoryTaskDb, TaskStore};
use tokio_util::sync::CancellationToken;

struct Harness {
    store: Arc<InMemoryTaskDb>,
    driver: Arc<TaskDriver>,
    sink: ResultSink,
    _dir: tempfile::TempDir,
}

fn test_signer() -> PrivateKeySigner {
    PrivateKeySigner::from_bytes(&B256::repeat_byte(0x42)).expect("valid key")
}

fn fast_config() -> DriverConfig {
    DriverConfig {
        poll_interval: Duration::from_millis(10),
        group_poll_interval: Duration::from_millis(5),
        task_deadline: Duration::from_secs(600),
        download_timeout: Duration::from_secs(5),
        retry_interval: Duration::from_millis(10),
        dispatch_interval: Duration::from_millis(20),
        dispatch_limit: 100,
    }
}

fn harness(chain: MockChainClient, relay: MockRelayClient, config: DriverConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(InMemoryTaskDb::new());
    let sink = ResultSink::new(dir.path());
    let driver = Arc::new(TaskDriver::new(
        store.clone(),
        Arc::new(chain),
        Arc::new(relay),
        test_signer(),
        sink.clone(),
        config,
    ));
    Harness {
        store,
        driver,
        sink,
        _dir: dir,
    }
}

/// Find a sampling seed whose VRF output does (or does not) select a
/// validation group under the test key.
fn find_seed(signer: &PrivateKeySigner, selects_group: bool) -> B256 {
    let mut secret = [0u8; 32];
    secret.copy_from_slice(signer.credential().to_bytes().as_slice());
    for i in 0u16..4096 {
        let mut seed = B256::ZERO;
        seed.0[30..].copy_from_slice(&i.to_be_bytes());
        let (output, _) = vrf::prove(&secret, seed.as_slice()).expect("vrf");
        if (vrf::output_mod(&output, 10) == 0) == selects_group {
            return seed;
        }
    }
    panic!("no suitable sampling seed in range");
}

fn pending_task(task_id: B256) -> InferenceTask {
    InferenceTask {
        task_id,
        task_args: r#"{"prompt":"a lighthouse at dusk"}"#.to_owned(),
        task_type: TaskType::ImageGen,
        task_version: "3.0.0".to_owned(),
        task_size: 1,
        task_fee: 30,
        min_vram: 8,
        ..Default::default()
    }
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn single_task_runs_to_result_downloaded() {
    let seed = find_seed(&test_signer(), false);
    let chain = MockChainClient::new()
        .with_sampling_seed(seed)
        .with_auto_score_ready();
    let relay = MockRelayClient::new().with_artifact(b"png".to_vec());
    let h = harness(chain.clone(), relay.clone(), fast_config());

    let mut task = pending_task(B256::repeat_byte(0xaa));
    h.store.save(&mut task).await.unwrap();

    let cancel = CancellationToken::new();
    h.driver.process_with_retries(&mut task, &cancel).await;

    assert_eq!(task.status, TaskStatus::ResultDownloaded);
    let commitment = task.task_id_commitment.expect("commitment set");
    assert_eq!(
        commitment,
        task_id_commitment(&task.task_id, &task.nonce.expect("nonce set"))
    );
    assert_eq!(task.sampling_seed, Some(seed));
    assert!(task.sequence > 0);

    // no replication: one row, one ValidateSingle, no group call
    assert_eq!(h.store.get_group(task.task_id).await.unwrap().len(), 1);
    assert_eq!(chain.single_validations(), vec![commitment]);
    assert!(chain.group_validations().is_empty());
    assert_eq!(relay.uploads(), vec![commitment]);

    // one artifact under the commitment directory
    let artifact = h.sink.artifact_path(&task, 0).unwrap();
    assert_eq!(std::fs::read(artifact).unwrap(), b"png0".to_vec());
}

#[tokio::test]
async fn vrf_selected_task_forms_group_and_validates_once() {
    let signer = test_signer();
    let seed = find_seed(&signer, true);
    let group_key = B256::repeat_byte(0xbb);
    let chain = MockChainClient::new()
        .with_sampling_seed(seed)
        .with_auto_score_ready();
    let relay = MockRelayClient::new();
    let h = harness(chain.clone(), relay.clone(), fast_config());

    let mut parent = pending_task(group_key);
    h.store.save(&mut parent).await.unwrap();

    let cancel = CancellationToken::new();
    let mut workers = Vec::new();
    {
        let driver = h.driver.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            driver.process_with_retries(&mut parent, &cancel).await;
            parent
        }));
    }

    // the Created transition inserts the two replicas; run a worker
    // for each, the way the dispatcher would
    let store = h.store.clone();
    wait_until(|| {
        let store = store.clone();
        async move { store.get_group(group_key).await.unwrap().len() == 3 }
    })
    .await;

    for replica in h
        .store
        .get_group(group_key)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.status == TaskStatus::Pending)
    {
        let driver = h.driver.clone();
        let cancel = cancel.clone();
        workers.push(tokio::spawn(async move {
            let mut task = replica;
            driver.process_with_retries(&mut task, &cancel).await;
            task
        }));
    }

    for worker in workers {
        let task = worker.await.unwrap();
        assert_eq!(task.status, TaskStatus::ResultDownloaded);
    }

    // exactly one group validation across the whole lifetime
    assert_eq!(chain.group_validations().len(), 1);
    assert!(chain.single_validations().is_empty());

    let group = h.store.get_group(group_key).await.unwrap();
    assert_eq!(group.len(), 3);
    let mut commitments = HashSet::new();
    for member in &group {
        assert_eq!(member.sampling_seed, Some(seed));
        assert_eq!(member.vrf_proof, group[0].vrf_proof);
        assert_eq!(member.vrf_number, group[0].vrf_number);
        commitments.insert(member.task_id_commitment.expect("commitment"));
    }
    assert_eq!(commitments.len(), 3, "replica commitments are distinct");
}

#[tokio::test]
async fn aborted_task_skips_validation_and_download() {
    let seed = find_seed(&test_signer(), false);
    let chain = MockChainClient::new().with_sampling_seed(seed);
    let relay = MockRelayClient::new();
    let h = harness(chain.clone(), relay.clone(), fast_config());

    let mut task = pending_task(B256::repeat_byte(0xcc));
    h.store.save(&mut task).await.unwrap();
    let task_row_id = task.id;

    let cancel = CancellationToken::new();
    let worker = {
        let driver = h.driver.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            driver.process_with_retries(&mut task, &cancel).await;
            task
        })
    };

    // let the task reach the post-upload wait, then abort it on chain
    let relay_probe = relay.clone();
    wait_until(|| {
        let relay = relay_probe.clone();
        async move { !relay.uploads().is_empty() }
    })
    .await;
    let commitment = chain.created()[0];
    chain.abort(commitment, TaskAbortReason::Timeout);

    let task = worker.await.unwrap();
    assert_eq!(task.status, TaskStatus::EndAborted);
    assert_eq!(task.abort_reason, TaskAbortReason::Timeout);
    assert!(chain.single_validations().is_empty());
    assert!(chain.group_validations().is_empty());
    assert!(!h.sink.artifact_path(&task, 0).unwrap().exists());

    // the row is retained with the terminal diagnostics
    let row = h.store.get(task_row_id).await.unwrap();
    assert_eq!(row.status, TaskStatus::EndAborted);
    assert_eq!(row.abort_reason, TaskAbortReason::Timeout);
}

#[tokio::test]
async fn transient_create_revert_is_retried_to_success() {
    let seed = find_seed(&test_signer(), false);
    let chain = MockChainClient::new()
        .with_sampling_seed(seed)
        .with_auto_score_ready();
    let relay = MockRelayClient::new();
    let h = harness(chain.clone(), relay.clone(), fast_config());
    chain.queue_create_revert("nonce reused");

    let mut task = pending_task(B256::repeat_byte(0xdd));
    h.store.save(&mut task).await.unwrap();

    let cancel = CancellationToken::new();
    h.driver.process_with_retries(&mut task, &cancel).await;

    assert_eq!(task.status, TaskStatus::ResultDownloaded);
    // only the second, successful attempt registered the task
    assert_eq!(chain.created().len(), 1);
    assert_eq!(chain.created()[0], task.task_id_commitment.unwrap());
}

#[tokio::test]
async fn dispatcher_aborts_hung_task_at_deadline() {
    let seed = find_seed(&test_signer(), false);
    let chain = MockChainClient::new()
        .with_sampling_seed(seed)
        .with_auto_score_ready();
    let relay = MockRelayClient::new().with_hanging_uploads();
    let mut config = fast_config();
    config.task_deadline = Duration::from_millis(300);
    let h = harness(chain, relay, config);

    let mut task = pending_task(B256::repeat_byte(0xee));
    h.store.save(&mut task).await.unwrap();
    let task_row_id = task.id;

    let cancel = CancellationToken::new();
    let dispatcher_handle = {
        let driver = h.driver.clone();
        let store: Arc<dyn TaskStore> = h.store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            Dispatcher::new(driver, store).run(cancel).await;
        })
    };

    let store = h.store.clone();
    wait_until(|| {
        let store = store.clone();
        async move { store.get(task_row_id).await.unwrap().status == TaskStatus::EndAborted }
    })
    .await;

    cancel.cancel();
    dispatcher_handle.await.unwrap();
}

#[tokio::test]
async fn group_of_two_is_an_invariant_violation() {
    let seed = find_seed(&test_signer(), false);
    let chain = MockChainClient::new().with_sampling_seed(seed);
    let relay = MockRelayClient::new();
    let h = harness(chain.clone(), relay, fast_config());

    let group_key = B256::repeat_byte(0xf0);
    let mut tasks = Vec::new();
    for i in 1..=2u8 {
        let mut task = pending_task(group_key);
        task.task_id_commitment = Some(B256::repeat_byte(i));
        task.status = TaskStatus::ScoreReady;
        h.store.save(&mut task).await.unwrap();
        chain.create_task(&task).await.unwrap();
        chain.set_status(B256::repeat_byte(i), axon_lib::ChainTaskStatus::ScoreReady);
        tasks.push(task);
    }

    let error = h.driver.process_one_task(&mut tasks[0]).await.unwrap_err();
    assert!(matches!(
        error,
        DriverError::MalformedGroup { size: 2, .. }
    ));
}

#[tokio::test]
async fn client_tasks_settle_once_children_finish() {
    let store = InMemoryTaskDb::new();

    let client = store.get_or_create_client("client-1").await.unwrap();
    let mut succeeded = ClientTask {
        client_id: client.id,
        ..Default::default()
    };
    let mut failed = ClientTask {
        client_id: client.id,
        ..Default::default()
    };
    store.save_client_task(&mut succeeded).await.unwrap();
    store.save_client_task(&mut failed).await.unwrap();

    for (client_task_id, status) in [
        (succeeded.id, TaskStatus::ResultDownloaded),
        (succeeded.id, TaskStatus::EndAborted),
        (failed.id, TaskStatus::EndAborted),
    ] {
        let mut child = pending_task(B256::repeat_byte(0x01));
        child.client_id = client.id;
        child.client_task_id = client_task_id;
        child.status = status;
        store.save(&mut child).await.unwrap();
    }

    settle_finished_client_tasks(&store).await.unwrap();

    let succeeded = store.get_client_task(succeeded.id).await.unwrap();
    assert_eq!(succeeded.status, ClientTaskStatus::Success);
    assert_eq!(succeeded.failed_count, 1);
    assert_eq!(
        store.get_client_task(failed.id).await.unwrap().status,
        ClientTaskStatus::Failed
    );
}

#[tokio::test]
async fn running_client_tasks_are_left_alone() {
    let store = InMemoryTaskDb::new();
    let client = store.get_or_create_client("client-2").await.unwrap();
    let mut client_task = ClientTask {
        client_id: client.id,
        ..Default::default()
    };
    store.save_client_task(&mut client_task).await.unwrap();

    let mut child = pending_task(B256::repeat_byte(0x02));
    child.client_id = client.id;
    child.client_task_id = client_task.id;
    store.save(&mut child).await.unwrap();

    settle_finished_client_tasks(&store).await.unwrap();
    assert_eq!(
        store.get_client_task(client_task.id).await.unwrap().status,
        ClientTaskStatus::Running
    );
}
