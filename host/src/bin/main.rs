use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use axon_chain::{ChainClient, RegistryClient};
use axon_driver::{client_tasks, Dispatcher, DriverConfig, ResultSink, TaskDriver};
use axon_host::{parse_opts, server::serve, AppState};
use axon_lib::ether::wei_to_ether;
use axon_relay::{HttpRelayClient, RelayClient};
use axon_taskdb::{InMemoryTaskDb, TaskStore};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

const CLIENT_TASK_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let opts = parse_opts()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&opts.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let signer: PrivateKeySigner = opts
        .private_key
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid operator private key"))?;
    let registry: Address = opts.registry_address.parse()?;
    let rpc_url: Url = opts.rpc_url.parse()?;
    let relay_url: Url = opts.relay_url.parse()?;

    let chain_client = RegistryClient::new(rpc_url, registry, signer.clone());
    let balance = chain_client.balance().await?;
    info!("Operator balance: {:.6} ETH", wei_to_ether(balance));
    if balance.is_zero() {
        anyhow::bail!("operator account has no funds to pay task fees");
    }

    let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskDb::new());
    let chain: Arc<dyn ChainClient> = Arc::new(chain_client);
    let relay: Arc<dyn RelayClient> = Arc::new(HttpRelayClient::new(relay_url, signer.clone()));
    let sink = ResultSink::new(&opts.data_dir);
    let driver = Arc::new(TaskDriver::new(
        store.clone(),
        chain,
        relay,
        signer,
        sink.clone(),
        DriverConfig::default(),
    ));

    let cancel = CancellationToken::new();
    {
        let dispatcher = Dispatcher::new(driver.clone(), store.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await });
    }
    {
        let store = store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            client_tasks::run_client_task_monitor(store, CLIENT_TASK_INTERVAL, cancel).await;
        });
    }
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutting down");
                cancel.cancel();
            }
        });
    }

    let state = AppState { store, sink };
    serve(state, &opts.address).await
}
