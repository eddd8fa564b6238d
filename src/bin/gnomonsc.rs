use clap::Parser;
use gnomon::{
    registrar::{Registrar, RegistrarConfig},
    rpc::{DaemonClient, WalletRpcClient},
    SEARCH_FILTER_SEPARATOR,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gnomonsc", author, version, about, long_about = Some("Gnomon SC Index Registration Service\n\n\
Poll a gnomon instance for new SCIDs and append them to the on-chain registry"))]
struct Args {
    /// Daemon RPC endpoint
    #[arg(long, default_value = "127.0.0.1:40402")]
    daemon_rpc_address: String,
    /// Wallet RPC endpoint issuing the registry calls
    #[arg(long, default_value = "127.0.0.1:40403")]
    wallet_rpc_address: String,
    /// Gnomon API to poll for indexed contracts
    #[arg(long, default_value = "127.0.0.1:8082")]
    gnomon_api_address: String,
    /// Blocks to wait between registry calls (minimum 2)
    #[arg(long, default_value_t = 10)]
    block_deploy_buffer: u64,
    /// ';;;'-separated patterns a candidate's code must match one of
    #[arg(long)]
    search_filter: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    info!("using daemon RPC endpoint {}", args.daemon_rpc_address);
    info!("using wallet RPC endpoint {}", args.wallet_rpc_address);
    info!("using gnomon API endpoint {}", args.gnomon_api_address);

    let search_filters = args
        .search_filter
        .map(|raw| {
            raw.split(SEARCH_FILTER_SEPARATOR)
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    match search_filters.is_empty() {
        false => info!("using search filters: {search_filters:?}"),
        true => info!("no search filter defined.. grabbing all"),
    }

    let daemon = Arc::new(DaemonClient::new(args.daemon_rpc_address));
    let wallet = Arc::new(WalletRpcClient::new(&args.wallet_rpc_address));
    let config = RegistrarConfig {
        gnomon_api: args.gnomon_api_address,
        block_deploy_buffer: args.block_deploy_buffer,
        search_filters,
        ..RegistrarConfig::default()
    };

    let mut registrar = Registrar::new(daemon, wallet, config).await?;
    registrar.run().await
}
