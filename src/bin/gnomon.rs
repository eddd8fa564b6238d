use clap::Parser;
use gnomon::{
    indexer::{self, Indexer, IndexerConfig, RunMode},
    rpc::DaemonClient,
    store::{db_directory, IndexerStore},
};
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gnomon", author, version, about, long_about = Some("Gnomon\n\n\
Index a DERO-like blockchain for smart contract deployments and invocations"))]
struct Args {
    /// Daemon RPC endpoint to index from
    #[arg(long, default_value = "127.0.0.1:40402")]
    daemon_rpc_address: String,
    /// Start indexing at a topoheight other than 1 (pruned db etc.)
    #[arg(long, default_value_t = 1)]
    start_topoheight: u64,
    /// Only index contracts whose code contains this string; unset grabs all
    #[arg(long)]
    search_filter: Option<String>,
    /// daemon indexes from the chain, wallet from wallet tx history
    #[arg(long, default_value = "daemon")]
    runmode: String,
    /// Store miniblock details for every indexed block
    #[arg(long, default_value_t = false)]
    enable_miniblock_lookup: bool,
    /// Shut down after repeated daemon connection failures
    #[arg(long, default_value_t = false)]
    close_on_disconnect: bool,
    /// Directory the database tree is created under
    #[arg(long, default_value = ".")]
    db_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let run_mode: RunMode = args.runmode.parse()?;

    info!("using daemon RPC endpoint {}", args.daemon_rpc_address);
    match &args.search_filter {
        Some(filter) => info!("using search filter: {filter}"),
        None => info!("no search filter defined.. grabbing all"),
    }

    let db_dir = db_directory(&args.db_dir, args.search_filter.as_deref());
    let store = Arc::new(IndexerStore::new(&db_dir)?);
    let client = Arc::new(DaemonClient::new(args.daemon_rpc_address));

    let config = IndexerConfig {
        start_topoheight: args.start_topoheight,
        search_filter: args.search_filter,
        run_mode,
        mbl_capture: args.enable_miniblock_lookup,
        close_on_disconnect: args.close_on_disconnect,
        ..IndexerConfig::default()
    };
    let drain = config.shutdown_drain;
    let mut indexer = Indexer::new(Arc::clone(&store), client, config);
    let progress = indexer.progress();
    let worker = tokio::spawn(async move { indexer.start().await });

    tokio::signal::ctrl_c().await?;
    info!(
        "putting gnomes to sleep, this will take ~{}s...",
        drain.as_secs()
    );
    indexer::shutdown(&progress, &*store, drain).await?;
    worker.await??;
    Ok(())
}
