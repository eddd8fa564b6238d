mod common;

use common::*;
use gnomon::{
    block::store::{ChainStore, TxCounterKind},
    indexer::{self, Indexer, IndexerConfig, RunMode},
    sc::{store::ScStore, ScMethod, Scid},
    store::memory::MemoryStore,
    BOOTSTRAP_SCID,
};
use std::{sync::Arc, time::Duration};

const FILTER: &str = "Function InputStr";

fn config(start_topoheight: u64, search_filter: Option<&str>) -> IndexerConfig {
    IndexerConfig {
        start_topoheight,
        search_filter: search_filter.map(str::to_string),
        run_mode: RunMode::Daemon,
        mbl_capture: false,
        close_on_disconnect: false,
        shutdown_drain: Duration::from_millis(50),
    }
}

async fn run_to_catchup(
    store: Arc<MemoryStore>,
    node: Arc<MockNode>,
    config: IndexerConfig,
) -> anyhow::Result<()> {
    let drain = config.shutdown_drain;
    let mut indexer = Indexer::new(Arc::clone(&store), node, config);
    let progress = indexer.progress();
    let worker = tokio::spawn(async move { indexer.start().await });

    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while !progress.caught_up() {
        anyhow::ensure!(
            std::time::Instant::now() < deadline,
            "indexer did not catch up in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    indexer::shutdown(&progress, &*store, drain).await?;
    worker.await??;
    Ok(())
}

/// A filtered deploy followed by an invocation yields the owner, two
/// invocation rows, two snapshots and both interaction heights.
#[tokio::test]
async fn deploy_then_invoke() -> anyhow::Result<()> {
    let node = MockNode::new(101);
    let scid_a = "a1".repeat(32);

    let t1 = install_tx("Function InputStr(input String) Uint64", 2);
    node.put_tx(&scid_a, &t1, "deto1owner", vec![vec!["deto1owner".to_string()]]);
    node.put_block(100, block_with_txs(100, vec![scid_a.clone()]));

    let t2 = invoke_tx(&scid_a, "Bar");
    node.put_tx("txinvoke", &t2, "deto1caller", vec![vec!["deto1caller".to_string()]]);
    node.put_block(101, block_with_txs(101, vec!["txinvoke".to_string()]));

    node.set_sc_vars(&scid_a, &[("var1", "10")]);

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(100, Some(FILTER))).await?;

    let scid = Scid(scid_a);
    assert_eq!(store.get_owner(&scid)?, Some("deto1owner".to_string()));

    let invokes = store.get_all_invokes(&scid)?;
    assert_eq!(invokes.len(), 2);
    assert_eq!(invokes[0].method, ScMethod::InstallSc);
    assert_eq!(invokes[1].method, ScMethod::ScInvoke);
    assert_eq!(invokes[1].entrypoint, "Bar");
    assert_eq!(invokes[1].sender, "deto1caller");

    assert!(!store.get_sc_vars(&scid, 100)?.is_empty());
    assert!(!store.get_sc_vars(&scid, 101)?.is_empty());
    assert_eq!(
        store.get_interaction_heights(&scid)?,
        vec![(ScMethod::InstallSc, 100), (ScMethod::ScInvoke, 101)],
    );
    assert!(store.get_checkpoint()?.unwrap_or_default() >= 101);
    Ok(())
}

/// Booting against a pruned node lands exactly on the pruning boundary and
/// indexes every block from there.
#[tokio::test]
async fn pruned_node_boot_finds_the_boundary() -> anyhow::Result<()> {
    let node = MockNode::new(20_000);
    node.set_pruned_below(9_500);

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), Arc::clone(&node), config(1, None)).await?;

    let fetches = node.block_fetches();
    assert_eq!(fetches.iter().min(), Some(&9_500));
    // nothing between the boundary and the head is skipped
    let mut sorted = fetches.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted.len(), (9_500..=20_000).count());
    assert!(store.get_checkpoint()?.unwrap_or_default() >= 20_000);
    Ok(())
}

/// Deploys that miss the filter leave no trace.
#[tokio::test]
async fn filter_miss_is_ignored() -> anyhow::Result<()> {
    let node = MockNode::new(51);
    let scid_b = "b2".repeat(32);

    let t1 = install_tx("Function Unrelated() Uint64", 2);
    node.put_tx(&scid_b, &t1, "deto1owner", vec![]);
    node.put_block(50, block_with_txs(50, vec![scid_b.clone()]));
    node.set_sc_vars(&scid_b, &[("var1", "10")]);

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(50, Some(FILTER))).await?;

    let scid = Scid(scid_b);
    assert_eq!(store.get_owner(&scid)?, None);
    assert!(store.get_all_invokes(&scid)?.is_empty());
    assert!(store.get_sc_vars(&scid, 50)?.is_empty());
    assert_eq!(store.get_tx_count(TxCounterKind::Normal)?, 0);
    Ok(())
}

/// A matching deploy whose variable fetch comes back empty is recorded as
/// invalid, not adopted.
#[tokio::test]
async fn empty_vars_deploy_is_invalid() -> anyhow::Result<()> {
    let node = MockNode::new(51);
    let scid_c = "c3".repeat(32);

    let t1 = install_tx("Function InputStr(input String) Uint64", 2);
    node.put_tx(&scid_c, &t1, "deto1owner", vec![]);
    node.put_block(50, block_with_txs(50, vec![scid_c.clone()]));
    // no variables planted: the deploy never landed

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(50, Some(FILTER))).await?;

    let scid = Scid(scid_c);
    assert_eq!(store.get_invalid_deploy(&scid)?, Some(500));
    assert_eq!(store.get_owner(&scid)?, None);
    assert!(store.get_all_invokes(&scid)?.is_empty());
    Ok(())
}

/// Counters accumulate across blocks instead of being replaced.
#[tokio::test]
async fn tx_counters_accumulate() -> anyhow::Result<()> {
    use gnomon::block::transaction::TransactionKind;

    let node = MockNode::new(11);
    let mut hashes_10 = vec![];
    for (i, kind) in [
        TransactionKind::Registration,
        TransactionKind::Registration,
        TransactionKind::Burn,
        TransactionKind::Normal,
        TransactionKind::Normal,
        TransactionKind::Normal,
    ]
    .into_iter()
    .enumerate()
    {
        let txid = format!("blk10-{i}");
        node.put_tx(&txid, &plain_tx(kind), "", vec![]);
        hashes_10.push(txid);
    }
    node.put_block(10, block_with_txs(10, hashes_10));

    let mut hashes_11 = vec![];
    for (i, kind) in [
        TransactionKind::Registration,
        TransactionKind::Normal,
        TransactionKind::Normal,
    ]
    .into_iter()
    .enumerate()
    {
        let txid = format!("blk11-{i}");
        node.put_tx(&txid, &plain_tx(kind), "", vec![]);
        hashes_11.push(txid);
    }
    node.put_block(11, block_with_txs(11, hashes_11));

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(10, None)).await?;

    assert_eq!(store.get_tx_count(TxCounterKind::Registration)?, 3);
    assert_eq!(store.get_tx_count(TxCounterKind::Burn)?, 1);
    assert_eq!(store.get_tx_count(TxCounterKind::Normal)?, 5);
    Ok(())
}

/// Normal transfers with a contract payload are recorded per ring member.
#[tokio::test]
async fn normal_tx_with_scid_keyed_by_ring_member() -> anyhow::Result<()> {
    let node = MockNode::new(31);
    let scid_d = "d4".repeat(32);

    let tx = normal_tx_with_scid(&scid_d);
    node.put_tx(
        "txnorm",
        &tx,
        "",
        vec![vec!["deto1m1".to_string(), "deto1m2".to_string()]],
    );
    node.put_block(30, block_with_txs(30, vec!["txnorm".to_string()]));

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(30, None)).await?;

    for addr in ["deto1m1", "deto1m2"] {
        let records = store.get_normal_txs_by_addr(addr)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scid.0, scid_d);
        assert_eq!(records[0].height, 30);
    }
    Ok(())
}

/// An invocation against a contract deployed before indexing began adopts
/// it with a blank owner; one without on-chain state is skipped silently.
#[tokio::test]
async fn late_discovery_adopts_only_live_contracts() -> anyhow::Result<()> {
    let node = MockNode::new(61);
    let live = "e5".repeat(32);
    let dead = "f6".repeat(32);

    node.put_tx("txlive", &invoke_tx(&live, "Ping"), "deto1x", vec![]);
    node.put_tx("txdead", &invoke_tx(&dead, "Ping"), "deto1x", vec![]);
    node.put_block(
        60,
        block_with_txs(60, vec!["txlive".to_string(), "txdead".to_string()]),
    );
    node.set_sc_vars(&live, &[("status", "ok")]);

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(60, Some(FILTER))).await?;

    let live = Scid(live);
    assert_eq!(store.get_owner(&live)?, Some(String::new()));
    assert_eq!(store.get_all_invokes(&live)?.len(), 1);
    assert_eq!(
        store.get_interaction_heights(&live)?,
        vec![(ScMethod::ScInvoke, 60)],
    );

    let dead = Scid(dead);
    assert_eq!(store.get_owner(&dead)?, None);
    assert!(store.get_all_invokes(&dead)?.is_empty());
    Ok(())
}

/// A restart resumes from the stored checkpoint without duplicating rows.
#[tokio::test]
async fn restart_resumes_from_checkpoint() -> anyhow::Result<()> {
    let node = MockNode::new(101);
    let scid_a = "a7".repeat(32);

    let t1 = install_tx("Function InputStr(input String) Uint64", 2);
    node.put_tx(&scid_a, &t1, "deto1owner", vec![]);
    node.put_block(100, block_with_txs(100, vec![scid_a.clone()]));
    node.put_tx("txinvoke", &invoke_tx(&scid_a, "Bar"), "deto1caller", vec![]);
    node.put_block(101, block_with_txs(101, vec!["txinvoke".to_string()]));
    node.set_sc_vars(&scid_a, &[("var1", "10")]);

    let store = Arc::new(MemoryStore::new());
    run_to_catchup(
        Arc::clone(&store),
        Arc::clone(&node),
        config(100, Some(FILTER)),
    )
    .await?;
    let checkpoint = store.get_checkpoint()?.unwrap_or_default();
    assert!(checkpoint >= 101);

    // second run starts from 1 but picks the checkpoint back up
    run_to_catchup(Arc::clone(&store), node, config(1, Some(FILTER))).await?;

    let scid = Scid(scid_a);
    assert_eq!(store.get_all_invokes(&scid)?.len(), 2);
    assert_eq!(store.get_owner(&scid)?, Some("deto1owner".to_string()));
    assert!(store.get_checkpoint()?.unwrap_or_default() >= checkpoint);
    Ok(())
}

/// The genesis-era contract is seeded when no filter is configured.
#[tokio::test]
async fn bootstrap_contract_is_seeded() -> anyhow::Result<()> {
    let node = MockNode::new(11);
    let store = Arc::new(MemoryStore::new());
    run_to_catchup(Arc::clone(&store), node, config(10, None)).await?;

    assert_eq!(
        store.get_owner(&Scid::from(BOOTSTRAP_SCID))?,
        Some(String::new())
    );
    Ok(())
}

/// Miniblock capture stores the details carried by each applied block.
#[tokio::test]
async fn miniblock_capture_is_optional() -> anyhow::Result<()> {
    let node = MockNode::new(21);
    node.put_block(20, block_with_txs(20, vec![]));

    let store = Arc::new(MemoryStore::new());
    let config = IndexerConfig {
        mbl_capture: true,
        ..config(20, None)
    };
    run_to_catchup(Arc::clone(&store), node, config).await?;

    let details = store.get_miniblock_details(&common::blid(20).as_str().into())?;
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].miner, "deto1miner");
    Ok(())
}
