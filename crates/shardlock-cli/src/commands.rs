use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use shardlock_graph::{codec, EntityGraph, MaxAgePolicy, RelationKind};
use shardlock_mutex::{LeaseMutex, MutexTable};
use shardlock_store::{BlobStore, FsBlobStore, InMemoryBlobStore, InMemoryLockStore, LockStore};
use shardlock_sync::{GraphSynchronizer, PersistOutcome, SyncConfig, SyncError};
use shardlock_types::{Address, ChainId, Clock, HolderId, SystemClock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    match cli.command {
        Command::Simulate(args) => cmd_simulate(args, config, cli.format).await,
        Command::Lock(args) => cmd_lock(args, config, cli.format).await,
        Command::Inspect(args) => cmd_inspect(args, config, cli.format).await,
        Command::Config(_) => cmd_config(config, cli.format),
    }
}

// ---------------------------------------------------------------------------
// simulate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SimulationReport {
    merged: usize,
    merge_failed: usize,
    lock_failures: usize,
    submitted_edges: BTreeSet<(Address, Address)>,
    nodes: usize,
    edges: usize,
    elapsed: Duration,
}

/// One shard's delta for one cycle: `edges` random relations over `pool`.
///
/// Roughly a third of the relations are also added in reverse, so the
/// shared graph ends up with some mutual clusters.
fn random_delta(rng: &mut StdRng, pool: &[Address], edges: usize, at: DateTime<Utc>) -> EntityGraph {
    let mut delta = EntityGraph::new();
    if pool.len() < 2 {
        return delta;
    }
    for _ in 0..edges {
        let from = pool[rng.gen_range(0..pool.len())];
        let to = pool[rng.gen_range(0..pool.len())];
        if from == to || !delta.observe_address(from, at) || !delta.observe_address(to, at) {
            continue;
        }
        let kind = match rng.gen_range(0..3) {
            0 => RelationKind::Funding,
            1 => RelationKind::Transfer,
            _ => RelationKind::ContractCreation,
        };
        let tx = format!("0x{:016x}", rng.gen::<u64>());
        delta.add_relation(from, to, kind.clone(), Some(tx.as_str()));
        if rng.gen_bool(0.33) {
            delta.add_relation(to, from, kind, Some(tx.as_str()));
        }
    }
    delta
}

fn address_pool(rng: &mut StdRng, size: usize) -> Vec<Address> {
    (0..size).map(|_| Address::from_bytes(rng.gen())).collect()
}

async fn simulate(
    args: &SimulateArgs,
    mut config: SyncConfig,
    lock_store: Arc<dyn LockStore>,
    blob_store: Arc<dyn BlobStore>,
) -> anyhow::Result<SimulationReport> {
    if let Some(retry_ms) = args.retry_ms {
        config.retry_interval_ms = retry_ms;
    }
    let chain = ChainId::new(args.chain);
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    let pool = address_pool(&mut rng, (args.edges * 2).max(4));
    info!(seed, shards = args.shards, rounds = args.rounds, "starting simulation");

    let started = Instant::now();
    let cancel = CancellationToken::new();
    let mut tasks = Vec::with_capacity(args.shards);
    for shard in 0..args.shards {
        let sync = GraphSynchronizer::new(lock_store.clone(), blob_store.clone(), config.clone())?
            .with_holder(HolderId::new(format!("shard-{shard}"))?);
        let mut shard_rng = StdRng::seed_from_u64(seed.wrapping_add(shard as u64 + 1));
        let pool = pool.clone();
        let cancel = cancel.clone();
        let (rounds, edges) = (args.rounds, args.edges);

        tasks.push(tokio::spawn(async move {
            let clock = SystemClock;
            let policy = MaxAgePolicy::default_for(Arc::new(SystemClock));
            let mut outcomes = Vec::with_capacity(rounds);
            for _ in 0..rounds {
                let delta = random_delta(&mut shard_rng, &pool, edges, clock.now_utc());
                let submitted: Vec<(Address, Address)> =
                    delta.edges().map(|(from, to, _)| (*from, *to)).collect();
                let outcome = sync.persist(&delta, chain, &policy, &cancel).await;
                outcomes.push((submitted, outcome));
            }
            outcomes
        }));
    }

    let mut report = SimulationReport::default();
    for task in tasks {
        for (submitted, outcome) in task.await? {
            match outcome {
                Ok(PersistOutcome::Merged { .. }) => {
                    report.merged += 1;
                    report.submitted_edges.extend(submitted);
                }
                Ok(PersistOutcome::MergeFailed { .. }) => report.merge_failed += 1,
                Err(SyncError::LockNotAcquired { .. }) => report.lock_failures += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    let reader = GraphSynchronizer::new(lock_store, blob_store, config)?;
    let shared = reader.load(chain).await?;
    report.nodes = shared.node_count();
    report.edges = shared.edge_count();
    report.elapsed = started.elapsed();

    let lost = report
        .submitted_edges
        .iter()
        .filter(|(from, to)| !shared.contains_edge(from, to))
        .count();
    if lost > 0 {
        bail!("{lost} merged edges missing from the shared graph");
    }
    Ok(report)
}

async fn cmd_simulate(args: SimulateArgs, config: SyncConfig, format: OutputFormat) -> anyhow::Result<()> {
    let lock_store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let blob_store: Arc<dyn BlobStore> = match &args.blob_dir {
        Some(dir) => Arc::new(FsBlobStore::new(dir)),
        None => Arc::new(InMemoryBlobStore::new()),
    };
    let report = simulate(&args, config.clone(), lock_store, blob_store).await?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "shards": args.shards,
                "rounds": args.rounds,
                "merged": report.merged,
                "merge_failed": report.merge_failed,
                "lock_failures": report.lock_failures,
                "nodes": report.nodes,
                "edges": report.edges,
                "elapsed_ms": report.elapsed.as_millis() as u64,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} shards x {} rounds on chain {}",
                "✓".green().bold(),
                args.shards,
                args.rounds,
                args.chain.to_string().yellow()
            );
            println!("  Merged: {}", report.merged.to_string().green());
            if report.merge_failed > 0 {
                println!("  Merge failures: {}", report.merge_failed.to_string().red());
            }
            if report.lock_failures > 0 {
                println!("  Lock not acquired: {}", report.lock_failures.to_string().red());
            }
            println!("  Shared graph: {} nodes, {} edges", report.nodes.to_string().bold(), report.edges.to_string().bold());
            println!("  Elapsed: {:?}", report.elapsed);
            if let Some(dir) = &args.blob_dir {
                println!("  Blob: {}", dir.join(config.blob_key(ChainId::new(args.chain))).display().to_string().cyan());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// lock
// ---------------------------------------------------------------------------

async fn cmd_lock(args: LockArgs, config: SyncConfig, format: OutputFormat) -> anyhow::Result<()> {
    let store: Arc<dyn LockStore> = Arc::new(InMemoryLockStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let table = MutexTable::new(store, clock, config.resource_prefix.clone())
        .with_ttl_minutes(config.lock_ttl_minutes);
    let lease = Duration::from_millis(args.lease_ms);

    let a = LeaseMutex::new(table.clone(), args.name.clone(), HolderId::new("A")?, lease)?;
    let b = LeaseMutex::new(table, args.name.clone(), HolderId::new("B")?, lease)?;

    let mut steps = Vec::new();
    steps.push(("A", "lock", a.lock().await?));
    steps.push(("B", "lock", b.lock().await?));
    tokio::time::sleep(lease + Duration::from_millis(100)).await;
    steps.push(("B", "lock after lease", b.lock().await?));
    steps.push(("A", "release", a.release().await?));
    steps.push(("B", "release", b.release().await?));
    let record = b.raw_lock().await?;

    match format {
        OutputFormat::Json => {
            let value = json!({
                "lock": args.name,
                "lease_ms": args.lease_ms,
                "steps": steps
                    .iter()
                    .map(|(holder, action, ok)| json!({"holder": holder, "action": action, "ok": ok}))
                    .collect::<Vec<_>>(),
                "final_holder": record.as_ref().map(|r| r.holder.clone()),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Lock {} with {}ms lease", args.name.yellow().bold(), args.lease_ms);
            for (holder, action, ok) in &steps {
                let mark = if *ok { "✓".green() } else { "✗".red() };
                println!("  {} {} {}", mark, holder.bold(), action);
            }
            if let Some(record) = record {
                println!("  Row holder: {}", record.holder.cyan());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct GraphSummary {
    nodes: usize,
    edges: usize,
    /// Edges whose reverse is also present, counted once per pair.
    mutual_pairs: usize,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
}

fn summarize(graph: &EntityGraph) -> GraphSummary {
    let mutual_pairs = graph
        .edges()
        .filter(|(from, to, _)| from < to && graph.contains_edge(to, from))
        .count();
    GraphSummary {
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        mutual_pairs,
        first_seen: graph.nodes().map(|(_, info)| info.first_seen).min(),
        last_seen: graph.nodes().map(|(_, info)| info.last_seen).max(),
    }
}

async fn cmd_inspect(args: InspectArgs, config: SyncConfig, format: OutputFormat) -> anyhow::Result<()> {
    let chain = ChainId::new(args.chain);
    let blob_key = config.blob_key(chain);
    let store = FsBlobStore::new(&args.blob_dir);
    let Some(body) = store.get_object(&blob_key).await? else {
        bail!("no shared graph at {}", args.blob_dir.join(&blob_key).display());
    };
    let graph = codec::decode(&body).with_context(|| format!("decoding {blob_key}"))?;
    let summary = summarize(&graph);

    let cluster = match &args.address {
        Some(address) => {
            let address: Address = address.parse()?;
            Some((address, graph.cluster_of(&address)))
        }
        None => None,
    };

    match format {
        OutputFormat::Json => {
            let mut value = json!({
                "blob_key": blob_key,
                "size_kb": body.len() as f64 / 1024.0,
                "nodes": summary.nodes,
                "edges": summary.edges,
                "mutual_pairs": summary.mutual_pairs,
                "first_seen": summary.first_seen.map(|t| t.to_rfc3339()),
                "last_seen": summary.last_seen.map(|t| t.to_rfc3339()),
            });
            if let Some((address, members)) = &cluster {
                value["cluster"] = json!({
                    "address": address.to_hex(),
                    "members": members.iter().map(Address::to_hex).collect::<Vec<_>>(),
                });
            }
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Shared graph {} ({:.2} KB)", blob_key.cyan(), body.len() as f64 / 1024.0);
            println!("  Nodes: {}", summary.nodes.to_string().bold());
            println!("  Edges: {} ({} mutual pairs)", summary.edges.to_string().bold(), summary.mutual_pairs);
            if let (Some(first), Some(last)) = (summary.first_seen, summary.last_seen) {
                println!("  Seen: {} .. {}", first.to_rfc3339().dimmed(), last.to_rfc3339().dimmed());
            }
            if let Some((address, members)) = &cluster {
                println!("Cluster of {}: {} members", address.to_hex().yellow(), members.len());
                for member in members {
                    println!("  {}", member.to_hex());
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config(config: SyncConfig, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&json!({
            "resource_prefix": config.resource_prefix,
            "table_name": config.table_name,
            "graph_key": config.graph_key,
            "max_attempts": config.max_attempts,
            "retry_interval_ms": config.retry_interval_ms,
            "lease_duration_ms": config.lease_duration_ms,
            "lock_ttl_minutes": config.lock_ttl_minutes,
        }))?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}
