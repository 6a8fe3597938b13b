use async_stream::stream;
use braid_sdk::prelude::*;
use braid_sdk::{HubConfig, MemoryAdapter, SdkError};
use futures::stream::{Stream, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_replicas: usize,
    pub edits_per_replica: usize,
    pub transactions: usize,
    pub redeliveries: usize,
    pub text_len: usize,
    pub entries_compacted: usize,
    pub converged: bool,
    pub total_time: Duration,
    pub tx_per_second: f64,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                          ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Replicas:        {:>30} ║", self.num_replicas);
        println!("║  Edits per Replica:         {:>30} ║", self.edits_per_replica);
        println!("║  Transactions Broadcast:    {:>30} ║", self.transactions);
        println!("║  Redelivered Batches:       {:>30} ║", self.redeliveries);
        println!("║  Final Text Length:         {:>30} ║", self.text_len);
        println!("║  Entries Compacted:         {:>30} ║", self.entries_compacted);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Transactions/Second:       {:>30.0} ║", self.tx_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn body() -> FieldPath {
    FieldPath::new("docs", "shared", "body")
}

fn tags() -> FieldPath {
    FieldPath::new("docs", "shared", "tags")
}

fn title() -> FieldPath {
    FieldPath::new("docs", "shared", "title")
}

/// Yields replica indices that get the whole history redelivered
fn redelivery_schedule(num_replicas: usize, rounds: usize, seed: u64) -> impl Stream<Item = usize> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..rounds {
            yield rng.gen_range(0..num_replicas);
        }
    }
}

/// One replica's editing session: random splices, key writes, title
/// changes and the occasional undo, syncing with peers now and then.
async fn edit_session(
    mut replica: Replica<MemoryAdapter>,
    edits: usize,
    seed: u64,
) -> Result<Replica<MemoryAdapter>, SdkError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let store_id = replica.store_id();

    for i in 0..edits {
        let roll: f64 = rng.gen();
        if roll < 0.6 {
            let len = replica.text(&body()).map(|t| t.chars().count()).unwrap_or(0);
            let index = rng.gen_range(0..=len);
            let remove = if len > index && rng.gen_bool(0.3) {
                rng.gen_range(1..=(len - index).min(3))
            } else {
                0
            };
            let letter = char::from(b'a' + (store_id % 26) as u8);
            let text: String = std::iter::repeat(letter).take(rng.gen_range(0..4)).collect();
            replica
                .transact(|c| c.splice_text(&body(), index, remove, &text))
                .await?;
        } else if roll < 0.8 {
            let key = format!("k{}", rng.gen_range(0..5));
            let value = rng.gen_range(0..100);
            let remove = rng.gen_bool(0.2);
            replica
                .transact(|c| {
                    if remove {
                        c.remove_key(&tags(), &key)
                    } else {
                        c.set_key(&tags(), &key, value)
                    }
                })
                .await?;
        } else if roll < 0.9 {
            replica
                .transact(|c| c.set(&title(), format!("title from {} #{}", store_id, i)))
                .await?;
        } else if replica.can_undo() {
            replica.undo().await?;
        }

        if rng.gen_bool(0.25) {
            replica.sync()?;
        }
        if i % 50 == 0 {
            tokio::task::yield_now().await;
        }
    }
    Ok(replica)
}

/// Run concurrent editing sessions over an in-memory hub, redeliver history
/// at random to exercise duplicate suppression, then check convergence and
/// compact once every replica has applied everything.
pub async fn simulate_editing(
    num_replicas: usize,
    edits_per_replica: usize,
    redelivery_rounds: usize,
    seed: u64,
) -> Result<SimulationStats, SdkError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Replicated Editing Simulation                       ║");
    println!("║  Replicas: {} | Edits/Replica: {} | Redeliveries: {} ║",
             num_replicas, edits_per_replica, redelivery_rounds);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();

    // Every channel must hold the full history plus redeliveries, since
    // nothing drains it until the replica syncs.
    let capacity = (num_replicas * edits_per_replica + 16) * (redelivery_rounds + 2);
    let hub = MemoryHub::new(HubConfig {
        channel_capacity: capacity,
    });

    let mut replicas = Vec::with_capacity(num_replicas);
    for _ in 0..num_replicas {
        let adapter = Arc::new(hub.adapter());
        replicas.push(Replica::connect(adapter, ReplicaConfig::default()).await?);
    }

    println!("\n[Phase 1/3] Concurrent editing...");

    let mut handles = vec![];
    for (idx, replica) in replicas.into_iter().enumerate() {
        let handle = tokio::spawn(edit_session(
            replica,
            edits_per_replica,
            seed.wrapping_add(idx as u64),
        ));
        handles.push(handle);
    }

    let mut replicas = Vec::with_capacity(num_replicas);
    for handle in handles {
        let replica = handle
            .await
            .map_err(|e| SdkError::Network(format!("editing task failed: {}", e)))??;
        replicas.push(replica);
    }

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Redelivering history...");

    let mut schedule = Box::pin(redelivery_schedule(num_replicas, redelivery_rounds, seed));
    let mut redeliveries = 0;
    while let Some(idx) = schedule.next().await {
        hub.redeliver(replicas[idx].store_id())
            .await
            .map_err(SdkError::from)?;
        redeliveries += 1;
    }
    for replica in replicas.iter_mut() {
        replica.sync()?;
    }

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Checking convergence and compacting...");

    let reference = replicas[0].snapshot();
    let converged = replicas.iter().all(|r| r.snapshot() == reference);

    let settled = replicas
        .iter()
        .map(|r| r.coordinator().version())
        .min()
        .unwrap_or(0);
    let store_ids: Vec<u32> = replicas.iter().map(|r| r.store_id()).collect();
    let mut entries_compacted = 0;
    for replica in replicas.iter_mut() {
        for store_id in &store_ids {
            replica.acknowledge(*store_id, settled);
        }
        entries_compacted += replica.compact()?.entries_dropped;
    }
    let still_converged = replicas.iter().all(|r| r.snapshot() == reference);

    let total_time = start.elapsed();
    let transactions = hub.history_len();
    let text_len = replicas[0]
        .text(&body())
        .map(|t| t.chars().count())
        .unwrap_or(0);
    info!(transactions, converged, entries_compacted, "simulation finished");

    println!("[Phase 3/3] ✓ Completed");

    Ok(SimulationStats {
        num_replicas,
        edits_per_replica,
        transactions,
        redeliveries,
        text_len,
        entries_compacted,
        converged: converged && still_converged,
        total_time,
        tx_per_second: transactions as f64 / total_time.as_secs_f64(),
    })
}

/// Repeat the simulation with a growing number of replicas
pub async fn simulate_scaling(max_replicas: usize, step_size: usize) -> Result<bool, SdkError> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Scaling Analysis - Convergence vs Replicas            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut all_converged = true;
    let mut current_replicas = step_size;
    while current_replicas <= max_replicas {
        let stats = simulate_editing(current_replicas, 50, 2, current_replicas as u64).await?;
        stats.print();
        all_converged &= stats.converged;
        current_replicas += step_size;
    }
    Ok(all_converged)
}
