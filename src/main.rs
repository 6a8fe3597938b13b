use simulation::{simulate_editing, simulate_scaling};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICATED EDITING SIMULATIONS                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let mut all_converged = true;

    // Small scale, no redelivery
    let stats = simulate_editing(3, 100, 0, 7).await?;
    stats.print();
    all_converged &= stats.converged;

    // Small scale with heavy redelivery
    let stats = simulate_editing(4, 100, 6, 11).await?;
    stats.print();
    all_converged &= stats.converged;

    // Medium scale
    let stats = simulate_editing(8, 300, 3, 23).await?;
    stats.print();
    all_converged &= stats.converged;

    all_converged &= simulate_scaling(12, 4).await?;

    if !all_converged {
        return Err("replicas diverged".into());
    }
    println!("\n✓ All simulations converged!");
    Ok(())
}
