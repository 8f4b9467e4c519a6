use anyhow::Result;

use operations_controller::runtime::initialization::initialize;
use operations_controller::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize the controller runtime
    let init_result = initialize().await?;

    // Run the watch loop
    run_watch_loop(
        init_result.operations,
        init_result.reconciler,
        init_result.config.max_concurrent_reconciles,
    )
    .await?;

    Ok(())
}
