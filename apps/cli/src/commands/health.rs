//! Health command implementation.

use super::Context;
use colored::Colorize;
use serde_json::json;

/// Execute the health command.
pub async fn execute(ctx: &Context, json_output: bool) -> anyhow::Result<()> {
    let service = ctx.start_service()?;
    let health = service.health().await;
    let cache = service.cache_stats();
    service.shutdown().await;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&json!({ "health": health, "cache": cache }))?);
        return Ok(());
    }

    println!("{}", "EDAForge Health".bold().cyan());
    println!();
    let ready = if health.ready { "✓ ready".green() } else { "✗ not ready".red() };
    println!("  Service:         {}", ready);
    println!("  Sessions active: {}", health.sessions_in_flight);
    println!("  Jobs queued:     {}", health.jobs_queued);
    println!("  Jobs running:    {}", health.jobs_running);
    println!("  Cache entries:   {}", health.cache_entries);
    println!("  Cache hits:      {}", cache.total_hits);
    println!("  Cache misses:    {}", cache.total_misses);
    Ok(())
}
