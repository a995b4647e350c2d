//! Strategies command implementation.

use colored::Colorize;
use edaforge_orchestrator::optimizer::list_strategies;

/// Execute the strategies command.
pub fn execute(json_output: bool) -> anyhow::Result<()> {
    let strategies = list_strategies();
    if json_output {
        println!("{}", serde_json::to_string_pretty(&strategies)?);
        return Ok(());
    }

    println!("{}", "Optimization strategies".bold().cyan());
    println!();
    for strategy in strategies {
        println!("  {:<18} {}", strategy.name.green(), strategy.description);
    }
    Ok(())
}
