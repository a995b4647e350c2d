//! Recommend command implementation.

use super::{Context, format_params, parse_context};
use colored::Colorize;

/// Execute the recommend command.
pub async fn execute(
    ctx: &Context,
    tool: &str,
    tags: &[String],
    attributes: &[String],
    limit: usize,
    json_output: bool,
) -> anyhow::Result<()> {
    let context = parse_context(tags, attributes)?;
    let service = ctx.start_service()?;
    let ranked = service.get_recommendations(tool, &context, limit).await;
    service.shutdown().await;
    let recommendations = ranked?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&recommendations)?);
        return Ok(());
    }

    if recommendations.is_empty() {
        println!("{}", format!("No templates saved for {tool}").yellow());
        println!("  {}", format!("Save one with: edaforge template save {tool} <name> -p NAME=VALUE").dimmed());
        return Ok(());
    }

    println!("{}", format!("Templates for {tool}").bold().cyan());
    for rec in &recommendations {
        println!(
            "  {:<24} {:>5.1}%  {}",
            rec.template.name.green(),
            rec.similarity * 100.0,
            format_params(&rec.template.parameters).dimmed()
        );
    }
    Ok(())
}
