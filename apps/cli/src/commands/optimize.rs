//! Optimize command implementation.

use super::{Context, format_params, parse_context, parse_numbers, parse_params};
use anyhow::bail;
use colored::Colorize;
use edaforge_orchestrator::{Event, EventType, OptimizationRequest, OptimizationSession, SessionStatus};

/// Arguments of the optimize command.
#[derive(Debug)]
pub struct OptimizeOptions {
    pub tool: String,
    pub project: String,
    pub targets: Vec<String>,
    pub params: Vec<String>,
    pub strategy: String,
    pub max_iterations: Option<u32>,
    pub tags: Vec<String>,
    pub attributes: Vec<String>,
    pub json: bool,
}

/// Execute the optimize command.
///
/// Streams progress while the session runs. Ctrl-C cancels the session.
pub async fn execute(ctx: &Context, options: OptimizeOptions) -> anyhow::Result<()> {
    let targets = parse_numbers(&options.targets)?;
    let initial = parse_params(&options.params)?;
    let context = parse_context(&options.tags, &options.attributes)?;

    let mut request = OptimizationRequest::new(&options.tool, &options.project, targets)
        .with_initial_params(initial)
        .with_strategy(&options.strategy)
        .with_context(context);
    if let Some(max_iterations) = options.max_iterations {
        request = request.with_max_iterations(max_iterations);
    }

    let service = ctx.start_service()?;
    let mut events = service.subscribe(&options.project);
    let session_id = match service.start_optimization(request).await {
        Ok(id) => id,
        Err(e) => {
            service.shutdown().await;
            return Err(e.into());
        }
    };
    if !options.json {
        println!("{} {}", "Optimization session".bold(), session_id.cyan());
    }

    let finished = {
        let wait = service.wait_for_session(&session_id);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                session = &mut wait => break session,
                Some(event) = events.recv() => {
                    if !options.json && event.event_type == EventType::Progress && event.payload["session_id"] == session_id.as_str() {
                        print_progress(&event);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    if service.cancel_optimization(&session_id).await {
                        eprintln!("{}", "Cancelling session...".yellow());
                    }
                }
            }
        }
    };
    service.disconnect(&events.connection_id);
    service.shutdown().await;
    let session = finished?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        print_summary(&session);
    }

    if session.status == SessionStatus::Failed {
        bail!("optimization failed: {}", session.reason.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

fn print_progress(event: &Event) {
    let payload = &event.payload;
    let iteration = payload["iteration"].as_u64().unwrap_or_default();
    let max = payload["max_iterations"].as_u64().unwrap_or_default();
    let score = payload["trial"]["score"].as_f64().unwrap_or_default();
    let best = payload["best_score"].as_f64().unwrap_or_default();
    let failed = !payload["trial"]["error"].is_null();

    let trial = if failed { "failed".red().to_string() } else { format!("{score:.4}") };
    println!("  [{iteration:>3}/{max}] trial {trial}  best {}", format!("{best:.4}").green());
}

fn print_summary(session: &OptimizationSession) {
    let status = match session.status {
        SessionStatus::Converged | SessionStatus::Exhausted => session.status.to_string().green(),
        SessionStatus::Failed => session.status.to_string().red(),
        _ => session.status.to_string().yellow(),
    };

    println!();
    println!("{}", "Result:".bold());
    println!("  Strategy:    {}", session.strategy);
    println!("  Status:      {}", status);
    if let Some(reason) = &session.reason {
        println!("  Reason:      {}", reason.dimmed());
    }
    println!("  Iterations:  {}/{}", session.iteration_count, session.max_iterations);
    println!("  Best score:  {:.4}", session.best_score);
    println!("  Best params: {}", format_params(&session.best_params));

    if let Some(best) = session.best_iteration.and_then(|i| session.trial_history.iter().find(|t| t.iteration == i)) {
        println!();
        println!("{}", "Best metrics:".bold());
        for (name, value) in &best.metrics {
            let target = session.target_metrics.get(name).map(|t| format!(" (target {t})")).unwrap_or_default();
            println!("  {:<16} {:.4}{}", name, value, target.dimmed());
        }
    }
}
