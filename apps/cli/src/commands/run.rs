//! Run command implementation.

use super::{Context, format_params, parse_inputs, parse_params};
use anyhow::bail;
use clap::ValueEnum;
use colored::Colorize;
use edaforge_orchestrator::{Job, JobRequest, JobStatus, Priority};

/// Scheduling priority accepted on the command line.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum PriorityArg {
    Batch,
    Normal,
    Interactive,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Batch => Self::Batch,
            PriorityArg::Normal => Self::Normal,
            PriorityArg::Interactive => Self::Interactive,
        }
    }
}

/// Execute the run command.
///
/// Submits one job, waits for it and prints its metrics. Fails when the job fails.
pub async fn execute(
    ctx: &Context,
    tool: &str,
    project: &str,
    params: &[String],
    inputs: &[String],
    priority: PriorityArg,
    json_output: bool,
) -> anyhow::Result<()> {
    let parameters = parse_params(params)?;
    let inputs = parse_inputs(inputs).await?;
    let service = ctx.start_service()?;

    let request = JobRequest::new(tool, parameters, project).with_priority(priority.into()).with_inputs(inputs);
    let outcome = match service.submit(request).await {
        Ok(job_id) => service.wait_for_job(&job_id).await,
        Err(e) => Err(e),
    };
    service.shutdown().await;
    let job = outcome?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&job)?);
    } else {
        print_job(&job);
    }

    if job.status == JobStatus::Failed {
        bail!("job {} failed: {}", job.job_id, job.reason.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

fn print_job(job: &Job) {
    let status = match job.status {
        JobStatus::Succeeded => job.status.to_string().green(),
        JobStatus::Failed => job.status.to_string().red(),
        _ => job.status.to_string().yellow(),
    };

    println!("{} {}", "Job".bold(), job.job_id.cyan());
    println!("  Tool:       {}", job.tool_name);
    println!("  Project:    {}", job.project_id);
    println!("  Parameters: {}", format_params(&job.parameters).dimmed());
    for (name, artifact) in &job.inputs.artifacts {
        println!("  Input:      {} {} {}", name, artifact.path, artifact.digest[..12.min(artifact.digest.len())].dimmed());
    }
    println!("  Status:     {}", status);
    if job.cache_hit {
        println!("  Cache:      {}", "hit".green());
    }
    if let Some(result) = &job.result {
        println!();
        println!("{}", "Metrics:".bold());
        for (name, value) in &result.metrics {
            println!("  {:<16} {:.4}", name, value);
        }
    }
    if let Some(reason) = &job.reason {
        println!("  Reason:     {}", reason.red());
    }
}
