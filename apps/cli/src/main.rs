//! EDAForge CLI - command-line interface for EDA tool orchestration
//!
//! This CLI provides an `edaforge` command that submits tool runs, drives
//! parameter optimization sessions and manages parameter templates.

mod commands;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{health, optimize, recommend, run, strategies, template};

/// EDAForge CLI - orchestration and parameter optimization for EDA tools
#[derive(Parser, Debug)]
#[command(
    name = "edaforge",
    author,
    version,
    about = "EDAForge - EDA tool orchestration and parameter optimization",
    long_about = "EDAForge runs EDA tools (verilator, yosys, nextpnr, ...) through a bounded worker pool with result caching,\nand tunes their parameters toward target metrics."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Workspace directory holding `.edaforge/` (defaults to the current directory)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    /// Use the built-in simulated tool runner instead of external executables
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one tool job and wait for it
    ///
    /// Parameters are validated against the tool's declared options before
    /// the job is queued. Input files are hashed so the job's cache key
    /// follows their contents. The result cache lives for one invocation.
    Run {
        /// Tool name (verilator, iverilog, yosys, nextpnr, openroad)
        tool: String,

        /// Project identifier
        #[arg(long, default_value = "default")]
        project: String,

        /// Tool parameter as NAME=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Input file as NAME=PATH (repeatable)
        #[arg(short, long = "input", value_name = "NAME=PATH")]
        inputs: Vec<String>,

        /// Scheduling priority
        #[arg(long, value_enum, default_value_t = run::PriorityArg::Normal)]
        priority: run::PriorityArg,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Optimize tool parameters toward target metrics
    Optimize {
        /// Tool name
        tool: String,

        /// Project identifier
        #[arg(long)]
        project: String,

        /// Target metric as NAME=VALUE (repeatable, at least one)
        #[arg(short, long = "target", value_name = "NAME=VALUE", required = true)]
        targets: Vec<String>,

        /// Initial parameter as NAME=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Strategy (bayesian, transfer_learning, ensemble)
        #[arg(long, default_value = "bayesian")]
        strategy: String,

        /// Iteration budget (defaults to the configured value)
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Project tag used for similarity (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Numeric project attribute as NAME=VALUE (repeatable)
        #[arg(long = "attr", value_name = "NAME=VALUE")]
        attributes: Vec<String>,

        /// Output the finished session as JSON
        #[arg(long)]
        json: bool,
    },

    /// List optimization strategies
    Strategies {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage parameter templates
    #[command(subcommand)]
    Template(template::TemplateCommand),

    /// Recommend templates for a project context
    Recommend {
        /// Tool name
        tool: String,

        /// Project tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Numeric project attribute as NAME=VALUE (repeatable)
        #[arg(long = "attr", value_name = "NAME=VALUE")]
        attributes: Vec<String>,

        /// Maximum number of recommendations
        #[arg(long, default_value_t = 5)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show service health
    Health {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Text => builder.without_time().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.log_format)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let workspace = match args.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let ctx = commands::Context { workspace, simulate: args.simulate };

    match command {
        Command::Run { tool, project, params, inputs, priority, json } => {
            run::execute(&ctx, &tool, &project, &params, &inputs, priority, json).await?;
        }
        Command::Optimize { tool, project, targets, params, strategy, max_iterations, tags, attributes, json } => {
            let options = optimize::OptimizeOptions {
                tool,
                project,
                targets,
                params,
                strategy,
                max_iterations,
                tags,
                attributes,
                json,
            };
            optimize::execute(&ctx, options).await?;
        }
        Command::Strategies { json } => {
            strategies::execute(json)?;
        }
        Command::Template(cmd) => {
            template::execute(&ctx, cmd).await?;
        }
        Command::Recommend { tool, tags, attributes, limit, json } => {
            recommend::execute(&ctx, &tool, &tags, &attributes, limit, json).await?;
        }
        Command::Health { json } => {
            health::execute(&ctx, json).await?;
        }
    }

    Ok(())
}
