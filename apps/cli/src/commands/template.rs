//! Template command implementation.

use super::{Context, format_params, parse_context, parse_params};
use clap::Subcommand;
use colored::Colorize;

/// Template subcommands.
#[derive(Subcommand, Debug)]
pub enum TemplateCommand {
    /// Save a named parameter set for a tool
    Save {
        /// Tool name
        tool: String,

        /// Template name
        name: String,

        /// Parameter as NAME=VALUE (repeatable)
        #[arg(short, long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Project tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Numeric project attribute as NAME=VALUE (repeatable)
        #[arg(long = "attr", value_name = "NAME=VALUE")]
        attributes: Vec<String>,

        /// Replace an existing template with the same name
        #[arg(long)]
        overwrite: bool,
    },
}

/// Execute a template subcommand.
pub async fn execute(ctx: &Context, command: TemplateCommand) -> anyhow::Result<()> {
    match command {
        TemplateCommand::Save { tool, name, params, tags, attributes, overwrite } => {
            let parameters = parse_params(&params)?;
            let context = parse_context(&tags, &attributes)?;

            let service = ctx.start_service()?;
            let saved = service.save_template(&tool, &name, parameters, context, overwrite).await;
            service.shutdown().await;
            let template = saved?;

            println!(
                "{} {} for {}: {}",
                "Saved template".green(),
                template.name.bold(),
                template.tool_name.cyan(),
                format_params(&template.parameters)
            );
            Ok(())
        }
    }
}
