use {
    anyhow::{Context, Result},
    clap::Subcommand,
    serde_json::Value,
};

use crate::App;

#[derive(Subcommand)]
pub enum ToolsAction {
    /// List available tools.
    List,
    /// Invoke a tool once and print its result.
    Call {
        /// Tool name, e.g. teams-list-teams.
        name: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

pub async fn handle_tools(app: &App, action: ToolsAction) -> Result<()> {
    match action {
        ToolsAction::List => {
            for tool in app.registry.list() {
                println!("  {}: {}", tool.name, tool.description);
            }
            Ok(())
        },
        ToolsAction::Call { name, args } => {
            let args: Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let output = app.registry.call(&name, args).await?;
            println!("{}", output.text);
            if output.is_error {
                anyhow::bail!("tool '{name}' reported an error");
            }
            Ok(())
        },
    }
}
