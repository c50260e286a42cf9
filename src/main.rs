use clap::{Parser, Subcommand};
use toolhost::agent;
use toolhost::app::{App, AppConfig};
use toolhost::errors::ControlError;
use toolhost::model::ProvisionConfig;
use toolhost::services::logger::Logger;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "toolhost", version, about = "Toolbox provisioning control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the on-host management agent (configured via the agent env file).
    Agent,
    /// Run the control plane with the reconcile loop in the foreground.
    Serve,
    /// Provision a new toolbox.
    Provision {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        size_class: String,
    },
    /// Tear a toolbox down.
    Deprovision {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
    },
    /// List every toolbox for an owner.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Reconcile one toolbox now and print its status.
    Refresh {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
    },
    /// Restart a toolbox's agent (agent channel, SSH fallback).
    RestartAgent {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
    },
    /// Replace a toolbox's agent binary and restart it.
    RedeployAgent {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
    },
    /// Deploy (or replace) a tool container on a toolbox.
    DeployTool {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
        #[arg(long)]
        image: String,
        /// Port binding, host:container. Repeatable.
        #[arg(long = "port")]
        ports: Vec<String>,
        /// Environment entry, KEY=VALUE. Repeatable.
        #[arg(long = "env")]
        env: Vec<String>,
    },
    StartTool {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
    },
    StopTool {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
    },
    RemoveTool {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        name: String,
    },
}

fn parse_env_pairs(raw: &[String]) -> Result<Vec<(String, String)>, ControlError> {
    raw.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    ControlError::invalid_params(format!("env entry '{}' must be KEY=VALUE", entry))
                })
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(err) => eprintln!("Could not render output: {}", err),
    }
}

async fn run(cli: Cli) -> Result<(), ControlError> {
    if let Command::Agent = cli.command {
        return agent::server::run_from_env(Logger::new("toolhost-agent")).await;
    }

    let app = App::initialize(AppConfig::from_env()?)?;
    match cli.command {
        Command::Agent => unreachable!(),
        Command::Serve => {
            app.start_background();
            app.logger.info("Control plane running", None);
            // Runs until killed.
            park_forever().await;
            Ok(())
        }
        Command::Provision {
            owner,
            name,
            region,
            size_class,
        } => {
            let view = app
                .provision(
                    &owner,
                    &ProvisionConfig {
                        name,
                        region,
                        size_class,
                    },
                )
                .await?;
            print_json(&view);
            Ok(())
        }
        Command::Deprovision { owner, id } => {
            let view = app.deprovision(&owner, id).await?;
            print_json(&view);
            Ok(())
        }
        Command::List { owner } => {
            let views = app.list(&owner)?;
            print_json(&views);
            Ok(())
        }
        Command::Refresh { owner, id } => {
            let view = app.refresh_status(&owner, id).await?;
            print_json(&view);
            Ok(())
        }
        Command::RestartAgent { owner, id } => {
            let outcome = app.restart_agent(&owner, id).await?;
            println!("{}", outcome.message);
            if outcome.success {
                Ok(())
            } else {
                Err(ControlError::internal(outcome.message))
            }
        }
        Command::RedeployAgent { owner, id } => {
            let outcome = app.redeploy_agent(&owner, id).await?;
            println!("{}", outcome.message);
            if outcome.success {
                Ok(())
            } else {
                Err(ControlError::internal(outcome.message))
            }
        }
        Command::DeployTool {
            owner,
            id,
            name,
            image,
            ports,
            env,
        } => {
            let request = toolhost::agent::api::DeployToolRequest {
                name,
                image,
                ports,
                env: parse_env_pairs(&env)?,
            };
            let tool = app.deploy_tool(&owner, id, &request).await?;
            print_json(&tool);
            Ok(())
        }
        Command::StartTool { owner, id, name } => app.start_tool(&owner, id, &name).await,
        Command::StopTool { owner, id, name } => app.stop_tool(&owner, id, &name).await,
        Command::RemoveTool { owner, id, name } => app.remove_tool(&owner, id, &name).await,
    }
}

async fn park_forever() {
    // Park until the process is killed; the reconcile loop does the work.
    let () = std::future::pending().await;
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {}", err.message);
        if let Some(hint) = &err.hint {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(1);
    }
}
