use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::io::{self, AsyncBufReadExt};

use snowflake_agent_chat::config::{split_list, AgentConfigFile, AgentOverrides};
use snowflake_agent_chat::{
    render, AgentConfig, AgentsClient, ChatSession, ConnectionConfig, SnowflakeEngine,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Debug)]
struct ConnectionArgs {
    #[arg(short, long, env = "SNOWFLAKE_USER")]
    user: String,

    #[arg(short, long, env = "SNOWFLAKE_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(short, long, env = "SNOWFLAKE_ACCOUNT")]
    account: String,

    /// Bearer token for the agents API; defaults to the password
    #[arg(long, env = "SNOWFLAKE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(short, long, env = "SNOWFLAKE_ROLE")]
    role: Option<String>,

    #[arg(short, long, env = "SNOWFLAKE_WAREHOUSE")]
    warehouse: Option<String>,

    #[arg(short, long, env = "SNOWFLAKE_DATABASE")]
    database: Option<String>,

    #[arg(short = 's', long, env = "SNOWFLAKE_SCHEMA")]
    schema: Option<String>,

    /// Override the API host (defaults to https://<account>.snowflakecomputing.com)
    #[arg(long, env = "SNOWFLAKE_BASE_URL")]
    base_url: Option<String>,

    #[arg(short, long)]
    env_file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct AgentArgs {
    /// Semantic model stage path; repeat to query several models in order
    #[arg(short = 'm', long = "semantic-model")]
    semantic_models: Vec<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    timeout_ms: Option<u64>,

    /// YAML file with model, timeout_ms, semantic_models and endpoint
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive chat with the Cortex agent
    Chat {
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        agent: AgentArgs,
    },
    /// Ask a single question and exit
    Ask {
        question: String,
        #[command(flatten)]
        connection: ConnectionArgs,
        #[command(flatten)]
        agent: AgentArgs,
    },
}

impl ConnectionArgs {
    fn into_config(self) -> ConnectionConfig {
        ConnectionConfig {
            account: self.account,
            user: self.user,
            password: self.password,
            token: self.token,
            role: self.role,
            warehouse: self.warehouse,
            database: self.database,
            schema: self.schema,
            base_url: self.base_url,
        }
    }
}

impl AgentArgs {
    fn into_config(self) -> Result<AgentConfig> {
        let file = match &self.config {
            Some(path) => AgentConfigFile::load(path)?,
            None => AgentConfigFile::default(),
        };

        let semantic_models = if self.semantic_models.is_empty() {
            std::env::var("SNOWFLAKE_SEMANTIC_MODELS")
                .map(|raw| split_list(&raw))
                .unwrap_or_default()
        } else {
            self.semantic_models
        };

        let overrides = AgentOverrides {
            model: self.model,
            timeout_ms: self.timeout_ms,
            semantic_models,
        };
        Ok(AgentConfig::resolve(overrides, file)?)
    }
}

fn init_tracing() {
    let default_level = if std::env::var("SNOWFLAKE_DEBUG").is_ok() {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// The env file has to be loaded before clap reads `env = ...` fallbacks, so
/// it is picked out of the raw arguments first.
fn load_env_file() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if let Some(pos) = args
        .iter()
        .position(|arg| arg == "--env-file" || arg == "-e")
    {
        if let Some(path) = args.get(pos + 1) {
            if !path.starts_with('-') {
                dotenvy::from_path(path)
                    .with_context(|| format!("Failed to load env file {}", path))?;
                return Ok(());
            }
        }
    }

    let default_path = Path::new(".env");
    if default_path.exists() {
        dotenvy::from_path(default_path).context("Failed to load .env file")?;
    }
    Ok(())
}

fn print_chat_help() {
    println!("Commands:");
    println!("  /help       - Show this command menu");
    println!("  /history    - Show conversation history");
    println!("  /models     - Show the configured semantic models");
    println!("  /exit       - Exit chat");
    println!();
}

fn print_models(config: &AgentConfig) {
    println!("\nModel: {} (timeout {} ms)", config.model, config.timeout.as_millis());
    println!("Semantic models (queried in order):");
    for (idx, model) in config.semantic_models.iter().enumerate() {
        println!("  {}. {}", idx + 1, model);
    }
    println!();
}

async fn connect(
    connection: ConnectionArgs,
    agent: AgentArgs,
) -> Result<ChatSession<AgentsClient, SnowflakeEngine>> {
    let agent_config = agent.into_config()?;
    let connection = connection.into_config();

    let client = AgentsClient::new(&connection, &agent_config)?;
    let engine = SnowflakeEngine::new(&connection).await?;

    Ok(ChatSession::new(agent_config, client, engine))
}

async fn answer(
    session: &mut ChatSession<AgentsClient, SnowflakeEngine>,
    query: &str,
) -> Result<()> {
    eprintln!("Processing your request...");
    let outcome = session.run_turn(query).await;

    let mut stdout = std::io::stdout().lock();
    render::write_outcome(&mut stdout, &outcome)?;
    stdout.flush()?;
    Ok(())
}

async fn run_chat(mut session: ChatSession<AgentsClient, SnowflakeEngine>) -> Result<()> {
    let interactive = std::io::stdout().is_terminal();

    println!("Intelligent Agent Assistant");
    println!("Session: {}", session.id());
    print_chat_help();

    let mut lines = io::BufReader::new(io::stdin()).lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;

        let input = match lines.next_line().await {
            Ok(Some(line)) => line.trim().to_string(),
            _ => break,
        };

        if input.is_empty() {
            continue;
        }

        match input.as_str() {
            "/exit" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                print_chat_help();
                continue;
            }
            "/history" => {
                render::write_history(&mut std::io::stdout().lock(), session.transcript())?;
                continue;
            }
            "/models" => {
                print_models(session.config());
                continue;
            }
            _ => {}
        }

        {
            let mut stdout = std::io::stdout().lock();
            if interactive {
                render::clear_screen(&mut stdout)?;
            }
            render::write_transcript(&mut stdout, session.transcript())?;
            writeln!(stdout, "You: {}\n", input)?;
        }

        answer(&mut session, &input).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env_file()?;
    init_tracing();

    let args = Args::parse();

    match args.command {
        Commands::Chat { connection, agent } => {
            let session = connect(connection, agent).await?;
            run_chat(session).await
        }
        Commands::Ask {
            question,
            connection,
            agent,
        } => {
            let mut session = connect(connection, agent).await?;
            answer(&mut session, &question).await
        }
    }
}
