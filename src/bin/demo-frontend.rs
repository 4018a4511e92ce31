use clap::{Parser, Subcommand};
use serde::Serialize;

use items_telemetry::client::{ItemsClient, NewItem};
use items_telemetry::config::{load_config, TelemetryConfig};
use items_telemetry::observability::logging::init_logging;
use items_telemetry::observability::Telemetry;

#[derive(Parser)]
#[command(name = "demo-frontend")]
#[command(about = "Traced client for the items API", long_about = None)]
struct Cli {
    #[arg(short, long, env = "API_URL", default_value = "http://localhost:3000")]
    url: String,

    #[arg(long, env = "SERVICE_NAME", default_value = "demo-frontend")]
    service_name: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all items
    List,
    /// Show one item
    Get { id: u64 },
    /// Create an item
    Create { name: String, description: String },
    /// Replace an item's name and description
    Update {
        id: u64,
        name: String,
        description: String,
    },
    /// Delete an item
    Delete { id: u64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut telemetry_config: TelemetryConfig = load_config(None)?.telemetry;
    telemetry_config.service_name = cli.service_name.clone();
    // One-shot process: nothing stays up long enough to be scraped.
    telemetry_config.prometheus_enabled = false;
    telemetry_config.metrics_endpoint = None;

    let telemetry = Telemetry::init(&telemetry_config)?;
    init_logging(&telemetry_config, Some(telemetry.sdk_tracer()));
    let client = ItemsClient::with_tracer(&cli.url, telemetry.tracer())?;

    let outcome = run(&client, cli.command).await;
    telemetry
        .shutdown(std::time::Duration::from_secs(telemetry_config.export_timeout_secs))
        .await;
    outcome
}

async fn run(client: &ItemsClient, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::List => print_json(&client.get_items().await?)?,
        Commands::Get { id } => print_json(&client.get_item(id).await?)?,
        Commands::Create { name, description } => {
            print_json(&client.create_item(&NewItem::new(name, description)).await?)?
        }
        Commands::Update {
            id,
            name,
            description,
        } => print_json(&client.update_item(id, &NewItem::new(name, description)).await?)?,
        Commands::Delete { id } => {
            client.delete_item(id).await?;
            println!("Deleted item {id}");
        }
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
