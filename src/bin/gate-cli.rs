use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gate-cli")]
#[command(about = "Operator CLI for request-gate", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATE_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show gate status and active configuration flags
    Status,
    /// Show rate limiter counters
    Stats,
    /// List banned identifiers
    Bans,
    /// Ban an identifier
    Ban {
        identifier: String,
        /// Ban length in milliseconds; permanent when omitted
        #[arg(short, long)]
        duration_ms: Option<u64>,
    },
    /// Lift a ban
    Unban { identifier: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Stats => client.get(format!("{}/admin/stats", base)),
        Commands::Bans => client.get(format!("{}/admin/bans", base)),
        Commands::Ban {
            identifier,
            duration_ms,
        } => client
            .post(format!("{}/admin/bans", base))
            .json(&json!({"identifier": identifier, "duration_ms": duration_ms})),
        Commands::Unban { identifier } => {
            let url = reqwest::Url::parse(&format!("{}/admin/bans/", base))?.join(&identifier)?;
            client.delete(url)
        }
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        return Ok(());
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
