use anyhow::Result;
use clap::{Parser, Subcommand};
use deployform::{
    models::{
        allow_list::AllowList,
        form_data::{FormStore, PgFormStore},
        user::UserDirectory,
    },
    shortener, AppConfig,
};
use std::process::exit;
use tracing::Level;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tell whether an address passes the configured allow-list
    CheckIp { ip: String },
    /// List the configured users and their addresses
    ListUsers,
    /// Print the stored value of a form field
    GetField { key: String },
    /// Store a JSON value under a form field
    SetField { key: String, value: String },
    /// Shorten a URL with a configured provider
    Shorten {
        url: String,
        #[arg(short, long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(Level::WARN)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();

    let config_path = cli
        .config
        .ok_or_else(|| anyhow::anyhow!("Config file path required"))?;
    let cfg = AppConfig::new_from_file_and_env(&config_path).unwrap_or_else(|e| {
        eprintln!("error: {}", e);
        exit(1);
    });

    match &cli.command {
        Commands::CheckIp { ip } => match cfg.allowed_ips.parse::<AllowList>() {
            Ok(allow_list) if allow_list.contains_str(ip) => println!("{}: allowed", ip),
            Ok(_) => {
                println!("{}: blocked", ip);
                exit(2);
            }
            Err(e) => {
                eprintln!("allow-list is unusable: {}", e);
                exit(3);
            }
        },
        Commands::ListUsers => {
            let users = UserDirectory::from_config(&cfg.users);
            for name in users.names() {
                if let Some(user) = users.find_user_by_name(&name) {
                    println!("{}\t{}", user.name, user.ip);
                }
            }
        }
        Commands::GetField { key } => {
            let store = connect_form_store(&cfg).await;
            match store.load(key).await? {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&record.value)?);
                    println!("(updated {})", record.updated_at);
                }
                None => println!("Field not found"),
            }
        }
        Commands::SetField { key, value } => {
            // Plain text that isn't JSON is stored as a string.
            let value = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
            let store = connect_form_store(&cfg).await;
            let record = store.save(key, &value).await?;
            println!("Saved {} at {}", record.key, record.updated_at);
        }
        Commands::Shorten { url, provider } => {
            let provider = match provider {
                Some(name) => cfg.find_shortener(name),
                None => cfg.default_shortener(),
            }
            .ok_or_else(|| anyhow::anyhow!("Unknown shortener"))?;
            let client = reqwest::Client::new();
            let result = shortener::shorten(&client, provider, url, cfg.shortener_timeout).await?;
            match result {
                serde_json::Value::String(short) => println!("{}", short),
                other => println!("{}", other),
            }
        }
    }

    Ok(())
}

async fn connect_form_store(cfg: &AppConfig) -> PgFormStore {
    match cfg.connect_database().await {
        Ok(db) => PgFormStore::new(db),
        Err(e) => {
            eprintln!("error connecting to database: {}", e);
            exit(1);
        }
    }
}
