//! stocktrack - command-line driver for the inventory API.
//!
//! Thin presentation layer over `stocktrack-core`: every command maps onto
//! one session or cache operation and prints the result.

mod cli;

use std::io;

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{AddArgs, Cli, Commands, CompareArgs, ForecastArgs, ListArgs, UpdateArgs};
use stocktrack_core::config::API_URL_ENV;
use stocktrack_core::metrics;
use stocktrack_core::models::{Product, ProductDraft, ProductFilters, ProductPatch};
use stocktrack_core::{ApiError, CacheStatus, CompareError, Config, InventoryClient};

/// Log file prefix inside `log_dir`
const LOG_FILE_PREFIX: &str = "stocktrack.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    if let Some(url) = &cli.api_url {
        std::env::set_var(API_URL_ENV, url);
    }
    let mut config = Config::load()?;

    let _guard = init_tracing(&config);
    info!(command = ?cli.command, "stocktrack starting");

    // Pure arithmetic needs no session
    if let Commands::Forecast(args) = &cli.command {
        print_forecast(args);
        return Ok(());
    }

    let client = InventoryClient::connect(&config).context("Failed to set up API client")?;
    let result = run(cli.command, &client, &mut config).await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Commands, client: &InventoryClient, config: &mut Config) -> Result<()> {
    let session = client.session();
    match command {
        Commands::Register(args) => {
            let password = prompt_password()?;
            let message = session
                .register(&args.username, &args.email, &password)
                .await
                .map_err(describe)?;
            println!("{}", message);
        }
        Commands::Login(args) => {
            let username = match args.username.or_else(|| config.last_username.clone()) {
                Some(name) => name,
                None => anyhow::bail!("No username given and none remembered; use --username"),
            };
            let password = prompt_password()?;
            let name = session.login(&username, &password).await.map_err(describe)?;
            config.last_username = Some(username);
            config.save().context("Failed to save config")?;
            println!("Logged in as {}", name);
        }
        Commands::Logout => {
            session.logout();
            println!("Logged out");
        }
        Commands::Whoami => match session.display_name() {
            Some(name) if session.is_authenticated() => println!("{}", name),
            _ => println!("Not logged in"),
        },
        Commands::List(args) => list(client, args).await?,
        Commands::Add(args) => add(client, args).await?,
        Commands::Update(args) => update(client, args).await?,
        Commands::Delete(args) => {
            client.delete_product(&args.id).await.map_err(describe)?;
            println!("Deleted {}", args.id);
        }
        Commands::Compare(args) => compare(client, args).await?,
        Commands::Forecast(args) => print_forecast(&args),
    }
    Ok(())
}

async fn list(client: &InventoryClient, args: ListArgs) -> Result<()> {
    let category = ProductFilters::parse_category(&args.category).map_err(anyhow::Error::msg)?;
    let filters = ProductFilters {
        category,
        search: args.search,
    };

    let entry = client.list_products(&filters).await;
    if entry.status == CacheStatus::Errored {
        if let Some(e) = &entry.last_error {
            return Err(describe(e.clone()));
        }
    }

    let products = entry.records();
    if products.is_empty() {
        println!("No products found");
        return Ok(());
    }
    println!(
        "{:<36}  {:<24}  {:<14}  {:>9}  {:>9}  {:>6}  {:>5}  {:>8}",
        "ID", "NAME", "CATEGORY", "COST", "PRICE", "STOCK", "SOLD", "FORECAST"
    );
    for p in products {
        print_row(p);
    }
    if let Some(age) = entry.age_display() {
        println!("\n{} products, fetched {}", products.len(), age);
    }
    Ok(())
}

fn print_row(p: &Product) {
    let forecast = p
        .demand_forecast
        .map(|f| f.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:<36}  {:<24}  {:<14}  {:>9}  {:>9}  {:>6}  {:>5}  {:>8}",
        p.id,
        truncate(&p.name, 24),
        p.category.label(),
        money(p.cost_price),
        money(p.selling_price),
        p.stock_available,
        p.units_sold,
        forecast
    );
}

async fn add(client: &InventoryClient, args: AddArgs) -> Result<()> {
    let mut draft = ProductDraft::new(args.name, args.cost, args.price)
        .with_category(args.category)
        .with_stock(args.stock, args.sold);
    if let Some(description) = args.description {
        draft = draft.with_description(description);
    }
    if args.forecast {
        draft = draft.with_forecast();
    }

    let product = client.add_product(draft).await.map_err(describe)?;
    println!("Added {} ({})", product.name, product.id);
    Ok(())
}

async fn update(client: &InventoryClient, args: UpdateArgs) -> Result<()> {
    let mut patch = ProductPatch {
        name: args.name,
        description: args.description,
        cost_price: args.cost,
        selling_price: args.price,
        category: args.category,
        stock_available: args.stock,
        units_sold: args.sold,
        ..ProductPatch::default()
    };
    if args.forecast {
        let current = client.get_product(&args.id).await.map_err(describe)?;
        patch = patch.with_forecast(&current);
    }
    if patch.is_empty() {
        anyhow::bail!("Nothing to update");
    }

    let product = client
        .update_product(&args.id, patch)
        .await
        .map_err(describe)?;
    println!("Updated {} ({})", product.name, product.id);
    Ok(())
}

async fn compare(client: &InventoryClient, args: CompareArgs) -> Result<()> {
    let points = client.compare(&args.ids).await.map_err(|e| match e {
        CompareError::Api(e) => describe(e),
        CompareError::Metrics(e) => anyhow::anyhow!(e),
    })?;
    println!("{:<24}  {:>8}  {:>9}", "PRODUCT", "DEMAND", "PRICE");
    for point in points {
        println!(
            "{:<24}  {:>8}  {:>9}",
            truncate(&point.name, 24),
            point.demand,
            money(point.price)
        );
    }
    Ok(())
}

fn print_forecast(args: &ForecastArgs) {
    println!(
        "Demand forecast: {}",
        metrics::demand_forecast(args.stock, args.sold)
    );
    println!(
        "Optimized price: {}",
        money(metrics::optimized_price(args.stock, args.sold, args.price))
    );
    if let Some(cost) = args.cost {
        println!(
            "Profit margin:   {:.1}%",
            metrics::profit_margin(cost, args.price)
        );
    }
}

fn prompt_password() -> Result<String> {
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

/// User-facing error, with per-field messages when the server sent them.
fn describe(error: ApiError) -> anyhow::Error {
    if let ApiError::ValidationError {
        fields: Some(serde_json::Value::Object(fields)),
        ..
    } = &error
    {
        let details: Vec<String> = fields
            .iter()
            .map(|(field, messages)| match messages {
                serde_json::Value::Array(list) => {
                    let joined: Vec<&str> = list.iter().filter_map(|m| m.as_str()).collect();
                    format!("{}: {}", field, joined.join(", "))
                }
                other => format!("{}: {}", field, other),
            })
            .collect();
        return anyhow::anyhow!("{} ({})", error.message(), details.join("; "));
    }
    anyhow::anyhow!("{}", error.message())
}

fn money(value: Decimal) -> String {
    format!("${:.2}", value)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money() {
        assert_eq!(money(dec!(19)), "$19.00");
        assert_eq!(money(dec!(2.5)), "$2.50");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Pen", 24), "Pen");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }

    #[test]
    fn test_describe_lists_field_errors() {
        let error = ApiError::ValidationError {
            status: Some(400),
            message: "Validation failed.".into(),
            fields: Some(serde_json::json!({"name": ["This field may not be blank."]})),
        };
        assert_eq!(
            describe(error).to_string(),
            "Validation failed. (name: This field may not be blank.)"
        );
    }
}
