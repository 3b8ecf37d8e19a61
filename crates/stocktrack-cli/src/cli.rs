//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use stocktrack_core::models::Category;

/// stocktrack - inventory tracking with demand forecasts.
#[derive(Parser, Debug)]
#[command(name = "stocktrack")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Override the API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account
    Register(RegisterArgs),

    /// Log in and store the session
    Login(LoginArgs),

    /// Clear the stored session
    Logout,

    /// Show who is logged in
    Whoami,

    /// List products
    List(ListArgs),

    /// Add a product
    Add(AddArgs),

    /// Change fields of a product
    Update(UpdateArgs),

    /// Delete a product
    Delete(IdArg),

    /// Compute forecast, optimized price and margin without saving anything
    Forecast(ForecastArgs),

    /// Compare demand across two or more products
    Compare(CompareArgs),
}

#[derive(Parser, Debug)]
pub struct RegisterArgs {
    #[arg(short, long)]
    pub username: String,

    #[arg(short, long)]
    pub email: String,
}

#[derive(Parser, Debug)]
pub struct LoginArgs {
    /// Defaults to the last username used
    #[arg(short, long)]
    pub username: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Category to show, or `all`
    #[arg(short, long, default_value = "all")]
    pub category: String,

    /// Match against name and description
    #[arg(short, long)]
    pub search: Option<String>,
}

#[derive(Parser, Debug)]
pub struct AddArgs {
    #[arg(short, long)]
    pub name: String,

    /// Cost price
    #[arg(long)]
    pub cost: Decimal,

    /// Selling price
    #[arg(long)]
    pub price: Decimal,

    #[arg(short, long, default_value = "stationary")]
    pub category: Category,

    #[arg(short, long)]
    pub description: Option<String>,

    #[arg(long, default_value_t = 0)]
    pub stock: u32,

    #[arg(long, default_value_t = 0)]
    pub sold: u32,

    /// Store the computed demand forecast and optimized price
    #[arg(long)]
    pub forecast: bool,
}

#[derive(Parser, Debug)]
pub struct UpdateArgs {
    pub id: String,

    #[arg(short, long)]
    pub name: Option<String>,

    #[arg(long)]
    pub cost: Option<Decimal>,

    #[arg(long)]
    pub price: Option<Decimal>,

    #[arg(short, long)]
    pub category: Option<Category>,

    #[arg(short, long)]
    pub description: Option<String>,

    #[arg(long)]
    pub stock: Option<u32>,

    #[arg(long)]
    pub sold: Option<u32>,

    /// Recompute the demand forecast and optimized price
    #[arg(long)]
    pub forecast: bool,
}

#[derive(Parser, Debug)]
pub struct IdArg {
    pub id: String,
}

#[derive(Parser, Debug)]
pub struct ForecastArgs {
    #[arg(long)]
    pub stock: u32,

    #[arg(long)]
    pub sold: u32,

    /// Selling price
    #[arg(long)]
    pub price: Decimal,

    /// Cost price, for the margin
    #[arg(long)]
    pub cost: Option<Decimal>,
}

#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Product ids
    #[arg(required = true, num_args = 2..)]
    pub ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_add() {
        let cli = Cli::parse_from([
            "stocktrack", "add", "--name", "Pen", "--cost", "1.50", "--price", "2.00", "--category",
            "books", "--stock", "10", "--forecast",
        ]);
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.category, Category::Books);
        assert_eq!(args.price, Decimal::new(200, 2));
        assert_eq!(args.stock, 10);
        assert!(args.forecast);
    }

    #[test]
    fn test_compare_needs_two_ids() {
        assert!(Cli::try_parse_from(["stocktrack", "compare", "a"]).is_err());
        assert!(Cli::try_parse_from(["stocktrack", "compare", "a", "b"]).is_ok());
    }
}
