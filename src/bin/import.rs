//! Booklend bulk import
//!
//! Loads users, books and borrow records from headerless CSV files into the
//! database configured for the server.

use std::{fs::File, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use booklend_server::{
    config::AppConfig,
    import::{self, ImportSummary},
    repository::Repository,
    services::Services,
};

#[derive(Parser)]
#[command(name = "booklend-import")]
#[command(about = "Load Booklend data from CSV files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import users from rows `name,email[,password]`
    Users {
        /// CSV file
        file: PathBuf,
        /// Password of the admin account, used only when it has to be created
        #[arg(long)]
        admin_password: String,
    },
    /// Import books from rows `name,author[,quantity]`
    Books {
        /// CSV file
        file: PathBuf,
    },
    /// Borrow books from rows `bookName,userName`
    Records {
        /// CSV file
        file: PathBuf,
    },
}

impl Commands {
    fn file(&self) -> &PathBuf {
        match self {
            Commands::Users { file, .. } | Commands::Books { file } | Commands::Records { file } => file,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load().context("Failed to load configuration")?;
    booklend_server::config::init_tracing(&config.logging);

    let path = cli.command.file();
    let input = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let rows = import::read_rows(input)?;
    tracing::info!(rows = rows.len(), file = %path.display(), "CSV loaded");

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    let services = Services::new(
        Arc::new(Repository::new(pool)),
        config.auth.clone(),
        config.loans.clone(),
    );

    let summary: ImportSummary = match &cli.command {
        Commands::Users { admin_password, .. } => {
            import::import_users(&services, &rows, admin_password).await?
        }
        Commands::Books { .. } => import::import_books(&services, &rows).await?,
        Commands::Records { .. } => import::import_records(&services, &rows).await?,
    };

    tracing::info!(imported = summary.imported, skipped = summary.skipped, "Import finished");
    println!("{}", serde_json::to_string(&summary)?);

    Ok(())
}
