use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gacha_exchange::{db, import_items, load_catalog_csv, logging, Config, Engine, ExchangeParams};

#[derive(Parser, Debug)]
#[command(name = "gacha-exchange", version, about = "Draw and trade catalog items")]
struct Cli {
    /// SQLite database path (overrides GACHA_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema
    Init,
    /// Create an account
    SeedAccount {
        owner: String,
        #[arg(long, default_value_t = 0)]
        balance: i64,
    },
    /// Load catalog items from CSV (item_name,rating,item_url,category)
    ImportItems { csv: PathBuf },
    /// Draw one random item for an account
    Draw {
        #[arg(long)]
        account: i64,
    },
    /// Swap item-1 (held by --from) with item-2 (held by --to)
    Exchange {
        #[arg(long)]
        from: i64,
        #[arg(long)]
        to: i64,
        #[arg(long)]
        item1: i64,
        #[arg(long)]
        item2: i64,
    },
    /// Print an account's gallery
    Show {
        #[arg(long)]
        account: i64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(db) = &cli.db {
        config = config.with_db_path(db.to_string_lossy());
    }
    logging::init(&config.log_level)?;

    let engine = Engine::from_config(&config)
        .with_context(|| format!("Failed to open database at {}", config.db_path))?;

    match cli.command {
        Command::Init => {
            println!("✓ Database initialized at {}", config.db_path);
        }
        Command::SeedAccount { owner, balance } => {
            let conn = engine.store().connect()?;
            let account = db::create_account(&conn, &owner, balance)?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        Command::ImportItems { csv } => {
            let items = load_catalog_csv(&csv)?;
            let mut conn = engine.store().connect()?;
            let inserted = import_items(&mut conn, &items)?;
            println!("✓ Imported {} items", inserted.len());
        }
        Command::Draw { account } => {
            let gallery = engine.draw(account)?;
            println!("{}", serde_json::to_string_pretty(&gallery)?);
        }
        Command::Exchange {
            from,
            to,
            item1,
            item2,
        } => {
            let result = engine.exchange(&ExchangeParams::new(from, to, item1, item2))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Show { account } => {
            let galleries = engine.galleries_by_owner(account)?;
            println!("{}", serde_json::to_string_pretty(&galleries)?);
        }
    }

    Ok(())
}
