pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod ddl;
pub mod encoding;
pub mod error;
pub mod importer;
pub mod inference;
pub mod inspect;
pub mod io_utils;
pub mod loader;
pub mod provision;
pub mod reconcile;
pub mod repair;
pub mod sanitize;
pub mod table;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::{Config, OpenMode, open_connection},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("cinema_loader", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Provision => handle_provision(Config::new(&cli.database)),
        Commands::Import(args) => handle_import(Config::for_import(&cli.database, &args)?),
        Commands::Repair => handle_repair(Config::new(&cli.database)),
        Commands::Inspect(args) => handle_inspect(Config::new(&cli.database), args.json),
    }
}

fn handle_provision(config: Config) -> Result<()> {
    info!("Provisioning cinema schema in {:?}", config.database);
    let conn = open_connection(&config, OpenMode::Create)?;
    let report = provision::provision_fixed(&conn, &provision::cinema_schema())
        .context("Provisioning the cinema schema")?;
    info!(
        "{} table(s) created, {} already present",
        report.created.len(),
        report.existing.len()
    );
    if !report.is_complete() {
        warn!("{} table(s) could not be created", report.failed.len());
    }
    Ok(())
}

fn handle_import(config: Config) -> Result<()> {
    info!(
        "Importing {:?} into {:?} (batch size {}, chunk rows {})",
        config.dataset, config.database, config.batch_size, config.chunk_rows
    );
    let conn = open_connection(&config, OpenMode::Existing)?;
    importer::run_import(&conn, &config)?;
    Ok(())
}

fn handle_repair(config: Config) -> Result<()> {
    info!("Repairing {:?}", config.database);
    let conn = open_connection(&config, OpenMode::Existing)?;
    let report = repair::run_repair(&conn).context("Repairing the database schema")?;
    if report.issues.is_empty() && report.failures.is_empty() {
        info!("Repair completed");
    } else {
        warn!(
            "Repair finished with {} structure issue(s) and {} failed statement(s)",
            report.issues.len(),
            report.failures.len()
        );
    }
    Ok(())
}

fn handle_inspect(config: Config, json: bool) -> Result<()> {
    let conn = open_connection(&config, OpenMode::Existing)?;
    let report = inspect::inspect(&conn).context("Inspecting the database")?;
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}
