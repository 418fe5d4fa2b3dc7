//! CLI tool for dictionary migrations, schema listing and ad-hoc queries.
//!
//! Both storage engines are registered on every run; `--engine` picks the one
//! used by dicts that do not name an engine and the one holding the
//! migration ledger.

mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dict_engine_core::backend::StorageEngine;
use dict_engine_core::query::parse;
use dict_engine_core::{
    DictDataService, DictEngineConfig, DictError, DictService, EngineRegistry, Migrator,
};
use dict_engine_document::DocumentBackend;
use dict_engine_sql::SqliteBackend;

use cli::{pageable, Cli, Commands};

/// Opens both backends and bootstraps the dictionary service.
fn open(config: &DictEngineConfig) -> anyhow::Result<DictService> {
    let sql = SqliteBackend::open(config).context("Failed to open SQLite backend")?;
    let document = DocumentBackend::open(config).context("Failed to open document backend")?;
    let registry = EngineRegistry::new(config.default_engine.clone())
        .with_engine(StorageEngine::from_backend(Arc::new(sql)))
        .with_engine(StorageEngine::from_backend(Arc::new(document)));
    Ok(DictService::bootstrap(config.clone(), registry)?)
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.storage.config();
    let dicts = open(&config)?;

    match cli.command {
        Commands::Migrate { dry_run } => {
            let migrator = Migrator::new(dicts);
            if dry_run {
                for script in migrator.pending()? {
                    println!("{}  {}", script.version, script.script);
                }
                return Ok(());
            }
            let report = migrator.migrate()?;
            println!(
                "Applied {} scripts, skipped {}",
                report.applied.len(),
                report.skipped.len()
            );
            for script in &report.applied {
                println!("  applied {}", script);
            }
        }
        Commands::Dicts { id: Some(id) } => {
            let dict = dicts.get(&id)?;
            println!("{}", serde_json::to_string_pretty(dict.as_ref())?);
        }
        Commands::Dicts { id: None } => {
            for dict in dicts.list() {
                println!(
                    "{:<32} {:<10} {} fields",
                    dict.id,
                    dict.engine,
                    dict.user_fields().count()
                );
            }
        }
        Commands::CheckQuery { query, dict } => {
            let expression = parse(&query)?;
            println!("{}", expression);
            if let Some(dict_id) = dict {
                let count = DictDataService::new(dicts).count_by_filter(&dict_id, &expression)?;
                println!("{} items in '{}' match", count, dict_id);
            }
        }
        Commands::Query {
            dict,
            filter,
            fields,
            sort,
            page,
            size,
        } => {
            let expression = parse(&filter)?;
            let request = pageable(page, size, &sort)?;
            let result =
                DictDataService::new(dicts).get_by_filter(&dict, &fields, &expression, &request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt::init();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<DictError>() {
            Some(dict_error) if dict_error.is_fatal() => {
                tracing::error!("{}", dict_error);
                std::process::exit(2);
            }
            _ => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}
