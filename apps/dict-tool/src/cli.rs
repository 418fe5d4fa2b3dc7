use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dict_engine_core::backend::{Pageable, SortOrder};
use dict_engine_core::DictEngineConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub storage: EngineArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Storage settings shared by every command.
#[derive(Args, Debug)]
pub struct EngineArgs {
    /// Engine used for dicts that do not name one (sql or document)
    #[arg(long, default_value = "sql", global = true)]
    pub engine: String,

    /// SQLite database file; in-memory when omitted
    #[arg(long, global = true)]
    pub sqlite_path: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds
    #[arg(long, default_value_t = 5000, global = true)]
    pub busy_timeout_ms: u64,

    /// Directory for document engine snapshots; memory only when omitted
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory scanned for migration scripts
    #[arg(long, default_value = "./migrations", global = true)]
    pub migrations_dir: PathBuf,
}

impl EngineArgs {
    pub fn config(&self) -> DictEngineConfig {
        DictEngineConfig {
            default_engine: self.engine.clone(),
            sqlite_path: self.sqlite_path.clone(),
            sqlite_busy_timeout_ms: self.busy_timeout_ms,
            document_data_dir: self.data_dir.clone(),
            migrations_dir: self.migrations_dir.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending migration scripts
    Migrate {
        /// Only list the scripts that would be applied
        #[arg(long)]
        dry_run: bool,
    },

    /// List dictionaries, or print one definition as JSON
    Dicts {
        /// Dictionary to print
        id: Option<String>,
    },

    /// Parse a filter and optionally check it against a dictionary
    CheckQuery {
        /// Filter text
        query: String,

        /// Dictionary to resolve fields against
        #[arg(short, long)]
        dict: Option<String>,
    },

    /// Print one page of items matching a filter
    Query {
        /// Dictionary to read
        dict: String,

        /// Filter text; empty matches every item
        #[arg(default_value = "")]
        filter: String,

        /// Fields to return (comma-separated, `dict.field` for joined ones)
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Sort keys (comma-separated, `field` or `field:desc`)
        #[arg(short, long, value_delimiter = ',')]
        sort: Vec<String>,

        /// Zero-based page number
        #[arg(short, long, default_value_t = 0)]
        page: usize,

        /// Page size
        #[arg(long, default_value_t = 20)]
        size: usize,
    },
}

/// Builds a page request from `field[:asc|desc]` keys.
pub fn pageable(page: usize, size: usize, sort: &[String]) -> anyhow::Result<Pageable> {
    let mut pageable = Pageable::new(page, size);
    for key in sort {
        let order = match key.split_once(':') {
            None => SortOrder::asc(key.as_str()),
            Some((field, direction)) if direction.eq_ignore_ascii_case("asc") => {
                SortOrder::asc(field)
            }
            Some((field, direction)) if direction.eq_ignore_ascii_case("desc") => {
                SortOrder::desc(field)
            }
            Some((_, direction)) => anyhow::bail!("unknown sort direction '{}'", direction),
        };
        pageable = pageable.with_sort(order);
    }
    Ok(pageable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dict_engine_core::schema::SortDirection;
    use ntest::timeout;

    #[timeout(1000)]
    #[test]
    fn test_sort_keys() {
        let pageable = pageable(1, 10, &["title".into(), "amount:DESC".into()]).unwrap();
        assert_eq!(pageable.offset(), 10);
        assert_eq!(pageable.sort.len(), 2);
        assert_eq!(pageable.sort[1].direction, SortDirection::Desc);
        assert!(super::pageable(0, 10, &["title:up".into()]).is_err());
    }

    #[timeout(1000)]
    #[test]
    fn test_global_engine_args() {
        let cli = Cli::parse_from([
            "dict-tool",
            "query",
            "orders",
            "amount > 1",
            "--fields",
            "title,customers.name",
            "--engine",
            "document",
        ]);
        assert_eq!(cli.storage.config().default_engine, "document");
        let Commands::Query { fields, filter, .. } = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(fields, vec!["title", "customers.name"]);
        assert_eq!(filter, "amount > 1");
    }
}
