//! Logsift CLI
//!
//! Offline tooling for the Logsift search language: inspect how a query is
//! parsed and the tenant-scoped SQL it compiles to, without a server.
//!
//! # Usage
//!
//! ```bash
//! logsift --help
//! logsift parse 'search level=ERROR | stats count by service'
//! logsift compile --tenant tenant-a 'search level=ERROR | head 10'
//! ```

#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use shared::query::{
    fingerprint, is_identifier, to_sql, CompiledQuery, FieldVocabulary, Query, QueryParser,
};
use tracing_subscriber::EnvFilter;

/// Logsift CLI - search-language parser and compiler
#[derive(Parser)]
#[command(name = "logsift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and print its structure as JSON
    Parse(QueryArgs),
    /// Compile a query to parameterized SQL for a tenant
    Compile {
        #[command(flatten)]
        query: QueryArgs,

        /// Tenant the SQL is restricted to
        #[arg(short, long, env = "LOGSIFT_TENANT")]
        tenant: String,

        /// Log table name
        #[arg(long, env = "LOGSIFT_LOG_TABLE", default_value = "logs")]
        table: String,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Query text
    query: String,

    /// Comma-separated searchable fields (defaults to the built-in list)
    #[arg(long, env = "LOGSIFT_QUERY_FIELDS")]
    fields: Option<String>,

    /// Anchor for relative time modifiers, as RFC 3339 (defaults to now)
    #[arg(long)]
    now: Option<String>,
}

impl QueryArgs {
    fn parse_query(&self) -> Result<Query> {
        let parser = QueryParser::new(
            self.fields
                .as_deref()
                .map_or_else(FieldVocabulary::default, FieldVocabulary::from_csv),
        );
        let now = match &self.now {
            Some(now) => DateTime::parse_from_rfc3339(now)
                .with_context(|| format!("--now must be an RFC 3339 timestamp, got '{now}'"))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };

        let query = parser.parse_at(&self.query, now)?;
        tracing::debug!(?query, "Parsed query");
        Ok(query)
    }
}

#[derive(Debug, Serialize)]
struct CompileOutput {
    #[serde(flatten)]
    compiled: CompiledQuery,
    fingerprint: String,
}

fn compile(args: &QueryArgs, tenant: &str, table: &str) -> Result<CompileOutput> {
    if tenant.trim().is_empty() {
        bail!("--tenant must not be empty");
    }
    if !is_identifier(table) {
        bail!("--table must be a plain identifier, got '{table}'");
    }

    let query = args.parse_query()?;
    Ok(CompileOutput {
        compiled: to_sql(&query, table, tenant),
        fingerprint: fingerprint(&query, tenant),
    })
}

fn run(cli: Cli) -> Result<String> {
    let output = match cli.command {
        Some(Commands::Parse(args)) => serde_json::to_string_pretty(&args.parse_query()?)?,
        Some(Commands::Compile {
            query,
            tenant,
            table,
        }) => serde_json::to_string_pretty(&compile(&query, &tenant, &table)?)?,
        None => format!(
            "Logsift CLI v{}\nUse --help for usage information",
            env!("CARGO_PKG_VERSION")
        ),
    };
    Ok(output)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("{}", run(Cli::parse())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-03-01T12:00:00Z";

    fn run_args(args: &[&str]) -> Result<serde_json::Value> {
        let output = run(Cli::try_parse_from(args)?)?;
        Ok(serde_json::from_str(&output)?)
    }

    #[test]
    fn test_cli_parse_without_command() {
        let cli = Cli::try_parse_from(["logsift"]).unwrap();
        assert!(cli.command.is_none());
        assert!(run(cli).unwrap().starts_with("Logsift CLI v"));
    }

    #[test]
    fn test_parse_command() {
        let json = run_args(&[
            "logsift",
            "parse",
            "search level=ERROR | stats count by service | head 5",
            "--now",
            NOW,
        ])
        .unwrap();

        assert_eq!(json["filters"][0]["field"], "level");
        assert_eq!(json["filters"][0]["value"], "ERROR");
        assert_eq!(json["limit"], 5);
    }

    #[test]
    fn test_compile_command() {
        let json = run_args(&[
            "logsift",
            "compile",
            "--tenant",
            "tenant-a",
            "search service=auth",
            "--now",
            NOW,
        ])
        .unwrap();

        let sql = json["sql"].as_str().unwrap();
        assert!(sql.starts_with("SELECT"));
        assert!(sql.contains("FROM logs WHERE org_id = ?"));
        assert_eq!(json["args"][0], "tenant-a");
        assert!(json["fingerprint"].is_string());
    }

    #[test]
    fn test_compile_with_custom_fields() {
        let err = run_args(&[
            "logsift",
            "compile",
            "-t",
            "tenant-a",
            "--fields",
            "level,region",
            "search service=auth",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("service"));

        let json = run_args(&[
            "logsift",
            "compile",
            "-t",
            "tenant-a",
            "--fields",
            "level,region",
            "search region=eu",
        ])
        .unwrap();
        assert!(json["sql"].as_str().unwrap().contains("region = ?"));
    }

    #[test]
    fn test_compile_rejects_bad_table() {
        let err = run_args(&[
            "logsift",
            "compile",
            "--tenant",
            "t",
            "--table",
            "logs; DROP TABLE logs",
            "search",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("--table"));
    }

    #[test]
    fn test_compile_requires_tenant() {
        let cli = Cli::try_parse_from(["logsift", "compile", "search"]);
        if std::env::var("LOGSIFT_TENANT").is_err() {
            assert!(cli.is_err());
        }
    }

    #[test]
    fn test_invalid_now() {
        let err = run_args(&["logsift", "parse", "search", "--now", "yesterday"]).unwrap_err();
        assert!(err.to_string().contains("--now"));
    }
}
