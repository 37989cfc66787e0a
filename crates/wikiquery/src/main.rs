mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};
use wikiquery_core::config::load_config;
use wikiquery_core::continue_manager::next_request;
use wikiquery_core::migrate::{pending_migration_count, run_migrations};
use wikiquery_core::params::RequestParams;
use wikiquery_core::query::{QueryOptions, execute_query};
use wikiquery_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    display_path, ensure_database_ready, init_layout, inspect_runtime, resolve_paths,
};
use wikiquery_core::store::{import_fixture_file, open_connection, store_stats};

#[derive(Debug, Parser)]
#[command(
    name = "wikiquery",
    version,
    about = "Resumable MediaWiki-style list queries over a local SQLite store"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Increase log verbosity (-v info, -vv debug, -vvv trace)")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Status,
    Db(DbArgs),
    #[command(about = "Run one query batch and print the JSON response")]
    Query(QueryArgs),
    #[command(about = "Follow continuation until the query is exhausted")]
    Walk(WalkArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config.toml")]
    force: bool,
    #[arg(long, help = "Skip writing .wikiquery/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
    #[command(about = "Load a JSON wiki fixture into the store")]
    Import {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Debug, Args)]
struct QueryArgs {
    #[arg(value_name = "KEY=VALUE", required = true)]
    params: Vec<String>,
    #[arg(long, help = "Use the privileged limit ceiling")]
    privileged: bool,
}

#[derive(Debug, Args)]
struct WalkArgs {
    #[arg(value_name = "KEY=VALUE", required = true)]
    params: Vec<String>,
    #[arg(long, help = "Use the privileged limit ceiling")]
    privileged: bool,
    #[arg(long, default_value_t = 1000, help = "Stop after this many batches")]
    max_batches: usize,
    #[arg(long, help = "Print every batch response")]
    show_batches: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose)?;
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(&runtime),
            DbSubcommand::Stats => run_db_stats(&runtime),
            DbSubcommand::Import { path } => run_db_import(&runtime, &path),
        },
        Some(Commands::Query(args)) => run_query(&runtime, args),
        Some(Commands::Walk(args)) => run_walk(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("Initialized wikiquery runtime layout");
    println!("project_root: {}", display_path(&paths.project_root));
    println!("state_dir: {}", display_path(&paths.state_dir));
    println!("data_dir: {}", display_path(&paths.data_dir));
    println!("db_path: {}", display_path(&paths.db_path));
    println!("config_path: {}", display_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", display_path(&paths.project_root));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    if status.db_exists {
        println!("pending_migrations: {}", pending_migration_count(&paths)?);
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", display_path(&paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("applied.v{:03}: {}", migration.version, migration.name);
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_ready_store(&paths)?;
    let stats = store_stats(&connection)?;

    println!("db stats");
    println!("db_path: {}", display_path(&paths.db_path));
    println!("schema_version: {}", stats.schema_version);
    for (table, count) in &stats.tables {
        println!("table.{table}: {count}");
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_import(runtime: &RuntimeOptions, path: &Path) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let mut connection = open_ready_store(&paths)?;
    let report = import_fixture_file(&mut connection, path)?;

    println!("db import");
    println!("source: {}", display_path(path));
    for (table, count) in &report.inserted {
        println!("inserted.{table}: {count}");
    }
    println!("inserted_total: {}", report.total());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_query(runtime: &RuntimeOptions, args: QueryArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_ready_store(&paths)?;
    let options = query_options(&paths, args.privileged)?;
    let request = RequestParams::from_pairs(&args.params);

    let response = run_batch(&connection, &request, &options)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_walk(runtime: &RuntimeOptions, args: WalkArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let connection = open_ready_store(&paths)?;
    let options = query_options(&paths, args.privileged)?;
    let original = RequestParams::from_pairs(&args.params);

    println!("query walk");
    let mut next = Some(original.clone());
    let mut batches = 0usize;
    let mut totals: Vec<(String, usize)> = Vec::new();
    while let Some(request) = next {
        if batches == args.max_batches {
            bail!("stopped after {batches} batches; the query still continues");
        }
        let response = run_batch(&connection, &request, &options)?;
        batches += 1;

        if args.show_batches {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        for (module, count) in batch_counts(&response) {
            println!("batch.{batches}.{module}: {count}");
            match totals.iter_mut().find(|(name, _)| *name == module) {
                Some((_, total)) => *total += count,
                None => totals.push((module, count)),
            }
        }
        if let Some(restart) = response.get("restart") {
            println!("restart: {restart}");
            break;
        }
        next = next_request(&original, &response);
        debug!(batch = batches, continues = next.is_some(), "walk step");
    }

    println!("batches: {batches}");
    for (module, total) in &totals {
        println!("total.{module}: {total}");
    }
    info!(batches, "walk finished");
    print_diagnostics(runtime, &paths);
    Ok(())
}

/// Runs one batch; recoverable query errors are printed as API error
/// responses before failing the command.
fn run_batch(
    connection: &Connection,
    request: &RequestParams,
    options: &QueryOptions,
) -> Result<Value> {
    match execute_query(connection, request, options) {
        Ok(response) => Ok(response),
        Err(error) if error.is_recoverable() => {
            println!("{}", serde_json::to_string_pretty(&error.to_response())?);
            bail!("query rejected ({})", error.code());
        }
        Err(error) => Err(error.into()),
    }
}

fn batch_counts(response: &Value) -> Vec<(String, usize)> {
    response
        .get("query")
        .and_then(Value::as_object)
        .map(|query| {
            query
                .iter()
                .map(|(module, records)| {
                    (
                        module.clone(),
                        records.as_array().map(Vec::len).unwrap_or_default(),
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn query_options(paths: &ResolvedPaths, privileged: bool) -> Result<QueryOptions> {
    let config = load_config(&paths.config_path)?;
    Ok(QueryOptions::from_config(&config, privileged))
}

fn open_ready_store(paths: &ResolvedPaths) -> Result<Connection> {
    let status = inspect_runtime(paths)?;
    ensure_database_ready(paths, &status)?;
    let pending = pending_migration_count(paths)?;
    if pending > 0 {
        bail!("{pending} schema migration(s) pending. {MIGRATIONS_POLICY_MESSAGE}");
    }
    open_connection(&paths.db_path)
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides);
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    Ok(resolve_paths(&context, &overrides))
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use serde_json::json;

    use super::{Cli, Commands, DbSubcommand, batch_counts};

    #[test]
    fn parses_query_pairs_and_global_flags() {
        let cli = Cli::parse_from([
            "wikiquery",
            "-vv",
            "query",
            "list=allpages",
            "aplimit=5",
            "--privileged",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Some(Commands::Query(args)) => {
                assert_eq!(args.params, ["list=allpages", "aplimit=5"]);
                assert!(args.privileged);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_db_import() {
        let cli = Cli::parse_from(["wikiquery", "db", "import", "fixture.json"]);
        match cli.command {
            Some(Commands::Db(db)) => match db.command {
                DbSubcommand::Import { path } => assert_eq!(path.to_str(), Some("fixture.json")),
                other => panic!("unexpected db command: {other:?}"),
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn counts_records_per_module() {
        let response = json!({
            "query": {
                "allpages": [{"title": "A"}, {"title": "B"}],
                "pages": [{"title": "C"}]
            }
        });
        assert_eq!(
            batch_counts(&response),
            vec![("allpages".to_string(), 2), ("pages".to_string(), 1)]
        );
        assert!(batch_counts(&json!({"batchcomplete": true})).is_empty());
    }
}
