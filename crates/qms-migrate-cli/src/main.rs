//! qms-migrate CLI - schema migrations and SQLite to PostgreSQL data migration.

use chrono::Utc;
use clap::{Parser, Subcommand};
use qms_migrate::config::Config;
use qms_migrate::export::write_atomic;
use qms_migrate::mail::unresolved_placeholders;
use qms_migrate::runner::Applicability;
use qms_migrate::{
    emit_to_file, export_all, load, plan, seed_admin, verify, AdminSeed, Dialect, Intermediate,
    LoadOptions, MailDefaults, MailRenderer, MigrateError, MigrationRunner, PgDriver,
    PgLoadSession, PrecomputedHash, SchemaArtifact, SchemaDriver, SqliteDriver, SqliteSource,
    SslMode, TableSchema,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info, warn, Level};

const ROLLBACK_PROCEDURE: &str = "\
Migrations are forward-only; there is no automatic rollback.

To restore a previous schema:
  1. Stop the application server.
  2. Replace the database file with the backup taken before migrating
     (PostgreSQL: restore the pre-migration pg_dump into a fresh database).
  3. Start the application server on the restored database.

Columns and tables added by migrations are harmless to older application
versions, so restoring is only needed to recover data.";

#[derive(Parser)]
#[command(name = "qms-migrate")]
#[command(about = "Schema migrations and SQLite to PostgreSQL data migration for the construction QMS")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database file [default: data.sqlite3]
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate {
        /// Database engine: sqlite or postgres
        #[arg(long, default_value = "sqlite")]
        engine: String,

        /// Report pending migrations without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Show which migrations are pending
    Status {
        /// Database engine: sqlite or postgres
        #[arg(long, default_value = "sqlite")]
        engine: String,
    },

    /// Print the manual restore procedure (migrations are forward-only)
    Rollback,

    /// Write the translated PostgreSQL schema artifact
    ExportSchema {
        /// Output path [default: schema_postgres.sql]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Export every table to the JSON intermediate
    ExportData {
        /// Output directory [default: migration_export]
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Write the SQL data artifact from an intermediate
    EmitSql {
        /// Intermediate directory [default: migration_export]
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Output path [default: data_import.sql]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load an intermediate directly into PostgreSQL (DATABASE_URL)
    Load {
        /// Intermediate directory [default: migration_export]
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Rows per INSERT batch (1-100)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Check a loaded PostgreSQL target against its intermediate
    Verify {
        /// Intermediate directory [default: migration_export]
        #[arg(long)]
        input_dir: Option<PathBuf>,
    },

    /// Promote or create the system administrator
    SeedAdmin {
        /// Administrator e-mail [default: from config]
        #[arg(long)]
        email: Option<String>,

        /// Display name for a newly created administrator
        #[arg(long)]
        full_name: Option<String>,

        /// Encoded password hash produced by the application server
        #[arg(long, env = "ADMIN_PASSWORD_HASH", hide_env_values = true)]
        password_hash: String,

        /// Database engine: sqlite or postgres
        #[arg(long, default_value = "sqlite")]
        engine: String,
    },

    /// Render a mail template with JSON data
    RenderMail {
        /// Template name (file stem under the templates directory)
        #[arg(long)]
        template: String,

        /// JSON file holding an object of placeholder values
        #[arg(long)]
        data: PathBuf,

        /// Templates directory [default: templates]
        #[arg(long)]
        templates_dir: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity, &cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            debug!("{}", e.format_detailed());
            eprintln!("Error: {}", e.one_line());
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config, MigrateError> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => Config::default(),
    };
    if let Some(path) = &cli.database_path {
        config.source.database_path = path.clone();
    }
    Ok(config.with_env())
}

async fn connect_target(config: &Config) -> Result<PgDriver, MigrateError> {
    let url = config.target.require_url()?;
    let ssl_mode = SslMode::parse(&config.target.ssl_mode)?;
    PgDriver::connect(url, ssl_mode).await
}

async fn open_driver(engine: &str, config: &Config) -> Result<Box<dyn SchemaDriver>, MigrateError> {
    match engine.parse::<Dialect>()? {
        Dialect::Sqlite => Ok(Box::new(SqliteDriver::open(&config.source.database_path)?)),
        Dialect::Postgres => Ok(Box::new(connect_target(config).await?)),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), MigrateError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), MigrateError> {
    if let Commands::Rollback = cli.command {
        println!("{}", ROLLBACK_PROCEDURE);
        return Ok(());
    }

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Rollback => {}

        Commands::Migrate { engine, dry_run } => {
            let mut db = open_driver(engine, &config).await?;
            let summary = MigrationRunner::new()
                .dry_run(*dry_run)
                .run(db.as_mut())
                .await?;
            if cli.output_json {
                print_json(&summary)?;
            } else {
                print!("{}", summary.render());
            }
            if let Some(e) = summary.error() {
                return Err(e);
            }
        }

        Commands::Status { engine } => {
            let mut db = open_driver(engine, &config).await?;
            let status = MigrationRunner::new().status(db.as_mut()).await?;
            if cli.output_json {
                let rows: Vec<_> = status
                    .iter()
                    .map(|(id, name, state)| serde_json::json!({"id": id, "name": name, "status": state}))
                    .collect();
                print_json(&rows)?;
            } else {
                for (id, name, state) in &status {
                    let label = match state {
                        Applicability::Pending => "pending".to_string(),
                        Applicability::UpToDate => "up to date".to_string(),
                        Applicability::NotApplicable(r) => format!("not applicable ({})", r),
                    };
                    println!("  {:>2}. {:<24} {}", id, name, label);
                }
            }
        }

        Commands::ExportSchema { output } => {
            let output = output.clone().unwrap_or(config.export.schema_file.clone());
            let source = SqliteSource::open(&config.source.database_path)?;
            let tables = source.tables()?;
            let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
            let ordered: Vec<TableSchema> = plan(&names)?
                .iter()
                .filter_map(|name| tables.iter().find(|t| &t.name == name).cloned())
                .collect();
            let artifact =
                SchemaArtifact::build(&ordered, &source.source_name(), Utc::now().naive_utc())?;
            for warning in artifact.warnings() {
                warn!("{}", warning);
            }
            write_atomic(&output, artifact.render().as_bytes())?;
            info!("Wrote schema for {} tables to {:?}", ordered.len(), output);
            if cli.output_json {
                print_json(&serde_json::json!({
                    "output": output,
                    "tables": ordered.len(),
                    "warnings": artifact.warnings(),
                }))?;
            } else {
                println!("Schema written to {}", output.display());
            }
        }

        Commands::ExportData { output_dir } => {
            let output_dir = output_dir.clone().unwrap_or(config.export.output_dir.clone());
            let source = SqliteSource::open(&config.source.database_path)?;
            let manifest = export_all(&source, &output_dir, Utc::now().naive_utc())?;
            if cli.output_json {
                print_json(&manifest)?;
            } else {
                println!(
                    "Exported {} tables ({} rows) to {}",
                    manifest.tables_exported,
                    manifest.total_rows,
                    output_dir.display()
                );
            }
        }

        Commands::EmitSql { input_dir, output } => {
            let input_dir = input_dir.clone().unwrap_or(config.export.output_dir.clone());
            let output = output.clone().unwrap_or(config.export.data_file.clone());
            let intermediate = Intermediate::open(&input_dir)?;
            let summary = emit_to_file(&intermediate, &output)?;
            if cli.output_json {
                print_json(&summary)?;
            } else {
                println!(
                    "Wrote {} rows from {} tables to {}",
                    summary.rows,
                    summary.tables,
                    output.display()
                );
            }
        }

        Commands::Load {
            input_dir,
            batch_size,
        } => {
            let input_dir = input_dir.clone().unwrap_or(config.export.output_dir.clone());
            let intermediate = Intermediate::open(&input_dir)?;
            let options = LoadOptions::with_batch_size(batch_size.unwrap_or(config.load.batch_size));
            let mut session = PgLoadSession::new(connect_target(&config).await?);
            let report = load(&mut session, &intermediate, &options).await?;
            if cli.output_json {
                print_json(&report)?;
            } else {
                println!("\nLoad completed!");
                println!("  Tables: {}", report.tables.len());
                println!("  Rows: {}", report.rows_loaded());
                println!("  Rows rejected: {}", report.failures.len());
                println!("  Sequences re-seeded: {}", report.sequences_reseeded);
                for t in report.aborted_tables() {
                    println!("  Aborted: {} ({})", t.table, t.aborted.as_deref().unwrap_or(""));
                }
            }
            if let Some(e) = report.referential_error() {
                return Err(e);
            }
        }

        Commands::Verify { input_dir } => {
            let input_dir = input_dir.clone().unwrap_or(config.export.output_dir.clone());
            let intermediate = Intermediate::open(&input_dir)?;
            let mut driver = connect_target(&config).await?;
            let report = verify(&mut driver, &intermediate).await?;
            if cli.output_json {
                print_json(&report)?;
            } else {
                let problems = report.problems();
                println!(
                    "Checked {} tables and {} foreign keys: {}",
                    report.tables.len(),
                    report.foreign_keys.len(),
                    if problems.is_empty() { "OK" } else { "FAILED" }
                );
                for p in &problems {
                    println!("  {}", p);
                }
            }
            if let Some(e) = report.error() {
                return Err(e);
            }
        }

        Commands::SeedAdmin {
            email,
            full_name,
            password_hash,
            engine,
        } => {
            let mut seed = AdminSeed::from(&config.admin);
            if let Some(email) = email {
                seed.email = email.clone();
            }
            if let Some(name) = full_name {
                seed.full_name = name.clone();
            }
            let hasher = PrecomputedHash::new(password_hash.clone())?;
            let mut db = open_driver(engine, &config).await?;
            let outcome = seed_admin(db.as_mut(), &seed, &hasher).await?;
            if cli.output_json {
                print_json(&outcome)?;
            } else {
                println!("Administrator {}: {:?}", seed.email, outcome);
            }
        }

        Commands::RenderMail {
            template,
            data,
            templates_dir,
        } => {
            let dir = templates_dir
                .clone()
                .unwrap_or(config.mail.templates_dir.clone());
            let values = match serde_json::from_str(&std::fs::read_to_string(data)?)? {
                serde_json::Value::Object(map) => map,
                _ => {
                    return Err(MigrateError::Template(format!(
                        "{}: data must be a JSON object",
                        data.display()
                    )))
                }
            };
            let renderer = MailRenderer::new(dir, MailDefaults::from(&config.mail));
            let html = renderer.render(template, &values)?;
            let unresolved = unresolved_placeholders(&html);
            if !unresolved.is_empty() {
                warn!("Unresolved placeholders: {}", unresolved.join(", "));
            }
            print!("{}", html);
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
