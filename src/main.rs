//! Flux Explorer CLI
//!
//! Command-line front end for exploring an InfluxDB 2.x bucket:
//! - Check the connection
//! - List discovered filter sets
//! - Run a filtered query and print the preview
//! - Export the preview to CSV or XLSX

use anyhow::{bail, Context};
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flux_explorer::config::{generate_default_config, Config, LoggingConfig, ENV_PREFIX};
use flux_explorer::flux::parse_instant;
use flux_explorer::{
    default_export_file_name, ExportKind, HttpBackend, PreviewTable, Session, TimeRangeInput,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "flux-explorer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Explore an InfluxDB bucket and build filtered Flux queries")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// InfluxDB host (http:// is assumed when no scheme is given)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// InfluxDB port (default 8086)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Organization
    #[arg(long, global = true)]
    pub org: Option<String>,

    /// Bucket to explore
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// API token
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Config file (default: search the standard locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the backend is reachable and the bucket visible
    Connect,

    /// Discover and print the filter sets
    Schema {
        /// Only show options containing this text
        #[arg(long)]
        search: Option<String>,
        /// Only show this set
        #[arg(long)]
        set: Option<String>,
    },

    /// Run a filtered query and print the preview
    Query {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        time: TimeArgs,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Print the generated Flux before the results
        #[arg(long)]
        show_query: bool,
    },

    /// Run a filtered query and export the preview
    Export {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        time: TimeArgs,
        /// Output file (default: export_YYYYMMDD_HHMMSS.<ext>)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// File kind
        #[arg(short, long, value_enum, default_value_t = ExportFormat::Csv)]
        kind: ExportFormat,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct SelectionArgs {
    /// Option to select, as NAME=VALUE (e.g. _measurement=cpu, host=web-1)
    #[arg(short, long = "select", value_name = "NAME=VALUE", required = true)]
    pub select: Vec<String>,
}

#[derive(Args)]
pub struct TimeArgs {
    /// Range start: RFC 3339, "now" or "now-<n><m|h|d|w>"
    #[arg(long)]
    pub from: Option<String>,
    /// Range stop: RFC 3339, "now" or "now-<n><m|h|d|w>"
    #[arg(long)]
    pub to: Option<String>,
    /// Start date (YYYY-MM-DD), used when --from/--to are absent
    #[arg(long)]
    pub from_date: Option<NaiveDate>,
    /// Start time of day (HH:MM[:SS])
    #[arg(long)]
    pub from_time: Option<String>,
    /// Stop date (YYYY-MM-DD)
    #[arg(long)]
    pub to_date: Option<NaiveDate>,
    /// Stop time of day (HH:MM[:SS])
    #[arg(long)]
    pub to_time: Option<String>,
}

impl TimeArgs {
    fn to_input(&self) -> anyhow::Result<TimeRangeInput> {
        if self.from.is_some() || self.to.is_some() {
            let now = Utc::now();
            let parse = |s: &Option<String>| s.as_deref().map(|s| parse_instant(s, now)).transpose();
            return Ok(TimeRangeInput::between(parse(&self.from)?, parse(&self.to)?));
        }

        let defaults = TimeRangeInput::default();
        Ok(TimeRangeInput::split(
            self.from_date,
            self.from_time.as_deref().unwrap_or(&defaults.from_time),
            self.to_date,
            self.to_time.as_deref().unwrap_or(&defaults.to_time),
        ))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    fn kind(self) -> ExportKind {
        match self {
            ExportFormat::Csv => ExportKind::Delimited,
            ExportFormat::Xlsx => ExportKind::Spreadsheet,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { output } = &cli.command {
        let content = generate_default_config();
        match output {
            Some(path) => {
                std::fs::write(path, &content)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Config written to {}", path.display());
            }
            None => print!("{}", content),
        }
        return Ok(());
    }

    // The global subscriber depends on the config, so loading logs through a scoped one
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(log_filter(&bootstrap_log_level()))
        .with_writer(std::io::stderr)
        .finish();
    let mut config = tracing::subscriber::with_default(bootstrap, || match &cli.config {
        Some(path) => Config::load_with_env(path),
        None => Ok(Config::load_default()),
    })?;
    apply_cli_overrides(&mut config, &cli);
    init_logging(&config.logging);

    match &cli.command {
        Commands::Connect => {
            let session = open_session(&config);
            let result = session.connect().await;
            println!("{}", session.status());
            result?;
        }

        Commands::Schema { search, set } => {
            let session = connect(&config).await?;
            print_schema(&session, search.as_deref(), set.as_deref())?;
        }

        Commands::Query {
            selection,
            time,
            format,
            show_query,
        } => {
            let session = connect(&config).await?;
            prepare_query(&session, selection, time)?;

            if *show_query {
                println!("{}\n", session.current_query());
            }

            session.submit_query().await?;
            let table = session.preview().unwrap_or_default();
            match format {
                OutputFormat::Table => print_table(&table),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
                OutputFormat::Csv => print_csv(&table)?,
            }
        }

        Commands::Export {
            selection,
            time,
            output,
            kind,
        } => {
            let session = connect(&config).await?;
            prepare_query(&session, selection, time)?;
            let rows = session.submit_query().await?;

            let kind = kind.kind();
            let path = output.clone().unwrap_or_else(|| {
                PathBuf::from(default_export_file_name(kind.extension(), &Local::now()))
            });
            match kind {
                ExportKind::Delimited => session.export_delimited(&path)?,
                ExportKind::Spreadsheet => session.export_spreadsheet(&path)?,
            }
            println!("Exported {} rows to {}", rows, path.display());
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}

fn log_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flux_explorer={}", level)))
}

fn bootstrap_log_level() -> String {
    std::env::var(format!("{}LOG_LEVEL", ENV_PREFIX)).unwrap_or_else(|_| "info".to_string())
}

fn init_logging(logging: &LoggingConfig) {
    let registry = tracing_subscriber::registry().with(log_filter(&logging.level));

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.connection.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.connection.port = Some(port);
    }
    if let Some(org) = &cli.org {
        config.connection.org = org.clone();
    }
    if let Some(bucket) = &cli.bucket {
        config.connection.bucket = bucket.clone();
    }
    if let Some(token) = &cli.token {
        config.connection.token = token.clone();
    }
}

fn open_session(config: &Config) -> Session {
    let backend = Arc::new(HttpBackend::new(config.http_config()));
    Session::with_options(backend, config.connection_settings(), config.session_options())
}

/// Open a session, connect and load the catalog
async fn connect(config: &Config) -> anyhow::Result<Session> {
    let session = open_session(config);
    session.connect().await?;
    session.enter_query_mode().await?;
    Ok(session)
}

fn prepare_query(session: &Session, selection: &SelectionArgs, time: &TimeArgs) -> anyhow::Result<()> {
    let sets = session.filter_sets();
    for item in &selection.select {
        let (name, value) = item
            .split_once('=')
            .with_context(|| format!("Expected NAME=VALUE, got {:?}", item))?;

        let known = sets
            .iter()
            .filter(|s| !s.is_synthetic() && s.name() == name)
            .any(|s| s.options().iter().any(|o| o.value() == value));
        if !known {
            bail!("{:?} is not a discovered value of {:?}", value, name);
        }
        session.select(name, value, true);
    }

    session.set_time_range(time.to_input()?);
    Ok(())
}

fn print_schema(session: &Session, search: Option<&str>, only: Option<&str>) -> anyhow::Result<()> {
    let panel = session
        .panels()
        .first()
        .map(|p| p.id)
        .context("No filter sets were discovered")?;
    session.set_search_text(panel, search.unwrap_or_default())?;

    for set in session.filter_sets() {
        if let Some(only) = only {
            if set.name() != only {
                continue;
            }
        }

        if set.is_synthetic() {
            for option in set.options() {
                eprintln!("Schema discovery errors: {}", option.value());
            }
            continue;
        }

        session.bind_panel(panel, set.name())?;
        let visible = session.visible_options(panel);
        println!("{} ({} of {})", set.name(), visible.len(), set.options().len());
        for option in visible {
            println!("  {}", option.value());
        }
    }

    Ok(())
}

fn print_table(table: &PreviewTable) {
    if table.is_empty() {
        println!("No data for the selected time range");
        return;
    }

    let cells: Vec<Vec<String>> = table
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|c| if c.is_missing() { "-".to_string() } else { c.to_string() })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |values: &[String]| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", line(table.columns()));
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + 3 * widths.len().saturating_sub(1)));
    for row in &cells {
        println!("{}", line(row));
    }
    println!("\n{} rows", table.row_count());
}

fn print_csv(table: &PreviewTable) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(std::io::stdout());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(ToString::to_string))?;
    }
    writer.flush()?;
    Ok(())
}
