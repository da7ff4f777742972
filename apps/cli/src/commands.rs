//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use diagram_backend::HttpBackend;
use diagram_core::{RunState, RunStatus, SourceFile, ToolCatalog, Workbench};
use diagram_shared::{AppConfig, DiagramError, Document, init_config, load_config};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinSet;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Diagram: analyze diagram images and consolidate the results.
#[derive(Parser)]
#[command(
    name = "diagram",
    version,
    about = "Upload diagram images, run analysis tools and curate one consolidated JSON document.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Analysis backend base URL (overrides the config file).
    #[arg(long, env = "DIAGRAM_BACKEND_URL", global = true)]
    pub backend_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Upload an image and run analysis tools on it.
    Analyze {
        /// Diagram image to analyze.
        image: PathBuf,

        /// Tools to run (comma-separated). Defaults to the whole catalog.
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,

        /// Capture every successful result into the document.
        #[arg(long)]
        capture: bool,

        /// Write the document here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Upload an image and print a whole-diagram description.
    Describe {
        /// Diagram image to describe.
        image: PathBuf,
    },

    /// Replace an exported document (or one tool's entry) with edited JSON.
    Edit {
        /// Previously exported document.
        document: PathBuf,

        /// File holding the replacement JSON text, or `-` for stdin.
        #[arg(long = "with", value_name = "FILE")]
        replacement: PathBuf,

        /// Edit only this tool's entry.
        #[arg(long)]
        tool: Option<String>,

        /// Write the result here instead of overwriting the input.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the resolved tool catalog.
    Tools,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "diagram=info",
        1 => "diagram=debug",
        _ => "diagram=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so exported JSON on stdout stays clean.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let backend_url = cli.backend_url.as_deref();
    match cli.command {
        Command::Analyze {
            image,
            tools,
            capture,
            out,
        } => {
            let config = resolve_config(backend_url)?;
            cmd_analyze(&config, &image, &tools, capture, out.as_deref()).await
        }
        Command::Describe { image } => {
            let config = resolve_config(backend_url)?;
            cmd_describe(&config, &image).await
        }
        Command::Edit {
            document,
            replacement,
            tool,
            out,
        } => {
            let config = resolve_config(backend_url)?;
            cmd_edit(
                &config,
                &document,
                &replacement,
                tool.as_deref(),
                out.as_deref(),
            )
        }
        Command::Tools => cmd_tools(&resolve_config(backend_url)?),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(backend_url)?),
        },
    }
}

/// Load the config file and apply command-line overrides.
fn resolve_config(backend_url: Option<&str>) -> Result<AppConfig> {
    let mut config = load_config()?;
    if let Some(url) = backend_url {
        config.backend.base_url = url.to_string();
    }
    Ok(config)
}

fn open_workbench(config: &AppConfig) -> Result<Workbench> {
    let http = Arc::new(HttpBackend::from_config(config)?);
    let catalog = ToolCatalog::builtin().with_overrides(&config.tools)?;
    Ok(Workbench::new(catalog, http.clone(), http).with_indent(config.editor.indent))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_analyze(
    config: &AppConfig,
    image: &Path,
    tools: &[String],
    capture: bool,
    out: Option<&Path>,
) -> Result<()> {
    let mut wb = open_workbench(config)?;
    let stages = plan_stages(wb.catalog(), tools)?;
    let file = SourceFile::from_path(image).await?;

    info!(
        image = %image.display(),
        tools = stages.iter().map(Vec::len).sum::<usize>(),
        stages = stages.len(),
        capture,
        "analyzing diagram"
    );

    let progress = CliProgress::new();
    progress.phase(format!("Uploading {}", file.meta.name));
    let source_url = wb.upload(&file).await?;
    info!(%source_url, "image uploaded");

    // Each stage starts after the previous one so context-aware tools can
    // read this run's captures.
    let mut refused = Vec::new();
    for stage in &stages {
        refused.extend(run_stage(&mut wb, stage, capture, &progress).await?);
    }
    progress.finish();

    print_summary(&wb, stages.iter().flatten(), &refused)?;
    write_document(wb.document(), config.editor.indent, out)
}

async fn cmd_describe(config: &AppConfig, image: &Path) -> Result<()> {
    let mut wb = open_workbench(config)?;
    let file = SourceFile::from_path(image).await?;

    let progress = CliProgress::new();
    progress.phase(format!("Uploading {}", file.meta.name));
    wb.upload(&file).await?;
    progress.phase("Describing diagram");
    let description = wb.describe().await?;
    progress.finish();

    println!("{description}");
    Ok(())
}

fn cmd_edit(
    config: &AppConfig,
    document_path: &Path,
    replacement_path: &Path,
    tool: Option<&str>,
    out: Option<&Path>,
) -> Result<()> {
    let document = read_document(document_path)?;
    let replacement = read_replacement(replacement_path)?;

    let mut wb = open_workbench(config)?;
    wb.restore(document);
    match tool {
        Some(id) => {
            wb.open_tool_edit(id)?;
        }
        None => {
            wb.open_edit()?;
        }
    }

    if !wb.edit_text_change(replacement)? {
        let reason = wb
            .edit_session()
            .and_then(|session| session.buffer().parse_error())
            .unwrap_or("unparseable input")
            .to_string();
        wb.cancel_edit()?;
        return Err(DiagramError::invalid_json(reason))
            .wrap_err_with(|| format!("{} was not changed", document_path.display()));
    }

    wb.commit_edit()?;
    write_document(wb.document(), config.editor.indent, Some(out.unwrap_or(document_path)))
}

fn cmd_tools(config: &AppConfig) -> Result<()> {
    let catalog = ToolCatalog::builtin().with_overrides(&config.tools)?;
    for spec in catalog.iter() {
        let context = spec
            .context
            .iter()
            .map(|field| format!("{} as {}", field.source, field.field))
            .collect::<Vec<_>>();
        if context.is_empty() {
            println!("  {:<16} {}", spec.id, spec.title);
        } else {
            println!(
                "  {:<16} {}  [context: {}]",
                spec.id,
                spec.title,
                context.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Analysis helpers
// ---------------------------------------------------------------------------

/// Requested tool ids grouped into stages that run one after another. Tools
/// in a stage are independent of each other.
fn plan_stages(catalog: &ToolCatalog, requested: &[String]) -> Result<Vec<Vec<String>>> {
    let requested: Vec<&str> = requested.iter().map(String::as_str).collect();
    let stages = catalog
        .run_stages(&requested)?
        .into_iter()
        .map(|stage| stage.into_iter().map(|spec| spec.id.clone()).collect())
        .collect();
    Ok(stages)
}

/// Run `tool_ids` concurrently and apply each outcome as it arrives.
/// Returns the tools that could not be started, with the reason.
async fn run_stage(
    wb: &mut Workbench,
    tool_ids: &[String],
    capture: bool,
    progress: &CliProgress,
) -> Result<Vec<(String, String)>> {
    let mut refused = Vec::new();
    let mut in_flight = JoinSet::new();
    for id in tool_ids {
        let ticket = match wb.begin_run(id) {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(tool = %id, error = %e, "analysis not started");
                refused.push((id.clone(), e.user_message()));
                continue;
            }
        };
        let backend = wb.backend();
        in_flight.spawn(async move {
            let outcome = ticket.execute(backend.as_ref()).await;
            (ticket, outcome)
        });
    }

    let total = in_flight.len();
    let mut finished = 0;
    while let Some(joined) = in_flight.join_next().await {
        let (ticket, outcome) = joined.wrap_err("analysis task failed")?;
        finished += 1;
        progress.phase(format!("Analyzing [{finished}/{total}] {}", ticket.tool_id));

        if !wb.complete_run(&ticket, outcome) {
            continue;
        }
        let status = wb.runner(&ticket.tool_id)?.status();
        match status {
            RunStatus::Success if capture => wb.capture(&ticket.tool_id)?,
            RunStatus::Error => warn!(tool = %ticket.tool_id, "analysis failed"),
            _ => {}
        }
    }
    Ok(refused)
}

fn print_summary<'a>(
    wb: &Workbench,
    tool_ids: impl IntoIterator<Item = &'a String>,
    refused: &[(String, String)],
) -> Result<()> {
    eprintln!();
    for id in tool_ids {
        if let Some((_, reason)) = refused.iter().find(|(tool, _)| tool == id) {
            eprintln!("  {id:<16} {:<8} {reason}", "skipped");
            continue;
        }
        let runner = wb.runner(id)?;
        let key = runner.spec().key();
        let detail = match runner.state() {
            RunState::Error(message) => message.clone(),
            RunState::Success(_) if wb.document().entry(&key).is_some() => {
                format!("captured as {key}")
            }
            _ => String::new(),
        };
        eprintln!(
            "  {:<16} {:<8} {detail}",
            runner.spec().id,
            runner.status().to_string()
        );
    }
    eprintln!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Document files
// ---------------------------------------------------------------------------

fn read_document(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .wrap_err_with(|| format!("{} is not an exported document", path.display()))
}

fn read_replacement(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        return std::io::read_to_string(std::io::stdin()).wrap_err("failed to read stdin");
    }
    std::fs::read_to_string(path).wrap_err_with(|| format!("failed to read {}", path.display()))
}

fn write_document(document: &Document, indent: usize, out: Option<&Path>) -> Result<()> {
    let json = document.to_pretty_string(indent)?;
    match out {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), entries = document.entry_count(), "document written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Spinner on stderr; cleared when dropped so errors print on a clean line.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn phase(&self, message: impl Into<String>) {
        self.spinner.set_message(message.into());
    }

    #[cfg(test)]
    fn hidden() -> Self {
        Self {
            spinner: ProgressBar::hidden(),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}
