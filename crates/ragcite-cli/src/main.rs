use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ragcite_core::{
    finalize_citations_with_collector, AgentSettings, Collaborators, ToolCall, ToolRegistry,
    TurnContext, TurnSnapshot,
};
use ragcite_local::{FirecrawlClient, LocalCorpus, SerperClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ragcite")]
#[command(
    about = "Run retrieval tools for an agent turn and map citations back to their sources",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print version info.
    Version(VersionCmd),
    /// Show which collaborators are configured (json; no secrets).
    Doctor(DoctorCmd),
    /// Print the function-calling definitions of the given tools (json).
    Tools(ToolsCmd),
    /// Run one tool call, recording its results in a turn file.
    Call(CallCmd),
    /// Renumber citations in a finished answer against a turn file.
    Cite(CiteCmd),
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

#[derive(clap::Args, Debug)]
struct ToolsCmd {
    /// Comma-separated tool names, e.g. `web_search,content`.
    #[arg(long, value_delimiter = ',', required = true)]
    tools: Vec<String>,
    /// Declare object parameters as JSON-encoded strings (models without nested-object support).
    #[arg(long)]
    flat_params: bool,
    /// Agent settings (json).
    #[arg(long, env = "RAGCITE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct CallCmd {
    /// Tool to call.
    #[arg(long)]
    tool: String,
    /// Tool arguments as a JSON object.
    #[arg(long, conflicts_with = "args_json_file")]
    args_json: Option<String>,
    /// File containing the tool arguments as a JSON object.
    #[arg(long)]
    args_json_file: Option<PathBuf>,
    /// Turn file. Loaded before the call when it exists, written after a successful call.
    #[arg(long)]
    turn: Option<PathBuf>,
    /// JSON corpus backing search_file_knowledge, search_file_descriptions and content.
    #[arg(long, env = "RAGCITE_CORPUS")]
    corpus: Option<PathBuf>,
    /// Agent settings (json).
    #[arg(long, env = "RAGCITE_CONFIG")]
    config: Option<PathBuf>,
    /// Override the per-call context budget (tokens).
    #[arg(long)]
    max_tool_context_length: Option<usize>,
    /// Declare object parameters as JSON-encoded strings.
    #[arg(long)]
    flat_params: bool,
    /// Call id echoed in the output.
    #[arg(long, default_value = "cli")]
    call_id: String,
}

#[derive(clap::Args, Debug)]
struct CiteCmd {
    /// Turn file written by `ragcite call --turn`.
    #[arg(long)]
    turn: PathBuf,
    /// The model's answer.
    #[arg(long, conflicts_with = "text_file", required_unless_present = "text_file")]
    text: Option<String>,
    /// File containing the model's answer.
    #[arg(long)]
    text_file: Option<PathBuf>,
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn init_tracing() {
    // stdout carries the JSON results; logs go to stderr.
    let filter = tracing_subscriber::EnvFilter::try_from_env("RAGCITE_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Opt-in env-file loader (`RAGCITE_ENV_FILE`). Sets a var only when the
/// process env does not already have it; never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("RAGCITE_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        tracing::warn!(path = p, "RAGCITE_ENV_FILE is not readable");
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let s = s.strip_prefix("export ").unwrap_or(s);
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        let v = v.trim().trim_matches('"');
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v);
        }
    }
}

fn load_settings(path: Option<&Path>) -> Result<AgentSettings> {
    let Some(path) = path else {
        return Ok(AgentSettings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse config {}", path.display()))
}

async fn build_collaborators(corpus: Option<&Path>) -> Result<Collaborators> {
    let mut collab = Collaborators::new();
    if let Some(path) = corpus {
        let corpus = Arc::new(
            LocalCorpus::load(path)
                .await
                .with_context(|| format!("load corpus {}", path.display()))?,
        );
        collab = collab
            .with_knowledge(corpus.clone())
            .with_content(corpus.clone())
            .with_files(corpus);
    }
    // Remote collaborators stay unbound without keys; calls then fail as not configured.
    if SerperClient::is_configured() || FirecrawlClient::is_configured() {
        let client = ragcite_local::http_client()?;
        if let Ok(web) = SerperClient::from_env(client.clone()) {
            collab = collab.with_web(Arc::new(web));
        }
        if let Ok(scrape) = FirecrawlClient::from_env(client) {
            collab = collab.with_scrape(Arc::new(scrape));
        }
    }
    tracing::debug!(collaborators = ?collab, "collaborators bound");
    Ok(collab)
}

fn read_turn(path: &Path) -> Result<TurnSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read turn {}", path.display()))?;
    let snap: TurnSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parse turn {}", path.display()))?;
    if snap.schema_version != TurnSnapshot::SCHEMA_VERSION {
        anyhow::bail!(
            "unsupported turn schema_version {} (expected {})",
            snap.schema_version,
            TurnSnapshot::SCHEMA_VERSION
        );
    }
    Ok(snap)
}

fn write_turn(path: &Path, turn: &TurnContext) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&turn.snapshot())?;
    std::fs::write(path, json + "\n").with_context(|| format!("write turn {}", path.display()))
}

fn parse_args_json(raw: &str, origin: &str) -> Result<serde_json::Value> {
    let v: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("parse tool args from {origin}"))?;
    if !v.is_object() {
        anyhow::bail!("tool args from {origin} must be a JSON object");
    }
    Ok(v)
}

async fn run_call(args: CallCmd) -> Result<()> {
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(n) = args.max_tool_context_length {
        settings.max_tool_context_length = n;
    }
    if args.flat_params {
        settings.structured_parameters = false;
    }

    let tool_args = match (&args.args_json, &args.args_json_file) {
        (Some(s), _) => parse_args_json(s, "--args-json")?,
        (None, Some(p)) => {
            let raw = std::fs::read_to_string(p)
                .with_context(|| format!("read {}", p.display()))?;
            parse_args_json(&raw, &p.display().to_string())?
        }
        (None, None) => serde_json::json!({}),
    };

    let collab = build_collaborators(args.corpus.as_deref()).await?;
    let registry = ToolRegistry::register(&[args.tool.as_str()], &collab, &settings)?;

    let turn = match args.turn.as_deref() {
        Some(p) if p.exists() => TurnContext::from_snapshot(read_turn(p)?),
        _ => TurnContext::new(),
    };
    let result = registry
        .execute(&turn, &ToolCall::new(args.call_id, args.tool.clone(), tool_args))
        .await?;
    if let Some(p) = args.turn.as_deref() {
        write_turn(p, &turn)?;
    }

    let v = serde_json::json!({
        "schema_version": 1,
        "kind": "call",
        "ok": true,
        "call_id": result.call_id,
        "tool": result.tool,
        "call_index": result.record.call_index,
        "source_ids": result.record.source_ids,
        "context": result.llm_text,
    });
    println!("{}", v);
    Ok(())
}

fn run_cite(args: CiteCmd) -> Result<()> {
    let turn = TurnContext::from_snapshot(read_turn(&args.turn)?);
    let text = match (args.text, args.text_file) {
        (Some(t), _) => t,
        (None, Some(p)) => {
            std::fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?
        }
        (None, None) => anyhow::bail!("one of --text or --text-file is required"),
    };
    let done = finalize_citations_with_collector(&text, turn.collector());

    match args.output.to_ascii_lowercase().as_str() {
        "text" => {
            println!("{}", done.text);
            if !done.bibliography.is_empty() {
                println!();
                for e in &done.bibliography {
                    let title = e.title.as_deref().unwrap_or(e.id.as_str());
                    match e.link.as_deref() {
                        Some(link) => println!("[{}] {title} ({link})", e.number),
                        None => println!("[{}] {title}", e.number),
                    }
                }
            }
        }
        _ => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "cite",
                "ok": true,
                "text": done.text,
                "bibliography": done.bibliography,
                "unresolved": done.unresolved.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
                "citation_count": done.citations.len(),
            });
            println!("{}", v);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing first so env-file problems are reported; the filter comes from
    // the process env only.
    init_tracing();
    load_env_file();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "ragcite",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("ragcite {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{}", v),
            }
        }
        Commands::Doctor(args) => {
            fn has_env(k: &str) -> bool {
                std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
            }

            let t0 = std::time::Instant::now();
            // Booleans only; never print values.
            let serper = SerperClient::is_configured();
            let firecrawl = FirecrawlClient::is_configured();
            let corpus = has_env("RAGCITE_CORPUS");
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "doctor",
                "ok": true,
                "name": "ragcite",
                "version": env!("CARGO_PKG_VERSION"),
                "configured": {
                    "web_search": {"serper": serper},
                    "scrape": {"firecrawl": firecrawl},
                    "corpus": corpus,
                    "env_file": has_env("RAGCITE_ENV_FILE"),
                },
                "tools": {
                    "search_file_knowledge": corpus,
                    "search_file_descriptions": corpus,
                    "content": corpus,
                    "web_search": serper,
                    "firecrawl_scrape": firecrawl,
                },
                "elapsed_ms": t0.elapsed().as_millis() as u64,
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => {
                    println!("ragcite {}", env!("CARGO_PKG_VERSION"));
                    let rows = [("serper", serper), ("firecrawl", firecrawl), ("corpus", corpus)];
                    for (name, ok) in rows {
                        println!("{name}: {}", if ok { "configured" } else { "missing" });
                    }
                }
                _ => println!("{}", v),
            }
        }
        Commands::Tools(args) => {
            let mut settings = load_settings(args.config.as_deref())?;
            if args.flat_params {
                settings.structured_parameters = false;
            }
            let registry = ToolRegistry::register(&args.tools, &Collaborators::new(), &settings)?;
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "tools",
                "ok": true,
                "tools": registry.definitions(),
            });
            println!("{}", v);
        }
        Commands::Call(args) => run_call(args).await?,
        Commands::Cite(args) => run_cite(args)?,
    }
    Ok(())
}
