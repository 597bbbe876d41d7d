//! # designer-render
//!
//! Render a design against a product variant from the command line.
//!
//! Loads a background (and optional mask) image, optionally applies a
//! template and/or a saved design payload, and writes the preview JPEG or a
//! high-resolution PNG.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use designer_core::{DesignerConfig, MemoryStore, Template, TemplateCatalog};
use designer_session::{EditorSession, HttpFetcher, StaticVariantSource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Variant id used for the command-line session.
const CLI_VARIANT: &str = "cli";

/// Command-line arguments for designer-render.
#[derive(Debug, Clone, Parser)]
#[command(name = "designer-render")]
#[command(about = "Render a product design preview or high-resolution export")]
#[command(version)]
struct CliArgs {
    /// Product background image (path, file:// or http(s) URL)
    #[arg(long)]
    background: String,

    /// Printable-area mask image
    #[arg(long)]
    mask: Option<String>,

    /// Built-in template id to apply
    #[arg(long, conflicts_with = "template_file")]
    template: Option<String>,

    /// Template JSON file to apply
    #[arg(long)]
    template_file: Option<PathBuf>,

    /// Placeholder replacement for the template, as KEY=VALUE
    #[arg(long = "replace", value_parser = parse_replacement)]
    replacements: Vec<(String, String)>,

    /// Design payload (`{"objects": [...]}`) to restore first
    #[arg(long)]
    design: Option<PathBuf>,

    /// Designer configuration JSON (partial configs are filled with defaults)
    #[arg(long, env = "DESIGNER_CONFIG")]
    config: Option<PathBuf>,

    /// Write a full-quality PNG instead of the compressed preview
    #[arg(long)]
    high_res: bool,

    /// Output file
    #[arg(short, long)]
    output: PathBuf,
}

fn parse_replacement(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

/// Initialize structured tracing with optional JSON format.
///
/// Set `RUST_LOG` to control log levels (default: info,designer_session=debug).
/// Set `RUST_LOG_FORMAT=json` for JSON output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,designer_session=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<DesignerConfig> {
    let Some(path) = path else {
        return Ok(DesignerConfig::default());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

async fn load_template(args: &CliArgs) -> anyhow::Result<Option<Template>> {
    if let Some(id) = &args.template {
        let catalog = TemplateCatalog::builtin()?;
        let Some(template) = catalog.find(id) else {
            let known: Vec<_> = catalog.filter(None, None).iter().map(|t| t.id.clone()).collect();
            bail!("unknown template `{id}` (available: {})", known.join(", "));
        };
        return Ok(Some(template.clone()));
    }
    if let Some(path) = &args.template_file {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading template {}", path.display()))?;
        return Ok(Some(Template::from_json(&raw)?));
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = CliArgs::parse();

    let config = load_config(args.config.as_ref()).await?;
    let mut session = EditorSession::new(config, Arc::new(MemoryStore::new()));
    let source =
        StaticVariantSource::new().with_variant(CLI_VARIANT, &args.background, args.mask.clone());
    let fetcher = HttpFetcher::with_timeout(session.config().http_timeout())?;

    session
        .load_variant(CLI_VARIANT, &source, &fetcher)
        .await
        .context("loading variant layers")?;

    if let Some(path) = &args.design {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading design {}", path.display()))?;
        let count = session.restore_design_json(&raw, &fetcher).await?;
        tracing::info!(objects = count, "Design restored");
    }

    if let Some(template) = load_template(&args).await? {
        let replacements: BTreeMap<String, String> = args.replacements.iter().cloned().collect();
        let placed = session.apply_template(
            &template,
            (!replacements.is_empty()).then_some(&replacements),
        )?;
        tracing::info!(template = %template.id, objects = placed.len(), "Template applied");
    }

    for notice in session.take_notices() {
        tracing::warn!("{notice}");
    }

    let export = if args.high_res {
        session.generate_high_res_export()?
    } else {
        session.generate_preview()
    };
    if export.fallback {
        tracing::warn!("Rendering failed, wrote placeholder preview");
    }

    tokio::fs::write(&args.output, &export.bytes)
        .await
        .with_context(|| format!("writing {}", args.output.display()))?;
    tracing::info!(
        output = %args.output.display(),
        width = export.width,
        height = export.height,
        bytes = export.bytes.len(),
        "Export written"
    );

    session.close();
    Ok(())
}
