use anyhow::{bail, Context, Result};
use box_metadata::{
    apply_batch, categorize_selection, process_files, ApplyOptions, CancellationFlag, Client,
    ClientConfig, DocumentType, ExtractionConfig, ExtractionMethod, FileItem, MetadataTarget,
    MetadataTemplate, ProcessingMode, Session, TemplateCache, TemplateRef, TemplateScope,
    AI_MODELS,
};
use box_metadata::templates::usable_templates;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SESSION_FILE: &str = "box-metadata-session.json";

#[derive(Parser, Debug)]
#[command(
    name = "box-metadata",
    version,
    about = "Extract metadata from Box files with Box AI and apply it back"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[arg(long, global = true, help = "Output machine-readable JSON")]
    json: bool,
    #[arg(
        long,
        global = true,
        env = "BOX_METADATA_SESSION",
        default_value = DEFAULT_SESSION_FILE,
        help = "File holding the selection, results and edits"
    )]
    session: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List metadata templates
    Templates {
        #[arg(long, default_value_t = false, help = "Ignore the cached template list")]
        refresh: bool,
        #[arg(long, value_enum, default_value_t = ScopeArg::All)]
        scope: ScopeArg,
    },
    /// Add files to the selection
    Select {
        #[arg(required = true)]
        file_ids: Vec<String>,
    },
    /// Remove a file from the selection
    Deselect { file_id: String },
    /// Detect the document type of every selected file
    Categorize {
        #[arg(long, help = "Box AI model used for categorization")]
        model: Option<String>,
    },
    /// Extract metadata from every selected file
    Extract {
        #[arg(long, help = "TOML extraction config")]
        config: Option<PathBuf>,
        #[arg(long, help = "Template key for structured extraction")]
        template: Option<String>,
        #[arg(long, default_value = "enterprise")]
        scope: String,
        #[arg(long, conflicts_with = "template", help = "Prompt for freeform extraction")]
        prompt: Option<String>,
        #[arg(long, default_value_t = false)]
        parallel: bool,
        #[arg(
            long,
            default_value_t = false,
            help = "Map document categories to their best-matching templates"
        )]
        auto_templates: bool,
    },
    /// Override one extracted field value
    Edit {
        file_id: String,
        field: String,
        value: String,
    },
    /// Write metadata to every selected file
    Apply {
        #[arg(long, default_value_t = false)]
        no_normalize: bool,
        #[arg(long, default_value_t = false)]
        keep_placeholders: bool,
        #[arg(long, default_value_t = false)]
        ignore_edits: bool,
        #[arg(long, help = "Template key; the free-form properties instance when omitted")]
        template: Option<String>,
        #[arg(long, default_value = "enterprise")]
        scope: String,
        #[arg(long, default_value_t = 60, help = "Seconds allowed per file (10-300)")]
        timeout: u64,
    },
    /// Print the session
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Enterprise,
    Global,
    All,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "box_metadata=debug"
    } else {
        "box_metadata=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn connect() -> Result<Client> {
    let config = ClientConfig::from_env().context("loading Box client configuration")?;
    Client::new(config).context("creating Box client")
}

fn cancel_on_ctrl_c() -> CancellationFlag {
    let flag = CancellationFlag::new();
    let handle = flag.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current file");
            handle.cancel();
        }
    });
    flag
}

fn template_cache_path(session: &Path) -> PathBuf {
    session.with_extension("templates.json")
}

fn load_template_cache(path: &Path) -> Result<TemplateCache> {
    if !path.exists() {
        return Ok(TemplateCache::new());
    }
    let data = std::fs::read_to_string(path)?;
    let templates: Vec<MetadataTemplate> =
        serde_json::from_str(&data).with_context(|| format!("reading {}", path.display()))?;
    Ok(TemplateCache::with_templates(templates))
}

async fn cached_templates(client: &Client, session: &Path, refresh: bool) -> Result<Vec<MetadataTemplate>> {
    let path = template_cache_path(session);
    let mut cache = load_template_cache(&path)?;
    let templates = cache.get(client, refresh).await?.to_vec();
    std::fs::write(&path, serde_json::to_string_pretty(&templates)?)?;
    Ok(templates)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_progress(index: usize, total: usize, file: &FileItem) {
    eprintln!("[{}/{}] {}", index + 1, total, file.name);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut session = Session::load(&cli.session)
        .with_context(|| format!("loading session {}", cli.session.display()))?;

    match cli.command {
        Commands::Templates { refresh, scope } => {
            let client = connect()?;
            let templates = match scope {
                ScopeArg::All => cached_templates(&client, &cli.session, refresh).await?,
                ScopeArg::Enterprise => {
                    usable_templates(client.list_templates(TemplateScope::Enterprise).await?)
                }
                ScopeArg::Global => usable_templates(client.list_templates(TemplateScope::Global).await?),
            };
            if cli.json {
                print_json(&templates)?;
            } else {
                for template in templates.iter().filter(|t| !t.hidden) {
                    println!(
                        "{}/{}\t{}\t{} fields",
                        template.scope,
                        template.template_key,
                        template.display_name,
                        template.fields.len()
                    );
                }
            }
            client.close().await;
        }
        Commands::Select { file_ids } => {
            let client = connect()?;
            let mut files = Vec::new();
            for file_id in &file_ids {
                match client.get_file_info(file_id).await {
                    Ok(file) => files.push(file),
                    Err(e) => warn!(file_id = %file_id, error = %e, "skipping file"),
                }
            }
            let added = session.select(files);
            info!(added, selected = session.selected().len(), "updated selection");
            session.save(&cli.session)?;
            client.close().await;
        }
        Commands::Deselect { file_id } => {
            if !session.deselect(&file_id) {
                bail!("file {} is not selected", file_id);
            }
            session.save(&cli.session)?;
        }
        Commands::Categorize { model } => {
            if let Some(model) = model.as_deref().filter(|m| !AI_MODELS.contains(m)) {
                warn!(model, "model is not in the list of known Box AI models");
            }
            let client = connect()?;
            let cancel = cancel_on_ctrl_c();
            let summary =
                categorize_selection(&client, &mut session, model.as_deref(), &cancel).await?;
            session.save(&cli.session)?;
            eprintln!(
                "categorized {} files, {} failed{}",
                summary.categorized,
                summary.failed,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            client.close().await;
        }
        Commands::Extract {
            config,
            template,
            scope,
            prompt,
            parallel,
            auto_templates,
        } => {
            let mut config = match config {
                Some(path) => ExtractionConfig::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => ExtractionConfig::default(),
            };
            if let Some(template) = template {
                config.method = ExtractionMethod::Structured;
                config.template = Some(TemplateRef::new(scope, template));
            }
            if let Some(prompt) = prompt {
                config.method = ExtractionMethod::Freeform;
                config.freeform_prompt = prompt;
            }
            if parallel {
                config.mode = ProcessingMode::Parallel;
            }

            let client = connect()?;
            if auto_templates {
                let templates = cached_templates(&client, &cli.session, false).await?;
                let categories: Vec<DocumentType> = session
                    .selected()
                    .iter()
                    .filter_map(|f| session.category(&f.id).map(|c| c.document_type))
                    .collect();
                let added = config.map_document_types(categories, &templates);
                info!(added, "mapped document types to templates");
            }

            let cancel = cancel_on_ctrl_c();
            let summary =
                process_files(&client, &mut session, &config, &cancel, print_progress).await?;
            session.save(&cli.session)?;
            eprintln!(
                "extracted {} files, {} failed{}",
                summary.processed,
                summary.failed,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            client.close().await;
        }
        Commands::Edit {
            file_id,
            field,
            value,
        } => {
            session.set_edit(&file_id, &field, Value::String(value))?;
            session.save(&cli.session)?;
        }
        Commands::Apply {
            no_normalize,
            keep_placeholders,
            ignore_edits,
            template,
            scope,
            timeout,
        } => {
            let target = match template {
                Some(template) => MetadataTarget::template(scope, template),
                None => MetadataTarget::Properties,
            };
            let options = ApplyOptions::default()
                .with_normalize_keys(!no_normalize)
                .with_filter_placeholders(!keep_placeholders)
                .with_use_edits(!ignore_edits)
                .with_target(target)
                .with_operation_timeout(timeout);

            let client = connect()?;
            let cancel = cancel_on_ctrl_c();
            let report = apply_batch(&client, &session, &options, &cancel, print_progress).await;
            client.close().await;

            if cli.json {
                print_json(&report)?;
            } else {
                for outcome in &report.outcomes {
                    match &outcome.error {
                        None if outcome.updated => println!("updated\t{}", outcome.file_name),
                        None => println!("created\t{}", outcome.file_name),
                        Some(e) => println!("failed\t{}\t{}", outcome.file_name, e),
                    }
                }
                eprintln!(
                    "{} succeeded, {} failed{}",
                    report.succeeded,
                    report.failed,
                    if report.cancelled { " (cancelled)" } else { "" }
                );
            }
            if report.failed > 0 {
                std::process::exit(1);
            }
        }
        Commands::Show => {
            if cli.json {
                print_json(&session)?;
            } else {
                for file in session.selected() {
                    println!("{} ({})", file.name, file.id);
                    if let Some(category) = session.category(&file.id) {
                        println!(
                            "  category: {} ({:.0}%)",
                            category.document_type,
                            category.confidence * 100.0
                        );
                    }
                    if let Some(values) = session.metadata_for(&file.id, true) {
                        for (key, value) in &values {
                            println!("  {}: {}", key, value);
                        }
                    }
                    if let Some(error) = session.error(&file.id) {
                        println!("  error: {}", error);
                    }
                }
            }
        }
    }

    Ok(())
}
