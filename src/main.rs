#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use image::ImageFormat;
use serde::Serialize;
use serde_json::json;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use intentprobe::{
    Browser, BrowserOptions, BrowserType, Category, ElementDescriptor, EngineConfig,
    KnowledgeRecord, LearningStats, LearningStore, OutputFormat, PageDriver, ProbeResult,
    Provenance, Query, ReferenceImage, ReferenceStore, Session, SessionStats, Subject,
    ViewportSize,
};

const EXIT_SUCCESS: i32 = 0;

#[derive(Parser)]
#[command(name = "intentprobe")]
#[command(about = "Resolve UI intents to live page elements", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Browser to use
    #[arg(short, long, global = true, default_value = "firefox")]
    browser: String,

    /// WebDriver address (defaults to localhost:4444 for Firefox, :9515 for Chrome)
    #[arg(long, global = true)]
    webdriver_url: Option<String>,

    /// Set viewport size (WIDTHxHEIGHT, e.g., 1920x1080)
    #[arg(long, global = true)]
    viewport: Option<String>,

    /// Run browser in visible mode (disables headless)
    #[arg(long = "no-headless", global = true)]
    no_headless: bool,

    /// Directory holding references and the knowledge store (default ~/.intentprobe)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an intent on a page, optionally acting on the winner
    Resolve {
        /// URL to open
        url: String,

        /// Intent category (email, password, search, button, add_to_cart, cart, ...)
        category: Category,

        /// Visible text to look for, e.g. "Giriş Yap"
        #[arg(long)]
        hint: Option<String>,

        /// Click the resolved element, with recovery for eligible intents
        #[arg(long, conflicts_with = "type_text")]
        click: bool,

        /// Type into the resolved element
        #[arg(long = "type", value_name = "TEXT")]
        type_text: Option<String>,

        /// Scroll down and rescan up to this many times when nothing is found
        #[arg(long, default_value = "0")]
        scroll_steps: usize,

        /// Close cookie banners and campaign popups before resolving
        #[arg(long)]
        dismiss_overlays: bool,
    },

    /// Find a named element by CSS selector, healing visually when it breaks
    Heal {
        /// URL to open
        url: String,

        /// Durable element name the golden reference is stored under
        name: String,

        /// CSS selector for the element
        selector: String,
    },

    /// Show what the learning store knows
    Knowledge {
        /// Only records for this site key
        #[arg(long)]
        site: Option<String>,
    },

    /// List the reference image repository
    References {
        #[arg(long)]
        category: Option<Category>,

        #[arg(long, value_enum)]
        provenance: Option<Provenance>,
    },

    /// Add a curated reference image for a category
    ImportReference {
        /// PNG or JPEG file
        file: PathBuf,

        category: Category,

        /// Site the crop was taken from
        #[arg(long, default_value = "any")]
        site: String,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            // Output JSON error to stdout for programmatic consumption
            let error_json = json!({
                "error": true,
                "message": err.to_string(),
                "exit_code": err.exit_code()
            });
            println!(
                "{}",
                serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
            );

            // Also log to stderr for human reading
            eprintln!("Error: {}", err);
            std::process::exit(err.exit_code());
        }
    }
}

async fn run() -> ProbeResult<()> {
    // Initialize tracing to stderr (so JSON output to stdout remains clean)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "intentprobe=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match &cli.command {
        Commands::Resolve {
            url,
            category,
            hint,
            click,
            type_text,
            scroll_steps,
            dismiss_overlays,
        } => {
            let mut session = open_session(&cli, config).await?;
            let outcome = handle_resolve(
                &mut session,
                url,
                *category,
                hint.as_deref(),
                *click,
                type_text.as_deref(),
                *scroll_steps,
                *dismiss_overlays,
                cli.format,
            )
            .await;
            close_session(session, outcome).await
        }
        Commands::Heal {
            url,
            name,
            selector,
        } => {
            let mut session = open_session(&cli, config).await?;
            let outcome = handle_heal(&mut session, url, name, selector, cli.format).await;
            close_session(session, outcome).await
        }
        Commands::Knowledge { site } => handle_knowledge(&config, site.as_deref(), cli.format),
        Commands::References {
            category,
            provenance,
        } => handle_references(&config, *category, *provenance, cli.format),
        Commands::ImportReference {
            file,
            category,
            site,
        } => handle_import(&config, file, *category, site, cli.format),
    }
}

async fn open_session(cli: &Cli, config: EngineConfig) -> ProbeResult<Session<Browser>> {
    let browser_type: BrowserType = cli.browser.parse()?;
    let mut options = BrowserOptions::new(browser_type);
    options.webdriver_url = cli.webdriver_url.clone();
    options.headless = !cli.no_headless;
    if let Some(viewport) = &cli.viewport {
        options.viewport = Some(ViewportSize::parse(viewport)?);
    }
    let browser = Browser::connect(&options).await?;
    Ok(Session::new(browser, config))
}

/// Persist learning and close the browser whatever the command's outcome
async fn close_session(
    mut session: Session<Browser>,
    outcome: ProbeResult<()>,
) -> ProbeResult<()> {
    if let Err(e) = session.finish().await {
        warn!("Session summary unavailable: {}", e);
    }
    if let Err(e) = session.into_driver().close().await {
        warn!("Browser not closed cleanly: {}", e);
    }
    outcome
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionReport<'a> {
    url: &'a str,
    category: Category,
    action: &'a str,
    success: bool,
    stats: SessionStats,
}

#[allow(clippy::too_many_arguments)]
async fn handle_resolve(
    session: &mut Session<Browser>,
    url: &str,
    category: Category,
    hint: Option<&str>,
    click: bool,
    type_text: Option<&str>,
    scroll_steps: usize,
    dismiss_overlays: bool,
    format: OutputFormat,
) -> ProbeResult<()> {
    session.goto(url).await?;
    if dismiss_overlays {
        session.dismiss_overlays().await;
    }

    if click || type_text.is_some() {
        let action = match type_text {
            Some(text) => {
                session.type_intent(category, text).await?;
                "type"
            }
            None => {
                session.click(category, hint).await?;
                "click"
            }
        };
        let report = ActionReport {
            url,
            category,
            action,
            success: true,
            stats: session.stats(),
        };
        return match format {
            OutputFormat::Json => print_json(&report),
            OutputFormat::Simple => {
                println!("{} {}: ok", action, category);
                Ok(())
            }
        };
    }

    let candidate = session
        .resolve_with_scrolling(category, hint, scroll_steps)
        .await?;
    match format {
        OutputFormat::Json => print_json(&json!({
            "url": url,
            "candidate": candidate,
        })),
        OutputFormat::Simple => {
            println!(
                "{} -> {} <{}> '{}'",
                category,
                candidate.descriptor.identifier(),
                candidate.descriptor.tag,
                candidate.descriptor.text
            );
            println!("  {}", candidate.score);
            Ok(())
        }
    }
}

async fn handle_heal(
    session: &mut Session<Browser>,
    url: &str,
    name: &str,
    selector: &str,
    format: OutputFormat,
) -> ProbeResult<()> {
    session.goto(url).await?;
    let node = session.find_named(name, &Query::css(selector)).await?;
    let descriptor: ElementDescriptor = session.driver().describe(&node).await?;
    let healed = session.stats().heals > 0;

    match format {
        OutputFormat::Json => print_json(&json!({
            "name": name,
            "selector": selector,
            "healed": healed,
            "element": descriptor,
        })),
        OutputFormat::Simple => {
            println!(
                "{} -> {}{}",
                name,
                descriptor.identifier(),
                if healed { " (healed)" } else { "" }
            );
            Ok(())
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KnowledgeReport<'a> {
    file: PathBuf,
    stats: LearningStats,
    records: Vec<&'a KnowledgeRecord>,
}

fn handle_knowledge(config: &EngineConfig, site: Option<&str>, format: OutputFormat) -> ProbeResult<()> {
    let store = LearningStore::load(config.knowledge_file());
    let records: Vec<&KnowledgeRecord> = store
        .records()
        .filter(|r| site.is_none_or(|s| r.site == s))
        .collect();

    match format {
        OutputFormat::Json => print_json(&KnowledgeReport {
            file: store.path().to_path_buf(),
            stats: store.stats(),
            records,
        }),
        OutputFormat::Simple => {
            let stats = store.stats();
            println!(
                "{} patterns, {}/{} successful ({:.1}%)",
                stats.total_patterns, stats.total_successes, stats.total_attempts, stats.avg_success_rate
            );
            for record in records {
                let best = record
                    .best_selectors
                    .first()
                    .map(|f| format!(" best: id='{}' class='{}'", f.id, f.class))
                    .unwrap_or_default();
                println!(
                    "  {}_{}: {}/{} ({:.0}%){}",
                    record.site,
                    record.category,
                    record.successes,
                    record.attempts,
                    record.success_rate * 100.0,
                    best
                );
            }
            Ok(())
        }
    }
}

fn handle_references(
    config: &EngineConfig,
    category: Option<Category>,
    provenance: Option<Provenance>,
    format: OutputFormat,
) -> ProbeResult<()> {
    let store = ReferenceStore::new(config.references_dir());
    let images: Vec<ReferenceImage> = store
        .list()?
        .into_iter()
        .filter(|r| category.is_none_or(|c| r.category() == Some(c)))
        .filter(|r| provenance.is_none_or(|p| r.provenance == p))
        .collect();

    match format {
        OutputFormat::Json => print_json(&images),
        OutputFormat::Simple => {
            for image in &images {
                println!(
                    "{:<24} {:<8} {:<14} {:>3}%  {}",
                    image.subject.to_string(),
                    image.provenance.as_str(),
                    image.site,
                    image.confidence_pct,
                    image.path.display()
                );
            }
            println!("{} reference(s) in {}", images.len(), store.dir().display());
            Ok(())
        }
    }
}

fn handle_import(
    config: &EngineConfig,
    file: &PathBuf,
    category: Category,
    site: &str,
    format: OutputFormat,
) -> ProbeResult<()> {
    let decoded = image::open(file)?;
    let mut png = Vec::new();
    decoded.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let store = ReferenceStore::new(config.references_dir());
    let stored = store.save(
        &Subject::Category(category),
        Provenance::Curated,
        site,
        1.0,
        &png,
    )?;

    match format {
        OutputFormat::Json => print_json(&stored),
        OutputFormat::Simple => {
            println!("Stored {}", stored.path.display());
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> ProbeResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

