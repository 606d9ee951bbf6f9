use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use replyhive_core::skills::{load_persona, Persona};
use replyhive_core::*;
use replyhive_memory::{
    HttpKnowledgeClient, KeywordSearch, SemanticSearch, SqliteTtlStore, SystemClock, TtlStore,
};
use replyhive_provider::create_provider;
use replyhive_schema::{InboundMessage, PauseUntil};

const CONFIG_FILE: &str = "replyhive.yaml";

#[derive(Parser)]
#[command(name = "replyhive", version, about = "replyhive auto-reply gating and context assembly")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.replyhive",
        help = "Root directory (contains replyhive.yaml, prompts/, logs/)"
    )]
    root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Show global pause, deferred count and sleep hours")]
    Status,
    #[command(about = "Pause replies to every contact")]
    Pause {
        #[arg(long, default_value = "0", help = "Duration such as 90s, 30m, 2h, 1d (0 = until resumed)")]
        duration: String,
    },
    #[command(about = "Lift the global pause, holding every known contact")]
    Resume,
    #[command(subcommand, about = "Per-contact pauses")]
    Contact(ContactCommands),
    #[command(subcommand, about = "Sleep hours")]
    Sleep(SleepCommands),
    #[command(about = "List skills with state and health")]
    Skills,
    #[command(about = "Run one message through the pipeline and print the outcome")]
    Process {
        #[arg(long, help = "Contact ID")]
        contact: String,
        #[arg(long, help = "Message text")]
        text: String,
        #[arg(long, help = "Relationship of the contact to the owner")]
        relationship: Option<String>,
    },
    #[command(about = "Validate the config file")]
    Validate,
}

#[derive(Subcommand)]
enum ContactCommands {
    #[command(about = "Pause replies to one contact")]
    Pause {
        #[arg(help = "Contact ID")]
        contact_id: String,
        #[arg(long, default_value = "0", help = "Duration such as 30m, 2h, 7d (0 = resume hold)")]
        duration: String,
        #[arg(long, help = "Why the contact is paused")]
        reason: Option<String>,
    },
    #[command(about = "Resume replies to one contact")]
    Resume {
        #[arg(help = "Contact ID")]
        contact_id: String,
    },
    #[command(about = "List active contact pauses")]
    List,
}

#[derive(Subcommand)]
enum SleepCommands {
    #[command(about = "Set and enable sleep hours")]
    Set {
        #[arg(help = "Local window as HH:MM-HH:MM, e.g. 22:00-06:30")]
        window: String,
        #[arg(long, default_value = "0", allow_negative_numbers = true, help = "Offset of local time from UTC in minutes")]
        tz_offset: i32,
    },
    #[command(about = "Disable sleep hours")]
    Off,
    #[command(about = "Show sleep hours")]
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    if cli.root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.root = PathBuf::from(home).join(cli.root.strip_prefix("~").unwrap_or(&cli.root));
        }
    }

    let log_dir = cli.root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "replyhive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&cli.root.join(CONFIG_FILE))?;
            println!(
                "Config valid. {} granted permissions, {} skill overrides, store: {}.",
                config.skills.granted_permissions.len(),
                config.skills.entries.len(),
                store_path(&cli.root, &config).display()
            );
        }
        Commands::Status => {
            let gate = open_gate(&cli.root)?;
            let status = gate.status().await?;
            match status.until {
                Some(until) if status.enabled => println!("Global pause: on ({})", describe_until(&until)),
                _ => println!("Global pause: off"),
            }
            println!("Deferred: {}", status.deferred_count);
            println!("Sleep hours: {}", gate.sleep_hours().await?);
            println!("Paused contacts: {}", gate.contact_pauses().await?.len());
        }
        Commands::Pause { duration } => {
            let secs = parse_duration_secs(&duration)?;
            let until = open_gate(&cli.root)?.set_global_pause(secs).await?;
            println!("Global pause on ({}).", describe_until(&until));
        }
        Commands::Resume => {
            let gate = open_gate(&cli.root)?;
            let held = gate.clear_global_pause().await?;
            println!(
                "Global pause lifted. {held} contacts held for {} days; resume them individually.",
                gate.config().resume_hold_days
            );
        }
        Commands::Contact(cmd) => {
            let gate = open_gate(&cli.root)?;
            match cmd {
                ContactCommands::Pause {
                    contact_id,
                    duration,
                    reason,
                } => {
                    let secs = parse_duration_secs(&duration)?;
                    let pause = gate.set_contact_pause(&contact_id, secs, reason).await?;
                    println!("Contact '{contact_id}' paused until {}.", pause.expires_at.to_rfc3339());
                }
                ContactCommands::Resume { contact_id } => {
                    gate.clear_contact_pause(&contact_id).await?;
                    println!("Contact '{contact_id}' resumed.");
                }
                ContactCommands::List => {
                    let pauses = gate.contact_pauses().await?;
                    if pauses.is_empty() {
                        println!("No paused contacts.");
                    } else {
                        println!("{:<24} {:<28} {:<30}", "CONTACT", "UNTIL", "REASON");
                        println!("{}", "-".repeat(82));
                        for p in &pauses {
                            println!(
                                "{:<24} {:<28} {:<30}",
                                p.contact_id,
                                p.expires_at.to_rfc3339(),
                                p.reason.as_deref().unwrap_or("-")
                            );
                        }
                    }
                }
            }
        }
        Commands::Sleep(cmd) => {
            let gate = open_gate(&cli.root)?;
            match cmd {
                SleepCommands::Set { window, tz_offset } => {
                    let hours = parse_sleep_window(&window, tz_offset)?;
                    gate.set_sleep_hours(hours).await?;
                    println!("Sleep hours: {hours}");
                }
                SleepCommands::Off => {
                    gate.clear_sleep_hours().await?;
                    println!("Sleep hours: {}", gate.sleep_hours().await?);
                }
                SleepCommands::Show => {
                    println!("Sleep hours: {}", gate.sleep_hours().await?);
                }
            }
        }
        Commands::Skills => {
            let pipeline = open_pipeline(&cli.root)?;
            let report = pipeline.executor().registry().health_report().await;
            println!(
                "{:<22} {:<10} {:<12} {:<10} {:<30}",
                "SKILL", "ENABLED", "STATE", "HEALTH", "PERMISSIONS"
            );
            println!("{}", "-".repeat(86));
            for (manifest, row) in pipeline
                .executor()
                .registry()
                .manifests()
                .into_iter()
                .zip(&report)
            {
                let permissions: Vec<&str> = manifest.permissions.iter().map(|p| p.as_str()).collect();
                println!(
                    "{:<22} {:<10} {:<12} {:<10} {:<30}",
                    row.skill_id,
                    if row.enabled { "yes" } else { "no" },
                    format!("{:?}", row.state).to_lowercase(),
                    row.health
                        .map(|h| format!("{h:?}").to_lowercase())
                        .unwrap_or_else(|| "-".to_string()),
                    if permissions.is_empty() { "-".to_string() } else { permissions.join(", ") },
                );
            }
        }
        Commands::Process {
            contact,
            text,
            relationship,
        } => {
            let pipeline = open_pipeline(&cli.root)?;
            let mut msg = InboundMessage::new("cli", contact, text);
            if let Some(relationship) = relationship {
                msg = msg.with_relationship(relationship);
            }
            let outcome = pipeline.process(&msg).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn load_or_default(root: &Path) -> Result<ReplyhiveConfig> {
    let path = root.join(CONFIG_FILE);
    if path.exists() {
        load_config(&path)
    } else {
        tracing::info!(path = %path.display(), "no config file, using defaults");
        Ok(ReplyhiveConfig::default())
    }
}

/// The CLI always persists; relative paths resolve against the root.
fn store_path(root: &Path, config: &ReplyhiveConfig) -> PathBuf {
    match &config.store.path {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => root.join(p),
        None => root.join("replyhive.db"),
    }
}

fn open_store(root: &Path, config: &ReplyhiveConfig) -> Result<Arc<dyn TtlStore>> {
    let store = SqliteTtlStore::open(&store_path(root, config))
        .context("failed to open replyhive store")?;
    Ok(Arc::new(store))
}

fn open_gate(root: &Path) -> Result<GatingEngine> {
    let config = load_or_default(root)?;
    let store = open_store(root, &config)?;
    Ok(GatingEngine::new(store, Arc::new(SystemClock), config.gate))
}

fn open_pipeline(root: &Path) -> Result<Pipeline> {
    let config = load_or_default(root)?;
    let store = open_store(root, &config)?;
    build_pipeline(root, &config, store)
}

fn build_pipeline(root: &Path, config: &ReplyhiveConfig, store: Arc<dyn TtlStore>) -> Result<Pipeline> {
    let provider = create_provider(&config.provider)?;

    let prompts_dir = match &config.owner.prompts_dir {
        Some(p) if p.is_absolute() => p.clone(),
        Some(p) => root.join(p),
        None => root.join("prompts"),
    };
    let persona = if prompts_dir.exists() {
        load_persona(&prompts_dir, &config.owner.name)?
    } else {
        Persona::named(config.owner.name.clone())
    };

    let (semantic, keyword) = match &config.knowledge.base_url {
        Some(base) => {
            let client = Arc::new(HttpKnowledgeClient::new(base.clone(), config.knowledge.api_key.clone()));
            let semantic: Option<Arc<dyn SemanticSearch>> = if config.knowledge.semantic {
                Some(client.clone())
            } else {
                None
            };
            let keyword: Arc<dyn KeywordSearch> = client;
            (semantic, Some(keyword))
        }
        None => (None, None),
    };

    Pipeline::from_config(
        config,
        PipelineDeps {
            store,
            clock: Arc::new(SystemClock),
            provider,
            semantic,
            keyword,
            persona,
        },
    )
}

fn describe_until(until: &PauseUntil) -> String {
    match until {
        PauseUntil::Indefinite => "until resumed".to_string(),
        PauseUntil::Timestamp(at) => format!("until {}", at.to_rfc3339()),
    }
}

/// `0`, `45`, `90s`, `30m`, `2h`, `7d` into seconds.
fn parse_duration_secs(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => raw.split_at(i),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .with_context(|| format!("invalid duration: {raw}"))?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(anyhow!("unknown duration unit '{other}' in {raw}")),
    };
    value
        .checked_mul(scale)
        .ok_or_else(|| anyhow!("duration too large: {raw}"))
}

fn parse_clock_time(raw: &str) -> Result<(u8, u8)> {
    let (h, m) = raw
        .trim()
        .split_once(':')
        .ok_or_else(|| anyhow!("expected HH:MM, got {raw}"))?;
    let hour = h.parse().with_context(|| format!("invalid hour in {raw}"))?;
    let minute = m.parse().with_context(|| format!("invalid minute in {raw}"))?;
    Ok((hour, minute))
}

fn parse_sleep_window(window: &str, tz_offset_minutes: i32) -> Result<SleepHoursConfig> {
    let (start, end) = window
        .split_once('-')
        .ok_or_else(|| anyhow!("expected HH:MM-HH:MM, got {window}"))?;
    let (start_hour, start_minute) = parse_clock_time(start)?;
    let (end_hour, end_minute) = parse_clock_time(end)?;
    let hours = SleepHoursConfig {
        enabled: true,
        start_hour,
        start_minute,
        end_hour,
        end_minute,
        tz_offset_minutes,
    };
    hours.validate()?;
    Ok(hours)
}
