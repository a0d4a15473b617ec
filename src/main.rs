use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use prophet::config::Config;
use prophet::favicon::HttpFaviconFetcher;
use prophet::feed::{export_opml, export_to_file, http_client, read_opml, HttpFeedClient};
use prophet::storage::{Database, DatabaseError, Entry, EntryFilter, Source};
use prophet::sync::{SourceChanges, SyncEngine};
use prophet::util::{html_excerpt, strip_control_chars};

type Engine = SyncEngine<HttpFeedClient, HttpFaviconFetcher>;

/// Get the config directory path (~/.config/prophet/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("prophet"))
}

#[derive(Parser, Debug)]
#[command(name = "prophet", version, about = "Personal RSS/Atom reader")]
struct Args {
    /// Config file (defaults to ~/.config/prophet/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a feed and import its entries
    Add {
        name: String,
        url: String,
        /// Comma-separated tags
        #[arg(long, default_value = "")]
        tags: String,
    },
    /// Rename a source, point it at a new feed, or replace-add its tags
    Edit {
        /// Source id or name
        source: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        url: Option<String>,
        /// Comma-separated tags; an empty value clears them
        #[arg(long)]
        tags: Option<String>,
    },
    /// Delete a source with all its entries
    Remove { source: String },
    /// List sources
    Sources,
    /// Fetch new entries for every source, or just one
    Update { source: Option<String> },
    /// List entries, newest first
    Entries {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        unread: bool,
        #[arg(long)]
        fav: bool,
        #[arg(long, conflicts_with = "all")]
        limit: Option<i64>,
        /// No limit
        #[arg(long)]
        all: bool,
    },
    /// Show one entry with its text
    Show { id: i64 },
    /// Mark an entry read (or unread), or every entry with --all
    Read {
        #[arg(required_unless_present = "all")]
        id: Option<i64>,
        #[arg(long)]
        unread: bool,
        /// Mark every entry read, optionally only those of --source
        #[arg(long)]
        all: bool,
        #[arg(long, requires = "all")]
        source: Option<String>,
    },
    /// Toggle an entry's favorite flag
    Fav { id: i64 },
    /// Delete an entry
    Delete { id: i64 },
    /// Add tags to a source (an empty list removes all of them)
    Tag { source: String, tags: String },
    /// Manage tags
    Tags {
        #[command(subcommand)]
        command: Option<TagCommand>,
    },
    /// Register every feed of an OPML file; folders become tags
    Import { file: PathBuf },
    /// Export sources as OPML (to stdout unless --output is given)
    Export {
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum TagCommand {
    List,
    Create {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    Edit {
        name: String,
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    Delete { name: String },
    /// Delete tags no source uses
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) =
            std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
        {
            tracing::warn!(
                path = %config_dir.display(),
                error = %e,
                "Failed to set config directory permissions to 0700"
            );
        }
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    let db_path = config.database_path_in(&config_dir);
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of prophet appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let http = http_client(&config).context("Failed to build HTTP client")?;
    let client = HttpFeedClient::from_config(http.clone(), &config);
    let favicons = HttpFaviconFetcher::from_config(http, &config, config.favicons_dir_in(&config_dir));
    let engine = SyncEngine::new(db, client, favicons)
        .with_tag_color(config.default_tag_color.as_str())
        .allow_private_hosts(config.allow_private_hosts);

    run(args.command, &engine, &config, args.json).await
}

async fn run(command: Command, engine: &Engine, config: &Config, json: bool) -> Result<()> {
    let db = engine.database();

    match command {
        Command::Add { name, url, tags } => {
            let (source, result) = engine.register(&name, &url, &tags).await?;
            if json {
                return print_json(&source);
            }
            println!(
                "Added {} [{}] with {} entries",
                source.name, source.id, result.new_entry_count
            );
            if result.favicon_failed {
                println!("(no favicon)");
            }
        }
        Command::Edit {
            source,
            name,
            url,
            tags,
        } => {
            let source = resolve_source(db, &source).await?;
            let updated = engine
                .update_source(source.id, SourceChanges { name, url, tags })
                .await?;
            if json {
                return print_json(&updated);
            }
            print_sources(&[updated]);
        }
        Command::Remove { source } => {
            let source = resolve_source(db, &source).await?;
            let removed = engine.remove_source(source.id).await?;
            println!("Removed {} and {} entries", source.name, removed);
        }
        Command::Sources => {
            let sources = db.get_sources().await?;
            if json {
                return print_json(&sources);
            }
            print_sources(&sources);
        }
        Command::Update {
            source: Some(source),
        } => {
            let source = resolve_source(db, &source).await?;
            let result = engine.sync_by_id(source.id).await?;
            if json {
                return print_json(&result);
            }
            println!("{}: {} new entries", source.name, result.new_entry_count);
            let latest = db
                .entries_for_source(source.id, Some(config.entries_limit))
                .await?;
            print_entries(&latest);
        }
        Command::Update { source: None } => {
            let sources = db.get_sources().await?;
            let report = engine.sync_all(&sources).await?;
            if json {
                return print_json(&report);
            }

            println!("{}", report.summary());
            if !report.failed_sources.is_empty() {
                println!("Failed to update: {}", report.failed_sources.join(", "));
            }
            if report.new_entries.is_empty() {
                let latest = db
                    .list_entries(&EntryFilter {
                        limit: Some(config.entries_limit),
                        ..EntryFilter::default()
                    })
                    .await?;
                print_entries(&latest);
            } else {
                print_entries(&report.new_entries);
            }
        }
        Command::Entries {
            source,
            tag,
            unread,
            fav,
            limit,
            all,
        } => {
            let filter = EntryFilter {
                source,
                tag,
                unread_only: unread,
                favorites_only: fav,
                limit: if all {
                    None
                } else {
                    Some(limit.unwrap_or(config.entries_limit))
                },
                ..EntryFilter::default()
            };
            let entries = db.list_entries(&filter).await?;
            if json {
                return print_json(&entries);
            }
            print_entries(&entries);
        }
        Command::Show { id } => {
            let entry = db
                .get_entry(id)
                .await?
                .with_context(|| format!("Entry {id} not found"))?;
            if json {
                return print_json(&entry);
            }
            print_entry(&entry);
        }
        Command::Read {
            id,
            unread,
            all,
            source,
        } => {
            if all {
                let source_id = match source {
                    Some(source) => Some(resolve_source(db, &source).await?.id),
                    None => None,
                };
                let count = db.mark_all_read(source_id).await?;
                println!("Marked {count} entries read");
            } else if let Some(id) = id {
                db.get_entry(id)
                    .await?
                    .with_context(|| format!("Entry {id} not found"))?;
                db.set_entry_read(id, !unread).await?;
            }
        }
        Command::Fav { id } => {
            let fav = db.toggle_entry_fav(id).await?;
            println!("{}", if fav { "Favorited" } else { "Unfavorited" });
        }
        Command::Delete { id } => {
            if !db.delete_entry(id).await? {
                bail!("Entry {id} not found");
            }
        }
        Command::Tag { source, tags } => {
            let source = resolve_source(db, &source).await?;
            let tags = db
                .tag_source(source.id, &tags, &config.default_tag_color)
                .await?;
            if json {
                return print_json(&tags);
            }
            let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
            println!("{}: {}", source.name, names.join(", "));
        }
        Command::Tags { command } => run_tags(command.unwrap_or(TagCommand::List), db, config, json).await?,
        Command::Import { file } => {
            let metadata = std::fs::metadata(&file)
                .with_context(|| format!("Failed to read import file: {}", file.display()))?;
            if !metadata.is_file() {
                bail!("Import path must be a regular file");
            }
            let outlines = read_opml(&file).await?;
            let report = engine.import_outlines(&outlines).await;
            if json {
                return print_json(&report);
            }
            println!("{}", report.summary());
            for failure in &report.failed {
                println!("  {} ({}): {}", failure.name, failure.url, failure.error);
            }
        }
        Command::Export { output } => {
            let sources = db.get_sources().await?;
            match output {
                Some(path) => {
                    export_to_file(&sources, &path)?;
                    println!("Exported {} sources to {}", sources.len(), path.display());
                }
                None => println!("{}", export_opml(&sources)?),
            }
        }
    }

    Ok(())
}

async fn run_tags(command: TagCommand, db: &Database, config: &Config, json: bool) -> Result<()> {
    match command {
        TagCommand::List => {
            let tags = db.get_tags().await?;
            if json {
                return print_json(&tags);
            }
            for tag in tags {
                println!("{:>4}  {}  {}", tag.id, tag.color, tag.name);
            }
        }
        TagCommand::Create { name, color } => {
            let color = color.as_deref().unwrap_or(&config.default_tag_color);
            let id = db.create_tag(&name, color).await?;
            println!("Created tag {name} [{id}]");
        }
        TagCommand::Edit {
            name,
            rename,
            color,
        } => {
            let tag = db
                .get_tag_by_name(&name)
                .await?
                .with_context(|| format!("Tag '{name}' not found"))?;
            db.update_tag(tag.id, rename.as_deref(), color.as_deref())
                .await?;
        }
        TagCommand::Delete { name } => {
            let tag = db
                .get_tag_by_name(&name)
                .await?
                .with_context(|| format!("Tag '{name}' not found"))?;
            db.delete_tag(tag.id).await?;
        }
        TagCommand::Clean => {
            let removed = db.clean_tags().await?;
            println!("Removed {removed} unused tags");
        }
    }
    Ok(())
}

/// Look a source up by id, falling back to its name.
async fn resolve_source(db: &Database, key: &str) -> Result<Source> {
    if let Ok(id) = key.parse::<i64>() {
        if let Some(source) = db.get_source(id).await? {
            return Ok(source);
        }
    }
    db.get_source_by_name(key)
        .await?
        .with_context(|| format!("No source named or numbered '{key}'"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_time(timestamp: i64) -> String {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_sources(sources: &[Source]) {
    for source in sources {
        let synced = source
            .last_update
            .map(format_time)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>4}  {}  {}  (latest: {})",
            source.id,
            strip_control_chars(&source.name),
            source.url,
            synced
        );
        if !source.tags.is_empty() {
            println!("      tags: {}", source.tags_list());
        }
    }
}

fn print_entries(entries: &[Entry]) {
    for entry in entries {
        let marker = match (entry.read, entry.fav) {
            (_, true) => '*',
            (false, false) => '+',
            (true, false) => ' ',
        };
        println!(
            "{:>6} {} {}  [{}] {}",
            entry.id,
            marker,
            format_time(entry.published),
            strip_control_chars(&entry.source_name),
            strip_control_chars(&entry.title)
        );
    }
}

fn print_entry(entry: &Entry) {
    println!("{}", strip_control_chars(&entry.title));
    println!(
        "{} | {}",
        strip_control_chars(&entry.source_name),
        format_time(entry.published)
    );
    if let Some(ref url) = entry.url {
        println!("{url}");
    }
    println!();
    println!("{}", html_excerpt(&entry.body, 4000));
}
