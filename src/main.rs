use std::path::PathBuf;
use std::sync::Arc;

use anime_season_lib::api::PageQuery;
use anime_season_lib::app::{build_schedule, App, Catalog, ScheduleView};
use anime_season_lib::config::{AppConfig, TimeFormat};
use anime_season_lib::ics::{generate_ics, IcsOptions};
use anime_season_lib::parser::format_minutes;
use anime_season_lib::reconcile::{ReconciledTitle, Schedule};
use anime_season_lib::schedule::RenderPass;
use anime_season_lib::storage::{FileStore, KeyValueStore, MemoryStore};
use anime_season_lib::timezone::offset_label;
use anime_season_lib::weekday::{DayOfWeek, TimeOfDay};
use chrono::Datelike;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Weekly anime airing schedule in your own time zone", long_about = None)]
struct Args {
    /// IANA time zone to render in (overrides config and system zone)
    #[arg(long, global = true)]
    timezone: Option<String>,

    /// Show weekly recurrence rules instead of this week's dated airings
    #[arg(long, global = true)]
    recurring: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Titles airing this season
    Season {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Search airing titles
    Search {
        query: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Add a title to your schedule by MyAnimeList id
    Add { id: u32 },
    /// Remove a title from your schedule
    Remove { id: u32 },
    /// Show your schedule
    Selected,
    /// Remove every title from your schedule
    Clear,
    /// Write your schedule as an .ics file
    Export {
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Drop cached provider responses
    ClearCache,
}

fn open_store() -> Arc<dyn KeyValueStore> {
    match FileStore::default_location() {
        Some(store) => Arc::new(store),
        None => {
            tracing::warn!("no data directory available, caching in memory only");
            Arc::new(MemoryStore::new())
        }
    }
}

fn local_slot(pass: &RenderPass, title: &ReconciledTitle, format: TimeFormat) -> String {
    match pass.local_broadcast(&title.schedule) {
        Ok(local) => format!("{} {}", local.local_day, format.format(local.local_time)),
        Err(e) => format!("unscheduled ({})", e),
    }
}

fn print_titles(pass: &RenderPass, titles: &[ReconciledTitle], config: &AppConfig) {
    for title in titles {
        let marker = if config.is_selected(title.identity_key) { "*" } else { " " };
        let source = match title.schedule {
            Schedule::Airing { episode: Some(ep), .. } => format!("ep {}", ep),
            Schedule::Airing { .. } => "next airing".to_string(),
            Schedule::Weekly(_) => "weekly".to_string(),
        };
        let score = title
            .score
            .map(|s| format!("{:.1}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:>6}  {:<16} {:>7}  {:>4}  {} ({})",
            marker,
            title.identity_key,
            local_slot(pass, title, config.preferences.time_format),
            format_minutes(title.duration_minutes),
            score,
            title.display_title(),
            source
        );
    }
}

fn print_catalog(pass: &RenderPass, catalog: &Catalog, config: &AppConfig) {
    for failure in &catalog.failures {
        eprintln!("{}", failure.diagnostics());
    }
    if catalog.titles.is_empty() {
        println!("No airing titles found.");
        return;
    }
    print_titles(pass, &catalog.titles, config);
    if catalog.has_next_page() {
        println!("More results available with --page.");
    }
}

fn print_schedule(view: &ScheduleView, recurring: bool, config: &AppConfig) {
    let format = config.preferences.time_format;
    if recurring {
        for rule in &view.rules {
            let days: Vec<&str> = rule
                .days_of_week
                .iter()
                .filter_map(|d| DayOfWeek::from_index(*d))
                .map(|d| d.name())
                .collect();
            let on_air = view.live.get(&rule.id).copied().unwrap_or(false);
            let live = if on_air { "  [LIVE]" } else { "" };
            println!(
                "{:<10} {:>8} {:>7}  {}{}",
                days.join(","),
                format.format(rule.start_time),
                format_minutes(rule.duration_minutes),
                rule.title,
                live
            );
        }
        return;
    }

    let week_start = config.preferences.week_start_day();
    let mut occurrences = view.occurrences.clone();
    occurrences.sort_by_key(|o| {
        let day = DayOfWeek::from(o.start.weekday());
        (week_start.days_until(day), o.start)
    });
    for occurrence in &occurrences {
        let start = TimeOfDay::from_naive(occurrence.start.time());
        let end = TimeOfDay::from_naive(occurrence.end.time());
        println!(
            "{} {}  {} - {}  {}",
            DayOfWeek::from(occurrence.start.weekday()).name(),
            occurrence.start.format("%Y-%m-%d"),
            format.format(start),
            format.format(end),
            occurrence.title
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load()?;
    if let Some(tz) = &args.timezone {
        config.set_timezone(Some(tz.clone()));
    }

    let zone = config.viewer_zone();
    let app = App::with_store(open_store());
    let pass = app.render_pass(zone);
    tracing::debug!(zone = %zone.name(), offset = %offset_label(&zone, pass.now()), "render pass");

    match args.command {
        Command::Season { page } => {
            let catalog = app.load_catalog(&PageQuery::Seasonal, page).await?;
            print_catalog(&pass, &catalog, &config);
        }
        Command::Search { query, page } => {
            let catalog = app.load_catalog(&PageQuery::Search(query), page).await?;
            print_catalog(&pass, &catalog, &config);
        }
        Command::Add { id } => {
            // Persist against the stored config so --timezone stays a one-off
            let mut stored = AppConfig::load()?;
            let Some(title) = app.lookup(id).await else {
                anyhow::bail!("no airing schedule found for id {}", id);
            };
            if stored.add_selected(id) {
                stored.save()?;
                println!(
                    "Added {} ({}).",
                    title.display_title(),
                    local_slot(&pass, &title, stored.preferences.time_format)
                );
            } else {
                println!("{} is already in your schedule.", title.display_title());
            }
        }
        Command::Remove { id } => {
            let mut stored = AppConfig::load()?;
            if stored.remove_selected(id) {
                stored.save()?;
                println!("Removed {}.", id);
            } else {
                println!("{} was not in your schedule.", id);
            }
        }
        Command::Selected => {
            if config.selected.is_empty() {
                println!("Your schedule is empty. Add titles with `anime-season add <id>`.");
                return Ok(());
            }
            let titles = app.load_selected(&config.selected).await;
            let view = build_schedule(&pass, &titles, config.preferences.layout());
            println!("Times in {} (UTC{})", view.zone, offset_label(&zone, pass.now()));
            print_schedule(&view, args.recurring, &config);
        }
        Command::Clear => {
            let mut stored = AppConfig::load()?;
            let count = stored.selected.len();
            stored.clear_selected();
            stored.save()?;
            println!("Removed {} titles from your schedule.", count);
        }
        Command::Export { out } => {
            let titles = app.load_selected(&config.selected).await;
            let document = generate_ics(&pass, &titles, &IcsOptions::default());
            let path = out.unwrap_or_else(|| PathBuf::from(&document.filename));
            std::fs::write(&path, &document.content)?;
            println!("Wrote {} titles to {}", titles.len(), path.display());
        }
        Command::ClearCache => {
            app.clear_caches();
            println!("Cleared cached provider responses.");
        }
    }

    Ok(())
}
