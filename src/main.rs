//! chatlens CLI shell.
//!
//! A thin interactive layer over [`chatlens::engine::Engine`]: every
//! subcommand maps onto one boundary call, and long-running jobs print
//! their progress as it streams back.

mod cli;

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatlens::prelude::*;

use cli::{Args, Command, FilterArgs};

fn main() {
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(db) = &args.db {
        config.db_path = PathBuf::from(db);
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_filter.clone()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args, config) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run(args: Args, config: AppConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::new(config)?;
    let result = dispatch(&engine, args.command);
    engine.shutdown();
    result
}

fn dispatch(engine: &Engine, command: Command) -> std::result::Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Import {
            path,
            tz_offset,
            batch_size,
        } => {
            let mut options = engine.config().parse_options();
            if let Some(secs) = tz_offset {
                if let Some(offset) = chrono::FixedOffset::east_opt(secs) {
                    options = options.with_tz_offset(offset);
                }
            }
            if let Some(size) = batch_size {
                options = options.with_batch_size(size);
            }

            let job = engine.import_start(Path::new(&path), Some(options));
            let output = engine.wait(job, |progress| {
                match progress.percentage() {
                    Some(pct) => eprintln!(
                        "{:?}: {:.1}% ({} messages)",
                        progress.phase, pct, progress.messages_processed
                    ),
                    None => eprintln!(
                        "{:?}: {} messages",
                        progress.phase, progress.messages_processed
                    ),
                }
            })?;
            let JobOutput::Import(report) = output else {
                return Err("unexpected job output".into());
            };
            engine.sessions_select(report.corpus_id)?;
            println!(
                "imported {} messages into corpus {} ({} members, {} skipped, {} duplicates)",
                report.messages_imported,
                report.corpus_id,
                report.total_members,
                report.skipped_records,
                report.duplicates_skipped,
            );
            for warning in &report.warnings {
                eprintln!("warning: {}", warning.detail);
            }
            Ok(())
        }

        Command::Sessions => {
            let selected = engine.sessions_selected()?.map(|meta| meta.id);
            for meta in engine.sessions_list()? {
                let marker = if Some(meta.id) == selected { "*" } else { " " };
                let partial = if meta.partial { " [partial]" } else { "" };
                println!(
                    "{marker} {:>4}  {:<10} {:<8} {}{partial}",
                    meta.id, meta.platform, meta.kind, meta.name
                );
            }
            Ok(())
        }

        Command::Select { corpus } => {
            engine.sessions_select(corpus)?;
            println!("selected corpus {corpus}");
            Ok(())
        }

        Command::Delete { corpus } => {
            engine.sessions_delete(corpus)?;
            println!("deleted corpus {corpus}");
            Ok(())
        }

        Command::Owner {
            corpus,
            platform_id,
        } => {
            engine.sessions_set_owner(corpus, platform_id.as_deref())?;
            println!("owner updated for corpus {corpus}");
            Ok(())
        }

        Command::Activity(filter) => run_analysis(engine, filter, AnalyticsKind::Activity),
        Command::Dragon(filter) => run_analysis(engine, filter, AnalyticsKind::DragonKing),
        Command::Streaks(filter) => run_analysis(
            engine,
            filter,
            AnalyticsKind::MonologueStreaks(Default::default()),
        ),
        Command::Repeats(filter) => run_analysis(
            engine,
            filter,
            AnalyticsKind::RepeatChains(Default::default()),
        ),
        Command::Phrases(filter) => run_analysis(
            engine,
            filter,
            AnalyticsKind::Catchphrases(Default::default()),
        ),
        Command::Bursts(filter) => {
            run_analysis(engine, filter, AnalyticsKind::Sessions(Default::default()))
        }
        Command::Names { member, filter } => {
            run_analysis(engine, filter, AnalyticsKind::NameHistory { member_id: member })
        }

        Command::Schema => {
            let corpus = required_corpus(engine, None)?;
            for table in engine.schema(corpus)? {
                println!("{}", table.name);
                for column in table.columns {
                    let pk = if column.pk { " (pk)" } else { "" };
                    println!("  {:<22} {}{pk}", column.name, column.col_type);
                }
            }
            Ok(())
        }

        Command::Sql { query } => {
            let corpus = required_corpus(engine, None)?;
            let job = engine.sql_start(corpus, query)?;
            let JobOutput::Sql(result) = engine.wait(job, |_| {})? else {
                return Err("unexpected job output".into());
            };
            println!("{}", result.columns.join("\t"));
            for row in &result.rows {
                let cells: Vec<String> = row.iter().map(render_cell).collect();
                println!("{}", cells.join("\t"));
            }
            eprintln!(
                "{} rows in {} ms{}",
                result.row_count,
                result.duration_ms,
                if result.limited { " (limited)" } else { "" }
            );
            Ok(())
        }

        Command::Migrations => {
            let pending = engine.pending_migrations()?;
            if pending.is_empty() {
                println!("store is up to date");
            }
            for info in pending {
                println!("v{}: {}", info.version, info.user_message);
            }
            Ok(())
        }
    }
}

fn run_analysis(
    engine: &Engine,
    filter: FilterArgs,
    kind: AnalyticsKind,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let corpus = required_corpus(engine, filter.corpus)?;
    let time_filter = parse_filter(&filter)?;
    let job = engine.analytics_start(corpus, time_filter, kind, Some(Duration::from_secs(60)));
    let output = engine.wait(job, |_| {})?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn required_corpus(
    engine: &Engine,
    explicit: Option<i64>,
) -> std::result::Result<i64, Box<dyn std::error::Error>> {
    if let Some(corpus) = explicit {
        return Ok(corpus);
    }
    engine
        .sessions_selected()?
        .map(|meta| meta.id)
        .ok_or_else(|| "no corpus selected; run `chatlens select <id>` first".into())
}

fn parse_filter(filter: &FilterArgs) -> std::result::Result<TimeFilter, Box<dyn std::error::Error>> {
    Ok(TimeFilter {
        start_ts: parse_day(filter.from.as_deref(), false)?,
        end_ts: parse_day(filter.to.as_deref(), true)?,
    })
}

/// `YYYY-MM-DD` to UTC seconds; end dates cover the whole day.
fn parse_day(input: Option<&str>, end_of_day: bool) -> std::result::Result<Option<i64>, Box<dyn std::error::Error>> {
    let Some(input) = input else {
        return Ok(None);
    };
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{input}', expected YYYY-MM-DD"))?;
    let ts = date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    Ok(ts.map(|t| if end_of_day { t + 86_399 } else { t }))
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
