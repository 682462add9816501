use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use conflux::aggregation::{Aggregator, SuggestionTarget};
use conflux::config::Config;
use conflux::db::{AggregateId, Database, ExceptionType, RawContactId};
use conflux::export::{self, ExportFormat};
use conflux::import::{self, ImportDocument};
use conflux::logging;

enum Command {
    Import(PathBuf),
    Aggregate,
    Reaggregate,
    Join(RawContactId, RawContactId),
    Separate(RawContactId, RawContactId),
    Forget(RawContactId, RawContactId),
    Delete(RawContactId),
    Suggest {
        target: SuggestionTarget,
        max: usize,
        filter: Option<String>,
    },
    Export {
        path: PathBuf,
        format: Option<ExportFormat>,
    },
    Stats,
}

struct Args {
    config_path: Option<PathBuf>,
    command: Command,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut rest = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("conflux {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    fail("--config requires a path argument");
                }
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    match parse_command(&rest) {
        Ok(command) => Args { config_path, command },
        Err(message) => fail(&message),
    }
}

fn fail(message: &str) -> ! {
    eprintln!("Error: {}", message);
    print_help();
    std::process::exit(1);
}

fn parse_command(args: &[String]) -> std::result::Result<Command, String> {
    let Some((name, rest)) = args.split_first() else {
        return Err("missing command".to_string());
    };

    match name.as_str() {
        "import" => Ok(Command::Import(PathBuf::from(positional(rest, 0, "file")?))),
        "aggregate" => Ok(Command::Aggregate),
        "reaggregate" => Ok(Command::Reaggregate),
        "join" => Ok(Command::Join(raw_id(rest, 0)?, raw_id(rest, 1)?)),
        "separate" => Ok(Command::Separate(raw_id(rest, 0)?, raw_id(rest, 1)?)),
        "forget" => Ok(Command::Forget(raw_id(rest, 0)?, raw_id(rest, 1)?)),
        "delete" => Ok(Command::Delete(raw_id(rest, 0)?)),
        "suggest" => parse_suggest(rest),
        "export" => parse_export(rest),
        "stats" => Ok(Command::Stats),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn positional<'a>(args: &'a [String], index: usize, what: &str) -> std::result::Result<&'a str, String> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {} argument", what))
}

fn raw_id(args: &[String], index: usize) -> std::result::Result<RawContactId, String> {
    let value = positional(args, index, "raw contact id")?;
    value
        .parse()
        .map(RawContactId)
        .map_err(|_| format!("'{}' is not a raw contact id", value))
}

fn option_value<'a>(args: &'a [String], i: usize, flag: &str) -> std::result::Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

fn parse_suggest(args: &[String]) -> std::result::Result<Command, String> {
    let mut aggregate = None;
    let mut name = None;
    let mut emails = Vec::new();
    let mut phones = Vec::new();
    let mut max = 10;
    let mut filter = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--max" | "-n" => {
                let value = option_value(args, i, "--max")?;
                max = value.parse().map_err(|_| format!("'{}' is not a count", value))?;
                i += 1;
            }
            "--filter" | "-f" => {
                filter = Some(option_value(args, i, "--filter")?.to_string());
                i += 1;
            }
            "--name" => {
                name = Some(option_value(args, i, "--name")?.to_string());
                i += 1;
            }
            "--email" => {
                emails.push(option_value(args, i, "--email")?.to_string());
                i += 1;
            }
            "--phone" => {
                phones.push(option_value(args, i, "--phone")?.to_string());
                i += 1;
            }
            value => {
                let id = value
                    .parse()
                    .map_err(|_| format!("'{}' is not an aggregate id", value))?;
                aggregate = Some(AggregateId(id));
            }
        }
        i += 1;
    }

    let target = match aggregate {
        Some(id) => SuggestionTarget::Aggregate(id),
        None if name.is_some() || !emails.is_empty() || !phones.is_empty() => {
            SuggestionTarget::Values { name, emails, phones }
        }
        None => return Err("suggest needs an aggregate id or --name/--email/--phone".to_string()),
    };

    Ok(Command::Suggest { target, max, filter })
}

fn parse_export(args: &[String]) -> std::result::Result<Command, String> {
    let mut path = None;
    let mut format = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--format" | "-f" => {
                let value = option_value(args, i, "--format")?;
                format = Some(ExportFormat::parse(value).ok_or_else(|| format!("unknown format '{}'", value))?);
                i += 1;
            }
            value => path = Some(PathBuf::from(value)),
        }
        i += 1;
    }

    let path = path.ok_or_else(|| "missing output path".to_string())?;
    Ok(Command::Export { path, format })
}

fn print_help() {
    println!(
        r#"conflux - contact aggregation engine

USAGE:
    conflux [OPTIONS] <COMMAND>

COMMANDS:
    import FILE                 Import accounts, contacts and exceptions from JSON
    aggregate                   Process raw contacts queued for aggregation
    reaggregate                 Re-evaluate every raw contact
    join A B                    Keep raw contacts A and B together
    separate A B                Keep raw contacts A and B apart
    forget A B                  Remove the exception between A and B
    delete RAW                  Delete a raw contact
    suggest AGGREGATE           Suggest aggregates similar to AGGREGATE
    suggest --name N [--email E] [--phone P]
                                Suggest aggregates similar to typed values
        --max, -n N             At most N suggestions (default: 10)
        --filter, -f TEXT       Only names with a word starting with TEXT
    export PATH [--format F]    Export aggregates as json or csv
    stats                       Show store counts

OPTIONS:
    --config, -c PATH   Path to config file
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    CONFLUX_CONFIG      Path to config file (overrides default location)
    CONFLUX_LOG         Log filter, replaces [logging] level (e.g. debug)

Config file location: $XDG_CONFIG_HOME/conflux/config.toml"#
    );
}

fn main() -> Result<()> {
    let args = parse_args();

    let config = Config::load(args.config_path.as_deref()).context("Failed to load config")?;

    // Initialize logging (uses journald on Linux, file fallback otherwise)
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("Warning: logging disabled: {:#}", e);
    }

    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?;
    db.initialize()?;

    let mut aggregator = Aggregator::new(config.aggregation.clone());
    run(&db, &mut aggregator, args.command)
}

fn run(db: &Database, aggregator: &mut Aggregator, command: Command) -> Result<()> {
    match command {
        Command::Import(path) => {
            let document = ImportDocument::from_path(&path)?;
            let summary = import::import_document(db, aggregator, &document)?;
            println!(
                "Imported {} accounts, {} contacts, {} exceptions",
                summary.accounts, summary.contacts, summary.exceptions
            );
            print_stats(&summary.aggregation);
        }
        Command::Aggregate => {
            let stats = db.in_transaction(|db| aggregator.aggregate_in_transaction(db))?;
            print_stats(&stats);
        }
        Command::Reaggregate => {
            let stats = db.in_transaction(|db| {
                aggregator.mark_all_for_aggregation(db)?;
                aggregator.aggregate_in_transaction(db)
            })?;
            print_stats(&stats);
        }
        Command::Join(a, b) => set_exception(db, aggregator, a, b, Some(ExceptionType::KeepTogether))?,
        Command::Separate(a, b) => set_exception(db, aggregator, a, b, Some(ExceptionType::KeepApart))?,
        Command::Forget(a, b) => set_exception(db, aggregator, a, b, None)?,
        Command::Delete(raw) => {
            db.in_transaction(|db| aggregator.on_delete(db, raw))?;
            println!("Deleted raw contact {}", raw);
        }
        Command::Suggest { target, max, filter } => {
            let suggestions = aggregator.query_suggestions(db, &target, max, filter.as_deref())?;
            if suggestions.is_empty() {
                println!("No suggestions");
            }
            for suggestion in suggestions {
                println!(
                    "{:>6}  {:>7}  {}",
                    suggestion.aggregate_id.0,
                    suggestion.score,
                    suggestion.display_name.as_deref().unwrap_or("(no name)")
                );
            }
        }
        Command::Export { path, format } => {
            let format = format.unwrap_or_else(|| format_for(&path));
            let count = export::export_aggregates(db, &path, format)?;
            println!("Exported {} aggregates to {} ({})", count, path.display(), format.name());
        }
        Command::Stats => {
            let stats = db.stats()?;
            println!("Accounts:      {}", stats.accounts);
            println!("Raw contacts:  {}", stats.raw_contacts);
            println!("Aggregates:    {} ({} visible)", stats.aggregates, stats.visible_aggregates);
            println!("Exceptions:    {}", stats.exceptions);
            println!("Queued:        {}", stats.pending);
        }
    }
    Ok(())
}

fn set_exception(
    db: &Database,
    aggregator: &mut Aggregator,
    a: RawContactId,
    b: RawContactId,
    exception: Option<ExceptionType>,
) -> Result<()> {
    for raw in [a, b] {
        if db.get_raw_contact(raw)?.is_none() {
            bail!("raw contact {} does not exist", raw);
        }
    }

    let stats = db.in_transaction(|db| {
        match exception {
            Some(exception_type) => db.set_aggregation_exception(a, b, exception_type)?,
            None => {
                if !db.remove_aggregation_exception(a, b)? {
                    println!("No exception between {} and {}", a, b);
                }
            }
        }
        aggregator.on_exception_changed(db, a, b)
    })?;
    print_stats(&stats);
    Ok(())
}

fn format_for(path: &Path) -> ExportFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => ExportFormat::Csv,
        _ => ExportFormat::Json,
    }
}

fn print_stats(stats: &conflux::aggregation::AggregationStats) {
    println!(
        "Processed {}: {} joined, {} split, {} unchanged, {} skipped",
        stats.processed, stats.joined, stats.split, stats.settled, stats.skipped
    );
    println!(
        "Aggregates: {} created, {} deleted; {} collisions, {} re-splits",
        stats.created, stats.deleted, stats.collisions, stats.resplits
    );
}
