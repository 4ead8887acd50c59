//! # sq CLI Entry Point
//!
//! Thin command layer over the query core.
//!
//! ## Usage
//!
//! ```bash
//! # Add a source and make it active
//! sq add --handle=@sakila sakila.db
//! sq src @sakila
//!
//! # Query with the pipeline language
//! sq '.actor | where(.actor_id == 1) | .first_name'
//!
//! # Raw SQL against a specific source
//! sq sql --src=@sakila 'SELECT * FROM actor LIMIT 5'
//!
//! # Pipe a CSV and take the first rows
//! cat data.csv | sq '.data | .[0:10]'
//!
//! # Table ops, inspection, diff
//! sq tbl copy @sakila.actor .actor2
//! sq inspect @sakila.actor
//! sq diff @pg1 @my1 --overview
//! ```

use eyre::{bail, Result};
use hashbrown::HashMap;
use sq::cli::{config_path, Config, Format};
use sq::diff::{exec_source_diff, DiffConfig, DiffElements};
use sq::engine::{exec_slq, exec_slq_insert, exec_sql};
use sq::error::{exit_code, SqError};
use sq::options::OPT_INGEST_NO_CACHE;
use sq::run::Run;
use sq::source::{DriverType, Source, STDIN_HANDLE};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;

fn main() {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let verbose = argv.iter().any(|a| a == "--verbose" || a == "-v");

    match run_main(argv) {
        Ok(()) => {}
        Err(e) => {
            if verbose {
                eprintln!("sq: {e:?}");
            } else {
                eprintln!("sq: {e}");
            }
            std::process::exit(exit_code(&e));
        }
    }
}

#[derive(Default)]
struct Flags {
    config: Option<String>,
    format: Option<String>,
    header: Option<bool>,
    verbose: bool,
    src: Option<String>,
    insert: Option<String>,
    driver: Option<String>,
    handle: Option<String>,
    args: HashMap<String, String>,
    no_cache: bool,
    overview: bool,
    dbprops: bool,
    schema: bool,
    log: bool,
    log_level: Option<String>,
}

fn run_main(argv: Vec<String>) -> Result<()> {
    let (flags, positionals) = parse_args(argv)?;
    init_logging(&flags);

    let cfg_path = config_path(flags.config.as_deref());
    let mut config = Config::load(&cfg_path)?;

    let mut positionals = positionals.into_iter();
    let first = match positionals.next() {
        Some(f) => f,
        None => {
            print_usage();
            return Ok(());
        }
    };

    match first.as_str() {
        "add" => cmd_add(&flags, &mut config, &cfg_path, positionals.collect()),
        "src" => cmd_src(&mut config, &cfg_path, positionals.collect()),
        "rm" => cmd_rm(&mut config, &cfg_path, positionals.collect()),
        "ls" => cmd_ls(&config),
        "ping" => cmd_ping(&config, positionals.collect()),
        "inspect" => cmd_inspect(&config, positionals.collect()),
        "tbl" => cmd_tbl(&config, positionals.collect()),
        "diff" => cmd_diff(&flags, &config, positionals.collect()),
        "sql" => cmd_sql(&flags, &config, positionals.collect()),
        "help" | "--help" => {
            print_usage();
            Ok(())
        }
        _ => cmd_query(&flags, &config, first),
    }
}

fn parse_args(argv: Vec<String>) -> Result<(Flags, Vec<String>)> {
    let mut flags = Flags::default();
    let mut positionals = Vec::new();

    let mut iter = argv.into_iter().peekable();
    while let Some(arg) = iter.next() {
        let (name, inline_val) = match arg.split_once('=') {
            Some((n, v)) if n.starts_with('-') => (n.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };

        let mut take_value = |inline: Option<String>| -> Result<String> {
            if let Some(v) = inline {
                return Ok(v);
            }
            iter.next()
                .ok_or_else(|| SqError::invalid_source(format!("flag {name} requires a value")).into())
        };

        match name.as_str() {
            "--config" => flags.config = Some(take_value(inline_val)?),
            "--format" => flags.format = Some(take_value(inline_val)?),
            "--src" => flags.src = Some(take_value(inline_val)?),
            "--insert" => flags.insert = Some(take_value(inline_val)?),
            "--driver" => flags.driver = Some(take_value(inline_val)?),
            "--handle" => flags.handle = Some(take_value(inline_val)?),
            "--log-file" | "--log-level" => flags.log_level = Some(take_value(inline_val)?),
            "--arg" => {
                let kv = take_value(inline_val)?;
                match kv.split_once('=') {
                    Some((k, v)) => {
                        flags.args.insert(k.to_string(), v.to_string());
                    }
                    None => bail!("--arg wants k=v, got {kv:?}"),
                }
            }
            "--header" | "-h" => flags.header = Some(true),
            "--no-header" | "-H" => flags.header = Some(false),
            "--no-cache" => flags.no_cache = true,
            "--verbose" | "-v" => flags.verbose = true,
            "--monochrome" | "-M" => {} // the built-in writers are monochrome already
            "-j" => flags.format = Some("json".to_string()),
            "-t" => flags.format = Some("text".to_string()),
            "--overview" => flags.overview = true,
            "--dbprops" => flags.dbprops = true,
            "--schema" => flags.schema = true,
            "--log" => flags.log = true,
            s if s.starts_with('-') => bail!("unknown flag: {s}"),
            _ => positionals.push(arg),
        }
    }

    Ok((flags, positionals))
}

fn init_logging(flags: &Flags) {
    if !flags.log && flags.log_level.is_none() {
        return;
    }
    let level = flags.log_level.clone().unwrap_or_else(|| "debug".to_string());
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn format_of(flags: &Flags) -> Result<Format> {
    match &flags.format {
        Some(name) => Format::from_name(name),
        None => Ok(Format::Text),
    }
}

/// The default command: run a pipeline query against the active source.
fn cmd_query(flags: &Flags, config: &Config, query_text: String) -> Result<()> {
    let mut run = Run::new(config.collection.clone())?;
    attach_stdin(flags, &mut run)?;

    if let Some(h) = &flags.src {
        run.collection.set_active(h)?;
    }

    let result = (|| -> Result<()> {
        let qc = run.query_context(flags.args.clone());

        if let Some(dest) = &flags.insert {
            let (handle, tbl) = split_handle_table(&run, dest)?;
            let tbl = tbl.ok_or_else(|| {
                SqError::invalid_source(format!("--insert wants @handle.table, got {dest}"))
            })?;
            let dest_src = run.collection.get(&handle)?.clone();
            let affected = exec_slq_insert(&qc, &query_text, &dest_src, &tbl, &run.cancel)?;
            println!("Inserted {affected} rows into {handle}.{tbl}");
            return Ok(());
        }

        let stdout = std::io::stdout();
        let mut writer = format_of(flags)?.writer(stdout.lock(), flags.header.unwrap_or(true));
        exec_slq(&qc, &query_text, writer.as_mut(), &run.cancel)?;
        Ok(())
    })();

    finish(run, result)
}

/// `sq sql --src=@h 'SELECT …'`: raw SQL passthrough.
fn cmd_sql(flags: &Flags, config: &Config, rest: Vec<String>) -> Result<()> {
    let sql = rest
        .first()
        .ok_or_else(|| SqError::invalid_source("sql command wants a query argument"))?;

    let mut run = Run::new(config.collection.clone())?;
    attach_stdin(flags, &mut run)?;
    if let Some(h) = &flags.src {
        run.collection.set_active(h)?;
    }

    let result = (|| -> Result<()> {
        let src = run
            .collection
            .active()
            .cloned()
            .ok_or_else(|| SqError::not_exist("no active source: use --src=@handle"))?;
        let db = sq::driver::DbOpener::open_db(run.pool.as_ref(), &src)?;

        let stdout = std::io::stdout();
        let mut writer = format_of(flags)?.writer(stdout.lock(), flags.header.unwrap_or(true));
        exec_sql(&db, sql, writer.as_mut(), &run.cancel)?;
        Ok(())
    })();

    finish(run, result)
}

/// `sq add --handle=@h LOCATION`: register a source.
fn cmd_add(
    flags: &Flags,
    config: &mut Config,
    cfg_path: &std::path::Path,
    rest: Vec<String>,
) -> Result<()> {
    let location = rest
        .first()
        .ok_or_else(|| SqError::invalid_source("add command wants a location argument"))?;
    let handle = flags
        .handle
        .clone()
        .ok_or_else(|| SqError::invalid_source("add command wants --handle=@name"))?;

    let run = Run::new(config.collection.clone())?;
    let result = (|| -> Result<()> {
        let typ = match &flags.driver {
            Some(name) => DriverType::from_name(name)
                .ok_or_else(|| SqError::invalid_source(format!("unknown driver type: {name}")))?,
            None => detect_driver_type(&run, location)?,
        };

        let drvr = run.registry.driver_for(typ)?;
        let provisional = Source::new(handle.clone(), typ, location.clone());
        let canonical = drvr.validate_source(&provisional)?;

        config.collection.add(canonical)?;
        if config.collection.active().is_none() {
            config.collection.set_active(&handle)?;
        }
        config.save(cfg_path)?;
        println!("Added {handle} ({typ})");
        Ok(())
    })();

    finish(run, result)
}

fn cmd_src(config: &mut Config, cfg_path: &std::path::Path, rest: Vec<String>) -> Result<()> {
    match rest.first() {
        None => {
            match config.collection.active() {
                Some(src) => println!("{} {}", src.handle, src.redacted_location()),
                None => println!("no active source"),
            }
            Ok(())
        }
        Some(handle) => {
            config.collection.set_active(handle)?;
            config.save(cfg_path)?;
            println!("Active source: {handle}");
            Ok(())
        }
    }
}

fn cmd_rm(config: &mut Config, cfg_path: &std::path::Path, rest: Vec<String>) -> Result<()> {
    let handle = rest
        .first()
        .ok_or_else(|| SqError::invalid_source("rm command wants a @handle argument"))?;
    config.collection.remove(handle)?;
    config.save(cfg_path)?;
    println!("Removed {handle}");
    Ok(())
}

fn cmd_ls(config: &Config) -> Result<()> {
    let active = config.collection.active().map(|s| s.handle.clone());
    for src in config.collection.sources() {
        let marker = if Some(&src.handle) == active.as_ref() { "*" } else { " " };
        println!(
            "{marker} {:24} {:10} {}",
            src.handle,
            src.typ.name(),
            src.redacted_location()
        );
    }
    Ok(())
}

fn cmd_ping(config: &Config, rest: Vec<String>) -> Result<()> {
    let run = Run::new(config.collection.clone())?;
    let result = (|| -> Result<()> {
        let handles: Vec<String> = if rest.is_empty() {
            run.collection
                .sources()
                .iter()
                .map(|s| s.handle.clone())
                .collect()
        } else {
            rest
        };

        for handle in handles {
            let src = run.collection.get(&handle)?;
            let drvr = run.registry.driver_for(src.typ)?;
            let started = std::time::Instant::now();
            match drvr.ping(src, &run.cancel) {
                Ok(()) => println!("{handle:24} {:>8.1?}  ok", started.elapsed()),
                Err(e) => println!("{handle:24} {:>8.1?}  fail: {e}", started.elapsed()),
            }
        }
        Ok(())
    })();
    finish(run, result)
}

fn cmd_inspect(config: &Config, rest: Vec<String>) -> Result<()> {
    let run = Run::new(config.collection.clone())?;
    let result = (|| -> Result<()> {
        let target = match rest.first() {
            Some(t) => t.clone(),
            None => {
                run.collection
                    .active()
                    .ok_or_else(|| SqError::not_exist("no active source"))?
                    .handle
                    .clone()
            }
        };

        let (handle, tbl) = split_handle_table(&run, &target)?;
        let src = run.collection.get(&handle)?.clone();
        let db = sq::driver::DbOpener::open_db(run.pool.as_ref(), &src)?;

        let yaml = match tbl {
            Some(tbl) => serde_yaml::to_string(&db.table_metadata(&tbl)?)
                .map_err(|e| SqError::internal(e.to_string()))?,
            None => serde_yaml::to_string(&db.source_metadata(false)?)
                .map_err(|e| SqError::internal(e.to_string()))?,
        };
        print!("{yaml}");
        Ok(())
    })();
    finish(run, result)
}

/// `sq tbl copy|truncate|drop …`.
fn cmd_tbl(config: &Config, rest: Vec<String>) -> Result<()> {
    let mut rest = rest.into_iter();
    let sub = rest
        .next()
        .ok_or_else(|| SqError::invalid_source("tbl wants copy, truncate or drop"))?;

    let run = Run::new(config.collection.clone())?;
    let result = (|| -> Result<()> {
        match sub.as_str() {
            "copy" => {
                let from = rest
                    .next()
                    .ok_or_else(|| SqError::invalid_source("tbl copy wants @handle.table"))?;
                let to = rest
                    .next()
                    .ok_or_else(|| SqError::invalid_source("tbl copy wants a destination .table"))?;

                let (handle, from_tbl) = split_handle_table(&run, &from)?;
                let from_tbl = from_tbl
                    .ok_or_else(|| SqError::invalid_source(format!("wanted @handle.table, got {from}")))?;
                let to_tbl = to.strip_prefix('.').unwrap_or(&to).to_string();

                let src = run.collection.get(&handle)?.clone();
                let db = sq::driver::DbOpener::open_db(run.pool.as_ref(), &src)?;
                let copied = db.with_conn(|drvr, conn| {
                    drvr.copy_table(conn, &from_tbl, &to_tbl, true)
                })?;
                println!("Copied {handle}.{from_tbl} to .{to_tbl} ({copied} rows)");
                Ok(())
            }
            "truncate" => {
                let target = rest
                    .next()
                    .ok_or_else(|| SqError::invalid_source("tbl truncate wants @handle.table"))?;
                let (handle, tbl) = split_handle_table(&run, &target)?;
                let tbl = tbl
                    .ok_or_else(|| SqError::invalid_source(format!("wanted @handle.table, got {target}")))?;

                let src = run.collection.get(&handle)?.clone();
                let drvr = run.registry.driver_for(src.typ)?;
                let affected = drvr.truncate(&src, &tbl, true, &run.cancel)?;
                println!("Truncated {affected} rows from {handle}.{tbl}");
                Ok(())
            }
            "drop" => {
                let target = rest
                    .next()
                    .ok_or_else(|| SqError::invalid_source("tbl drop wants @handle.table"))?;
                let (handle, tbl) = split_handle_table(&run, &target)?;
                let tbl = tbl
                    .ok_or_else(|| SqError::invalid_source(format!("wanted @handle.table, got {target}")))?;

                let src = run.collection.get(&handle)?.clone();
                let db = sq::driver::DbOpener::open_db(run.pool.as_ref(), &src)?;
                db.with_conn(|drvr, conn| drvr.drop_table(conn, &tbl, false))?;
                println!("Dropped {handle}.{tbl}");
                Ok(())
            }
            other => bail!("unknown tbl command: {other}"),
        }
    })();
    finish(run, result)
}

fn cmd_diff(flags: &Flags, config: &Config, rest: Vec<String>) -> Result<()> {
    let [h1, h2] = rest.as_slice() else {
        bail!("diff wants two handles: sq diff @h1 @h2");
    };

    let mut elems = DiffElements {
        overview: flags.overview,
        db_properties: flags.dbprops,
        schema: flags.schema,
        row_counts: false,
    };
    if !elems.overview && !elems.db_properties && !elems.schema {
        elems.overview = true;
        elems.schema = true;
    }

    let run = Run::new(config.collection.clone())?;
    let result = (|| -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        exec_source_diff(&run, DiffConfig::default(), elems, h1, h2, &mut out)?;
        out.flush().map_err(|e| SqError::io(e.to_string()))?;
        Ok(())
    })();
    finish(run, result)
}

/// If data is piped in, spool it, detect its format, and register the
/// @stdin source as active.
fn attach_stdin(flags: &Flags, run: &mut Run) -> Result<()> {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(());
    }

    let spool = run.files.add_stdin(stdin.lock())?;
    if std::fs::metadata(&spool).map(|m| m.len()).unwrap_or(0) == 0 {
        return Ok(());
    }

    let typ = match &flags.driver {
        Some(name) => DriverType::from_name(name)
            .ok_or_else(|| SqError::invalid_source(format!("unknown driver type: {name}")))?,
        None => run
            .registry
            .detect_type(&spool)?
            .ok_or_else(|| SqError::invalid_source("unable to detect type of stdin: use --driver"))?,
    };

    let mut src = Source::new(STDIN_HANDLE, typ, STDIN_HANDLE);
    if flags.no_cache {
        src.options.set(OPT_INGEST_NO_CACHE, true);
    }
    run.collection.add(src)?;
    if flags.src.is_none() {
        run.collection.set_active(STDIN_HANDLE)?;
    }
    Ok(())
}

/// Detects the driver type for a location: URL schemes first, then file
/// content detection.
fn detect_driver_type(run: &Run, location: &str) -> Result<DriverType> {
    for (prefix, typ) in [
        ("postgres://", DriverType::Postgres),
        ("postgresql://", DriverType::Postgres),
        ("mysql://", DriverType::Mysql),
        ("sqlserver://", DriverType::Sqlserver),
        ("sqlite3:", DriverType::Sqlite3),
    ] {
        if location.starts_with(prefix) {
            return Ok(typ);
        }
    }

    let path = PathBuf::from(location);
    if path.extension().is_some_and(|e| e == "db" || e == "sqlite" || e == "sqlite3") {
        return Ok(DriverType::Sqlite3);
    }

    if path.exists() {
        if let Some(typ) = run.registry.detect_type(&path)? {
            return Ok(typ);
        }
    }
    Err(SqError::invalid_source(format!(
        "unable to determine driver type for {location}: use --driver"
    ))
    .into())
}

/// Splits `@handle.table` against the collection: the longest handle
/// prefix that names a known source wins, so dotted group handles work.
fn split_handle_table(run: &Run, s: &str) -> Result<(String, Option<String>)> {
    if run.collection.get(s).is_ok() {
        return Ok((s.to_string(), None));
    }

    let mut idx = s.len();
    while let Some(dot) = s[..idx].rfind('.') {
        let (handle, tbl) = (&s[..dot], &s[dot + 1..]);
        if run.collection.get(handle).is_ok() {
            return Ok((handle.to_string(), Some(tbl.to_string())));
        }
        idx = dot;
    }

    // Fall back to a syntactic split so error messages name the handle.
    match s.rsplit_once('.') {
        Some((handle, tbl)) => Ok((handle.to_string(), Some(tbl.to_string()))),
        None => Ok((s.to_string(), None)),
    }
}

/// Slightly awkward dance: the command result wins over close errors, but
/// close errors surface when the command succeeded.
fn finish(run: Run, result: Result<()>) -> Result<()> {
    let close_result = run.close();
    result.and(close_result)
}

fn print_usage() {
    println!(
        "sq is a swiss-army knife for wrangling data.

Usage:
  sq 'QUERY'                      Run a pipeline query against the active source
  sq sql --src=@h 'SELECT ...'    Run native SQL
  sq add --handle=@h LOCATION     Register a source
  sq src [@h]                     Show or set the active source
  sq rm @h                        Remove a source
  sq ls                           List sources
  sq ping [@h...]                 Check connectivity
  sq inspect [@h[.tbl]]           Show schema metadata
  sq tbl copy @h.t1 .t2           Copy a table
  sq tbl truncate @h.t            Truncate a table
  sq tbl drop @h.t                Drop a table
  sq diff @h1 @h2                 Diff two sources' metadata

Flags:
  --format=text|json|csv|tsv   Output format (-t text, -j json)
  --header / --no-header       Column headers on/off (-h / -H)
  --src=@h                     Override the active source
  --insert=@h.tbl              Insert query results into a table
  --arg k=v                    Bind $k in the query text
  --driver=TYPE                Force a driver type (add / stdin)
  --no-cache                   Re-ingest document sources
  --config=PATH                Config file location
  --log --log-level=LEVEL      Enable logging
  --verbose / -v               Verbose errors
  --monochrome / -M            Plain output

Example:
  $ sq '@sakila.actor | where(.actor_id > 2) | .first_name, .last_name | .[0:10]'"
    );
}
