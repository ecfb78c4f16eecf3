//! Stride CLI Entry Point
//!
//! Demonstrates the engine on real files: every file is read through a
//! `group()` fan-out, then a second step counts lines and bytes.
//!
//! # Usage
//!
//! ```bash
//! # Summarize a few files
//! stride Cargo.toml src/lib.rs
//!
//! # With an engine config file
//! stride --config stride.yaml notes.txt
//!
//! # Allow continuations to be called any number of times
//! stride --max-calls unlimited notes.txt
//! ```

use std::cell::RefCell;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use colored::Colorize;
use log::{debug, error, info};
use serde_json::{json, Value};

use stride::config::parse_max_calls;
use stride::{
    run_with_config, EngineConfig, Next, Outcome, Role, Scheduler, StepError, StepResult,
    APP_NAME, VERSION,
};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    files: Vec<PathBuf>,
    config_path: Option<PathBuf>,
    max_calls: Option<Option<usize>>,
    verbose: bool,
}

/// Per-file counts produced by the summarizing step.
#[derive(Debug, Clone, PartialEq)]
struct FileSummary {
    path: String,
    lines: usize,
    bytes: usize,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: stride [OPTIONS] <FILE>...");
    println!();
    println!("Arguments:");
    println!("  <FILE>...             Files to read in parallel and summarize");
    println!();
    println!("Options:");
    println!("  --config PATH         Load engine settings from a YAML file");
    println!("  --max-calls N         Continuation call limit, or 'unlimited'");
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                config.config_path = Some(PathBuf::from(&args[i]));
            }
            "--max-calls" => {
                i += 1;
                if i >= args.len() {
                    return Err("--max-calls requires a value".to_string());
                }
                let limit = parse_max_calls(&args[i]).map_err(|e| e.to_string())?;
                config.max_calls = Some(limit);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => config.files.push(PathBuf::from(arg)),
        }
        i += 1;
    }

    if config.files.is_empty() {
        return Err("at least one file is required".to_string());
    }

    Ok(config)
}

/// Builds the engine settings from the optional file and CLI overrides.
fn engine_config(config: &Config) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut engine = match &config.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(limit) = config.max_calls {
        engine = engine.with_max_calls(limit);
    }

    Ok(engine)
}

/// First step: read every file through one group, each read deferred to
/// its own timer.
fn read_files(files: &[PathBuf], next: &Next) -> StepResult {
    let group = next.group_slots(2);
    let scheduler = next.scheduler();

    for path in files {
        let callback = group.spawn();
        let path = path.clone();
        scheduler.set_timeout(Duration::ZERO, move || {
            let name = path.display().to_string();
            match fs::read_to_string(&path) {
                Ok(text) => {
                    debug!("Read {} ({} bytes)", name, text.len());
                    callback.ok(vec![json!(name), json!(text)]);
                }
                Err(e) => callback.fail(StepError::failed(format!("{}: {}", name, e))),
            }
        });
    }

    next.store().set("files", files.len());
    Ok(None)
}

/// Second step: turn the grouped `[path, text, path, text, ...]` array into
/// per-file counts.
fn summarize(next: &Next, args: Vec<Value>) -> StepResult {
    let Some(Value::Array(pairs)) = args.into_iter().next() else {
        return Err(StepError::failed("expected grouped file contents"));
    };

    let summaries: Vec<Value> = pairs
        .chunks(2)
        .map(|pair| {
            let path = pair.first().and_then(Value::as_str).unwrap_or_default();
            let text = pair.get(1).and_then(Value::as_str).unwrap_or_default();
            json!({
                "path": path,
                "lines": text.lines().count(),
                "bytes": text.len(),
            })
        })
        .collect();

    let total_bytes: u64 = summaries
        .iter()
        .filter_map(|s| s["bytes"].as_u64())
        .sum();
    next.store().set("total_bytes", total_bytes);

    Ok(Some(Value::Array(summaries)))
}

/// Extracts file summaries from the final outcome.
fn collect_summaries(outcome: &Outcome) -> Vec<FileSummary> {
    let Some(Value::Array(entries)) = outcome.args.first() else {
        return Vec::new();
    };

    entries
        .iter()
        .map(|entry| FileSummary {
            path: entry["path"].as_str().unwrap_or_default().to_string(),
            lines: entry["lines"].as_u64().unwrap_or_default() as usize,
            bytes: entry["bytes"].as_u64().unwrap_or_default() as usize,
        })
        .collect()
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    let engine = engine_config(&config)?;
    info!(
        "{} v{}: {} files, call limit {:?}",
        APP_NAME,
        VERSION,
        config.files.len(),
        engine.default_max_calls
    );

    let scheduler = Scheduler::with_clock(engine.clock);
    let files = config.files.clone();
    let result: Rc<RefCell<Option<Outcome>>> = Rc::new(RefCell::new(None));

    let sink = Rc::clone(&result);
    run_with_config(
        &scheduler,
        &engine,
        vec![
            Role::step(move |next, _| read_files(&files, next)),
            Role::step(summarize),
        ],
    )
    .on_error(|err| error!("{}", err))
    .once_done(move |outcome| *sink.borrow_mut() = Some(outcome.clone()));

    scheduler.run()?;

    let outcome = result
        .borrow_mut()
        .take()
        .ok_or("run ended without a result")?;

    if let Some(err) = outcome.error {
        return Err(err.into());
    }

    println!();
    for summary in collect_summaries(&outcome) {
        println!(
            "{:>8} lines {:>10} bytes  {}",
            summary.lines.to_string().green(),
            summary.bytes.to_string().cyan(),
            summary.path.bold()
        );
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn argv(items: &[&str]) -> Vec<String> {
        std::iter::once("stride")
            .chain(items.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_arguments_files_and_options() {
        let config = parse_arguments(&argv(&["--verbose", "--max-calls", "3", "a.txt", "b.txt"]))
            .unwrap();

        assert!(config.verbose);
        assert_eq!(config.max_calls, Some(Some(3)));
        assert_eq!(config.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
    }

    #[test]
    fn test_parse_arguments_unlimited() {
        let config = parse_arguments(&argv(&["--max-calls", "unlimited", "a.txt"])).unwrap();
        assert_eq!(config.max_calls, Some(None));
    }

    #[test]
    fn test_parse_arguments_errors() {
        assert!(parse_arguments(&argv(&[])).is_err());
        assert!(parse_arguments(&argv(&["--bogus", "a.txt"])).is_err());
        assert!(parse_arguments(&argv(&["a.txt", "--config"])).is_err());
        assert!(parse_arguments(&argv(&["--max-calls", "zero?", "a.txt"])).is_err());
    }

    #[test]
    fn test_engine_config_override() {
        let config = parse_arguments(&argv(&["--max-calls", "5", "a.txt"])).unwrap();
        let engine = engine_config(&config).unwrap();
        assert_eq!(engine.default_max_calls, Some(5));
    }

    #[test]
    fn test_pipeline_summarizes_files() {
        let mut first = NamedTempFile::new().unwrap();
        write!(first, "one\ntwo\nthree\n").unwrap();
        let mut second = NamedTempFile::new().unwrap();
        write!(second, "solo").unwrap();

        let files = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let scheduler = Scheduler::new();
        let result = Rc::new(RefCell::new(None));

        let sink = Rc::clone(&result);
        let handle = run_with_config(
            &scheduler,
            &EngineConfig::default(),
            vec![
                Role::step(move |next, _| read_files(&files, next)),
                Role::step(summarize),
            ],
        );
        handle.once_done(move |outcome| *sink.borrow_mut() = Some(outcome.clone()));

        scheduler.run().unwrap();

        let outcome = result.borrow_mut().take().unwrap();
        assert!(outcome.is_ok());

        let summaries = collect_summaries(&outcome);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].lines, 3);
        assert_eq!(summaries[0].bytes, 14);
        assert_eq!(summaries[1].lines, 1);
        assert_eq!(summaries[1].bytes, 4);

        assert_eq!(handle.store().get_as::<usize>("files").unwrap(), Some(2));
        assert_eq!(handle.store().get_as::<u64>("total_bytes").unwrap(), Some(18));
    }

    #[test]
    fn test_pipeline_reports_missing_file() {
        let files = vec![PathBuf::from("/nonexistent/stride-input.txt")];
        let scheduler = Scheduler::new();
        let result = Rc::new(RefCell::new(None));

        let sink = Rc::clone(&result);
        run_with_config(
            &scheduler,
            &EngineConfig::default(),
            vec![
                Role::step(move |next, _| read_files(&files, next)),
                Role::step(summarize),
            ],
        )
        .once_done(move |outcome| *sink.borrow_mut() = Some(outcome.clone()));

        scheduler.run().unwrap();

        let outcome: Outcome = result.borrow_mut().take().unwrap();
        let err = outcome.error.unwrap();
        assert!(err.to_string().contains("stride-input.txt"));
    }

    #[test]
    fn test_summarize_rejects_missing_group() {
        let scheduler = Scheduler::new();
        let seen = Rc::new(RefCell::new(None));

        let sink = Rc::clone(&seen);
        run_with_config(
            &scheduler,
            &EngineConfig::default(),
            vec![Role::step(summarize)],
        )
        .once_done(move |outcome: &Outcome| *sink.borrow_mut() = outcome.error.clone());

        scheduler.run().unwrap();
        assert_eq!(
            *seen.borrow(),
            Some(StepError::failed("expected grouped file contents"))
        );
    }
}
