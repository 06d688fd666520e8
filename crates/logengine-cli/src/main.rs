//! The `logengine` binary: load rule scripts, stream log files through the
//! matching engine, report lifecycle events and exit with a meaningful
//! status.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{Parser, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use logengine_eval::{BuiltinHost, Engine, EngineConfig};
use logengine_parser::{load_script_file, load_script_str, ScriptSet};

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const HELP: i32 = 1;
    pub const INVALID_SWITCH: i32 = 2;
    pub const INTERNAL: i32 = 3;
    pub const BAD_ARGS: i32 = 4;
    pub const NO_SCRIPTS: i32 = 5;
    pub const SCRIPT_ERROR: i32 = 6;
    pub const GENERAL: i32 = 7;
}

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortOrder {
    Asc,
    Desc,
    None,
}

#[derive(Parser, Debug)]
#[command(name = "logengine")]
#[command(version)]
#[command(about = "Scan log files line by line, firing actions when multi-line rules match")]
struct Cli {
    /// Rule script to load (repeatable)
    #[arg(long = "rules", value_name = "PATH")]
    rules: Vec<PathBuf>,

    /// Read an additional rule script from standard input
    #[arg(long = "stdin-rules")]
    stdin_rules: bool,

    /// Log file to scan (repeatable; '-' reads the log stream from stdin)
    #[arg(long = "logfile", value_name = "PATH")]
    logfiles: Vec<String>,

    /// Keep the last log file open and poll it for growth (tail mode)
    #[arg(long = "forever", overrides_with = "no_forever")]
    forever: bool,

    /// Close log files at end of file (default)
    #[arg(long = "no-forever")]
    no_forever: bool,

    /// Order in which the given log files are scanned
    #[arg(long = "sort", value_enum, default_value_t = SortOrder::None)]
    sort: SortOrder,

    /// Print a progress line to stderr every N input lines
    #[arg(long = "status", value_name = "N")]
    status: Option<u64>,

    /// Accepted for compatibility with older rule sets; has no effect
    #[arg(long = "study", value_name = "N", hide = true)]
    study: Option<u64>,

    /// Reserve this many KiB for the output buffer
    #[arg(long = "buffer", value_name = "KB")]
    buffer: Option<usize>,

    /// Complete single-clause rules on the spot, skipping instance setup
    #[arg(long = "fast", overrides_with = "no_fast")]
    fast: bool,

    /// Disable the single-match fast path (default)
    #[arg(long = "no-fast")]
    no_fast: bool,

    /// Dump the compiled rules as JSON and exit
    #[arg(long = "dump")]
    dump: bool,

    /// Print every lifecycle event as a JSON line
    #[arg(long = "verbose", short = 'v')]
    verbose: bool,

    /// Enable debug-level engine logging
    #[arg(long = "debug")]
    debug: bool,

    /// Print a title line before scanning
    #[arg(long = "title", value_name = "TEXT")]
    title: Option<String>,

    /// name=value option readable from user code via LOGENGINE_GET_USER_OPT
    /// (repeatable; repeated names accumulate in order)
    #[arg(long = "user", value_name = "NAME=VALUE")]
    user: Vec<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp => {
                    let _ = e.print();
                    exit_code::HELP
                }
                ErrorKind::DisplayVersion => {
                    let _ = e.print();
                    exit_code::SUCCESS
                }
                _ => {
                    let _ = e.print();
                    exit_code::INVALID_SWITCH
                }
            };
            process::exit(code);
        }
    };
    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    init_logging(&cli);

    if let Some(title) = &cli.title {
        println!("{title}");
    }
    if cli.study.is_some() {
        warn!("--study is accepted for compatibility and has no effect");
    }

    // User options are validated up front; values may repeat per name.
    let mut user_opts: Vec<(String, String)> = Vec::new();
    for raw in &cli.user {
        let Some((name, value)) = raw.split_once('=') else {
            eprintln!("bad --user option '{raw}' (expected name=value)");
            return exit_code::BAD_ARGS;
        };
        if name.trim().is_empty() {
            eprintln!("bad --user option '{raw}' (empty name)");
            return exit_code::BAD_ARGS;
        }
        user_opts.push((name.trim().to_string(), value.to_string()));
    }

    if cli.rules.is_empty() && !cli.stdin_rules {
        eprintln!("no rule scripts given (use --rules or --stdin-rules)");
        return exit_code::NO_SCRIPTS;
    }

    // Load all scripts, gathering every error before aborting.
    let mut set = ScriptSet::new();
    for path in &cli.rules {
        if let Err(e) = load_script_file(path, &mut set) {
            eprintln!("{e}");
            return exit_code::SCRIPT_ERROR;
        }
    }
    if cli.stdin_rules {
        let mut text = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut text) {
            eprintln!("cannot read rules from stdin: {e}");
            return exit_code::GENERAL;
        }
        load_script_str("<stdin>", &text, &mut set);
    }
    if !set.errors.is_empty() {
        for e in &set.errors {
            eprintln!("{e}");
        }
        return exit_code::SCRIPT_ERROR;
    }

    let mut engine = Engine::new(
        Box::new(BuiltinHost::new()),
        EngineConfig { fast: cli.fast },
    );
    if let Some(kb) = cli.buffer {
        engine.reserve_buffer(kb * 1024);
    }
    let compile_errors = engine.load(&set);
    if !compile_errors.is_empty() {
        for e in &compile_errors {
            eprintln!("{e}");
        }
        return exit_code::SCRIPT_ERROR;
    }
    if engine.rule_count() == 0 {
        eprintln!("no usable rules after compilation");
        return exit_code::SCRIPT_ERROR;
    }

    if cli.dump {
        match serde_json::to_string_pretty(&engine.summaries()) {
            Ok(json) => {
                println!("{json}");
                return exit_code::SUCCESS;
            }
            Err(e) => {
                eprintln!("cannot serialize rule dump: {e}");
                return exit_code::INTERNAL;
            }
        }
    }

    for (name, value) in &user_opts {
        engine.set_user_opt(name, value);
    }

    // Order the log files, then stream them through the engine.
    let mut logfiles = cli.logfiles.clone();
    match cli.sort {
        SortOrder::Asc => logfiles.sort(),
        SortOrder::Desc => {
            logfiles.sort();
            logfiles.reverse();
        }
        SortOrder::None => {}
    }
    if logfiles.is_empty() {
        logfiles.push("-".to_string());
    }

    let mut total_lines: u64 = 0;
    let last = logfiles.len() - 1;
    'files: for (idx, path) in logfiles.iter().enumerate() {
        let tail = cli.forever && idx == last && path != "-";
        let stopped = if path == "-" {
            let stdin = io::stdin();
            scan_reader(
                &mut engine,
                &cli,
                "<stdin>",
                stdin.lock(),
                false,
                &mut total_lines,
            )
        } else {
            match File::open(path) {
                Ok(f) => scan_reader(
                    &mut engine,
                    &cli,
                    path,
                    BufReader::new(f),
                    tail,
                    &mut total_lines,
                ),
                Err(e) => {
                    // A broken log file is reported and skipped; the other
                    // files still run.
                    warn!(path, error = %e, "cannot open log file; skipped");
                    continue;
                }
            }
        };
        if stopped {
            break 'files;
        }
    }

    let events = engine.finish();
    if cli.verbose {
        print_events(&events);
    }

    let unqueried = engine.unqueried_user_opts();
    if !unqueried.is_empty() {
        eprintln!(
            "user option(s) never queried by any rule: {}",
            unqueried.join(", ")
        );
        return exit_code::BAD_ARGS;
    }

    exit_code::SUCCESS
}

/// Stream one reader through the engine. Returns `true` when a user action
/// requested a stop. In tail mode, EOF re-polls for readability instead of
/// closing the handle.
fn scan_reader<R: BufRead>(
    engine: &mut Engine,
    cli: &Cli,
    name: &str,
    mut reader: R,
    tail: bool,
    total_lines: &mut u64,
) -> bool {
    let mut file_line: u64 = 0;
    let mut buf = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf) {
            Ok(0) => {
                if tail {
                    thread::sleep(Duration::from_millis(250));
                    continue;
                }
                return false;
            }
            Ok(_) => {
                file_line += 1;
                *total_lines += 1;
                let text = buf.trim_end_matches(['\n', '\r']);
                let events = engine.process_line(name, file_line, text);
                if cli.verbose {
                    print_events(&events);
                }
                if let Some(every) = cli.status {
                    if every > 0 && *total_lines % every == 0 {
                        eprintln!("{total_lines} lines processed ({name}:{file_line})");
                    }
                }
                if engine.stop_requested() {
                    return true;
                }
            }
            Err(e) => {
                warn!(file = name, line = file_line, error = %e,
                      "read error; file skipped");
                return false;
            }
        }
    }
}

fn print_events(events: &[logengine_eval::RuleEvent]) {
    for event in events {
        match serde_json::to_string(event) {
            Ok(json) => println!("{json}"),
            Err(e) => warn!(error = %e, "cannot serialize event"),
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("logengine={level},logengine_eval={level},logengine_parser={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
