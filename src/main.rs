#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
#[macro_use]
extern crate slog;

use std::fs;
use std::io;
use std::path;
use std::process;
use std::sync;

use slog::Drain;
use structopt::StructOpt;

pub mod aggregate;
pub mod classify;
pub mod db;
pub mod error;
pub mod model;
pub mod notify;
pub mod ops;
pub mod report;
pub mod settings;
pub mod util;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "sitewatch",
    about = "Checks irrigation sites for missing telemetry and controller errors, and mails reports."
)]
struct Options {
    /// Settings file (TOML); SITEWATCH_* environment variables take precedence.
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    config: Option<path::PathBuf>,

    /// JSON request to run; `-` reads it from stdin.
    #[structopt(short = "r", long = "request", default_value = "-")]
    request: String,

    /// Answer queries from a JSON snapshot instead of DynamoDB.
    #[structopt(long = "snapshot", parse(from_os_str))]
    snapshot: Option<path::PathBuf>,

    /// Print notifications to stderr instead of sending them.
    #[structopt(long = "dry-run")]
    dry_run: bool,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("sitewatch: {}", e);
            2
        }
    };
    process::exit(code);
}

fn run() -> Result<i32, failure::Error> {
    let options = Options::from_args();

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let log = slog::Logger::root(drain, o!("app" => "sitewatch"));

    let _scope_guard = slog_scope::set_global_logger(log.clone());
    slog_stdlog::init()?;

    let settings = settings::Settings::load(options.config.as_ref().map(path::PathBuf::as_path))?;
    let registry = model::Registry::load(&settings)?;
    info!(log, "loaded sites"; "active" => registry.active_ids().join(", "));

    let runtime = sync::Arc::new(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?,
    );

    let store: Box<dyn db::RecordStore> = match options.snapshot {
        Some(ref snapshot) => {
            info!(log, "reading records from snapshot"; "file" => %snapshot.display());
            Box::new(db::memory::MemoryStore::open(snapshot)?)
        }
        None => Box::new(db::Db::connect(
            log.new(o!("component" => "db")),
            runtime.clone(),
            &settings,
        )?),
    };

    let transport: Box<dyn notify::Transport> = if options.dry_run {
        Box::new(notify::DryRunTransport::new(log.new(o!("component" => "notify"))))
    } else {
        Box::new(notify::SesTransport::connect(
            log.new(o!("component" => "notify")),
            runtime.clone(),
            &settings,
        )?)
    };
    let dispatcher = notify::Dispatcher::new(
        log.new(o!("component" => "dispatch")),
        &settings.sender,
        transport,
    );

    let raw = read_request(&options.request)?;
    let monitor = ops::Monitor::new(
        log.new(o!("component" => "ops")),
        &registry,
        &settings,
        store.as_ref(),
        &dispatcher,
    );
    let response = monitor.handle(&raw, chrono::Utc::now());

    serde_json::to_writer_pretty(io::stdout(), &response)?;
    println!();

    Ok(if response.status_code < 300 { 0 } else { 1 })
}

fn read_request(source: &str) -> Result<String, failure::Error> {
    use std::io::Read;

    if source == "-" {
        let mut raw = String::new();
        io::stdin().read_to_string(&mut raw)?;
        Ok(raw)
    } else {
        Ok(fs::read_to_string(source)?)
    }
}
