// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of skillshare.
//
// skillshare is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// skillshare is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with skillshare.  If not,
// see <http://www.gnu.org/licenses/>.

//! # skillshared
//!
//! The skillshare daemon: read configuration, set up logging & metrics, pick a storage backend &
//! serve the API until told to stop. `SIGHUP` re-reads the configuration, re-opens the log file &
//! reconnects to the store; `SIGTERM` shuts down gracefully.

use std::{
    fmt::Display,
    fs::OpenOptions,
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use axum::Router;
use chrono::Duration;
use clap::{crate_authors, crate_version, value_parser, Arg, ArgAction, Command};
use http::{HeaderName, HeaderValue};
use opentelemetry::{global, KeyValue};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use secrecy::SecretString;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::{mpsc, Notify},
};
use tower_http::{
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, error, info, Level};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    Layer, Registry,
};

use skillshare::{
    dynamodb::Location as DynamoLocation,
    metrics::check_metric_registrations,
    peppers::Peppers,
    signing_keys::SigningKeys,
    skillshare::{make_world_router, Skillshare},
    storage::Backend as StorageBackend,
    util::Credentials,
};

/// The skillshared application error type
///
/// Not `Debug`-derived: `main()` returns `Result<(), Error>`, and the runtime prints the `Err`
/// variant with `Debug`, so that's implemented by hand to read like `Display`.
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Configuration file {pth:?} not found: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to parse configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to determine the current directory: {source}"))]
    CurrentDir { source: std::io::Error },
    #[snafu(display("Failed to connect to DynamoDB: {source}"))]
    Dynamo { source: skillshare::dynamodb::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to open the log file: {source}"))]
    LogFile { source: std::io::Error },
    #[snafu(display("Failed to ask the log file to re-open: {source}"))]
    LogHup {
        source: mpsc::error::SendError<PathBuf>,
    },
    #[snafu(display("Failed to connect to MongoDB: {source}"))]
    Mongo { source: skillshare::mongo::Error },
    #[snafu(display("Failed to install a signal handler: {source}"))]
    Signal { source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to build a tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

/// Logging-related options read from the command line or the environment
struct LogOpts {
    /// Log to the configured log file (rather than stdout)
    pub to_file: bool,
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        // The most verbose request wins
        let level = if matches.get_flag("debug") {
            Level::TRACE
        } else if matches.get_flag("verbose") {
            Level::DEBUG
        } else if matches.get_flag("quiet") {
            Level::ERROR
        } else {
            Level::INFO
        };
        LogOpts {
            to_file: !matches.get_flag("foreground"),
            plain: matches.get_flag("plain"),
            level,
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
    /// Overrides any credentials given in the storage configuration
    pub credentials: Option<Credentials>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> Result<CliOpts> {
        let here = std::env::current_dir().context(CurrentDirSnafu)?;
        Ok(CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches
                .get_one::<PathBuf>("config")
                .cloned()
                .map(|p| here.join(p)),
            credentials: matches.get_one::<Credentials>("credentials").cloned(),
        })
    }
}

/// Which document store to use
// Deserialize only; there are secrets in here
#[derive(Clone, Debug, Deserialize)]
pub enum StorageConfig {
    /// Keep everything in memory; nothing survives a restart (or a `SIGHUP`)
    Memory,
    /// MongoDB
    Mongo {
        /// A MongoDB connection string, such as `mongodb://localhost:27017`
        uri: String,
        database: String,
    },
    /// DynamoDB
    Dynamo {
        /// Key ID & secret key; may be left out when running against a local, open instance
        credentials: Option<Credentials>,
        location: DynamoLocation,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SigningKeysConfig {
    #[serde(rename = "token-lifetime")]
    token_lifetime: Duration,
    #[serde(rename = "signing-keys")]
    signing_keys: SigningKeys,
}

impl Default for SigningKeysConfig {
    fn default() -> Self {
        SigningKeysConfig {
            token_lifetime: Duration::hours(24),
            signing_keys: SigningKeys::default(),
        }
    }
}

/// skillshare configuration, version one; anything left out takes its default
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct ConfigV1 {
    #[serde(rename = "log-file")]
    log_file: PathBuf,
    /// Local address at which to listen; specify as "address:port"
    #[serde(rename = "public-address")]
    public_address: SocketAddr,
    /// The origin at which this instance may be reached; names the issuer of our tokens
    #[serde(rename = "public-origin")]
    public_origin: String,
    #[serde(rename = "storage-config")]
    storage_config: StorageConfig,
    pepper: Peppers,
    #[serde(rename = "signing-keys")]
    signing_keys: SigningKeysConfig,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            log_file: PathBuf::from_str("/tmp/skillshared.log").unwrap(/* known good */),
            public_address: "0.0.0.0:20690".parse::<SocketAddr>().unwrap(/* known good */),
            public_origin: "http://localhost:20690".to_owned(),
            storage_config: StorageConfig::default(),
            pepper: Peppers::default(),
            signing_keys: SigningKeysConfig::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")]
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

const DEFAULT_CONFIG: &str = "/etc/skillshare.toml";

/// Parse the skillshare configuration file
///
/// If no file was named & there's nothing at the default location, run with defaults.
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    let pth = cfg.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let text = match std::fs::read_to_string(&pth) {
        Ok(text) => text,
        Err(_) if cfg.is_none() => return Ok(ConfigV1::default()),
        Err(err) => return Err(ConfigNotFoundSnafu { pth }.into_error(err)),
    };
    toml::from_str::<Configuration>(&text)
        .map(|Configuration::V1(cfg)| cfg)
        .map_err(|err| ConfigParseSnafu { pth }.into_error(err))
}

/// An append-mode log file that can be swapped out from under the logging [Layer]
///
/// The [Layer] owns its writer, so the file sits behind a shared lock & a task listening on a
/// channel replaces it whenever it's sent a path (on `SIGHUP`, say). That lets logrotate & friends
/// move the old file aside.
struct ReopenableLog {
    file: Arc<Mutex<std::fs::File>>,
}

fn append_to(pth: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(pth)
}

impl ReopenableLog {
    /// Open `pth`; the returned [mpsc::Sender] is how to ask for a re-open
    pub fn open(pth: &Path) -> io::Result<(ReopenableLog, mpsc::Sender<PathBuf>)> {
        let file = Arc::new(Mutex::new(append_to(pth)?));
        let (tx, rx) = mpsc::channel::<PathBuf>(1);
        tokio::spawn(ReopenableLog::reopen_on_request(file.clone(), rx));
        Ok((ReopenableLog { file }, tx))
    }
    async fn reopen_on_request(file: Arc<Mutex<std::fs::File>>, mut rx: mpsc::Receiver<PathBuf>) {
        while let Some(pth) = rx.recv().await {
            let fresh = match append_to(&pth) {
                Ok(fresh) => fresh,
                Err(err) => {
                    error!("Failed to re-open {}: {}; logging to the old file.", pth.display(), err);
                    continue;
                }
            };
            *file.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        }
    }
}

pub struct LockedLog<'a>(MutexGuard<'a, std::fs::File>);

impl<'a> MakeWriter<'a> for ReopenableLog {
    type Writer = LockedLog<'a>;
    fn make_writer(&'a self) -> Self::Writer {
        // A panic while holding the lock can't leave a `File` in a bad state
        LockedLog(self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

impl io::Write for LockedLog<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Configure logging
///
/// |               | file        | `--foreground` |
/// |---------------|-------------|----------------|
/// | default       | json, file  | json, stdout   |
/// | `--plain`     | !json, file | !json, stdout  |
///
/// When logging to file, also return the send side of a channel that asks the file to re-open
/// itself.
#[allow(clippy::type_complexity)]
fn configure_logging(
    logopts: &LogOpts,
    logfile: &Path,
) -> Result<(
    Box<dyn Layer<Registry> + Send + Sync>,
    EnvFilter,
    Option<mpsc::Sender<PathBuf>>,
)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    let mut tx = None;
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = if logopts.to_file {
        let (log_file, tx_inner) = ReopenableLog::open(logfile).context(LogFileSnafu)?;
        tx = Some(tx_inner);
        if logopts.plain {
            Box::new(
                fmt::Layer::default()
                    .compact()
                    .with_ansi(false)
                    .with_writer(log_file),
            )
        } else {
            Box::new(
                fmt::Layer::default()
                    .json()
                    .with_current_span(true)
                    .with_writer(log_file),
            )
        }
    } else if logopts.plain {
        Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
    } else {
        Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        )
    };

    Ok((formatter, filter, tx))
}

/// Count every request by method & path
async fn otel_middleware(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    // OTel names are limited to alphanumerics, '_', '.', '-' & '/'; keep those & map '/' to '.'
    let stem: String = request
        .uri()
        .path()
        .chars()
        .filter_map(|c| match c {
            '/' => Some('.'),
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => Some(c),
            _ => None,
        })
        .collect();
    let name = format!("http.{}{}", request.method().as_str().to_lowercase(), stem);
    global::meter("skillshare").u64_counter(name).build().add(1, &[]);
    next.run(request).await
}

#[derive(Clone, Debug, Default)]
struct RequestIdGenerator {
    counter: Arc<AtomicU64>,
}

impl MakeRequestId for RequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &axum::extract::Request<B>) -> Option<RequestId> {
        self.counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
            .pipe(|s| HeaderValue::from_str(&s).ok())
            .map(RequestId::new)
    }
}

/// The world-facing router, with request ids, tracing & per-route counts layered on
fn make_router(state: Arc<Skillshare>) -> Router {
    make_world_router(state)
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(axum::middleware::from_fn(otel_middleware))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            RequestIdGenerator::default(),
        ))
}

async fn select_storage(
    config: &StorageConfig,
    credentials: &Option<Credentials>,
) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    match config {
        StorageConfig::Memory => {
            info!("Using the in-memory store; nothing will be persisted.");
            Ok(Arc::new(skillshare::memory::Client::new()))
        }
        StorageConfig::Mongo { uri, database } => Ok(Arc::new(
            skillshare::mongo::Client::new(uri, database)
                .await
                .context(MongoSnafu)?,
        )),
        StorageConfig::Dynamo {
            credentials: configured,
            location,
        } => {
            let credentials: Option<(SecretString, SecretString)> = credentials
                .as_ref()
                .or(configured.as_ref())
                .map(|c| c.0.clone());
            Ok(Arc::new(
                skillshare::dynamodb::Client::new(location, &credentials)
                    .await
                    .context(DynamoSnafu)?,
            ))
        }
    }
}

#[tracing::instrument(skip(opts, cfg, log_file_hup))]
async fn serve(
    opts: CliOpts,
    mut cfg: ConfigV1,
    log_file_hup: Option<mpsc::Sender<PathBuf>>,
) -> Result<()> {
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    fn log_on_err<T, E>(x: StdResult<T, E>)
    where
        E: std::error::Error + std::fmt::Debug,
    {
        if let Err(err) = x {
            error!("{:?}", err);
        }
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu)?;
    let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

    let exporter = init_telemetry();

    loop {
        let storage = select_storage(&cfg.storage_config, &opts.credentials).await?;

        let state = Arc::new(Skillshare::new(
            &cfg.public_origin,
            storage,
            exporter.clone(),
            cfg.pepper.clone(),
            cfg.signing_keys.token_lifetime,
            cfg.signing_keys.signing_keys.clone(),
        ));

        let nfy = Arc::new(Notify::new());
        let mut server = axum::serve(
            TcpListener::bind(cfg.public_address)
                .await
                .context(BindSnafu {
                    addr: cfg.public_address,
                })?,
            make_router(state),
        )
        .with_graceful_shutdown(shutdown_signal(nfy.clone()))
        .into_future();

        info!("Listening on {}.", cfg.public_address);

        tokio::select! {
            res = &mut server => {
                error!("The server exited unexpectedly; shutting down.");
                log_on_err(res);
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP; re-reading configuration & re-opening the log file.");
                nfy.notify_one();
                log_on_err(server.await);

                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        error!("{}; keeping the last good configuration.", err);
                        cfg
                    }
                };
                if let Some(ref lfh) = log_file_hup {
                    lfh.send(cfg.log_file.clone()).await.context(LogHupSnafu)?;
                    info!("Started new log file.");
                }
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                nfy.notify_one();
                log_on_err(server.await);
                break;
            }
        }
    }

    Ok(())
}

/// Install the global meter provider, exporting in Prometheus text format
fn init_telemetry() -> PrometheusExporter {
    check_metric_registrations();
    let exporter = PrometheusExporter::new();
    let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
        .with_resource(
            opentelemetry_sdk::Resource::builder_empty()
                .with_attribute(KeyValue::new("service.name", "skillshare"))
                .build(),
        )
        .with_reader(exporter.clone())
        .build();
    global::set_meter_provider(provider);
    exporter
}

async fn go_async(
    opts: CliOpts,
    bootstrap_logging_guard: tracing::dispatcher::DefaultGuard,
) -> Result<()> {
    // Logging is configured *before* `serve()` since it's instrumented. Failure to parse the
    // configuration here is fatal; on `SIGHUP`, the last good configuration is kept.
    let cfg = parse_config(&opts.cfg)?;
    let (formatter, filter, log_file_hup) = configure_logging(&opts.log_opts, &cfg.log_file)?;

    tracing::subscriber::set_global_default(Registry::default().with(formatter).with(filter))
        .context(SubscriberSnafu)?;
    drop(bootstrap_logging_guard);

    info!("skillshare version {} starting.", crate_version!());

    serve(opts, cfg, log_file_hup).await
}

/// An on/off switch settable as `-x`, `--name` or through the environment
fn switch(name: &'static str, short: char, env: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .action(ArgAction::SetTrue)
        .env(env)
        .help(help)
}

fn cli() -> Command {
    Command::new("skillshared")
        .version(crate_version!())
        .author(crate_authors!())
        .about("Share what you're learning")
        .long_about(
            "`skillshared` serves the skillshare API: follows, feeds, commitments, resources \
             & learning plans. Most settings come from the configuration file; the options here \
             say where to find it & how to log until it's been read.",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_parser(value_parser!(PathBuf))
                .env("SKILLSHARE_CONFIG")
                .help("configuration file (relative paths are taken from the current directory)"),
        )
        .arg(
            Arg::new("credentials")
                .long("credentials")
                .value_parser(value_parser!(Credentials))
                .env("SKILLSHARE_CREDENTIALS")
                .hide_env_values(true)
                .help("DynamoDB credentials as \"key-id,secret-key\"; overrides the file"),
        )
        .arg(switch("debug", 'D', "SKILLSHARE_DEBUG", "log everything"))
        .arg(switch(
            "foreground",
            'F',
            "SKILLSHARE_FOREGROUND",
            "log to stdout instead of the configured log file",
        ))
        .arg(switch(
            "plain",
            'p',
            "SKILLSHARE_PLAIN",
            "log compact text rather than JSON",
        ))
        .arg(switch("quiet", 'q', "SKILLSHARE_QUIET", "log errors only"))
        .arg(switch(
            "verbose",
            'v',
            "SKILLSHARE_VERBOSE",
            "log debug messages, too",
        ))
}

fn main() -> Result<()> {
    let opts = CliOpts::new(cli().get_matches())?;

    // Log to stderr until the configuration's been read
    let bootstrap_subscriber = Registry::default()
        .with(fmt::Layer::default().with_writer(io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts, bootstrap_logging_guard))
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn versioned_configuration() {
        let cfg = match toml::from_str::<Configuration>(
            r#"
version = "1"
log-file = "/var/log/skillshared.log"
public-address = "127.0.0.1:8080"
public-origin = "https://skillshare.example.com"

[storage-config.Mongo]
uri = "mongodb://localhost:27017"
database = "skillshare"
"#,
        )
        .unwrap()
        {
            Configuration::V1(cfg) => cfg,
        };
        assert_eq!("127.0.0.1:8080".parse::<SocketAddr>().unwrap(), cfg.public_address);
        assert_eq!("https://skillshare.example.com", cfg.public_origin);
        assert!(
            matches!(cfg.storage_config, StorageConfig::Mongo { ref database, .. } if database == "skillshare")
        );
        assert_eq!(Duration::hours(24), cfg.signing_keys.token_lifetime);
        assert!(cfg.signing_keys.signing_keys.current().is_ok());
    }

    #[test]
    fn unversioned_configuration_is_rejected() {
        assert!(toml::from_str::<Configuration>("public-origin = \"http://localhost\"").is_err());
    }

    #[test]
    fn command_line() {
        cli().debug_assert();
        let matches = cli()
            .try_get_matches_from(["skillshared", "-F", "-v", "--credentials", "AKID,s3cr3t"])
            .unwrap();
        let opts = LogOpts::new(&matches);
        assert!(!opts.to_file);
        assert_eq!(Level::DEBUG, opts.level);
        assert!(matches.get_one::<Credentials>("credentials").is_some());
    }

    #[test]
    fn missing_default_config_is_fine() {
        let cfg = ConfigV1::default();
        assert!(matches!(cfg.storage_config, StorageConfig::Memory));
    }
}
