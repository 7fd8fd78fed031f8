use std::env;
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{debug, info, warn};

use fnexec::config::{self, APP_NAME, AppConfig};
use fnexec::{Network, Runner};
use fnexec_protocol::{Codec, RunFunctionRequest};

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_start(ctx: RuntimeContext, cmd: StartCommand) -> Result<()> {
    handle_start(&ctx, cmd).await
}

#[tokio::main]
async fn async_run(ctx: RuntimeContext, cmd: RunCommand) -> Result<()> {
    handle_run(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common)?;
    ctx.init_logging();
    debug!("using config file {}", ctx.config_file.display());

    match cli.command {
        Command::Start(cmd) => async_start(ctx, cmd),
        Command::Run(cmd) => async_run(ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run composition functions as subprocesses behind a gRPC API.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Disable logging
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    quiet: bool,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Enable debug logging, including function stdout and stderr
    #[arg(long, global = true)]
    debug: bool,
    /// Emit logs as JSON lines
    #[arg(long = "log-json", global = true)]
    log_json: bool,
    /// Disable ANSI colors in log output
    #[arg(long = "no-color", global = true)]
    no_color: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve RunFunction requests over gRPC
    Start(StartCommand),
    /// Run a function once with a request read from a file
    Run(RunCommand),
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct FunctionArgs {
    /// Payload format on the function's stdin and stdout
    #[arg(long, value_name = "FORMAT")]
    pipe_format: Option<Codec>,
    /// Function executable, followed by arguments passed on every run
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

impl FunctionArgs {
    fn runner(&self, config: &AppConfig) -> Result<Runner> {
        let (command, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("a function command is required"))?;
        let codec = self.pipe_format.unwrap_or(config.runner.pipe_format);
        Ok(Runner::new(command.clone(), args.to_vec()).with_codec(codec))
    }
}

#[derive(Debug, Clone, Args)]
struct StartCommand {
    /// Network to listen on
    #[arg(long, value_enum)]
    network: Option<Network>,
    /// Address to listen on: host:port for tcp, a socket path for unix
    #[arg(long)]
    address: Option<String>,
    /// Directory containing ca.crt, tls.crt and tls.key; enables mutual TLS
    #[arg(long, value_name = "DIR", env = "TLS_SERVER_CERTS_DIR")]
    tls_server_certs_dir: Option<PathBuf>,
    /// Maximum number of functions running at once (0 for no limit)
    #[arg(long, value_name = "N")]
    max_concurrent_runs: Option<usize>,
    #[command(flatten)]
    function: FunctionArgs,
}

#[derive(Debug, Clone, Args)]
struct RunCommand {
    /// YAML or JSON RunFunctionRequest, or - for stdin
    #[arg(short, long, value_name = "FILE")]
    request: PathBuf,
    /// Format of the response written to stdout
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
    #[command(flatten)]
    function: FunctionArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    config_file: PathBuf,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let config_file = config::resolve_config_path(common.config.as_deref())?;
        let config = AppConfig::load(&config_file)?;
        Ok(Self {
            common,
            config_file,
            config,
        })
    }

    fn init_logging(&self) {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.effective_log_level();
        if level == LevelFilter::OFF {
            return;
        }

        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{APP_NAME}={level},fnexec_protocol={level}"))
        });

        if self.common.log_json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
                .try_init()
                .ok();
        } else {
            let disable_color = self.common.no_color
                || env::var_os("NO_COLOR").is_some()
                || !io::stderr().is_terminal();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(!disable_color),
                )
                .try_init()
                .ok();
        }
    }

    fn effective_log_level(&self) -> LevelFilter {
        if self.common.quiet {
            return LevelFilter::OFF;
        }
        if self.common.debug {
            return LevelFilter::DEBUG;
        }
        match self.common.verbose {
            0 => self
                .config
                .logging
                .level
                .parse()
                .unwrap_or(LevelFilter::INFO),
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

async fn handle_start(ctx: &RuntimeContext, cmd: StartCommand) -> Result<()> {
    let server = &ctx.config.server;
    let network = cmd.network.unwrap_or(server.network);
    let address = cmd.address.unwrap_or_else(|| server.address.clone());

    let mut runner = cmd.function.runner(&ctx.config)?;
    if let Some(limit) = cmd.max_concurrent_runs.or(ctx.config.runner.max_concurrent_runs) {
        runner = runner.with_max_concurrent_runs(limit);
    }
    let tls_dir = match cmd.tls_server_certs_dir {
        Some(dir) => Some(config::expand_path(&dir)?),
        None => server.tls_server_certs_dir.as_deref().map(PathBuf::from),
    };
    if let Some(dir) = tls_dir {
        runner = runner.with_tls_certs_dir(dir);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    Arc::new(runner)
        .listen_and_serve(network, &address, shutdown)
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn handle_run(ctx: &RuntimeContext, cmd: RunCommand) -> Result<()> {
    let raw = read_request(&cmd.request)?;
    let req: RunFunctionRequest =
        serde_yaml::from_str(&raw).context("parsing RunFunctionRequest")?;
    let runner = cmd.function.runner(&ctx.config)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let resp = runner
        .execute(&cancel, &req)
        .await
        .with_context(|| format!("running function {}", runner.command()))?;

    let out = match cmd.output {
        OutputFormat::Yaml => serde_yaml::to_string(&resp).context("serializing response to YAML")?,
        OutputFormat::Json => {
            let mut json =
                serde_json::to_string_pretty(&resp).context("serializing response to JSON")?;
            json.push('\n');
            json
        }
    };
    io::stdout()
        .write_all(out.as_bytes())
        .context("writing response")?;
    Ok(())
}

fn read_request(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("reading request from stdin")?;
        return Ok(raw);
    }
    let path = config::expand_path(path)?;
    fs::read_to_string(&path).with_context(|| format!("reading request file {}", path.display()))
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            print!("{}", ctx.config.to_toml()?);
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.config_file.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, cancelling running functions");
    token.cancel();
}
