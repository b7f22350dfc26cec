use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use regex::Regex;
use tracing_subscriber::{fmt, EnvFilter};
use valet_core::{
    config::Config, context::HostContext, dispatch, fetch::HttpFetcher, registry::CommandRegistry,
};

#[derive(Parser, Debug)]
#[command(
    name = "valet",
    author,
    version,
    about = "Pluggable command-line host with deferred self-update"
)]
struct Cli {
    /// Sets the log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file; defaults to valet.toml beside the executable.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Command name followed by its arguments, passed through untouched.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    argv: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    tracing::debug!(version = valet_core::version(), "host starting");

    let ctx = HostContext::current()?;
    let config = load_config(&ctx, cli.config.as_deref())?;
    let registry = CommandRegistry::discover(&ctx, &config, Box::new(HttpFetcher))?;
    let outcome = dispatch::dispatch(&registry, &cli.argv);
    tracing::debug!(?outcome, "dispatch finished");
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    // Command output owns stdout; diagnostics go to stderr.
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();
    Ok(())
}

fn load_config(ctx: &HostContext, override_path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match override_path {
        Some(path) => (path.to_path_buf(), true),
        None => (ctx.install_dir.join("valet.toml"), false),
    };
    if !path.exists() {
        if explicit {
            bail!("config file {} does not exist", path.display());
        }
        tracing::debug!(path = %path.display(), "no configuration file; using defaults");
        return Ok(Config::default());
    }
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let expanded = interpolate_env(&raw)?;
    let config = toml::from_str::<Config>(&expanded)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn interpolate_env(input: &str) -> Result<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let regex = RE.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)(?::([^}]+))?\}").unwrap());
    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let key = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(key).unwrap_or_else(|_| default.to_string())
    });
    Ok(result.into_owned())
}
