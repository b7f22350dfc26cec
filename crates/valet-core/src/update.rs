use std::fmt;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use anyhow::bail;
use thiserror::Error;

use crate::context::HostContext;
use crate::fetch::Fetch;
use crate::replacer::ReplacePlan;

/// What an update run replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// The host's own install directory. Spelled `Self` on the command line.
    Host,
    /// The `systems/` plugin directory.
    Systems,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::Host => f.write_str("Self"),
            UpdateKind::Systems => f.write_str("Systems"),
        }
    }
}

impl FromStr for UpdateKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("self") {
            Ok(UpdateKind::Host)
        } else if s.eq_ignore_ascii_case("systems") {
            Ok(UpdateKind::Systems)
        } else {
            bail!("unrecognized update kind `{s}`")
        }
    }
}

/// Failures of the staging pipeline, in the order they can occur.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("download of {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("archive extraction failed: {0}")]
    Extract(#[from] zip::result::ZipError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stages an update and hands the live swap to a detached replacer.
///
/// All staging happens under the system temp directory; the live install is
/// only touched by the replacer after this process has exited.
pub struct Updater {
    ctx: HostContext,
    fetcher: Box<dyn Fetch>,
    poll_interval: Duration,
}

impl Updater {
    pub fn new(ctx: HostContext, fetcher: Box<dyn Fetch>, poll_interval: Duration) -> Self {
        Self {
            ctx,
            fetcher,
            poll_interval,
        }
    }

    /// Downloads and extracts the archive for `kind` into a clean staging
    /// directory and writes the replacer script beside it. Nothing under the
    /// live install directory is modified.
    pub fn prepare(&self, kind: UpdateKind, url: &str) -> Result<ReplacePlan, UpdateError> {
        if url.is_empty() {
            return Err(UpdateError::Config(format!("no URL configured for {kind}")));
        }

        let staging = self.ctx.staging_dir(kind);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        let extract_dir = staging.join("update");
        fs::create_dir_all(&extract_dir)?;

        let archive = staging.join("update.zip");
        self.fetcher
            .fetch(url, &archive)
            .map_err(|err| UpdateError::Network {
                url: url.to_string(),
                reason: format!("{err:#}"),
            })?;

        let file = fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        zip.extract(&extract_dir)?;
        // The archive handle must be closed before the file is removed.
        drop(zip);
        fs::remove_file(&archive)?;

        let plan = ReplacePlan {
            watched_pid: self.ctx.pid,
            source: extract_dir,
            target: self.ctx.live_target(kind),
            log_path: self.ctx.log_path(kind),
            script_path: staging.join(script_name()),
            poll_interval: self.poll_interval,
        };
        fs::write(&plan.script_path, plan.render_script())?;
        Ok(plan)
    }

    /// Runs the full pipeline for `kind` and launches the detached replacer.
    /// Returns as soon as the replacer is spawned; the swap itself happens
    /// after this process exits.
    pub fn update(&self, kind: UpdateKind, url: &str) -> Result<ReplacePlan, UpdateError> {
        let plan = self.prepare(kind, url)?;
        launch_detached(&plan.script_path)?;
        tracing::info!(
            kind = %kind,
            script = %plan.script_path.display(),
            "deferred replace launched"
        );
        metrics::counter!("valet_updates_total", "kind" => kind.to_string()).increment(1);
        Ok(plan)
    }
}

fn script_name() -> &'static str {
    if cfg!(windows) {
        "update.bat"
    } else {
        "update.sh"
    }
}

#[cfg(unix)]
fn launch_detached(script: &std::path::Path) -> std::io::Result<()> {
    use std::process::{Command, Stdio};

    // The child is deliberately not waited on; the replacer outlives this
    // process.
    Command::new("sh")
        .arg(script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

#[cfg(windows)]
fn launch_detached(script: &std::path::Path) -> std::io::Result<()> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};

    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    Command::new("cmd")
        .arg("/C")
        .arg(script)
        .creation_flags(CREATE_NO_WINDOW)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

// Keeps builds honest on targets without a replacer shell.
#[cfg(not(any(unix, windows)))]
fn launch_detached(_script: &std::path::Path) -> std::io::Result<()> {
    Err(std::io::Error::other("no detached shell on this platform"))
}
