use std::env;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};

use crate::update::UpdateKind;

/// Facts about the running host process that the update pipeline and plugin
/// discovery derive paths from.
#[derive(Debug, Clone)]
pub struct HostContext {
    /// Absolute path of the host executable.
    pub exe_path: PathBuf,
    /// Directory containing the executable. Updates of the host replace the
    /// contents of this directory.
    pub install_dir: PathBuf,
    /// Process id the deferred replacer waits on before copying.
    pub pid: u32,
    /// Base directory for staging downloaded archives and rendered scripts.
    pub temp_root: PathBuf,
}

impl HostContext {
    /// Captures the context of the current process.
    pub fn current() -> Result<Self> {
        let exe_path = env::current_exe().context("cannot resolve the host executable path")?;
        let install_dir = exe_path
            .parent()
            .context("host executable has no parent directory")?
            .to_path_buf();
        Ok(Self {
            exe_path,
            install_dir,
            pid: process::id(),
            temp_root: env::temp_dir(),
        })
    }

    /// File name of the host executable, used in help output.
    pub fn exe_name(&self) -> String {
        self.exe_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "valet".to_string())
    }

    fn exe_stem(&self) -> String {
        self.exe_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "valet".to_string())
    }

    /// Directory scanned for plugin libraries.
    pub fn plugin_root(&self, override_dir: Option<&Path>) -> PathBuf {
        match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.install_dir.join("systems"),
        }
    }

    /// Per-kind staging directory under the system temp root. Torn down and
    /// recreated at the start of every update run.
    pub fn staging_dir(&self, kind: UpdateKind) -> PathBuf {
        self.temp_root.join(self.exe_stem()).join(kind.to_string())
    }

    /// Live directory the replacer copies into once the host has exited.
    pub fn live_target(&self, kind: UpdateKind) -> PathBuf {
        match kind {
            UpdateKind::Host => self.install_dir.clone(),
            UpdateKind::Systems => self.install_dir.join("systems"),
        }
    }

    /// Log file the replacer appends progress lines to. Lives in the install
    /// directory so it survives the staging teardown of the next run.
    pub fn log_path(&self, kind: UpdateKind) -> PathBuf {
        self.install_dir.join(format!("update_{kind}.log"))
    }
}
