use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Downloads an archive to a local path.
///
/// The update pipeline only depends on this trait so tests can substitute a
/// fetcher that serves bytes from memory.
pub trait Fetch {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Blocking HTTP(S) fetcher used by the real host.
#[derive(Debug, Default)]
pub struct HttpFetcher;

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let response = reqwest::blocking::get(url).with_context(|| format!("GET {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        let body = response
            .bytes()
            .with_context(|| format!("reading body of {url}"))?;
        fs::write(dest, &body).with_context(|| format!("writing {}", dest.display()))?;
        Ok(())
    }
}
