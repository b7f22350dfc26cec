use anyhow::Result;
use valet_plugin_sdk::Command;

use crate::config::UpdateConfig;
use crate::update::{UpdateKind, Updater};

/// Lists every registered command, one fixed-format line per name.
pub struct HelpCommand {
    exe_name: String,
    names: Vec<String>,
}

impl HelpCommand {
    pub const NAME: &'static str = "help";

    /// `names` is the complete registration-ordered name list, this command
    /// included; the registry snapshots it at discovery time.
    pub fn new(exe_name: String, names: Vec<String>) -> Self {
        Self { exe_name, names }
    }

    fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.names
            .iter()
            .map(|name| format!("Tool: {} {name}", self.exe_name))
    }
}

impl Command for HelpCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self, _args: &[String]) -> Result<()> {
        for line in self.lines() {
            println!("{line}");
        }
        Ok(())
    }
}

/// Parses each argument as an update kind and hands it to the updater.
///
/// Bad tokens and unconfigured kinds are reported and skipped; only a
/// failure of the update pipeline itself aborts the remaining tokens.
pub struct UpdateCommand {
    config: UpdateConfig,
    updater: Updater,
}

impl UpdateCommand {
    pub const NAME: &'static str = "update";

    pub fn new(config: UpdateConfig, updater: Updater) -> Self {
        Self { config, updater }
    }
}

impl Command for UpdateCommand {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self, args: &[String]) -> Result<()> {
        for token in args {
            let kind: UpdateKind = match token.parse() {
                Ok(kind) => kind,
                Err(_) => {
                    println!("Can not parse: {token}");
                    continue;
                }
            };
            let Some(url) = self.config.url_for(kind) else {
                println!("Can not Update {kind}, no URL provided.");
                continue;
            };
            self.updater.update(kind, url)?;
        }
        Ok(())
    }
}
