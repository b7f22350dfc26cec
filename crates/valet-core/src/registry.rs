use std::env::consts::DLL_EXTENSION;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use libloading::Library;
use semver::{Version, VersionReq};
use valet_plugin_sdk::{
    Command, CommandRegistrar, PluginDeclaration, DECLARATION_SYMBOL, RUSTC_VERSION, SDK_VERSION,
};

use crate::builtins::{HelpCommand, UpdateCommand};
use crate::config::Config;
use crate::context::HostContext;
use crate::fetch::Fetch;
use crate::update::Updater;

/// Where a registered command came from; named in collision warnings.
#[derive(Debug, Clone)]
pub enum CommandSource {
    Builtin,
    Plugin(PathBuf),
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandSource::Builtin => f.write_str("built-in"),
            CommandSource::Plugin(path) => write!(f, "{}", path.display()),
        }
    }
}

struct Registered {
    command: Box<dyn Command>,
    source: CommandSource,
}

/// All commands known to the host for one invocation, built-ins and plugins
/// alike, in registration order.
pub struct CommandRegistry {
    // Commands must drop before the libraries whose code backs them.
    commands: Vec<Registered>,
    libraries: Vec<Library>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            libraries: Vec::new(),
        }
    }

    /// Scans the plugin root and assembles the full registry: Help, Update,
    /// then every plugin command in enumeration order. A unit that fails to
    /// load is reported and skipped; it never aborts discovery.
    pub fn discover(ctx: &HostContext, config: &Config, fetcher: Box<dyn Fetch>) -> Result<Self> {
        let root = ctx.plugin_root(config.plugins.dir.as_deref());
        let mut libraries = Vec::new();
        let mut plugin_commands: Vec<(PathBuf, Box<dyn Command>)> = Vec::new();

        if root.is_dir() {
            let mut units = Vec::new();
            collect_units(&root, &mut units)?;
            for unit in units {
                match load_unit(&unit) {
                    Ok((library, commands)) => {
                        libraries.push(library);
                        for command in commands {
                            plugin_commands.push((unit.clone(), command));
                        }
                        metrics::counter!("valet_plugin_loads_total", "outcome" => "ok")
                            .increment(1);
                    }
                    Err(err) => {
                        println!("Loading {} failed.", unit.display());
                        tracing::warn!(unit = %unit.display(), error = %err, "plugin load failed");
                        metrics::counter!("valet_plugin_loads_total", "outcome" => "error")
                            .increment(1);
                    }
                }
            }
        } else {
            fs::create_dir_all(&root)
                .with_context(|| format!("creating plugin root {}", root.display()))?;
            tracing::debug!(root = %root.display(), "created empty plugin root");
        }

        let mut names = vec![HelpCommand::NAME.to_string(), UpdateCommand::NAME.to_string()];
        names.extend(
            plugin_commands
                .iter()
                .map(|(_, command)| command.name().to_string()),
        );

        let updater = Updater::new(
            ctx.clone(),
            fetcher,
            Duration::from_secs(config.update.poll_interval_secs),
        );

        let mut registry = Self {
            commands: Vec::new(),
            libraries,
        };
        registry.register(
            CommandSource::Builtin,
            Box::new(HelpCommand::new(ctx.exe_name(), names)),
        );
        registry.register(
            CommandSource::Builtin,
            Box::new(UpdateCommand::new(config.update.clone(), updater)),
        );
        for (unit, command) in plugin_commands {
            registry.register(CommandSource::Plugin(unit), command);
        }
        Ok(registry)
    }

    /// Appends a command. Collisions are kept; the earlier registration wins
    /// at dispatch time, so a duplicate only earns a warning here.
    pub fn register(&mut self, source: CommandSource, command: Box<dyn Command>) {
        if let Some(existing) = self
            .commands
            .iter()
            .find(|entry| entry.command.name() == command.name())
        {
            tracing::warn!(
                command = command.name(),
                winner = %existing.source,
                shadowed = %source,
                "duplicate command name; the earlier registration wins"
            );
        }
        self.commands.push(Registered { command, source });
    }

    /// First registered command with exactly this name.
    pub fn find(&self, name: &str) -> Option<&dyn Command> {
        self.commands
            .iter()
            .find(|entry| entry.command.name() == name)
            .map(|entry| entry.command.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands
            .iter()
            .map(|entry| entry.command.name())
            .collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_units(dir: &Path, units: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_units(&path, units)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some(DLL_EXTENSION) {
            units.push(path);
        }
    }
    Ok(())
}

fn load_unit(path: &Path) -> Result<(Library, Vec<Box<dyn Command>>)> {
    // SAFETY: opening a library runs its initializers, and the declaration
    // layout is only guaranteed for plugins built by the same toolchain. The
    // version pair inside the declaration is checked before anything else of
    // the plugin runs.
    let library =
        unsafe { Library::new(path) }.with_context(|| format!("opening {}", path.display()))?;
    let declaration = unsafe {
        library
            .get::<*mut PluginDeclaration>(DECLARATION_SYMBOL)
            .context("declaration symbol missing")?
            .read()
    };

    if declaration.rustc_version != RUSTC_VERSION {
        bail!(
            "built with rustc {}, host uses {}",
            declaration.rustc_version,
            RUSTC_VERSION
        );
    }
    let built_against = Version::parse(declaration.sdk_version)
        .with_context(|| format!("plugin sdk version `{}`", declaration.sdk_version))?;
    let accepted = VersionReq::parse(&format!("^{SDK_VERSION}"))
        .context("host sdk version is not valid semver")?;
    if !accepted.matches(&built_against) {
        bail!(
            "built against sdk {}, host requires ^{}",
            declaration.sdk_version,
            SDK_VERSION
        );
    }

    let mut collected = Collect::default();
    (declaration.register)(&mut collected);
    Ok((library, collected.commands))
}

#[derive(Default)]
struct Collect {
    commands: Vec<Box<dyn Command>>,
}

impl CommandRegistrar for Collect {
    fn register(&mut self, command: Box<dyn Command>) {
        self.commands.push(command);
    }
}
