//! Contract crate for external command plugins.
//!
//! A plugin is a `cdylib` dropped into the host's `systems/` directory. It
//! exports exactly one well-known symbol, a [`PluginDeclaration`] static
//! produced by [`export_commands!`]; the host loads the library, checks the
//! declaration's version pair against its own, and calls `register` to
//! collect boxed [`Command`] values.
//!
//! Trait objects cross the library boundary with the plain Rust ABI, so a
//! plugin is only loadable when it was built by the same toolchain against a
//! caret-compatible SDK. The declaration carries both versions for the host
//! to enforce that before any command is constructed.

/// A named sub-command the host can dispatch to.
pub trait Command {
    /// Stable, case-sensitive name the dispatcher matches against.
    fn name(&self) -> &str;

    /// Entry point; receives the argument vector with the command name
    /// already stripped, in original order.
    fn run(&self, args: &[String]) -> anyhow::Result<()>;
}

/// Collects the commands a plugin's `register` hook hands over.
pub trait CommandRegistrar {
    fn register(&mut self, command: Box<dyn Command>);
}

/// Entry record every plugin exports under [`DECLARATION_SYMBOL`].
#[derive(Copy, Clone)]
pub struct PluginDeclaration {
    /// Toolchain the plugin was built with; must match the host exactly.
    pub rustc_version: &'static str,
    /// SDK version the plugin was built against; the host accepts
    /// caret-compatible values.
    pub sdk_version: &'static str,
    /// Registers every command the plugin provides.
    pub register: fn(&mut dyn CommandRegistrar),
}

/// Toolchain that compiled this SDK build.
pub static RUSTC_VERSION: &str = env!("VALET_RUSTC_VERSION");

/// Version of this SDK crate.
pub static SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Symbol name the host looks up in every loadable unit.
pub const DECLARATION_SYMBOL: &[u8] = b"valet_declaration";

/// Exports a plugin's [`PluginDeclaration`] under the well-known symbol.
///
/// The argument is a function with the signature
/// `fn(&mut dyn CommandRegistrar)` that registers every command the plugin
/// provides.
///
/// ```
/// use valet_plugin_sdk::{Command, CommandRegistrar};
///
/// struct Shout;
///
/// impl Command for Shout {
///     fn name(&self) -> &str {
///         "shout"
///     }
///
///     fn run(&self, args: &[String]) -> anyhow::Result<()> {
///         println!("{}", args.join(" ").to_uppercase());
///         Ok(())
///     }
/// }
///
/// fn register(registrar: &mut dyn CommandRegistrar) {
///     registrar.register(Box::new(Shout));
/// }
///
/// valet_plugin_sdk::export_commands!(register);
/// # fn main() {}
/// ```
#[macro_export]
macro_rules! export_commands {
    ($register:path) => {
        #[doc(hidden)]
        #[allow(non_upper_case_globals)]
        #[no_mangle]
        pub static valet_declaration: $crate::PluginDeclaration = $crate::PluginDeclaration {
            rustc_version: $crate::RUSTC_VERSION,
            sdk_version: $crate::SDK_VERSION,
            register: $register,
        };
    };
}
