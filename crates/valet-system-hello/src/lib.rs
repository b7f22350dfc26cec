//! Sample plugin. Build it and drop the resulting library into the host's
//! `systems/` directory to get a `hello` command:
//!
//! ```text
//! cargo build -p valet-system-hello
//! cp target/debug/libvalet_system_hello.so <install dir>/systems/
//! valet hello world
//! ```

use valet_plugin_sdk::{Command, CommandRegistrar};

struct HelloCommand;

impl Command for HelloCommand {
    fn name(&self) -> &str {
        "hello"
    }

    fn run(&self, args: &[String]) -> anyhow::Result<()> {
        if args.is_empty() {
            println!("Hello!");
        } else {
            println!("Hello, {}!", args.join(" "));
        }
        Ok(())
    }
}

fn register(registrar: &mut dyn CommandRegistrar) {
    registrar.register(Box::new(HelloCommand));
}

valet_plugin_sdk::export_commands!(register);
