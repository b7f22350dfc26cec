use crate::builtins::HelpCommand;
use crate::registry::CommandRegistry;

/// What a dispatch attempt resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A command matched and ran, successfully or not.
    Ran,
    /// The name matched nothing. Intentionally silent on stdout.
    Miss,
    /// No command name was given.
    NoCommand,
}

/// Routes `argv` to the first registered command whose name equals `argv[0]`
/// exactly. The command receives the remaining arguments in original order.
///
/// Failures never escape: a command error becomes console text and the
/// process exit code stays zero on every path.
pub fn dispatch(registry: &CommandRegistry, argv: &[String]) -> Outcome {
    let Some((name, args)) = argv.split_first() else {
        println!("Argument Mismatch");
        if let Some(help) = registry.find(HelpCommand::NAME) {
            // The listing only prints; nothing to surface on failure.
            let _ = help.run(&[]);
        }
        metrics::counter!("valet_dispatch_total", "outcome" => "mismatch").increment(1);
        return Outcome::NoCommand;
    };

    match registry.find(name) {
        Some(command) => {
            metrics::counter!("valet_dispatch_total", "outcome" => "hit").increment(1);
            if let Err(err) = command.run(args) {
                println!("{name} failed: {err:#}");
            }
            Outcome::Ran
        }
        None => {
            tracing::debug!(command = %name, "no registered command matched");
            metrics::counter!("valet_dispatch_total", "outcome" => "miss").increment(1);
            Outcome::Miss
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use valet_plugin_sdk::Command;

    use super::*;
    use crate::registry::CommandSource;

    struct Recording {
        name: &'static str,
        calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl Command for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn run(&self, args: &[String]) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(args.to_vec());
            Ok(())
        }
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    fn recording_registry(names: &[&'static str]) -> (CommandRegistry, Rc<RefCell<Vec<Vec<String>>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CommandRegistry::new();
        for name in names {
            registry.register(
                CommandSource::Builtin,
                Box::new(Recording {
                    name,
                    calls: Rc::clone(&calls),
                }),
            );
        }
        (registry, calls)
    }

    #[test]
    fn named_command_receives_the_tail_arguments() {
        let (registry, calls) = recording_registry(&["greet"]);

        let outcome = dispatch(&registry, &argv(&["greet", "-v", "world"]));

        assert_eq!(outcome, Outcome::Ran);
        assert_eq!(*calls.borrow(), vec![argv(&["-v", "world"])]);
    }

    #[test]
    fn matching_is_case_sensitive() {
        let (registry, calls) = recording_registry(&["greet"]);

        assert_eq!(dispatch(&registry, &argv(&["Greet"])), Outcome::Miss);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn unknown_name_is_a_silent_miss() {
        let (registry, calls) = recording_registry(&["greet"]);

        assert_eq!(dispatch(&registry, &argv(&["vanish"])), Outcome::Miss);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn empty_argv_reports_a_mismatch() {
        let (registry, calls) = recording_registry(&["greet"]);

        assert_eq!(dispatch(&registry, &[]), Outcome::NoCommand);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn failing_command_still_counts_as_ran() {
        struct Sour;

        impl Command for Sour {
            fn name(&self) -> &str {
                "sour"
            }

            fn run(&self, _args: &[String]) -> anyhow::Result<()> {
                anyhow::bail!("curdled")
            }
        }

        let mut registry = CommandRegistry::new();
        registry.register(CommandSource::Builtin, Box::new(Sour));

        assert_eq!(dispatch(&registry, &argv(&["sour"])), Outcome::Ran);
    }

    #[test]
    fn earlier_registration_shadows_later_duplicates() {
        let first_calls = Rc::new(RefCell::new(Vec::new()));
        let second_calls = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CommandRegistry::new();
        registry.register(
            CommandSource::Builtin,
            Box::new(Recording {
                name: "dup",
                calls: Rc::clone(&first_calls),
            }),
        );
        registry.register(
            CommandSource::Builtin,
            Box::new(Recording {
                name: "dup",
                calls: Rc::clone(&second_calls),
            }),
        );

        dispatch(&registry, &argv(&["dup"]));

        assert_eq!(first_calls.borrow().len(), 1);
        assert!(second_calls.borrow().is_empty());
    }
}
