//! Deferred replacement of a live directory once the watched process exits.
//!
//! The host stages files and renders a shell script; the script runs as a
//! detached process and performs the swap. The same protocol is implemented
//! in-process by [`Replacer`] so the phase transitions and the copy are
//! testable without spawning anything.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

const UPDATING_LINE: &str = "Updating";
const COMPLETE_LINE: &str = "Update Complete.";

fn waiting_line(pid: u32) -> String {
    format!("Waiting for Process {pid} to Close for Automatic Update")
}

/// Everything the replacer needs, captured before the host exits.
#[derive(Debug, Clone)]
pub struct ReplacePlan {
    /// Process id whose exit releases the copy. If the OS recycles the id
    /// between host exit and the next poll the wait lasts one stranger's
    /// lifetime longer; accepted, bounded by `poll_interval`.
    pub watched_pid: u32,
    /// Extracted tree to copy from.
    pub source: PathBuf,
    /// Live directory to copy into. May not exist yet; may hold unrelated
    /// files that are preserved.
    pub target: PathBuf,
    /// Progress log, appended to across process boundaries.
    pub log_path: PathBuf,
    /// Where the rendered script lives; the script deletes it as its last act.
    pub script_path: PathBuf,
    /// Delay between liveness polls.
    pub poll_interval: Duration,
}

impl ReplacePlan {
    /// Renders the replacer script for the current platform.
    pub fn render_script(&self) -> String {
        if cfg!(windows) {
            self.render_batch()
        } else {
            self.render_sh()
        }
    }

    pub fn render_sh(&self) -> String {
        let pid = self.watched_pid;
        let interval = self.poll_interval.as_secs();
        let source = self.source.display();
        let target = self.target.display();
        let log = self.log_path.display();
        let script = self.script_path.display();
        let lines = [
            "#!/bin/sh".to_string(),
            format!(r#"echo "{}" >> "{log}""#, waiting_line(pid)),
            format!("while kill -0 {pid} 2>/dev/null; do"),
            format!("    sleep {interval}"),
            "done".to_string(),
            format!(r#"echo "{UPDATING_LINE}" >> "{log}""#),
            format!(r#"mkdir -p "{target}""#),
            format!(r#"cp -Rv "{source}/." "{target}" >> "{log}" 2>&1"#),
            format!(r#"echo "{COMPLETE_LINE}" >> "{log}""#),
            "sleep 1".to_string(),
            format!(r#"rm -f "{script}""#),
        ];
        let mut rendered = lines.join("\n");
        rendered.push('\n');
        rendered
    }

    pub fn render_batch(&self) -> String {
        let pid = self.watched_pid;
        let interval = self.poll_interval.as_secs();
        let source = self.source.display();
        let target = self.target.display();
        let log = self.log_path.display();
        let script = self.script_path.display();
        let lines = [
            "@ECHO OFF".to_string(),
            format!(r#"ECHO {} >> "{log}""#, waiting_line(pid)),
            ":LOOP".to_string(),
            format!(r#"tasklist /FI "PID eq {pid}" | find "{pid}" >nul 2>&1"#),
            "IF ERRORLEVEL 1 (".to_string(),
            "    GOTO CONTINUE".to_string(),
            ") ELSE (".to_string(),
            format!("    Timeout /T {interval} /Nobreak"),
            "    GOTO LOOP".to_string(),
            ")".to_string(),
            ":CONTINUE".to_string(),
            format!(r#"ECHO {UPDATING_LINE} >> "{log}""#),
            format!(r#"xcopy "{source}" "{target}" /e /f /y /i >> "{log}""#),
            format!(r#"ECHO {COMPLETE_LINE} >> "{log}""#),
            "ping localhost -n 2 > NUL".to_string(),
            format!(r#"DEL "{script}""#),
        ];
        let mut rendered = lines.join("\r\n");
        rendered.push_str("\r\n");
        rendered
    }
}

/// Where a replacement run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Waiting,
    Copying,
    Done,
}

/// In-process rendition of the replacement protocol.
pub struct Replacer {
    plan: ReplacePlan,
    phase: Phase,
}

impl Replacer {
    pub fn new(plan: ReplacePlan) -> Self {
        Self {
            plan,
            phase: Phase::Waiting,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advances the machine by one poll tick. The Waiting phase ends the
    /// instant the watched process is reported gone; the subsequent Copying
    /// step performs the swap and brackets it with log lines.
    pub fn step(&mut self, watched_alive: bool) -> Result<Phase> {
        match self.phase {
            Phase::Waiting if watched_alive => {}
            Phase::Waiting => self.phase = Phase::Copying,
            Phase::Copying => {
                append_log(&self.plan.log_path, UPDATING_LINE)?;
                copy_tree(&self.plan.source, &self.plan.target)?;
                append_log(&self.plan.log_path, COMPLETE_LINE)?;
                if self.plan.script_path.exists() {
                    fs::remove_file(&self.plan.script_path)
                        .with_context(|| format!("removing {}", self.plan.script_path.display()))?;
                }
                self.phase = Phase::Done;
            }
            Phase::Done => {}
        }
        Ok(self.phase)
    }

    /// Drives the machine to completion. `probe` reports liveness of the
    /// watched pid, `sleep` paces the polls; both are injected so the loop is
    /// testable without real processes or delays.
    pub fn run(&mut self, probe: &dyn Fn(u32) -> bool, sleep: &dyn Fn(Duration)) -> Result<()> {
        append_log(&self.plan.log_path, &waiting_line(self.plan.watched_pid))?;
        while self.phase != Phase::Done {
            let alive = self.phase == Phase::Waiting && probe(self.plan.watched_pid);
            if self.step(alive)? == Phase::Waiting {
                sleep(self.plan.poll_interval);
            }
        }
        Ok(())
    }
}

/// Asks the OS process table whether `pid` is still running.
#[cfg(unix)]
pub fn process_alive(pid: u32) -> Result<bool> {
    use std::process::{Command, Stdio};

    let status = Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("running kill -0")?;
    Ok(status.success())
}

#[cfg(windows)]
pub fn process_alive(pid: u32) -> Result<bool> {
    use std::process::{Command, Stdio};

    let output = Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
        .stderr(Stdio::null())
        .output()
        .context("running tasklist")?;
    let listing = String::from_utf8_lossy(&output.stdout);
    Ok(listing.contains(&format!(",\"{pid}\"")))
}

#[cfg(not(any(unix, windows)))]
pub fn process_alive(_pid: u32) -> Result<bool> {
    Ok(false)
}

/// Recursively copies `src` into `dst`, overwriting existing files and
/// leaving unrelated ones alone. Each file lands via a staged sibling plus
/// rename so no destination path is ever observed half-written.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("creating {}", dst.display()))?;
    let entries = fs::read_dir(src).with_context(|| format!("reading {}", src.display()))?;
    for entry in entries {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            let staged = dst.join(format!("{}.update-tmp", entry.file_name().to_string_lossy()));
            fs::copy(&from, &staged)
                .with_context(|| format!("copying {}", from.display()))?;
            fs::rename(&staged, &to)
                .with_context(|| format!("renaming into {}", to.display()))?;
        }
    }
    Ok(())
}

fn append_log(path: &Path, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    writeln!(file, "{line}").context("appending log line")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn plan_in(root: &Path) -> ReplacePlan {
        let source = root.join("staging").join("update");
        fs::create_dir_all(&source).unwrap();
        ReplacePlan {
            watched_pid: 7001,
            source,
            target: root.join("live"),
            log_path: root.join("update_Self.log"),
            script_path: root.join("staging").join("update.sh"),
            poll_interval: Duration::from_secs(3),
        }
    }

    fn stage_sample(plan: &ReplacePlan) {
        fs::write(plan.source.join("a.txt"), "alpha").unwrap();
        fs::create_dir_all(plan.source.join("sub")).unwrap();
        fs::write(plan.source.join("sub").join("b.txt"), "beta").unwrap();
    }

    fn log_lines(plan: &ReplacePlan) -> Vec<String> {
        fs::read_to_string(&plan.log_path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn sh_script_walks_the_protocol_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_in(dir.path());
        let script = plan.render_sh();

        let waiting = script.find(&waiting_line(7001)).unwrap();
        let poll = script.find("while kill -0 7001").unwrap();
        let copy = script.find("cp -Rv").unwrap();
        let complete = script.find(COMPLETE_LINE).unwrap();
        let cleanup = script.find("rm -f").unwrap();
        assert!(waiting < poll && poll < copy && copy < complete && complete < cleanup);
        assert!(script.contains("sleep 3"));
        assert!(script.contains(&plan.target.display().to_string()));
    }

    #[test]
    fn batch_script_mirrors_the_sh_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_in(dir.path());
        let script = plan.render_batch();

        assert!(script.contains(r#"tasklist /FI "PID eq 7001""#));
        assert!(script.contains("Timeout /T 3 /Nobreak"));
        assert!(script.contains("/e /f /y /i"));
        assert!(script.contains(&waiting_line(7001)));
        assert!(script.contains(COMPLETE_LINE));
        assert!(script.contains("DEL"));
    }

    #[test]
    fn live_pid_holds_the_waiting_phase() {
        let dir = tempfile::tempdir().unwrap();
        let mut replacer = Replacer::new(plan_in(dir.path()));

        assert_eq!(replacer.step(true).unwrap(), Phase::Waiting);
        assert_eq!(replacer.step(true).unwrap(), Phase::Waiting);
    }

    #[test]
    fn absent_pid_advances_on_the_first_poll() {
        let dir = tempfile::tempdir().unwrap();
        let mut replacer = Replacer::new(plan_in(dir.path()));

        assert_eq!(replacer.step(false).unwrap(), Phase::Copying);
    }

    #[test]
    fn copying_step_swaps_files_and_brackets_the_log() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_in(dir.path());
        stage_sample(&plan);
        fs::write(&plan.script_path, plan.render_script()).unwrap();

        let mut replacer = Replacer::new(plan.clone());
        replacer.step(false).unwrap();
        assert_eq!(replacer.step(false).unwrap(), Phase::Done);

        assert_eq!(fs::read_to_string(plan.target.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(plan.target.join("sub").join("b.txt")).unwrap(),
            "beta"
        );
        assert_eq!(log_lines(&plan), vec![UPDATING_LINE, COMPLETE_LINE]);
        assert!(!plan.script_path.exists());
    }

    #[test]
    fn run_skips_sleeping_when_the_pid_is_already_gone() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_in(dir.path());
        stage_sample(&plan);

        let sleeps = Cell::new(0u32);
        let mut replacer = Replacer::new(plan.clone());
        replacer
            .run(&|_| false, &|_| sleeps.set(sleeps.get() + 1))
            .unwrap();

        assert_eq!(sleeps.get(), 0);
        assert_eq!(replacer.phase(), Phase::Done);
        assert_eq!(
            log_lines(&plan),
            vec![waiting_line(7001), UPDATING_LINE.to_string(), COMPLETE_LINE.to_string()]
        );
    }

    #[test]
    fn run_polls_until_the_process_exits() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_in(dir.path());
        stage_sample(&plan);

        let remaining = Cell::new(3u32);
        let sleeps = Cell::new(0u32);
        let mut replacer = Replacer::new(plan);
        replacer
            .run(
                &|_| {
                    if remaining.get() > 0 {
                        remaining.set(remaining.get() - 1);
                        true
                    } else {
                        false
                    }
                },
                &|_| sleeps.set(sleeps.get() + 1),
            )
            .unwrap();

        assert_eq!(sleeps.get(), 3);
        assert_eq!(replacer.phase(), Phase::Done);
    }

    #[test]
    fn copy_overwrites_stale_files_and_keeps_unrelated_ones() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan_in(dir.path());
        stage_sample(&plan);
        fs::create_dir_all(&plan.target).unwrap();
        fs::write(plan.target.join("a.txt"), "stale").unwrap();
        fs::write(plan.target.join("config.toml"), "keep me").unwrap();

        let mut replacer = Replacer::new(plan.clone());
        replacer.run(&|_| false, &|_| {}).unwrap();

        assert_eq!(fs::read_to_string(plan.target.join("a.txt")).unwrap(), "alpha");
        assert_eq!(
            fs::read_to_string(plan.target.join("config.toml")).unwrap(),
            "keep me"
        );
    }

    #[cfg(unix)]
    #[test]
    fn probe_distinguishes_live_from_reaped_processes() {
        assert!(process_alive(std::process::id()).unwrap());

        let mut child = std::process::Command::new("/bin/true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn run_with_the_real_probe_finishes_once_the_child_dies() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan_in(dir.path());
        stage_sample(&plan);

        let mut child = std::process::Command::new("/bin/true").spawn().unwrap();
        plan.watched_pid = child.id();
        child.wait().unwrap();

        let mut replacer = Replacer::new(plan.clone());
        replacer
            .run(&|pid| process_alive(pid).unwrap_or(true), &|_| {})
            .unwrap();

        assert_eq!(replacer.phase(), Phase::Done);
        assert!(plan.target.join("a.txt").exists());
    }
}
