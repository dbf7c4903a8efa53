// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Typed host mutations and the executors that carry them out.
//!
//! A [`Step`] never goes through a shell: file contents travel on stdin and
//! every argument is passed as its own argv entry.

use crate::config::Elevation;
use crate::error::{Error, Result};
use crate::fs::path_to_str;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::{Arc, Mutex};

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Run with elevation. NSS databases live in the user's home and must not be touched as root.
    pub elevated: bool,
}

impl CommandSpec {
    pub fn elevated<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            elevated: true,
        }
    }

    pub fn user<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elevated: false,
            ..Self::elevated(program, args)
        }
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// One privileged host mutation.
#[derive(Clone, PartialEq, Eq)]
pub enum Step {
    WriteFile {
        path: PathBuf,
        contents: Vec<u8>,
        mode: u32,
    },
    CreateDir {
        path: PathBuf,
    },
    Chown {
        path: PathBuf,
        owner: String,
    },
    Symlink {
        target: PathBuf,
        link: PathBuf,
    },
    RemoveFile {
        path: PathBuf,
    },
    RemoveTree {
        path: PathBuf,
    },
    Run(CommandSpec),
}

impl Step {
    pub fn write(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>, mode: u32) -> Self {
        Step::WriteFile {
            path: path.into(),
            contents: contents.into(),
            mode,
        }
    }

    pub fn is_elevated(&self) -> bool {
        match self {
            Step::Run(cmd) => cmd.elevated,
            _ => true,
        }
    }

    /// Equivalent command line, used by the elevated executor and for display.
    pub fn argv(&self) -> Result<Vec<String>> {
        let s = |p: &Path| path_to_str(p).map(str::to_string);
        Ok(match self {
            Step::WriteFile { path, mode, .. } => vec![
                "install".into(),
                "-D".into(),
                "-m".into(),
                format!("{:04o}", mode),
                "/dev/stdin".into(),
                s(path)?,
            ],
            Step::CreateDir { path } => vec!["mkdir".into(), "-p".into(), s(path)?],
            Step::Chown { path, owner } => vec![
                "chown".into(),
                "-R".into(),
                format!("{}:{}", owner, owner),
                s(path)?,
            ],
            Step::Symlink { target, link } => {
                vec!["ln".into(), "-sfn".into(), s(target)?, s(link)?]
            }
            Step::RemoveFile { path } => vec!["rm".into(), "-f".into(), s(path)?],
            Step::RemoveTree { path } => vec!["rm".into(), "-rf".into(), s(path)?],
            Step::Run(cmd) => cmd.argv(),
        })
    }

    fn stdin(&self) -> Option<&[u8]> {
        match self {
            Step::WriteFile { contents, .. } => Some(contents),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::WriteFile { path, contents, mode } => write!(
                f,
                "write {} ({} bytes, mode {:04o})",
                path.display(),
                contents.len(),
                mode
            ),
            Step::CreateDir { path } => write!(f, "mkdir -p {}", path.display()),
            Step::Chown { path, owner } => {
                write!(f, "chown -R {}:{} {}", owner, owner, path.display())
            }
            Step::Symlink { target, link } => {
                write!(f, "ln -sfn {} {}", target.display(), link.display())
            }
            Step::RemoveFile { path } => write!(f, "rm -f {}", path.display()),
            Step::RemoveTree { path } => write!(f, "rm -rf {}", path.display()),
            Step::Run(cmd) => write!(f, "{}", cmd.argv().join(" ")),
        }
    }
}

// Contents can be a private key; keep it out of logs.
impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({})", self)
    }
}

/// Carries out steps against the host.
pub trait Executor {
    fn execute(&self, step: &Step) -> Result<()>;

    /// False for executors that only pretend; callers skip registry writes then.
    fn persists(&self) -> bool {
        true
    }
}

/// Build the executor a config asks for.
pub fn executor_for(elevation: Elevation) -> Box<dyn Executor> {
    match elevation {
        Elevation::None => Box::new(DirectExecutor),
        other => Box::new(ElevatedExecutor::new(other)),
    }
}

/// Runs every step as an external command behind `sudo` or `pkexec`.
pub struct ElevatedExecutor {
    elevation: Elevation,
}

impl ElevatedExecutor {
    pub fn new(elevation: Elevation) -> Self {
        Self { elevation }
    }

    fn prefix(&self) -> Option<&'static str> {
        match self.elevation {
            Elevation::Sudo => Some("sudo"),
            Elevation::Pkexec => Some("pkexec"),
            Elevation::None => None,
        }
    }
}

/// The user who ran `sudo site-manager`, when this process is root.
pub(crate) fn invoking_user() -> Option<String> {
    // SAFETY: geteuid has no preconditions and cannot fail
    if unsafe { libc::geteuid() } != 0 {
        return None;
    }
    std::env::var("SUDO_USER")
        .ok()
        .filter(|user| user != "root" && crate::config::is_valid_user_name(user))
}

/// Prefix a user-scoped command with `sudo -u <user>` so it runs as the
/// invoking user instead of root.
pub fn as_invoking_user(argv: Vec<String>, user: Option<&str>) -> Vec<String> {
    match user {
        Some(user) => ["sudo".to_string(), "-u".to_string(), user.to_string()]
            .into_iter()
            .chain(argv)
            .collect(),
        None => argv,
    }
}

impl Executor for ElevatedExecutor {
    fn execute(&self, step: &Step) -> Result<()> {
        let mut argv = step.argv()?;
        if step.is_elevated() {
            if let Some(prefix) = self.prefix() {
                argv.insert(0, prefix.to_string());
            }
        } else {
            argv = as_invoking_user(argv, invoking_user().as_deref());
        }
        tracing::info!(step = %step, "running privileged step");
        run_argv(&argv, step.stdin()).map(|_| ())
    }
}

/// Applies file steps in-process and runs commands directly. For callers that
/// already hold the needed privileges. User-scoped commands still run as
/// `SUDO_USER` when the process is root.
pub struct DirectExecutor;

impl Executor for DirectExecutor {
    fn execute(&self, step: &Step) -> Result<()> {
        tracing::info!(step = %step, "applying step");
        match step {
            Step::WriteFile {
                path,
                contents,
                mode,
            } => {
                if let Some(parent) = path.parent() {
                    create_dir_all(parent)?;
                }
                crate::fs::atomic_write_mode(path, contents, *mode)
            }
            Step::CreateDir { path } => create_dir_all(path),
            Step::Symlink { target, link } => {
                crate::fs::remove_if_exists(link)?;
                std::os::unix::fs::symlink(target, link).map_err(|e| Error::WriteFile {
                    path: link.clone(),
                    source: e,
                })
            }
            Step::RemoveFile { path } => crate::fs::remove_if_exists(path),
            Step::RemoveTree { path } => match std::fs::remove_dir_all(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Remove {
                    path: path.clone(),
                    source: e,
                }),
            },
            Step::Run(cmd) if !cmd.elevated => {
                run_argv(&as_invoking_user(cmd.argv(), invoking_user().as_deref()), None)
                    .map(|_| ())
            }
            Step::Chown { .. } | Step::Run(_) => run_argv(&step.argv()?, None).map(|_| ()),
        }
    }
}

fn create_dir_all(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::CreateDir {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Records steps instead of running them.
#[derive(Clone, Default)]
pub struct DryRunExecutor {
    planned: Arc<Mutex<Vec<String>>>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps seen so far, rendered as command lines.
    pub fn planned(&self) -> Vec<String> {
        self.planned
            .lock()
            .map(|steps| steps.clone())
            .unwrap_or_default()
    }
}

impl Executor for DryRunExecutor {
    fn execute(&self, step: &Step) -> Result<()> {
        tracing::debug!(step = %step, "dry run");
        if let Ok(mut planned) = self.planned.lock() {
            planned.push(step.to_string());
        }
        Ok(())
    }

    fn persists(&self) -> bool {
        false
    }
}

/// Run an argv to completion, feeding `stdin` if given. No timeout: a stalled
/// elevated command blocks the caller.
pub fn run_argv(argv: &[String], stdin: Option<&[u8]>) -> Result<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| Error::Command {
            command: String::new(),
            stderr: "empty command".into(),
        })?;
    let command_line = argv.join(" ");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CommandNotFound {
                    command: program.clone(),
                    hint: install_hint(program),
                }
            } else {
                Error::Command {
                    command: command_line.clone(),
                    stderr: e.to_string(),
                }
            }
        })?;

    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(data).map_err(|e| Error::Command {
            command: command_line.clone(),
            stderr: e.to_string(),
        })?;
        // pipe dropped here so the child sees EOF
    }

    let output = child.wait_with_output().map_err(|e| Error::Command {
        command: command_line.clone(),
        stderr: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_sudo_auth_failure(&stderr) {
            return Err(Error::SudoFailed);
        }
        return Err(Error::Command {
            command: command_line,
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(output)
}

/// Get installation hint for missing commands
fn install_hint(command: &str) -> String {
    match command {
        "sudo" => "Elevated steps use sudo. Install it, or set elevation = \"none\" when running as root."
            .to_string(),
        "pkexec" => "Install polkit, or set elevation = \"sudo\" in config.toml.".to_string(),
        "nginx" => "Install nginx: sudo apt install nginx".to_string(),
        "update-ca-certificates" => {
            "Install ca-certificates package: sudo apt install ca-certificates".to_string()
        }
        "update-ca-trust" => {
            "Install ca-certificates package: sudo dnf install ca-certificates".to_string()
        }
        "trust" => "Install p11-kit-trust package: sudo pacman -S p11-kit".to_string(),
        "certutil" => {
            "Install certutil for browser trust: sudo apt install libnss3-tools".to_string()
        }
        _ => format!("Please install the '{}' command", command),
    }
}

/// Check if sudo error indicates authentication failure
fn is_sudo_auth_failure(stderr: &str) -> bool {
    stderr.contains("sudo: no password was provided")
        || stderr.contains("sudo: a password is required")
        || stderr.contains("Sorry, try again")
        || stderr.contains("sudo: 3 incorrect password attempts")
        || stderr.contains("Authentication failure")
        || stderr.contains("Not authorized")
}
