//! Subprocess seam for database clients and the bench CLI.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::fs::File;
use tokio::process::Command;
use tracing::debug;

use crate::error::BoxError;

/// One invocation of an external client.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCommand {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Kept out of `args` so they never show up in process listings or logs.
    pub env: Vec<(String, String)>,
    /// File piped to the client's stdin.
    pub stdin: Option<PathBuf>,
}

impl ClientCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: Vec::new(),
            stdin: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// The statement passed with `-e` / `-c`, if any.
    pub fn statement(&self) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == "-e" || a == "-c")
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Debug for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ClientCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("current_dir", &self.current_dir)
            .field("env", &env_keys)
            .field("stdin", &self.stdin)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{program} exited with {code:?}: {stderr}")]
pub struct CommandFailed {
    pub program: String,
    pub code: Option<i32>,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ClientCommand) -> Result<(), BoxError>;
}

/// Runs commands as child processes and waits for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &ClientCommand) -> Result<(), BoxError> {
        debug!("Running {} {:?}", command.program, command.args);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &command.current_dir {
            cmd.current_dir(dir);
        }

        match &command.stdin {
            Some(path) => {
                let file = File::open(path).await?.into_std().await;
                cmd.stdin(Stdio::from(file));
            }
            None => {
                cmd.stdin(Stdio::null());
            }
        }

        let output = cmd.output().await?;
        if !output.status.success() {
            return Err(Box::new(CommandFailed {
                program: command.program.clone(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }));
        }
        Ok(())
    }
}
