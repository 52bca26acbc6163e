//! External processor invocation
//!
//! The processor is a black-box command given a target path. Exit code zero
//! is success; output is forwarded line by line into the daemon log. Runs
//! past the deadline are killed together with their process group.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::config::{MonitorConfig, INPUT_PLACEHOLDER};
use crate::error::{Error, Result};

/// Summary of a successful run
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub elapsed: Duration,
    /// Output lines forwarded to the log
    pub lines: usize,
}

/// Something that processes an input directory or file
#[async_trait]
pub trait Processor: Send + Sync {
    /// Run against `target`. `Ok` only when the run succeeded.
    async fn process(&self, target: &Path) -> Result<ProcessReport>;
}

/// Runs a configured command line as a child process
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    command: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandProcessor {
    /// Run `command` (with `{input}` placeholders) under `timeout`
    pub fn new(command: Vec<String>, working_dir: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            command,
            working_dir,
            timeout,
        }
    }

    /// Processor for the configured command, working dir and time limit
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(
            config.processor.command.clone(),
            config.processor.working_dir.clone(),
            config.processing_timeout(),
        )
    }

    /// Argument vector with the placeholder substituted
    fn argv(&self, target: &Path) -> Result<(String, Vec<String>)> {
        let target = target.to_string_lossy();
        let mut parts = self
            .command
            .iter()
            .map(|part| part.replace(INPUT_PLACEHOLDER, &target));
        let program = parts
            .next()
            .ok_or_else(|| Error::config("processor command is empty"))?;
        Ok((program, parts.collect()))
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    async fn process(&self, target: &Path) -> Result<ProcessReport> {
        let (program, args) = self.argv(target)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        // Own process group so a deadline kill reaches grandchildren too
        #[cfg(unix)]
        cmd.process_group(0);

        tracing::info!("Running processor: {} {}", program, args.join(" "));
        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::processor(format!("failed to start '{}': {}", program, e)))?;
        let pid = child.id();

        let stdout = child.stdout.take().map(|s| tokio::spawn(forward_lines(s, "stdout")));
        let stderr = child.stderr.take().map(|s| tokio::spawn(forward_lines(s, "stderr")));

        let deadline = tokio::time::sleep(self.timeout);
        let slow = tokio::time::sleep(self.timeout / 2);
        tokio::pin!(deadline);
        tokio::pin!(slow);
        let mut warned = false;

        let waited = loop {
            tokio::select! {
                status = child.wait() => break Some(status),
                _ = &mut slow, if !warned => {
                    warned = true;
                    tracing::warn!(
                        "Processor still running after {:.0}s (limit {}s)",
                        start.elapsed().as_secs_f64(),
                        self.timeout.as_secs()
                    );
                }
                _ = &mut deadline => break None,
            }
        };

        let status = match waited {
            Some(status) => status?,
            None => {
                tracing::error!(
                    "Processor exceeded {}s, terminating process group",
                    self.timeout.as_secs()
                );
                kill_process_group(pid);
                if let Err(e) = child.kill().await {
                    tracing::debug!("Kill after deadline: {}", e);
                }
                collect_lines(stdout, stderr).await;
                return Err(Error::Timeout {
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let lines = collect_lines(stdout, stderr).await;
        let elapsed = start.elapsed();

        if status.success() {
            Ok(ProcessReport { elapsed, lines })
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(Error::processor(format!("exit status {}", code)))
        }
    }
}

/// Log each output line until EOF. Bytes that are not UTF-8 are replaced,
/// never treated as the end of the stream.
async fn forward_lines<R>(reader: R, stream: &'static str) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                count += 1;
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end();
                if !line.is_empty() {
                    tracing::info!(stream, "processor: {}", line);
                }
            }
            Err(e) => {
                tracing::debug!("Processor {} closed: {}", stream, e);
                break;
            }
        }
    }
    count
}

async fn collect_lines(
    stdout: Option<tokio::task::JoinHandle<usize>>,
    stderr: Option<tokio::task::JoinHandle<usize>>,
) -> usize {
    let mut total = 0;
    for handle in [stdout, stderr].into_iter().flatten() {
        total += handle.await.unwrap_or(0);
    }
    total
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // SAFETY: killpg only sends a signal; the group id is the child we spawned
    // as group leader.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        tracing::debug!(
            "killpg({}) failed: {}",
            pid,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}
