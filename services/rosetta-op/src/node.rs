//! Embedded node process
//!
//! Runs the node binary as a child process for as long as the scope is live.
//! Output is forwarded to the log line by line. Cancellation kills the child
//! and counts as a clean exit; the child exiting on its own is an error.

use log::{info, warn};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time;

use rosetta_op_runtime::CancellationScope;
use rosetta_op_types::Configuration;

const LOG_PREFIX: &str = "[geth]";

/// How long to keep draining output after the child is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("unable to start {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to wait for {binary}: {source}")]
    Wait {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("embedded node exited unexpectedly: {status}")]
    Exited { status: ExitStatus },
}

#[derive(Debug, Clone)]
pub struct NodeLauncher {
    binary: String,
    arguments: Vec<String>,
}

impl NodeLauncher {
    pub fn new(binary: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            arguments,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(config.geth_binary.clone(), config.geth_arguments.clone())
    }

    /// Runs the node until it exits or `scope` is cancelled.
    pub async fn run(self, scope: CancellationScope) -> Result<(), NodeError> {
        info!("Starting {} {}", self.binary, self.arguments.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| NodeError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let mut forwarders = JoinSet::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.spawn(forward_lines(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.spawn(forward_lines(stderr));
        }

        let result = tokio::select! {
            status = child.wait() => match status {
                Ok(status) => Err(NodeError::Exited { status }),
                Err(source) => Err(NodeError::Wait {
                    binary: self.binary.clone(),
                    source,
                }),
            },
            _ = scope.cancelled() => {
                info!("Stopping embedded node");
                if let Err(e) = child.kill().await {
                    warn!("Unable to kill embedded node: {}", e);
                }
                Ok(())
            }
        };

        // Forwarders end on EOF; anything left after the timeout is aborted on drop
        let _ = time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            while forwarders.join_next().await.is_some() {}
        })
        .await;

        result
    }
}

async fn forward_lines<R>(reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => info!("{} {}", LOG_PREFIX, line),
            Ok(None) => break,
            Err(e) => {
                warn!("{} unable to read output: {}", LOG_PREFIX, e);
                break;
            }
        }
    }
}
