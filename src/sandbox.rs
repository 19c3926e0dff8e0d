//! Code Execution Sandbox
//!
//! Runs model-authored Python in a separate OS process. The active
//! table is materialized as `df.csv` inside a per-run temp directory,
//! the script runs with that directory as its working directory, and
//! the process is killed when the wall-clock timeout expires. The host
//! process never executes the code itself.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::TabulaConfig;
use crate::table::DataTable;
use crate::types::{CodeSandbox, SandboxOutput};

/// Lines prepended to every script: bind the table to `df`.
const SCRIPT_PRELUDE: &str = "import pandas as pd\ndf = pd.read_csv(\"df.csv\")\n";

pub struct SubprocessSandbox {
    python: String,
    timeout: Duration,
}

impl SubprocessSandbox {
    pub fn new(config: &TabulaConfig) -> Self {
        Self {
            python: config.sandbox_python.clone(),
            timeout: Duration::from_secs(config.sandbox_timeout_secs),
        }
    }
}

#[async_trait]
impl CodeSandbox for SubprocessSandbox {
    async fn run(&self, code: &str, table: &DataTable) -> Result<SandboxOutput> {
        let dir = tempfile::tempdir().context("failed to create sandbox directory")?;

        let csv = table
            .to_csv_string()
            .context("failed to serialize table for the sandbox")?;
        std::fs::write(dir.path().join("df.csv"), csv)
            .context("failed to write table into the sandbox")?;

        let script = format!("{SCRIPT_PRELUDE}{code}\n");
        std::fs::write(dir.path().join("script.py"), script)
            .context("failed to write script into the sandbox")?;

        debug!(dir = %dir.path().display(), "executing sandboxed script");

        let child = Command::new(&self.python)
            .arg("script.py")
            .current_dir(dir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.python))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "code execution exceeded the {}s time limit",
                    self.timeout.as_secs()
                )
            })?
            .context("failed to collect sandbox output")?;

        Ok(SandboxOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_binds_the_dataframe() {
        assert!(SCRIPT_PRELUDE.contains("df = pd.read_csv"));
    }
}
