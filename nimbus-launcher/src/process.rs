use async_trait::async_trait;
use nimbus_observability::cluster_log::LogWriter;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::debug;

/// One run of the automation tool against a playbook.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub playbook: PathBuf,
    /// Number of `v` in the verbosity flag; 0 omits it.
    pub verbosity: u8,
    /// JSON object passed as `--extra-vars`.
    pub extra_vars: String,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(playbook: impl Into<PathBuf>, verbosity: u8, extra_vars: String) -> Self {
        Self {
            playbook: playbook.into(),
            verbosity,
            extra_vars,
            env: Vec::new(),
        }
    }

    pub fn with_env<'a>(mut self, env: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.env
            .extend(env.into_iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if self.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(usize::from(self.verbosity))));
        }
        args.push(self.playbook.to_string_lossy().into_owned());
        args.push("--extra-vars".to_string());
        args.push(self.extra_vars.clone());
        args
    }
}

/// External automation tool.
///
/// `Ok(false)` means the tool ran and reported failure; `Err` means it could
/// not be run at all. Dropping the returned future terminates the process.
#[async_trait]
pub trait AutomationProcess: Send + Sync {
    async fn run(&self, invocation: &Invocation, sink: &mut LogWriter) -> std::io::Result<bool>;
}

/// `ansible-playbook` subprocess.
pub struct AnsiblePlaybook {
    command: String,
    ansible_config: PathBuf,
}

impl AnsiblePlaybook {
    pub fn new(command: impl Into<String>, ansible_config: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            ansible_config: ansible_config.into(),
        }
    }
}

#[async_trait]
impl AutomationProcess for AnsiblePlaybook {
    async fn run(&self, invocation: &Invocation, sink: &mut LogWriter) -> std::io::Result<bool> {
        debug!(
            command = %self.command,
            playbook = %invocation.playbook.display(),
            "Starting automation process"
        );
        let mut child = Command::new(&self.command)
            .args(invocation.args())
            .env("ANSIBLE_CONFIG", &self.ansible_config)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(std::io::Error::other("automation process output not captured"));
        };

        let mut out_buf = [0u8; 8192];
        let mut err_buf = [0u8; 8192];
        let (mut out_done, mut err_done) = (false, false);
        while !(out_done && err_done) {
            tokio::select! {
                n = stdout.read(&mut out_buf), if !out_done => {
                    match n? {
                        0 => out_done = true,
                        n => sink.write_all(&out_buf[..n]).await?,
                    }
                }
                n = stderr.read(&mut err_buf), if !err_done => {
                    match n? {
                        0 => err_done = true,
                        n => sink.write_all(&err_buf[..n]).await?,
                    }
                }
            }
        }
        sink.flush().await?;

        let status = child.wait().await?;
        debug!(status = %status, "Automation process exited");
        Ok(status.success())
    }
}
