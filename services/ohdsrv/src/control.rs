//! Administrative command channel
//!
//! Commands reach the reactor through an [`AdminHandle`]. They run on the
//! reactor's own turn, so they never interleave with a poll or a request.
//! The same commands can be exposed on a Unix socket, one command per line:
//!
//! ```text
//! event <n>   record an event on device n
//! fail <n>    toggle device n between Failed and Active
//! reload      re-read the device configuration
//! dump        log the current configuration
//! ```
//!
//! Each line is answered with `ok` or `error: <reason>`.

use std::fmt;
use std::str::FromStr;

use tokio::sync::{mpsc, oneshot};

use crate::error::{OhdSrvError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    SimulateEvent { device: usize },
    ToggleFail { device: usize },
    Reload,
    DumpState,
}

impl FromStr for AdminCommand {
    type Err = OhdSrvError;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| OhdSrvError::admin("empty command"))?
            .to_ascii_lowercase();
        let device = |arg: Option<&str>| -> Result<usize> {
            let arg = arg.ok_or_else(|| OhdSrvError::admin(format!("{verb} needs a device index")))?;
            arg.parse()
                .map_err(|_| OhdSrvError::admin(format!("bad device index {arg:?}")))
        };

        let command = match verb.as_str() {
            "event" => AdminCommand::SimulateEvent {
                device: device(words.next())?,
            },
            "fail" => AdminCommand::ToggleFail {
                device: device(words.next())?,
            },
            "reload" => AdminCommand::Reload,
            "dump" => AdminCommand::DumpState,
            other => return Err(OhdSrvError::admin(format!("unknown command {other:?}"))),
        };

        if let Some(extra) = words.next() {
            return Err(OhdSrvError::admin(format!("unexpected argument {extra:?}")));
        }
        Ok(command)
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminCommand::SimulateEvent { device } => write!(f, "event {device}"),
            AdminCommand::ToggleFail { device } => write!(f, "fail {device}"),
            AdminCommand::Reload => f.write_str("reload"),
            AdminCommand::DumpState => f.write_str("dump"),
        }
    }
}

/// A queued command plus where to send its outcome
#[derive(Debug)]
pub struct AdminRequest {
    pub command: AdminCommand,
    pub reply: oneshot::Sender<Result<()>>,
}

/// Sender side of the command channel
#[derive(Debug, Clone)]
pub struct AdminHandle {
    tx: mpsc::UnboundedSender<AdminRequest>,
}

impl AdminHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AdminRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Run a command and wait for its outcome
    pub async fn execute(&self, command: AdminCommand) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(AdminRequest { command, reply })
            .map_err(|_| OhdSrvError::admin("reactor is not running"))?;
        outcome
            .await
            .map_err(|_| OhdSrvError::admin("reactor stopped before replying"))?
    }
}

#[cfg(unix)]
pub use unix::serve_control_socket;

#[cfg(unix)]
mod unix {
    use std::path::PathBuf;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{UnixListener, UnixStream};
    use tracing::{debug, info, warn};

    use super::{AdminCommand, AdminHandle};
    use crate::error::{OhdSrvError, Result};

    /// Accept control connections until the listener fails
    pub async fn serve_control_socket(path: PathBuf, handle: AdminHandle) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| {
                OhdSrvError::startup(format!(
                    "Cannot remove stale control socket {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }
        let listener = UnixListener::bind(&path).map_err(|e| {
            OhdSrvError::startup(format!(
                "Cannot bind control socket {}: {}",
                path.display(),
                e
            ))
        })?;
        info!(path = %path.display(), "Control socket listening");

        loop {
            let (stream, _) = listener.accept().await?;
            let handle = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(stream, handle).await {
                    debug!("Control connection ended: {}", e);
                }
            });
        }
    }

    async fn serve_connection(stream: UnixStream, handle: AdminHandle) -> std::io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let outcome = match line.parse::<AdminCommand>() {
                Ok(command) => {
                    info!(%command, "Admin command");
                    handle.execute(command).await
                },
                Err(e) => Err(e),
            };
            let reply = match outcome {
                Ok(()) => "ok\n".to_string(),
                Err(e) => {
                    warn!(line = %line.trim(), "Admin command failed: {}", e);
                    format!("error: {e}\n")
                },
            };
            writer.write_all(reply.as_bytes()).await?;
        }
        Ok(())
    }
}
