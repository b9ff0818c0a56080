use std::{io, process::Stdio};
use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    process::{Child, Command},
    sync::watch,
};

use crate::state::CollectorConfig;

/// Longer lines are relayed in pieces of at most this many bytes.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("collector stdout unavailable")]
    StdoutUnavailable,
    #[error("wait: {0}")]
    Wait(#[source] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectorStatus {
    Running,
    Exited { code: Option<i32> },
    Failed { reason: String },
}

impl CollectorStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, CollectorStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectorStatus::Running => "running",
            CollectorStatus::Exited { .. } => "exited",
            CollectorStatus::Failed { .. } => "failed",
        }
    }
}

/// Observes a collector run. The server never waits on this.
#[derive(Clone)]
pub struct CollectorHandle {
    status: watch::Receiver<CollectorStatus>,
}

impl CollectorHandle {
    pub fn status(&self) -> CollectorStatus {
        self.status.borrow().clone()
    }

    /// Resolves once the collector has exited or failed to start.
    ///
    /// Output still held open by a grandchild may be relayed after this returns.
    pub async fn finished(&mut self) -> CollectorStatus {
        if let Ok(status) = self.status.wait_for(|status| !status.is_running()).await {
            return (*status).clone();
        }
        self.status.borrow().clone()
    }
}

/// Starts the collector once and relays its stdout to the console in the background.
///
/// Launch failures are logged and recorded in the handle; they never stop the caller.
pub fn spawn_collector(config: &CollectorConfig) -> CollectorHandle {
    spawn_collector_with_output(config, tokio::io::stdout())
}

pub fn spawn_collector_with_output<W>(config: &CollectorConfig, output: W) -> CollectorHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (status_tx, status_rx) = watch::channel(CollectorStatus::Running);

    match start(config) {
        Ok(child) => {
            tokio::spawn(supervise(child, config.label.clone(), output, status_tx));
        }
        Err(err) => {
            tracing::warn!(error = %err, script = %config.script.display(), "collector failed to start");
            status_tx.send_replace(CollectorStatus::Failed {
                reason: err.to_string(),
            });
        }
    }

    CollectorHandle { status: status_rx }
}

fn start(config: &CollectorConfig) -> Result<Child, CollectorError> {
    let mut command = Command::new(config.shell.as_str());
    command.arg(&config.script);
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::null());

    command.spawn().map_err(|source| CollectorError::Spawn {
        program: config.shell.clone(),
        source,
    })
}

async fn supervise<W>(
    mut child: Child,
    label: String,
    output: W,
    status: watch::Sender<CollectorStatus>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tracing::info!(pid = child.id(), "collector started");

    let relay = match child.stdout.take() {
        Some(stdout) => Some(tokio::spawn(async move {
            relay_lines(BufReader::new(stdout), output, &label).await
        })),
        None => {
            tracing::warn!(error = %CollectorError::StdoutUnavailable, "collector output not relayed");
            None
        }
    };

    let outcome = child.wait().await.map_err(CollectorError::Wait);

    let final_status = match outcome {
        Ok(exit) => {
            tracing::info!(code = exit.code(), success = exit.success(), "collector exited");
            CollectorStatus::Exited { code: exit.code() }
        }
        Err(err) => {
            tracing::warn!(error = %err, "collector wait failed");
            CollectorStatus::Failed {
                reason: err.to_string(),
            }
        }
    };
    status.send_replace(final_status);

    if let Some(relay) = relay {
        match relay.await {
            Ok(Ok(lines)) => tracing::debug!(lines, "collector output relayed"),
            Ok(Err(err)) => tracing::warn!(error = %err, "collector relay stopped"),
            Err(err) => tracing::warn!(error = %err, "collector relay task failed"),
        }
    }
}

/// Copies lines from `reader` to `writer`, each prefixed with `label`.
///
/// Line endings are normalized to `\n` and invalid UTF-8 is replaced. Lines longer
/// than [`MAX_LINE_BYTES`] are split.
/// Returns the number of lines written.
pub async fn relay_lines<R, W>(mut reader: R, mut writer: W, label: &str) -> io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    let mut relayed = 0;
    loop {
        line.clear();
        if (&mut reader)
            .take(MAX_LINE_BYTES)
            .read_until(b'\n', &mut line)
            .await?
            == 0
        {
            break;
        }
        let text = String::from_utf8_lossy(trim_line_ending(&line));
        writer
            .write_all(format!("{label}{text}\n").as_bytes())
            .await?;
        writer.flush().await?;
        relayed += 1;
    }
    Ok(relayed)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(shell: &str, script: PathBuf) -> CollectorConfig {
        CollectorConfig {
            shell: shell.to_string(),
            script,
            label: "Powershell Data: ".to_string(),
        }
    }

    #[tokio::test]
    async fn relay_prefixes_each_line() {
        let input: &[u8] = b"Name : Ethernet\r\nStatus : Up\nlast line";
        let mut output = Vec::new();

        let lines = relay_lines(input, &mut output, "Powershell Data: ")
            .await
            .unwrap();

        assert_eq!(lines, 3);
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Powershell Data: Name : Ethernet\n\
             Powershell Data: Status : Up\n\
             Powershell Data: last line\n"
        );
    }

    #[tokio::test]
    async fn relay_keeps_blank_lines_and_replaces_invalid_utf8() {
        let input: &[u8] = b"\n\xffok\n";
        let mut output = Vec::new();

        let lines = relay_lines(input, &mut output, "> ").await.unwrap();

        assert_eq!(lines, 2);
        assert_eq!(String::from_utf8(output).unwrap(), "> \n> \u{fffd}ok\n");
    }

    #[tokio::test]
    async fn relay_of_empty_stream_writes_nothing() {
        let mut output = Vec::new();
        assert_eq!(relay_lines(&b""[..], &mut output, "> ").await.unwrap(), 0);
        assert!(output.is_empty());
    }

    #[test]
    fn status_labels() {
        assert!(CollectorStatus::Running.is_running());
        assert_eq!(CollectorStatus::Exited { code: Some(0) }.as_str(), "exited");
        assert_eq!(
            CollectorStatus::Failed {
                reason: "spawn".to_string()
            }
            .as_str(),
            "failed"
        );
    }

    #[tokio::test]
    async fn missing_interpreter_marks_failed() {
        let mut handle = spawn_collector(&config(
            "ethreport-no-such-interpreter",
            PathBuf::from("./Get-IntelEthernet.ps1"),
        ));

        assert!(matches!(handle.status(), CollectorStatus::Failed { .. }));
        let status = handle.finished().await;
        match status {
            CollectorStatus::Failed { reason } => {
                assert!(reason.contains("ethreport-no-such-interpreter"))
            }
            other => panic!("expected failed status, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_exit_code_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("collect.sh");
        std::fs::write(&script, "echo collecting\necho done\nexit 3\n").unwrap();

        let mut handle = spawn_collector(&config("sh", script));
        let status = tokio::time::timeout(Duration::from_secs(10), handle.finished())
            .await
            .unwrap();

        assert_eq!(status, CollectorStatus::Exited { code: Some(3) });
        assert_eq!(handle.status(), status);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_writes_report_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("dataX.json");
        let script = dir.path().join("collect.sh");
        std::fs::write(
            &script,
            format!("printf '{{\"adapter\":\"eth0\"}}' > '{}'\n", report.display()),
        )
        .unwrap();

        let mut handle = spawn_collector(&config("sh", script));
        let status = tokio::time::timeout(Duration::from_secs(10), handle.finished())
            .await
            .unwrap();

        assert_eq!(status, CollectorStatus::Exited { code: Some(0) });
        assert_eq!(std::fs::read(&report).unwrap(), br#"{"adapter":"eth0"}"#);
    }

    #[tokio::test]
    async fn relay_splits_overlong_lines() {
        let mut input = vec![b'x'; MAX_LINE_BYTES as usize + 10];
        input.push(b'\n');
        let mut output = Vec::new();

        let lines = relay_lines(&input[..], &mut output, "> ").await.unwrap();

        assert_eq!(lines, 2);
        let text = String::from_utf8(output).unwrap();
        let relayed: Vec<&str> = text.lines().collect();
        assert_eq!(relayed[0].len(), 2 + MAX_LINE_BYTES as usize);
        assert_eq!(relayed[1], "> xxxxxxxxxx");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_output_is_relayed_with_label() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("collect.sh");
        std::fs::write(&script, "echo collecting\nprintf 'Speed : 1 Gbps\\r\\n'\n").unwrap();

        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let mut handle = spawn_collector_with_output(&config("sh", script), writer);

        let mut console = String::new();
        tokio::time::timeout(Duration::from_secs(10), reader.read_to_string(&mut console))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            console,
            "Powershell Data: collecting\nPowershell Data: Speed : 1 Gbps\n"
        );
        assert_eq!(
            handle.finished().await,
            CollectorStatus::Exited { code: Some(0) }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_is_published_while_grandchild_holds_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("collect.sh");
        std::fs::write(&script, "echo started\nsleep 5 &\nexit 0\n").unwrap();

        let (writer, _reader) = tokio::io::duplex(64 * 1024);
        let mut handle = spawn_collector_with_output(&config("sh", script), writer);

        let status = tokio::time::timeout(Duration::from_secs(3), handle.finished())
            .await
            .unwrap();
        assert_eq!(status, CollectorStatus::Exited { code: Some(0) });
    }
}
