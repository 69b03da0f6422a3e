//! Child-process transport
//!
//! The controller side spawns `ih target ...` with piped stdin/stdout. Commands
//! are written to the child's stdin and events read from its stdout, one JSON
//! object per line. The child's stderr is inherited.

use std::path::Path;
use std::process::Stdio;

use eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Connection, launch_in_process};
use crate::protocol::{ControlCommand, TargetEvent};
use crate::worker::WorkerConfig;

/// Maximum size of a single protocol line
const MAX_LINE_SIZE: usize = 16 * 1024;

/// Spawn `program target` and bridge its stdio to a [`Connection`]
pub async fn launch_process(program: &Path, config: WorkerConfig) -> Result<Connection> {
    debug!(?program, mode = %config.mode, "launch_process: called");
    let mut child = Command::new(program)
        .arg("target")
        .arg("--mode")
        .arg(config.mode.as_str())
        .arg("--iterations")
        .arg(config.iterations.to_string())
        .arg("--sleep-ms")
        .arg(config.sleep.as_millis().to_string())
        .arg("--pause-ms")
        .arg(config.generator_pause.as_millis().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .context(format!("Failed to spawn target process {}", program.display()))?;
    info!(pid = ?child.id(), "launch_process: target spawned");

    let stdin = child.stdin.take().ok_or_else(|| eyre!("Target stdin not piped"))?;
    let stdout = child.stdout.take().ok_or_else(|| eyre!("Target stdout not piped"))?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    tokio::spawn(read_events(stdout, event_tx));
    tokio::spawn(supervise(child, stdin, command_rx));

    Ok(Connection::new(event_rx, command_tx))
}

/// Forward parsed stdout lines as events; `Disconnected` at EOF
async fn read_events(stdout: ChildStdout, events: mpsc::UnboundedSender<TargetEvent>) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.len() > MAX_LINE_SIZE {
                    warn!(len = line.len(), "read_events: oversized line dropped");
                    continue;
                }
                match serde_json::from_str::<TargetEvent>(line.trim()) {
                    Ok(TargetEvent::Disconnected) => {}
                    Ok(event) => {
                        let _ = events.send(event);
                    }
                    Err(e) => warn!(error = %e, %line, "read_events: malformed event"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "read_events: read failed");
                break;
            }
        }
    }
    debug!("read_events: target stdout closed");
    let _ = events.send(TargetEvent::Disconnected);
}

/// Write commands to the child until it exits; kill it on `Exit`
async fn supervise(mut child: Child, mut stdin: ChildStdin, mut commands: mpsc::UnboundedReceiver<ControlCommand>) {
    let mut commands_open = true;
    loop {
        let kill = tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => info!(%status, "supervise: target exited"),
                    Err(e) => warn!(error = %e, "supervise: wait failed"),
                }
                break;
            }
            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    let forced = matches!(command, ControlCommand::Exit { .. });
                    if let Err(e) = write_line(&mut stdin, &command).await {
                        debug!(error = %e, "supervise: write to target failed");
                    }
                    forced
                }
                None => {
                    debug!("supervise: controller dropped its sender");
                    commands_open = false;
                    true
                }
            },
        };
        if kill {
            info!("supervise: force-terminating target");
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "supervise: kill failed (already exited?)");
            }
        }
    }
}

/// Serve a target over this process's stdin/stdout
///
/// Returns the target's exit code once it disconnects.
pub async fn serve_stdio(config: WorkerConfig) -> Result<i32> {
    debug!(mode = %config.mode, "serve_stdio: called");
    let mut connection = launch_in_process(config)?;
    let commands = connection.commands.clone();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<ControlCommand>(line.trim()) {
                Ok(command) => {
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, %line, "serve_stdio: malformed command"),
            }
        }
        debug!("serve_stdio: stdin closed");
        // Dropping the last sender detaches the target.
    });
    // Only the stdin task may keep the command channel alive.
    drop(connection.commands);

    let mut stdout = tokio::io::stdout();
    let mut code = crate::protocol::EXIT_FORCED;
    while let Some(event) = connection.events.recv().await {
        match event {
            TargetEvent::Disconnected => break,
            TargetEvent::VmDeath { ref exit } => code = exit.code,
            _ => {}
        }
        write_line(&mut stdout, &event).await.context("Failed to write event")?;
    }
    Ok(code)
}

async fn write_line<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let json = serde_json::to_string(message).context("Failed to serialize message")?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
