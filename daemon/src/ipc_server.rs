use anyhow::{Context, Result};
use common::{Command, ContentEvent, DisplayError, Response};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};

use crate::DaemonState;
use crate::display::DisplayCommand;

const ACCEPT_TIMEOUT: Duration = Duration::from_millis(100);

/// Handles shared by every client connection
#[derive(Clone)]
pub struct IpcContext {
    pub state: Arc<Mutex<DaemonState>>,
    pub display_tx: mpsc::UnboundedSender<DisplayCommand>,
    pub events: broadcast::Sender<ContentEvent>,
}

pub async fn start(ctx: IpcContext) -> Result<()> {
    serve(&common::get_socket_path(), ctx).await
}

pub async fn serve(socket_path: &Path, ctx: IpcContext) -> Result<()> {
    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove stale socket {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if ctx.state.lock().await.should_exit {
            break;
        }

        // Accept with a timeout so the exit flag is checked regularly
        match tokio::time::timeout(ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _addr))) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, ctx).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => continue,
        }
    }

    let _ = std::fs::remove_file(socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn write_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let response_json = serde_json::to_string(response)?;
    writer.write_all(response_json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_client(stream: UnixStream, ctx: IpcContext) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let command = serde_json::from_str::<Command>(&line);
        line.clear();

        let response = match command {
            Ok(Command::Watch) => {
                // Subscribe before acknowledging so no event falls in between
                let events = ctx.events.subscribe();
                write_response(&mut writer, &Response::Ok).await?;
                return stream_events(&mut writer, events, &ctx).await;
            }
            Ok(command) => handle_command(command, &ctx).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(DisplayError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        write_response(&mut writer, &response).await?;
    }

    Ok(())
}

/// Forward content events until the client leaves or the daemon exits
async fn stream_events(
    writer: &mut OwnedWriteHalf,
    mut events: broadcast::Receiver<ContentEvent>,
    ctx: &IpcContext,
) -> Result<()> {
    log::debug!("Watch subscriber connected");

    loop {
        match tokio::time::timeout(ACCEPT_TIMEOUT, events.recv()).await {
            Ok(Ok(event)) => {
                if write_response(writer, &Response::Event(event)).await.is_err() {
                    break;
                }
            }
            Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                log::warn!("Watch subscriber missed {} event(s)", missed);
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => break,
            Err(_) => {
                if ctx.state.lock().await.should_exit {
                    break;
                }
            }
        }
    }

    log::debug!("Watch subscriber disconnected");
    Ok(())
}

async fn handle_command(command: Command, ctx: &IpcContext) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Kill => {
            log::info!("Received kill command, shutting down...");
            ctx.state.lock().await.should_exit = true;
            let _ = ctx.display_tx.send(DisplayCommand::Shutdown);
            Response::Ok
        }

        Command::SetContent {
            screen,
            content,
            scale,
        } => {
            log::info!("Setting {} {} on {}", content.kind().name(), content.summary(), screen);
            let (reply, answer) = oneshot::channel();
            let cmd = DisplayCommand::SetContent {
                screen,
                content,
                scale,
                reply,
            };
            if let Err(e) = ctx.display_tx.send(cmd) {
                return display_gone(e);
            }
            match answer.await {
                Ok(Ok(report)) => Response::Applied(report),
                Ok(Err(e)) => Response::Error(e),
                Err(_) => Response::Error(DisplayError::Cancelled(
                    "display loop stopped before answering".to_string(),
                )),
            }
        }

        command => {
            let (reply, answer) = oneshot::channel();
            if let Err(e) = ctx.display_tx.send(DisplayCommand::Request { command, reply }) {
                return display_gone(e);
            }
            answer.await.unwrap_or_else(|_| {
                Response::Error(DisplayError::Cancelled(
                    "display loop stopped before answering".to_string(),
                ))
            })
        }
    }
}

fn display_gone(e: mpsc::error::SendError<DisplayCommand>) -> Response {
    Response::Error(DisplayError::Ipc(format!(
        "Failed to send command to display loop: {}",
        e
    )))
}
