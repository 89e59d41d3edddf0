use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use common::{ApplyReport, AttemptOutcome, Command, Content, ContentEvent, Remedy, Response, ScaleMode};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedReadHalf;

#[derive(Parser)]
#[command(name = "mqctl")]
#[command(about = "Marquee display daemon control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show content on a screen
    Show {
        /// Target screen name
        screen: String,

        /// Kind of content
        #[arg(value_enum)]
        kind: KindArg,

        /// Message text, file path or URL
        value: String,

        /// Image scaling mode (center, fill, fit, stretch, tile)
        #[arg(short, long)]
        scale: Option<String>,
    },

    /// Remove content from a screen
    Clear { screen: String },

    /// Switch a screen to borderless fullscreen
    Fullscreen { screen: String },

    /// Restore the windowed frame on a screen
    Windowed { screen: String },

    /// Tear down content and release the screen surface
    Close { screen: String },

    /// Pause in-process video playback
    Pause { screen: String },

    /// Resume in-process video playback
    Resume { screen: String },

    /// Jump to a frame of in-process video playback
    Seek { screen: String, frame: u64 },

    /// Run a remedy offered for a video that could not be played
    Remedy {
        screen: String,

        #[arg(value_enum)]
        action: RemedyArg,
    },

    /// Query daemon status and what every screen shows
    Status,

    /// List configured screens
    Screens,

    /// Profile commands
    Profile {
        #[command(subcommand)]
        action: ProfileCommands,
    },

    /// Print content changes as they happen
    Watch,

    /// Ping the daemon to check if it's running
    Ping,

    /// Kill the running daemon
    Kill,
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Save what every screen shows under a name
    Save { name: String },

    /// Apply a saved profile
    Apply { name: String },

    /// List saved profiles
    List,

    /// Delete a saved profile
    Delete { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Text,
    Image,
    Video,
    Web,
}

#[derive(Clone, Copy, ValueEnum)]
enum RemedyArg {
    Reveal,
    Open,
    Repair,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = match cli.command {
        Commands::Show {
            screen,
            kind,
            value,
            scale,
        } => {
            let content = match kind {
                KindArg::Text => Content::Text(value),
                KindArg::Image => Content::Image(absolute(&value)),
                KindArg::Video => Content::Video(absolute(&value)),
                KindArg::Web => Content::Web(value),
            };
            let scale = match scale {
                Some(name) => Some(parse_scale_mode(&name)?),
                None => None,
            };
            Command::SetContent {
                screen,
                content,
                scale,
            }
        }
        Commands::Clear { screen } => Command::Clear { screen },
        Commands::Fullscreen { screen } => Command::EnterFullscreen { screen },
        Commands::Windowed { screen } => Command::ExitFullscreen { screen },
        Commands::Close { screen } => Command::Close { screen },
        Commands::Pause { screen } => Command::Pause { screen },
        Commands::Resume { screen } => Command::Resume { screen },
        Commands::Seek { screen, frame } => Command::Seek { screen, frame },
        Commands::Remedy { screen, action } => Command::RunRemedy {
            screen,
            remedy: match action {
                RemedyArg::Reveal => Remedy::RevealInFileBrowser,
                RemedyArg::Open => Remedy::OpenWithDefault,
                RemedyArg::Repair => Remedy::RepairTool,
            },
        },
        Commands::Status => Command::Query,
        Commands::Screens => Command::ListScreens,
        Commands::Profile { action } => match action {
            ProfileCommands::Save { name } => Command::SaveProfile { name },
            ProfileCommands::Apply { name } => Command::ApplyProfile { name },
            ProfileCommands::List => Command::ListProfiles,
            ProfileCommands::Delete { name } => Command::DeleteProfile { name },
        },
        Commands::Watch => Command::Watch,
        Commands::Ping => Command::Ping,
        Commands::Kill => Command::Kill,
    };

    let watching = matches!(command, Command::Watch);
    if let Err(e) = run(command, watching).await {
        eprintln!("Error: {:#}", e);
        eprintln!("\nIs the daemon running? Try starting it with: marquee");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(command: Command, watching: bool) -> Result<()> {
    let mut connection = Connection::open().await?;
    let response = connection.send(&command).await?;
    handle_response(response);
    if watching {
        connection.follow_events().await?;
    }
    Ok(())
}

/// Paths are resolved here since the daemon has its own working directory
fn absolute(path: &str) -> String {
    let path = std::path::Path::new(path);
    if path.is_absolute() || path.starts_with("~") {
        return path.display().to_string();
    }
    std::env::current_dir()
        .map(|dir| dir.join(path).display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

fn parse_scale_mode(name: &str) -> Result<ScaleMode> {
    ScaleMode::from_name(name)
        .with_context(|| format!("Unknown scale mode '{}' (center, fill, fit, stretch, tile)", name))
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Connection {
    async fn open() -> Result<Self> {
        let socket_path = common::get_socket_path();
        let stream = UnixStream::connect(&socket_path)
            .await
            .with_context(|| format!("Failed to connect to {}", socket_path.display()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn send(&mut self, command: &Command) -> Result<Response> {
        let command_json = serde_json::to_string(command)?;
        self.writer.write_all(command_json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        self.read().await
    }

    async fn read(&mut self) -> Result<Response> {
        let mut response_line = String::new();
        if self.reader.read_line(&mut response_line).await? == 0 {
            anyhow::bail!("Daemon closed the connection");
        }
        Ok(serde_json::from_str(&response_line)?)
    }

    async fn follow_events(&mut self) -> Result<()> {
        println!("Watching content changes (Ctrl+C to stop)...");
        loop {
            match self.read().await {
                Ok(Response::Event(event)) => print_event(&event),
                Ok(other) => handle_response(other),
                Err(_) => {
                    println!("Daemon stopped");
                    return Ok(());
                }
            }
        }
    }
}

fn print_event(event: &ContentEvent) {
    match event {
        ContentEvent::Applied { screen, kind, summary } => {
            println!("{} ← {} {}", screen, kind.name(), summary);
        }
        ContentEvent::Cleared { screen } => println!("{} cleared", screen),
    }
}

fn print_report(report: &ApplyReport) {
    if report.diagnostic {
        println!("✗ No backend could play the video on {}", report.screen);
    } else {
        match report.backend {
            Some(backend) => println!("✓ Showing {} on {} via {}", report.kind.name(), report.screen, backend.name()),
            None => println!("✓ Showing {} on {}", report.kind.name(), report.screen),
        }
    }
    for attempt in &report.attempts {
        let mark = match attempt.outcome {
            AttemptOutcome::Success => "✓",
            AttemptOutcome::Failure => "✗",
            AttemptOutcome::NotAttempted => "-",
        };
        match &attempt.message {
            Some(message) => println!("    {} {}: {}", mark, attempt.backend.name(), message),
            None => println!("    {} {}", mark, attempt.backend.name()),
        }
    }
}

fn handle_response(response: Response) {
    match response {
        Response::Ok => {
            println!("✓ Success");
        }
        Response::Error(e) => {
            eprintln!("✗ Error: {}", e);
            std::process::exit(1);
        }
        Response::Applied(report) => print_report(&report),
        Response::Status(status) => {
            println!("Daemon Status:");
            println!("  Version: {}", status.version);
            println!("  Uptime: {}s", status.uptime_secs);
            let backends: Vec<_> = status.backends.iter().map(|b| b.name()).collect();
            println!("  Backends: {}", backends.join(", "));
            println!("  Screens:");
            for screen in status.screens {
                let content = screen
                    .content
                    .as_ref()
                    .map(|c| format!("{} {}", c.kind().name(), c.summary()))
                    .unwrap_or_else(|| "nothing".to_string());
                let mut flags = Vec::new();
                if screen.closed {
                    flags.push("closed");
                }
                if screen.fullscreen {
                    flags.push("fullscreen");
                }
                if screen.diagnostic {
                    flags.push("cannot play");
                }
                println!(
                    "    {} -> {}{}{}",
                    screen.screen,
                    content,
                    screen
                        .backend
                        .map(|b| format!(" via {}", b.name()))
                        .unwrap_or_default(),
                    if flags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", flags.join(", "))
                    }
                );
                if let Some(playback) = screen.playback {
                    println!(
                        "        {:?} frame {}/{} at {:.2} fps, {} rendered, {} dropped",
                        playback.state,
                        playback.position,
                        playback.total_frames,
                        playback.frame_rate,
                        playback.frames_rendered,
                        playback.frames_dropped
                    );
                }
            }
        }
        Response::Screens(screens) => {
            println!("Screens:");
            for screen in screens {
                println!(
                    "  {} - {}x{} at {},{}{}",
                    screen.name,
                    screen.width,
                    screen.height,
                    screen.x,
                    screen.y,
                    if screen.primary { " (primary)" } else { "" }
                );
            }
        }
        Response::Profiles(names) => {
            if names.is_empty() {
                println!("No saved profiles");
            }
            for name in names {
                println!("  {}", name);
            }
        }
        Response::Event(event) => print_event(&event),
        Response::Pong => {
            println!("✓ Daemon is running");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_show() {
        let cli = Cli::try_parse_from(["mqctl", "show", "screen-2", "text", "Hello there"]).unwrap();
        match cli.command {
            Commands::Show { screen, kind, value, scale } => {
                assert_eq!(screen, "screen-2");
                assert!(matches!(kind, KindArg::Text));
                assert_eq!(value, "Hello there");
                assert!(scale.is_none());
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["mqctl", "show", "screen-1", "audio", "x"]).is_err());
    }

    #[test]
    fn test_parse_scale_mode() {
        assert_eq!(parse_scale_mode("Fill").unwrap(), ScaleMode::Fill);
        assert!(parse_scale_mode("zoom").is_err());
    }

    #[test]
    fn test_absolute_paths() {
        assert_eq!(absolute("/srv/a.mp4"), "/srv/a.mp4");
        assert_eq!(absolute("~/a.mp4"), "~/a.mp4");
        assert!(absolute("clip.mp4").ends_with("clip.mp4"));
        assert!(std::path::Path::new(&absolute("clip.mp4")).is_absolute());
    }
}
