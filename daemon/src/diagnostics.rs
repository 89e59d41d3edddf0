//! Diagnostic view for videos no backend could play

use common::{AttemptOutcome, BackendAttempt, DisplayError, Remedy};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::launcher::{default_open_command, expand_args, reveal_command, spawn_detached};
use crate::text::Card;
use crate::video::probe::{self, MediaProbe};

/// Everything the diagnostic card shows
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub path: PathBuf,
    pub size_bytes: Option<u64>,
    pub probe: Option<MediaProbe>,
    /// ffprobe is still running
    pub probing: bool,
    pub attempts: Vec<BackendAttempt>,
    pub remedies: Vec<Remedy>,
}

impl DiagnosticReport {
    /// Gather file facts. Media details arrive later through
    /// [`finish_probe`](Self::finish_probe) when `probing` is set.
    pub fn new(path: &Path, attempts: Vec<BackendAttempt>, probing: bool, repair_configured: bool) -> Self {
        let mut remedies = vec![Remedy::RevealInFileBrowser, Remedy::OpenWithDefault];
        if repair_configured {
            remedies.push(Remedy::RepairTool);
        }

        Self {
            path: path.to_path_buf(),
            size_bytes: std::fs::metadata(path).map(|m| m.len()).ok(),
            probe: None,
            probing,
            attempts,
            remedies,
        }
    }

    pub fn finish_probe(&mut self, probe: Option<MediaProbe>) {
        self.probe = probe;
        self.probing = false;
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("File: {}", self.file_name()),
            format!(
                "Size: {}",
                self.size_bytes.map(format_size).unwrap_or_else(|| "unknown".to_string())
            ),
            format!("Path: {}", self.path.display()),
        ];

        match &self.probe {
            Some(probe) => {
                lines.push(format!(
                    "Codec: {}",
                    probe.codec.as_deref().unwrap_or("unknown")
                ));
                lines.push(format!("Resolution: {}x{}", probe.width, probe.height));
                lines.push(format!("Duration: {:.1}s", probe.duration_secs));
                lines.push(format!(
                    "Container: {}",
                    probe.container.as_deref().unwrap_or("unknown")
                ));
            }
            None if self.probing => lines.push("Media details: probing…".to_string()),
            None => lines.push("Media details unavailable".to_string()),
        }

        lines.push(String::new());
        lines.push("Backends tried:".to_string());
        if self.attempts.is_empty() {
            lines.push("  none available".to_string());
        }
        for attempt in &self.attempts {
            let mark = match attempt.outcome {
                AttemptOutcome::Success => "✓",
                AttemptOutcome::Failure => "✗",
                AttemptOutcome::NotAttempted => "-",
            };
            match &attempt.message {
                Some(message) => lines.push(format!("  {} {}: {}", mark, attempt.backend.name(), message)),
                None => lines.push(format!("  {} {}", mark, attempt.backend.name())),
            }
        }

        lines.push(String::new());
        lines.push("Remedies (mqctl remedy <screen> <action>):".to_string());
        for remedy in &self.remedies {
            lines.push(format!("  {}: {}", remedy_name(*remedy), remedy_description(*remedy)));
        }
        lines
    }

    pub fn card(&self) -> Card {
        Card::report(&format!("Cannot play {}", self.file_name()), self.lines())
    }
}

/// ffprobe run on its own thread so the display loop keeps ticking
pub struct ProbeTask {
    rx: mpsc::Receiver<Option<MediaProbe>>,
}

impl ProbeTask {
    pub fn spawn(ffprobe: &str, path: &Path) -> Self {
        let (tx, rx) = mpsc::channel();
        let ffprobe = ffprobe.to_string();
        let path = path.to_path_buf();

        let spawned = std::thread::Builder::new()
            .name("diagnostic-probe".to_string())
            .spawn(move || {
                let result = match probe::probe(&ffprobe, &path) {
                    Ok(probe) => Some(probe),
                    Err(e) => {
                        log::debug!("Probe of {} failed: {:#}", path.display(), e);
                        None
                    }
                };
                let _ = tx.send(result);
            });
        if let Err(e) = spawned {
            log::warn!("Failed to start diagnostic probe: {}", e);
        }

        Self { rx }
    }

    /// `Some` with the outcome once the probe is done
    pub fn poll(&self) -> Option<Option<MediaProbe>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(None),
        }
    }
}

pub fn remedy_name(remedy: Remedy) -> &'static str {
    match remedy {
        Remedy::RevealInFileBrowser => "reveal",
        Remedy::OpenWithDefault => "open",
        Remedy::RepairTool => "repair",
    }
}

fn remedy_description(remedy: Remedy) -> &'static str {
    match remedy {
        Remedy::RevealInFileBrowser => "show the file in the file browser",
        Remedy::OpenWithDefault => "open with the default application",
        Remedy::RepairTool => "run the configured repair tool",
    }
}

/// Human readable size with B/KB/MB/GB units
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Run a remedy for `path`; the spawned program is not supervised
pub fn run_remedy(remedy: Remedy, path: &Path, repair_tool: &[String]) -> Result<(), DisplayError> {
    let (program, args) = match remedy {
        Remedy::RevealInFileBrowser => reveal_command(path),
        Remedy::OpenWithDefault => default_open_command(&path.display().to_string()),
        Remedy::RepairTool => {
            let expanded = expand_args(repair_tool, &[("path", path.display().to_string())]);
            let Some((program, args)) = expanded.split_first() else {
                return Err(DisplayError::Unsupported(
                    "no repair tool configured ([diagnostics] repair_tool)".to_string(),
                ));
            };
            (program.clone(), args.to_vec())
        }
    };

    log::info!("Running remedy {}: {} {}", remedy_name(remedy), program, args.join(" "));
    spawn_detached(&program, &args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BackendKind;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_report_lines() {
        let file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
        std::fs::write(file.path(), vec![0u8; 2048]).unwrap();

        let attempts = vec![
            BackendAttempt {
                backend: BackendKind::InProcess,
                outcome: AttemptOutcome::Failure,
                message: Some("decode error: bad header".to_string()),
            },
            BackendAttempt {
                backend: BackendKind::ExternalPlayer,
                outcome: AttemptOutcome::Failure,
                message: None,
            },
        ];
        let report = DiagnosticReport::new(file.path(), attempts, false, false);
        let lines = report.lines();

        assert!(lines.contains(&"Size: 2.0 KB".to_string()));
        assert!(lines.contains(&"Media details unavailable".to_string()));
        assert!(lines.contains(&"  ✗ in-process: decode error: bad header".to_string()));
        assert!(lines.contains(&"  ✗ external-player".to_string()));
        assert_eq!(report.remedies, vec![Remedy::RevealInFileBrowser, Remedy::OpenWithDefault]);
        assert!(report.card().title.unwrap().contains(&report.file_name()));
    }

    #[test]
    fn test_media_details_arrive_later() {
        let mut report = DiagnosticReport::new(Path::new("/srv/clip.mp4"), Vec::new(), true, false);
        assert!(report.lines().contains(&"Media details: probing…".to_string()));

        report.finish_probe(None);
        assert!(!report.probing);
        assert!(report.lines().contains(&"Media details unavailable".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_ffprobe_reports_no_details() {
        let task = ProbeTask::spawn("/bin/false", Path::new("/srv/clip.mp4"));
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let outcome = loop {
            if let Some(outcome) = task.poll() {
                break outcome;
            }
            assert!(std::time::Instant::now() < deadline, "probe never finished");
            std::thread::sleep(std::time::Duration::from_millis(10));
        };
        assert!(outcome.is_none());
    }

    #[test]
    fn test_repair_without_tool_is_unsupported() {
        let result = run_remedy(Remedy::RepairTool, Path::new("/tmp/x.mp4"), &[]);
        assert!(matches!(result, Err(DisplayError::Unsupported(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_repair_tool_runs() {
        let tool = vec!["/bin/sh".to_string(), "-c".to_string(), "true".to_string(), "{path}".to_string()];
        assert!(run_remedy(Remedy::RepairTool, Path::new("/tmp/x.mp4"), &tool).is_ok());
    }
}
