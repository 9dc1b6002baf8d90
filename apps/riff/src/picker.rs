//! Interactive device choice on the terminal.

use std::io::BufRead;

use async_trait::async_trait;
use riff_core::{DevicePicker, PlayerError, PlayerResult, ResolvedDevice};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Prints numbered candidates to stderr and reads a choice from stdin.
pub struct StdinPicker;

/// Parses a 1-based choice. Blank input declines.
fn parse_choice(input: &str, count: usize) -> Result<Option<usize>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    match input.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Ok(Some(n - 1)),
        _ => Err(format!("expected a number between 1 and {count}")),
    }
}

/// Feeds stdin lines into a channel from a plain thread.
///
/// A blocking read on the runtime's pool would keep the process alive after
/// Ctrl+C; a detached thread does not.
fn stdin_lines() -> mpsc::UnboundedReceiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Reads lines until one is a valid choice, input ends, or `cancel` fires.
async fn read_choice(
    lines: &mut mpsc::UnboundedReceiver<std::io::Result<String>>,
    count: usize,
    cancel: &CancellationToken,
) -> PlayerResult<Option<usize>> {
    loop {
        eprint!("Device (blank to cancel): ");
        let line = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(PlayerError::Cancelled),
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            return Ok(None);
        };
        let line = line.map_err(|e| PlayerError::Config(format!("failed to read choice: {e}")))?;
        match parse_choice(&line, count) {
            Ok(choice) => return Ok(choice),
            Err(msg) => eprintln!("{msg}"),
        }
    }
}

#[async_trait]
impl DevicePicker for StdinPicker {
    async fn pick(
        &self,
        candidates: &[ResolvedDevice],
        cancel: &CancellationToken,
    ) -> PlayerResult<Option<usize>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        eprintln!("No active device. Choose one:");
        for (i, device) in candidates.iter().enumerate() {
            eprintln!("  {}) {} [{}]", i + 1, device.name(), device.platform().as_str());
        }

        read_choice(&mut stdin_lines(), candidates.len(), cancel).await
    }
}
