use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashStage {
    Idle,
    Connecting,
    Connected,
    Preparing,
    Erasing,
    Flashing,
    Verifying,
    Done,
    Error,
}

impl FlashStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashStage::Idle => "idle",
            FlashStage::Connecting => "connecting",
            FlashStage::Connected => "connected",
            FlashStage::Preparing => "preparing",
            FlashStage::Erasing => "erasing",
            FlashStage::Flashing => "flashing",
            FlashStage::Verifying => "verifying",
            FlashStage::Done => "done",
            FlashStage::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlashStage::Done | FlashStage::Error)
    }
}

impl fmt::Display for FlashStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a flash attempt, as handed to the progress callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashProgress {
    pub stage: FlashStage,
    /// Overall completion, 0-100.
    pub percentage: u8,
    /// Index of the part currently being written.
    pub current_part: usize,
    pub total_parts: usize,
    /// Bytes written of the current part.
    pub bytes_written: u64,
    /// Size of the current part.
    pub bytes_total: u64,
    /// Set when `stage` is [`FlashStage::Error`].
    pub error: Option<String>,
}

impl FlashProgress {
    pub fn idle() -> Self {
        Self {
            stage: FlashStage::Idle,
            percentage: 0,
            current_part: 0,
            total_parts: 0,
            bytes_written: 0,
            bytes_total: 0,
            error: None,
        }
    }
}

impl Default for FlashProgress {
    fn default() -> Self {
        Self::idle()
    }
}

/// Handle on a running flash attempt.
///
/// Cancellation is checked between stages only; a write that has already
/// been handed to the loader runs to completion.
#[derive(Debug, Clone, Default)]
pub struct FlashSession {
    cancelled: Arc<AtomicBool>,
}

impl FlashSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Receivers for the log lines and progress records of a flash attempt.
///
/// # Example
///
/// ```
/// use espboard_flash::FlashEvents;
///
/// let events = FlashEvents::new(
///     |line| println!("{line}"),
///     |progress| println!("{}: {}%", progress.stage, progress.percentage),
/// );
/// ```
pub struct FlashEvents<'a> {
    on_log: Box<dyn FnMut(&str) + 'a>,
    on_progress: Box<dyn FnMut(&FlashProgress) + 'a>,
}

impl<'a> FlashEvents<'a> {
    pub fn new(
        on_log: impl FnMut(&str) + 'a,
        on_progress: impl FnMut(&FlashProgress) + 'a,
    ) -> Self {
        Self {
            on_log: Box::new(on_log),
            on_progress: Box::new(on_progress),
        }
    }

    /// Events that only go to the `log` crate.
    pub fn silent() -> Self {
        Self::new(|_| {}, |_| {})
    }

    pub fn log(&mut self, line: &str) {
        debug!("{}", line);
        (self.on_log)(line);
    }

    pub fn progress(&mut self, progress: FlashProgress) {
        debug!("{} {}%", progress.stage, progress.percentage);
        (self.on_progress)(&progress);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_clones_share_the_flag() {
        let session = FlashSession::new();
        let handle = session.clone();
        assert!(!session.is_cancelled());
        handle.cancel();
        assert!(session.is_cancelled());
    }

    #[test]
    fn events_forward_to_closures() {
        let mut lines = Vec::new();
        let mut stages = Vec::new();
        {
            let mut events = FlashEvents::new(
                |line| lines.push(line.to_string()),
                |p| stages.push(p.stage),
            );
            events.log("hello");
            events.progress(FlashProgress::idle());
        }
        assert_eq!(lines, vec!["hello"]);
        assert_eq!(stages, vec![FlashStage::Idle]);
    }
}
