use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

/// Width of the book-name column on the board
const NAME_WIDTH: usize = 24;

/// Progress of one book through the chunk scheduler.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    book: String,
    total_windows: usize,
    windows_done: usize,
    lines_done: usize,
    total_lines: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(book: impl Into<String>, total_windows: usize, total_lines: usize) -> Self {
        Self {
            book: book.into(),
            total_windows,
            windows_done: 0,
            lines_done: 0,
            total_lines,
            started: Instant::now(),
        }
    }

    /// Record a finished window of `lines` lines.
    pub fn advance(&mut self, lines: usize) {
        self.windows_done = (self.windows_done + 1).min(self.total_windows);
        self.lines_done = (self.lines_done + lines).min(self.total_lines);
    }

    pub fn book(&self) -> &str {
        &self.book
    }

    pub fn percent(&self) -> f64 {
        if self.total_windows == 0 {
            return 100.0;
        }
        self.windows_done as f64 / self.total_windows as f64 * 100.0
    }

    /// Remaining time, extrapolated linearly from time spent per line so far.
    pub fn eta(&self) -> Option<Duration> {
        self.eta_after(self.started.elapsed())
    }

    fn eta_after(&self, elapsed: Duration) -> Option<Duration> {
        if self.lines_done == 0 {
            return None;
        }
        let per_line = elapsed.as_secs_f64() / self.lines_done as f64;
        let remaining = self.total_lines.saturating_sub(self.lines_done);
        Some(Duration::from_secs_f64(per_line * remaining as f64))
    }

    /// Fixed-width status line, e.g. `dracula    [  42.0%]  21/50 windows  ETA 00:03:10`.
    pub fn render(&self) -> String {
        let eta = match self.eta() {
            Some(eta) => format_duration(eta),
            None => "--:--:--".to_string(),
        };
        format!(
            "{:<width$.width$} [{:>6.1}%] {:>5}/{:<5} windows  ETA {}",
            self.book,
            self.percent(),
            self.windows_done,
            self.total_windows,
            eta,
            width = NAME_WIDTH
        )
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

/// Shared console progress for all books.
///
/// Every update goes through one lock, so lines from concurrent books are
/// emitted whole and in order.
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    lines: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, tracker: &ProgressTracker) {
        let line = tracker.render();
        let mut lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        info!(target: "parley::progress", "{line}");
        lines.insert(tracker.book().to_string(), line);
    }

    /// Latest line for every book, ordered by book name.
    pub fn snapshot(&self) -> Vec<String> {
        let lines = match self.lines.lock() {
            Ok(lines) => lines,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_and_eta() {
        let mut tracker = ProgressTracker::new("book", 4, 20);
        assert_eq!(tracker.eta_after(Duration::from_secs(10)), None);

        tracker.advance(5);
        assert_eq!(tracker.percent(), 25.0);
        // 2s per line, 15 lines left
        assert_eq!(
            tracker.eta_after(Duration::from_secs(10)),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_render_is_fixed_width() {
        let short = ProgressTracker::new("a", 10, 50).render();
        let long = ProgressTracker::new("a-very-long-book-name-that-overflows", 10, 50).render();
        assert_eq!(short.len(), long.len());
        assert!(short.contains("0/10"));
    }

    #[test]
    fn test_board_keeps_latest_line_per_book() {
        let board = ProgressBoard::new();
        let mut first = ProgressTracker::new("b-book", 2, 10);
        let second = ProgressTracker::new("a-book", 2, 10);
        board.update(&first);
        first.advance(5);
        board.update(&first);
        board.update(&second);

        let lines = board.snapshot();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("a-book"));
        assert!(lines[1].contains("50.0%"));
    }
}
