use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Configuration for window generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Lines attributed per window; also the stride between windows
    pub window_size: usize,
    /// Context lines shown before and after the current lines
    pub context_lines: usize,
    /// Stop after this many paragraphs (0 = whole book)
    pub max_paragraphs: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            context_lines: 20,
            max_paragraphs: 0,
        }
    }
}

impl WindowConfig {
    /// Number of paragraphs that will be walked for a book of `len` paragraphs.
    pub fn limit(&self, len: usize) -> usize {
        if self.max_paragraphs == 0 {
            len
        } else {
            self.max_paragraphs.min(len)
        }
    }

    /// Total number of windows for a book of `len` paragraphs.
    pub fn total_windows(&self, len: usize) -> usize {
        let stride = self.window_size.max(1);
        self.limit(len).div_ceil(stride)
    }

    /// Start indices of every window, in order.
    pub fn window_starts(&self, len: usize) -> impl Iterator<Item = usize> {
        (0..self.limit(len)).step_by(self.window_size.max(1))
    }

    /// Lay out the window beginning at `start` over a sequence of `len`
    /// paragraphs. Returns `None` once `start` is past the end of the book.
    pub fn window_at(&self, start: usize, len: usize) -> Option<Window> {
        let limit = self.limit(len);
        if start >= limit {
            return None;
        }
        let end = (start + self.window_size).min(limit);
        Some(Window {
            ordinal: start / self.window_size.max(1),
            previous: start.saturating_sub(self.context_lines)..start,
            current: start..end,
            next: end..(end + self.context_lines).min(len),
        })
    }
}

/// One attribution window, expressed as paragraph index ranges.
///
/// Indices are carried explicitly so committing a line never depends on
/// looking the text up by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Position of this window in the book (start / stride)
    pub ordinal: usize,
    /// Read-only context before the window
    pub previous: Range<usize>,
    /// Lines to attribute
    pub current: Range<usize>,
    /// Read-only context after the window
    pub next: Range<usize>,
}

impl Window {
    pub fn start(&self) -> usize {
        self.current.start
    }

    /// Number of lines to attribute
    pub fn line_count(&self) -> usize {
        self.current.len()
    }

    /// Span covering previous context, current lines and next context.
    pub fn full_span(&self) -> Range<usize> {
        self.previous.start..self.next.end
    }

    /// Paragraph index of the `k`-th (0-based) current line.
    pub fn paragraph_index(&self, k: usize) -> Option<usize> {
        let index = self.current.start + k;
        (index < self.current.end).then_some(index)
    }
}

/// Window text after name masking.
#[derive(Debug, Clone, Default)]
pub struct MaskedWindow {
    pub previous: Vec<String>,
    pub current: Vec<String>,
    pub next: Vec<String>,
}

impl MaskedWindow {
    /// Previous, current and next lines joined as a single excerpt.
    pub fn excerpt(&self) -> String {
        self.previous
            .iter()
            .chain(&self.current)
            .chain(&self.next)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
