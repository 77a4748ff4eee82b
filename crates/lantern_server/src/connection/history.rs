use std::collections::VecDeque;

/// Number of submitted lines kept per connection.
pub const MAX_HISTORY: usize = 10;

/// Submitted lines with cursor-key navigation.
///
/// The first up or down key press after a submission only enters browsing
/// mode and shows the newest line; later presses move the cursor.
#[derive(Debug, Clone, Default)]
pub struct InputHistory {
    in_history: bool,
    position: usize,
    lines: VecDeque<Vec<u8>>,
}

impl InputHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The line under the cursor, if any lines exist.
    pub fn get(&self) -> Option<&[u8]> {
        self.lines.get(self.position).map(Vec::as_slice)
    }

    /// Records a submitted line, dropping the oldest past [`MAX_HISTORY`].
    pub fn add(&mut self, line: &[u8]) {
        if self.lines.len() >= MAX_HISTORY {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_vec());
        self.position = self.lines.len() - 1;
        self.in_history = false;
    }

    pub fn previous(&mut self) {
        if !self.in_history {
            self.in_history = true;
            return;
        }
        self.position = self.position.saturating_sub(1);
    }

    pub fn next(&mut self) {
        if !self.in_history {
            self.in_history = true;
            return;
        }
        if self.position + 1 < self.lines.len() {
            self.position += 1;
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn reset_position(&mut self) {
        self.in_history = false;
        self.position = self.lines.len().saturating_sub(1);
    }

    pub fn in_history(&self) -> bool {
        self.in_history
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
