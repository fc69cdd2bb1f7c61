use chrono::{DateTime, Local};

pub const DEFAULT_MAX_HISTORY: usize = 50;

#[derive(Debug, Clone)]
pub struct Recorded<T> {
    pub action: T,
    pub recorded_at: DateTime<Local>,
}

/// Linear undo/redo log. The undo side is bounded; the oldest entries go first.
#[derive(Debug, Clone)]
pub struct History<T> {
    undo_stack: Vec<Recorded<T>>,
    redo_stack: Vec<Recorded<T>>,
    max_depth: usize,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl<T> History<T> {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
        }
    }

    pub fn push(&mut self, action: T) {
        self.undo_stack.push(Recorded {
            action,
            recorded_at: Local::now(),
        });
        if self.undo_stack.len() > self.max_depth {
            let overflow = self.undo_stack.len() - self.max_depth;
            self.undo_stack.drain(..overflow);
        }
        self.redo_stack.clear();
    }

    pub fn undo(&mut self) -> Option<&Recorded<T>> {
        let record = self.undo_stack.pop()?;
        self.redo_stack.push(record);
        self.redo_stack.last()
    }

    pub fn redo(&mut self) -> Option<&Recorded<T>> {
        let record = self.redo_stack.pop()?;
        self.undo_stack.push(record);
        self.undo_stack.last()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn peek_undo(&self) -> Option<&Recorded<T>> {
        self.undo_stack.last()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}
