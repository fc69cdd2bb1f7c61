use crate::entry::ImageEntry;
use crate::history::{History, DEFAULT_MAX_HISTORY};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortKind {
    ByName { ascending: bool },
    RestoreOriginal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovedEntry {
    pub index: usize,
    pub path: PathBuf,
    pub original_index: usize,
}

/// Undoable mutation. Every variant carries what it needs to be inverted:
/// the full pre-operation order, or the removed paths with their indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Action {
    Reorder {
        from: usize,
        to: usize,
        order: Vec<PathBuf>,
    },
    ReorderMultiple {
        indices: Vec<usize>,
        to: usize,
        order: Vec<PathBuf>,
    },
    Delete {
        /// Sorted by descending index.
        removed: Vec<RemovedEntry>,
    },
    Sort {
        order: Vec<PathBuf>,
        kind: SortKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ActionKind {
    Reorder,
    ReorderMultiple,
    Delete,
    Sort,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Reorder { .. } => ActionKind::Reorder,
            Action::ReorderMultiple { .. } => ActionKind::ReorderMultiple,
            Action::Delete { .. } => ActionKind::Delete,
            Action::Sort { .. } => ActionKind::Sort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub kind: ActionKind,
    pub failed_restorations: Vec<RestoreFailure>,
}

#[derive(Debug, Clone)]
pub struct ImageCollection {
    entries: Vec<ImageEntry>,
    original_order: Vec<PathBuf>,
    history: History<Action>,
}

impl Default for ImageCollection {
    fn default() -> Self {
        Self::with_history_depth(DEFAULT_MAX_HISTORY)
    }
}

impl ImageCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_depth(max_depth: usize) -> Self {
        Self {
            entries: Vec::new(),
            original_order: Vec::new(),
            history: History::new(max_depth),
        }
    }

    pub fn load(&mut self, entries: Vec<ImageEntry>) {
        let mut seen = HashSet::<PathBuf>::new();
        self.entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.path().to_path_buf()))
            .map(|mut entry| {
                entry.selected = false;
                entry
            })
            .collect();
        self.original_order = self.path_order();
        self.history.clear();
        self.update_positions();
        debug!(count = self.entries.len(), "画像リストを読み込みました");
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&ImageEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn original_order(&self) -> &[PathBuf] {
        &self.original_order
    }

    pub fn history(&self) -> &History<Action> {
        &self.history
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Owned copy of the current order, for handing to a background export.
    pub fn snapshot(&self) -> Vec<ImageEntry> {
        self.entries.clone()
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        let len = self.entries.len();
        if from >= len || to >= len || from == to {
            return false;
        }

        let order = self.path_order();
        move_one(&mut self.entries, from, to);
        self.record(Action::Reorder { from, to, order });
        self.update_positions();
        true
    }

    pub fn reorder_multiple(&mut self, indices: &[usize], to: usize) -> bool {
        let len = self.entries.len();
        let indices = normalize_indices(indices, len);
        if indices.is_empty() || to > len {
            return false;
        }

        let order = self.path_order();
        move_block(&mut self.entries, &indices, to);
        self.record(Action::ReorderMultiple { indices, to, order });
        self.update_positions();
        true
    }

    pub fn delete(&mut self, indices: &[usize]) -> usize {
        let targets = normalize_indices(indices, self.entries.len());
        if targets.is_empty() {
            return 0;
        }

        let removed: Vec<RemovedEntry> = targets
            .iter()
            .rev()
            .map(|&index| {
                let entry = &self.entries[index];
                RemovedEntry {
                    index,
                    path: entry.path().to_path_buf(),
                    original_index: entry.original_index(),
                }
            })
            .collect();

        for item in &removed {
            self.entries.remove(item.index);
        }

        let count = removed.len();
        self.record(Action::Delete { removed });
        self.update_positions();
        count
    }

    pub fn delete_selected(&mut self) -> usize {
        let indices = self.selected_indices();
        self.delete(&indices)
    }

    pub fn sort_by_name(&mut self, ascending: bool) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let order = self.path_order();
        sort_entries(&mut self.entries, ascending);
        self.record(Action::Sort {
            order,
            kind: SortKind::ByName { ascending },
        });
        self.update_positions();
        true
    }

    pub fn restore_original_order(&mut self) -> bool {
        if self.original_order.is_empty() {
            return false;
        }

        let order = self.path_order();
        restore_order(&mut self.entries, &self.original_order);
        self.record(Action::Sort {
            order,
            kind: SortKind::RestoreOriginal,
        });
        self.update_positions();
        true
    }

    pub fn undo(&mut self) -> bool {
        self.undo_step().is_some()
    }

    pub fn redo(&mut self) -> bool {
        self.redo_step().is_some()
    }

    pub fn undo_step(&mut self) -> Option<StepReport> {
        let record = self.history.undo()?;
        let kind = record.action.kind();
        let mut failed_restorations = Vec::new();

        match &record.action {
            Action::Reorder { order, .. }
            | Action::ReorderMultiple { order, .. }
            | Action::Sort { order, .. } => restore_order(&mut self.entries, order),
            Action::Delete { removed } => {
                for item in removed.iter().rev() {
                    if contains_path(&self.entries, &item.path) {
                        continue;
                    }
                    match ImageEntry::open(&item.path, item.original_index) {
                        Ok(entry) => {
                            // Present entries keep their slot; only failed reopens leave a gap.
                            let shift = failed_restorations.len();
                            let at = item.index.saturating_sub(shift).min(self.entries.len());
                            self.entries.insert(at, entry);
                        }
                        Err(err) => {
                            warn!(
                                path = %item.path.display(),
                                error = %err,
                                "削除した画像を復元できませんでした"
                            );
                            failed_restorations.push(RestoreFailure {
                                path: item.path.clone(),
                                error: err.to_string(),
                            });
                        }
                    }
                }
            }
        }

        self.update_positions();
        Some(StepReport {
            kind,
            failed_restorations,
        })
    }

    pub fn redo_step(&mut self) -> Option<StepReport> {
        let record = self.history.redo()?;
        let kind = record.action.kind();
        let len = self.entries.len();

        match &record.action {
            Action::Reorder { from, to, .. } => {
                if *from < len && *to < len && from != to {
                    move_one(&mut self.entries, *from, *to);
                }
            }
            Action::ReorderMultiple { indices, to, .. } => {
                let indices = normalize_indices(indices, len);
                if !indices.is_empty() && *to <= len {
                    move_block(&mut self.entries, &indices, *to);
                }
            }
            Action::Delete { removed } => {
                for item in removed {
                    remove_recorded(&mut self.entries, item);
                }
            }
            Action::Sort { kind, .. } => match kind {
                SortKind::ByName { ascending } => sort_entries(&mut self.entries, *ascending),
                SortKind::RestoreOriginal => {
                    restore_order(&mut self.entries, &self.original_order)
                }
            },
        }

        self.update_positions();
        Some(StepReport {
            kind,
            failed_restorations: Vec::new(),
        })
    }

    pub fn select_all(&mut self) {
        for entry in &mut self.entries {
            entry.selected = true;
        }
    }

    pub fn deselect_all(&mut self) {
        for entry in &mut self.entries {
            entry.selected = false;
        }
    }

    /// Inclusive on both ends; the bounds may come in either order.
    pub fn select_range(&mut self, start: usize, end: usize) {
        let (start, end) = (start.min(end), start.max(end));
        for entry in self.entries.iter_mut().take(end.saturating_add(1)).skip(start) {
            entry.selected = true;
        }
    }

    pub fn set_selected(&mut self, index: usize, selected: bool) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn toggle_selected(&mut self, index: usize) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.selected = !entry.selected;
                true
            }
            None => false,
        }
    }

    pub fn selected(&self) -> Vec<&ImageEntry> {
        self.entries.iter().filter(|e| e.selected).collect()
    }

    pub fn selected_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.selected)
            .map(|(i, _)| i)
            .collect()
    }

    fn record(&mut self, action: Action) {
        debug!(kind = ?action.kind(), "履歴に追加");
        self.history.push(action);
    }

    fn path_order(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .map(|entry| entry.path().to_path_buf())
            .collect()
    }

    fn update_positions(&mut self) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.position = index;
        }
    }
}

fn normalize_indices(indices: &[usize], len: usize) -> Vec<usize> {
    let mut out: Vec<usize> = indices.iter().copied().filter(|&i| i < len).collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// `to` addresses the sequence after the entry at `from` has been removed.
fn move_one(entries: &mut Vec<ImageEntry>, from: usize, to: usize) {
    let entry = entries.remove(from);
    entries.insert(to, entry);
}

/// `indices` must be sorted, deduplicated and in range.
fn move_block(entries: &mut Vec<ImageEntry>, indices: &[usize], to: usize) {
    let mut moving = Vec::with_capacity(indices.len());
    for &index in indices.iter().rev() {
        moving.push(entries.remove(index));
    }
    moving.reverse();

    let removed_before = indices.iter().filter(|&&i| i < to).count();
    let at = (to - removed_before).min(entries.len());
    entries.splice(at..at, moving);
}

fn remove_recorded(entries: &mut Vec<ImageEntry>, item: &RemovedEntry) {
    let at_recorded = entries
        .get(item.index)
        .is_some_and(|entry| entry.path() == item.path);
    let index = if at_recorded {
        Some(item.index)
    } else {
        entries.iter().position(|entry| entry.path() == item.path)
    };
    if let Some(index) = index {
        entries.remove(index);
    }
}

/// Paths that no longer resolve are dropped; live entries the order does not
/// mention keep their relative order at the end.
fn restore_order(entries: &mut Vec<ImageEntry>, order: &[PathBuf]) {
    let current = std::mem::take(entries);
    let slot_of: HashMap<PathBuf, usize> = current
        .iter()
        .enumerate()
        .map(|(i, entry)| (entry.path().to_path_buf(), i))
        .collect();
    let mut slots: Vec<Option<ImageEntry>> = current.into_iter().map(Some).collect();

    let mut dangling = 0usize;
    for path in order {
        match slot_of.get(path).and_then(|&i| slots[i].take()) {
            Some(entry) => entries.push(entry),
            None => dangling += 1,
        }
    }
    entries.extend(slots.into_iter().flatten());

    if dangling > 0 {
        debug!(dangling, "並び順の記録に存在しない画像が含まれていました");
    }
}

/// Stable in both directions: equal keys keep their prior relative order.
fn sort_entries(entries: &mut Vec<ImageEntry>, ascending: bool) {
    let mut keyed: Vec<(Vec<NaturalPart>, ImageEntry)> = entries
        .drain(..)
        .map(|entry| (natural_key(entry.filename()), entry))
        .collect();
    if ascending {
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
    } else {
        keyed.sort_by(|a, b| b.0.cmp(&a.0));
    }
    entries.extend(keyed.into_iter().map(|(_, entry)| entry));
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum NaturalPart {
    Text(String),
    Number(NumberRun),
}

/// Digit run compared by numeric value, without a width limit.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NumberRun(String);

impl NumberRun {
    fn new(digits: &str) -> Self {
        let trimmed = digits.trim_start_matches('0');
        NumberRun(trimmed.to_string())
    }
}

impl Ord for NumberRun {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for NumberRun {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Alternating text/number runs, always starting and ending with a
/// (possibly empty) text run so that runs of the same kind line up.
fn natural_key(name: &str) -> Vec<NaturalPart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut digits = String::new();

    for ch in name.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if !digits.is_empty() {
            parts.push(NaturalPart::Text(std::mem::take(&mut text).to_lowercase()));
            parts.push(NaturalPart::Number(NumberRun::new(&digits)));
            digits.clear();
        }
        text.push(ch);
    }

    if !digits.is_empty() {
        parts.push(NaturalPart::Text(std::mem::take(&mut text).to_lowercase()));
        parts.push(NaturalPart::Number(NumberRun::new(&digits)));
    }
    parts.push(NaturalPart::Text(text.to_lowercase()));
    parts
}

pub fn compare_natural(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b))
}

fn contains_path(entries: &[ImageEntry], path: &Path) -> bool {
    entries.iter().any(|entry| entry.path() == path)
}
