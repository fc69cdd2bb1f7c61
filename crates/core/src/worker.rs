use crate::entry::ImageEntry;
use crate::export::{
    export_batch, CancelToken, ExportProgress, ExportRequest, ExportState, ExportSummary,
};
use crate::loader::{
    discover_with_progress, Discovery, LoadError, LoadOptions, LoadProgress, LoadSource,
};
use crossbeam_channel::{unbounded, Receiver, TryRecvError};
use std::io;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("ワーカースレッドを起動できませんでした: {0}")]
    Spawn(#[from] io::Error),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("ワーカースレッドが結果を返さずに終了しました")]
    Disconnected,
}

#[derive(Debug)]
pub enum LoadEvent {
    Progress(LoadProgress),
    Finished(Discovery),
    Failed(LoadError),
}

#[derive(Debug, Clone)]
pub enum ExportEvent {
    Started { total: usize },
    Progress(ExportProgress),
    Finished(ExportSummary),
}

pub struct LoadTask {
    events: Receiver<LoadEvent>,
    handle: Option<JoinHandle<()>>,
}

impl LoadTask {
    pub fn events(&self) -> &Receiver<LoadEvent> {
        &self.events
    }

    /// Blocks until the scan ends. Progress events not yet drained are dropped.
    pub fn wait(mut self) -> Result<Discovery, WorkerError> {
        let mut outcome = None;
        for event in self.events.iter() {
            match event {
                LoadEvent::Progress(_) => {}
                LoadEvent::Finished(found) => {
                    outcome = Some(Ok(found));
                    break;
                }
                LoadEvent::Failed(err) => {
                    outcome = Some(Err(WorkerError::Load(err)));
                    break;
                }
            }
        }
        join(self.handle.take());
        outcome.unwrap_or(Err(WorkerError::Disconnected))
    }
}

pub fn spawn_load(source: LoadSource, options: LoadOptions) -> Result<LoadTask, WorkerError> {
    let (tx, rx) = unbounded();
    let handle = thread::Builder::new()
        .name("sortsnap-load".to_string())
        .spawn(move || {
            let progress_tx = tx.clone();
            let result = discover_with_progress(&source, &options, |progress| {
                let _ = progress_tx.send(LoadEvent::Progress(progress));
            });
            let event = match result {
                Ok(found) => LoadEvent::Finished(found),
                Err(err) => LoadEvent::Failed(err),
            };
            if tx.send(event).is_err() {
                debug!("読み込み結果の受信側が既に閉じています");
            }
        })?;

    Ok(LoadTask {
        events: rx,
        handle: Some(handle),
    })
}

/// A running export batch. `state` stays `Idle` until the worker reports
/// `Started`; `poll` drains pending events without blocking and keeps it current.
pub struct ExportTask {
    events: Receiver<ExportEvent>,
    cancel: CancelToken,
    state: ExportState,
    summary: Option<ExportSummary>,
    handle: Option<JoinHandle<()>>,
}

impl ExportTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn summary(&self) -> Option<&ExportSummary> {
        self.summary.as_ref()
    }

    /// Blocks for the next event; `None` once the worker has hung up.
    pub fn next_event(&mut self) -> Option<ExportEvent> {
        let event = self.events.recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    pub fn poll(&mut self) -> Vec<ExportEvent> {
        let mut drained = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    self.observe(&event);
                    drained.push(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.summary.is_none() {
                        warn!("保存スレッドが結果を返さずに終了しました");
                        self.state = ExportState::Failed;
                    }
                    break;
                }
            }
        }
        drained
    }

    pub fn wait(mut self) -> Result<ExportSummary, WorkerError> {
        while self.summary.is_none() {
            match self.events.recv() {
                Ok(event) => self.observe(&event),
                Err(_) => break,
            }
        }
        join(self.handle.take());
        self.summary.ok_or(WorkerError::Disconnected)
    }

    fn observe(&mut self, event: &ExportEvent) {
        match event {
            ExportEvent::Started { .. } | ExportEvent::Progress(_) => {
                self.state = ExportState::Running;
            }
            ExportEvent::Finished(summary) => {
                self.state = summary.outcome.into();
                self.summary = Some(summary.clone());
            }
        }
    }
}

pub fn spawn_export(
    entries: Vec<ImageEntry>,
    request: ExportRequest,
) -> Result<ExportTask, WorkerError> {
    spawn_export_with(entries, request, CancelToken::new())
}

/// Like `spawn_export`, with a caller-supplied cancellation token.
pub fn spawn_export_with(
    entries: Vec<ImageEntry>,
    request: ExportRequest,
    cancel: CancelToken,
) -> Result<ExportTask, WorkerError> {
    let (tx, rx) = unbounded();
    let worker_cancel = cancel.clone();
    let handle = thread::Builder::new()
        .name("sortsnap-export".to_string())
        .spawn(move || {
            let _ = tx.send(ExportEvent::Started {
                total: entries.len(),
            });
            let summary = export_batch(&entries, &request, &worker_cancel, |progress| {
                let _ = tx.send(ExportEvent::Progress(progress));
            });
            if tx.send(ExportEvent::Finished(summary)).is_err() {
                debug!("保存結果の受信側が既に閉じています");
            }
        })?;

    Ok(ExportTask {
        events: rx,
        cancel,
        state: ExportState::Idle,
        summary: None,
        handle: Some(handle),
    })
}

fn join(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            warn!("ワーカースレッドがパニックしました");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::test_support::write_png;
    use crate::export::ExportOutcome;
    use crate::template::RenameSettings;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_task_reports_progress_then_result() {
        let temp = tempdir().expect("tempdir");
        for n in 0..3 {
            write_png(temp.path(), &format!("{n}.png"), 1, 1);
        }
        let task = spawn_load(
            LoadSource::Folder(temp.path().to_path_buf()),
            LoadOptions::default(),
        )
        .expect("spawn");

        let mut progress = Vec::new();
        let mut finished = None;
        for event in task.events().iter() {
            match event {
                LoadEvent::Progress(p) => progress.push(p.current),
                LoadEvent::Finished(found) => {
                    finished = Some(found);
                    break;
                }
                LoadEvent::Failed(err) => panic!("unexpected failure: {err}"),
            }
        }
        assert_eq!(progress, vec![1, 2, 3]);
        assert_eq!(finished.expect("finished").entries.len(), 3);
    }

    #[test]
    fn load_task_surfaces_structural_errors() {
        let temp = tempdir().expect("tempdir");
        let task = spawn_load(
            LoadSource::Folder(temp.path().join("missing")),
            LoadOptions::default(),
        )
        .expect("spawn");
        let err = task.wait().expect_err("must fail");
        assert!(matches!(err, WorkerError::Load(LoadError::NotFound(_))));
    }

    #[test]
    fn export_task_runs_to_completion() {
        let temp = tempdir().expect("tempdir");
        let out = temp.path().join("out");
        fs::create_dir(&out).expect("create out");
        let entries: Vec<ImageEntry> = (0..3)
            .map(|n| {
                let path = write_png(temp.path(), &format!("{n}.png"), 1, 1);
                ImageEntry::open(path, n).expect("open")
            })
            .collect();

        let mut task = spawn_export(entries, ExportRequest::new(&out, RenameSettings::default()))
            .expect("spawn");
        assert_eq!(task.state(), ExportState::Idle);

        match task.next_event() {
            Some(ExportEvent::Started { total }) => assert_eq!(total, 3),
            other => panic!("expected Started first, got {other:?}"),
        }
        assert_eq!(task.state(), ExportState::Running);

        let summary = task.wait().expect("summary");
        assert_eq!(summary.outcome, ExportOutcome::Completed);
        assert_eq!(summary.succeeded, 3);
        assert!(out.join("003.png").exists());
    }

    #[test]
    fn pre_cancelled_export_writes_nothing() {
        let temp = tempdir().expect("tempdir");
        let out = temp.path().join("out");
        fs::create_dir(&out).expect("create out");
        let path = write_png(temp.path(), "a.png", 1, 1);
        let entries = vec![ImageEntry::open(path, 0).expect("open")];

        let cancel = CancelToken::new();
        cancel.cancel();
        let mut task = spawn_export_with(
            entries,
            ExportRequest::new(&out, RenameSettings::default()),
            cancel,
        )
        .expect("spawn");

        let mut events = Vec::new();
        while task.summary().is_none() {
            events.extend(task.poll());
            if task.state() == ExportState::Failed {
                break;
            }
            thread::yield_now();
        }

        assert_eq!(task.state(), ExportState::CancelledPartial);
        assert!(matches!(events.first(), Some(ExportEvent::Started { total: 1 })));
        let summary = task.wait().expect("summary");
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.not_attempted, 1);
        assert!(!out.join("001.png").exists());
    }
}
