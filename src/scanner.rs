use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use log::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::AppConfig;
use crate::error::ScanError;
use crate::models::{NewGame, ScanSummary};

/// Capacity of the scan event channel. Progress is de-duplicated, so a scan
/// produces at most 101 progress events plus one terminal event.
const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Percentage of files visited so far, never decreasing.
    Progress(u8),
    /// Sent once, after `Progress(100)`.
    Finished(ScanSummary),
    Cancelled,
}

impl ScanEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Finished(_) | ScanEvent::Cancelled)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Two-pass executable finder: the first pass counts files so the second can
/// report a percentage.
#[derive(Debug, Clone)]
pub struct Scanner {
    roots: Vec<PathBuf>,
    suffix: String,
}

impl Scanner {
    pub fn new(roots: Vec<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            roots,
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.scan_roots.clone(), config.executable_suffix.clone())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Runs the scan on the current thread, handing every event to `emit`.
    ///
    /// `emit` returns `false` when nobody is listening any more, which stops
    /// the scan without a terminal event.
    pub fn run<F>(&self, cancel: &CancelToken, mut emit: F)
    where
        F: FnMut(ScanEvent) -> bool,
    {
        let roots = self.existing_roots();
        info!("scanning {} roots for *{}", roots.len(), self.suffix);

        let Some(total) = count_files(&roots, cancel) else {
            emit(ScanEvent::Cancelled);
            return;
        };
        debug!("{total} files to visit");

        let mut progress = ProgressTracker::new(total);
        let mut summary = ScanSummary::default();

        for root in &roots {
            for entry in WalkDir::new(root) {
                if cancel.is_cancelled() {
                    info!("scan cancelled after {} files", summary.visited);
                    emit(ScanEvent::Cancelled);
                    return;
                }

                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!("skipping unreadable entry: {err}");
                        summary.unreadable += 1;
                        continue;
                    }
                };
                if !is_file_like(&entry) {
                    continue;
                }

                if self.matches(&entry) {
                    if let Some(game) = NewGame::from_executable(entry.path()) {
                        debug!("found {}", game.path);
                        summary.found.push(game);
                    }
                }

                summary.visited += 1;
                if let Some(percent) = progress.advance() {
                    if !emit(ScanEvent::Progress(percent)) {
                        return;
                    }
                }
            }
        }

        if let Some(percent) = progress.finish() {
            if !emit(ScanEvent::Progress(percent)) {
                return;
            }
        }
        info!(
            "scan finished: {} executables in {} files, {} unreadable",
            summary.found.len(),
            summary.visited,
            summary.unreadable
        );
        emit(ScanEvent::Finished(summary));
    }

    /// Roots that exist, made absolute. Missing roots are silently dropped.
    fn existing_roots(&self) -> Vec<PathBuf> {
        self.roots
            .iter()
            .filter(|root| {
                let exists = root.is_dir();
                if !exists {
                    debug!("scan root {} does not exist", root.display());
                }
                exists
            })
            .map(|root| std::path::absolute(root).unwrap_or_else(|_| root.clone()))
            .collect()
    }

    fn matches(&self, entry: &DirEntry) -> bool {
        has_suffix(&entry.file_name().to_string_lossy(), &self.suffix)
    }
}

fn has_suffix(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.is_char_boundary(name.len() - suffix.len())
        && name[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
}

fn is_file_like(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    // Symlinks count only when they resolve to a file; dangling ones are skipped.
    file_type.is_file() || (file_type.is_symlink() && entry.path().is_file())
}

/// First pass. Returns `None` if cancelled midway.
fn count_files(roots: &[PathBuf], cancel: &CancelToken) -> Option<u64> {
    let mut total = 0;
    for root in roots {
        for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
            if cancel.is_cancelled() {
                return None;
            }
            if is_file_like(&entry) {
                total += 1;
            }
        }
    }
    Some(total)
}

struct ProgressTracker {
    total: u64,
    visited: u64,
    last: Option<u8>,
}

impl ProgressTracker {
    fn new(total: u64) -> Self {
        Self {
            total,
            visited: 0,
            last: None,
        }
    }

    /// Counts one visited file; returns the new percentage if it changed.
    fn advance(&mut self) -> Option<u8> {
        self.visited += 1;
        self.report(percent(self.visited, self.total))
    }

    /// Forces the sequence to end at 100, even if files vanished between passes.
    fn finish(&mut self) -> Option<u8> {
        self.report(100)
    }

    fn report(&mut self, value: u8) -> Option<u8> {
        match self.last {
            Some(last) if value <= last => None,
            _ => {
                self.last = Some(value);
                Some(value)
            }
        }
    }
}

fn percent(visited: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (visited.saturating_mul(100) / total).min(100) as u8
}

struct ActiveScan {
    cancel: CancelToken,
    events: Receiver<ScanEvent>,
}

/// Owns the single background scan the UI may have in flight.
#[derive(Default)]
pub struct ScanController {
    active: Option<ActiveScan>,
}

impl ScanController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `scanner` on a background thread. `wake` runs after every event
    /// is queued so the owner can schedule a poll.
    ///
    /// Fails with [`ScanError::AlreadyRunning`] until the previous scan's
    /// terminal event has been observed through [`ScanController::poll`].
    pub fn start<W>(&mut self, scanner: Scanner, wake: W) -> Result<(), ScanError>
    where
        W: Fn() + Send + 'static,
    {
        if self.is_running() {
            return Err(ScanError::AlreadyRunning);
        }

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::sync_channel(EVENT_BUFFER);
        let token = cancel.clone();
        thread::Builder::new()
            .name("game-scan".to_string())
            .spawn(move || {
                scanner.run(&token, |event| {
                    let delivered = tx.send(event).is_ok();
                    wake();
                    delivered
                });
            })
            .map_err(ScanError::Spawn)?;

        self.active = Some(ActiveScan { cancel, events: rx });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Asks the running scan to stop. It will still deliver `Cancelled`.
    pub fn cancel(&self) {
        if let Some(active) = &self.active {
            active.cancel.cancel();
        }
    }

    /// Drains queued events without blocking.
    pub fn poll(&mut self) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        let Some(active) = &self.active else {
            return events;
        };

        let mut done = false;
        loop {
            match active.events.try_recv() {
                Ok(event) => {
                    done = event.is_terminal();
                    events.push(event);
                    if done {
                        break;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("scan thread exited without a result");
                    done = true;
                    break;
                }
            }
        }

        if done {
            self.active = None;
        }
        events
    }
}

impl Drop for ScanController {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Convenience for callers that already hold a path list.
pub fn scan_roots_exist(roots: &[PathBuf]) -> bool {
    roots.iter().map(PathBuf::as_path).any(Path::is_dir)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use super::*;

    fn collect(scanner: &Scanner, cancel: &CancelToken) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        scanner.run(cancel, |event| {
            events.push(event);
            true
        });
        events
    }

    fn progress_values(events: &[ScanEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                ScanEvent::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn empty_root_reports_100_and_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");

        let events = collect(&scanner, &CancelToken::new());
        assert_eq!(progress_values(&events), [100]);
        match events.last() {
            Some(ScanEvent::Finished(summary)) => {
                assert!(summary.found.is_empty());
                assert_eq!(summary.visited, 0);
            }
            other => panic!("unexpected last event {other:?}"),
        }
    }

    #[test]
    fn missing_roots_contribute_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Scanner::new(
            vec![dir.path().join("nope"), dir.path().join("also-nope")],
            ".exe",
        );

        let events = collect(&scanner, &CancelToken::new());
        assert_eq!(progress_values(&events), [100]);
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished(summary)) if summary.found.is_empty()
        ));
        assert!(!scan_roots_exist(scanner.roots()));
    }

    #[test]
    fn finds_every_matching_file_with_absolute_paths() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let expected = [
            first.path().join("chess.exe"),
            first.path().join("deep").join("nested").join("go.exe"),
            second.path().join("Shogi.EXE"),
        ];
        for path in &expected {
            touch(path);
        }
        touch(&first.path().join("readme.txt"));
        touch(&first.path().join("deep").join("data.pak"));
        touch(&second.path().join("exe"));

        let scanner = Scanner::new(
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
            ".exe",
        );
        let events = collect(&scanner, &CancelToken::new());

        let Some(ScanEvent::Finished(summary)) = events.last() else {
            panic!("scan did not finish: {events:?}");
        };
        assert_eq!(summary.visited, 6);

        let mut found: Vec<_> = summary.found.iter().map(|g| g.path.clone()).collect();
        found.sort();
        let mut wanted: Vec<_> = expected
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        wanted.sort();
        assert_eq!(found, wanted);

        for game in &summary.found {
            assert!(Path::new(&game.path).is_absolute());
            assert_eq!(
                Path::new(&game.path).file_name().unwrap().to_string_lossy(),
                game.name
            );
        }
    }

    #[test]
    fn progress_is_monotonic_and_batch_comes_last() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..7 {
            touch(&dir.path().join(format!("game{i}.exe")));
        }
        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");

        let events = collect(&scanner, &CancelToken::new());
        let values = progress_values(&events);
        assert!(values.windows(2).all(|w| w[0] < w[1]), "{values:?}");
        assert_eq!(values.last(), Some(&100));
        assert_eq!(values.len(), 7);

        let finished_at = events
            .iter()
            .position(|e| matches!(e, ScanEvent::Finished(_)))
            .unwrap();
        assert_eq!(finished_at, events.len() - 1);
        assert!(matches!(
            events[finished_at - 1],
            ScanEvent::Progress(100)
        ));
    }

    #[test]
    fn cancelled_scan_sends_no_batch() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("game.exe"));
        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");

        let cancel = CancelToken::new();
        cancel.cancel();
        let events = collect(&scanner, &cancel);
        assert!(matches!(events.as_slice(), [ScanEvent::Cancelled]));
    }

    #[test]
    fn stops_quietly_when_listener_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            touch(&dir.path().join(format!("game{i}.exe")));
        }
        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");

        let mut calls = 0;
        scanner.run(&CancelToken::new(), |_| {
            calls += 1;
            false
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn percent_never_exceeds_100() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 66);
        assert_eq!(percent(5, 3), 100);
    }

    #[test]
    fn tracker_reaches_100_when_files_vanish() {
        let mut tracker = ProgressTracker::new(4);
        assert_eq!(tracker.advance(), Some(25));
        assert_eq!(tracker.advance(), Some(50));
        assert_eq!(tracker.finish(), Some(100));
        assert_eq!(tracker.finish(), None);
    }

    #[test]
    fn suffix_match_ignores_ascii_case() {
        assert!(has_suffix("game.exe", ".exe"));
        assert!(has_suffix("GAME.EXE", ".exe"));
        assert!(!has_suffix("game.exe.txt", ".exe"));
        assert!(!has_suffix("exe", ".exe"));
        assert!(!has_suffix("ゲーム", ".exe"));
    }

    fn drain_until_terminal(controller: &mut ScanController) -> Vec<ScanEvent> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while controller.is_running() {
            assert!(Instant::now() < deadline, "scan did not finish in time");
            events.extend(controller.poll());
            thread::sleep(Duration::from_millis(5));
        }
        events
    }

    #[test]
    fn controller_runs_a_single_scan() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.exe"));
        touch(&dir.path().join("b.exe"));
        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");

        let mut controller = ScanController::new();
        controller.start(scanner.clone(), || {}).unwrap();
        assert!(matches!(
            controller.start(scanner.clone(), || {}),
            Err(ScanError::AlreadyRunning)
        ));

        let events = drain_until_terminal(&mut controller);
        assert_eq!(progress_values(&events).last(), Some(&100));
        assert!(matches!(
            events.last(),
            Some(ScanEvent::Finished(summary)) if summary.found.len() == 2
        ));

        // Once the result is observed a new scan may start.
        controller.start(scanner, || {}).unwrap();
        drain_until_terminal(&mut controller);
    }

    #[test]
    fn controller_wakes_owner_for_each_event() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.exe"));
        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");

        let (wake_tx, wake_rx) = mpsc::channel();
        let mut controller = ScanController::new();
        controller
            .start(scanner, move || {
                let _ = wake_tx.send(());
            })
            .unwrap();

        let events = drain_until_terminal(&mut controller);
        // The last wake may land just after its event was drained.
        for _ in 0..events.len() {
            wake_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(wake_rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_counted_and_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("ok.exe"));
        let locked = dir.path().join("locked");
        touch(&locked.join("hidden.exe"));
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not stop root.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");
        let events = collect(&scanner, &CancelToken::new());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(progress_values(&events).last(), Some(&100));
        let Some(ScanEvent::Finished(summary)) = events.last() else {
            panic!("scan did not finish: {events:?}");
        };
        assert!(summary.unreadable >= 1);
        assert_eq!(summary.visited, 1);
        let names: Vec<_> = summary.found.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["ok.exe"]);
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("real.exe"));
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("ghost.exe")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real.exe"), dir.path().join("alias.exe"))
            .unwrap();

        let scanner = Scanner::new(vec![dir.path().to_path_buf()], ".exe");
        let events = collect(&scanner, &CancelToken::new());

        assert_eq!(progress_values(&events).last(), Some(&100));
        let Some(ScanEvent::Finished(summary)) = events.last() else {
            panic!("scan did not finish: {events:?}");
        };
        let mut names: Vec<_> = summary.found.iter().map(|g| g.name.as_str()).collect();
        names.sort();
        assert_eq!(names, ["alias.exe", "real.exe"]);
    }

    /// A wake callback that parks the scan thread on its first event until
    /// the returned sender is dropped. The receiver reports that first event.
    fn gated_wake() -> (impl Fn() + Send + 'static, Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let gate = Mutex::new(Some((started_tx, release_rx)));
        let wake = move || {
            if let Some((started, release)) = gate.lock().unwrap().take() {
                let _ = started.send(());
                let _ = release.recv();
            }
        };
        (wake, started_rx, release_tx)
    }

    fn many_games(dir: &Path, count: usize) -> Scanner {
        for i in 0..count {
            touch(&dir.join(format!("game{i}.exe")));
        }
        Scanner::new(vec![dir.to_path_buf()], ".exe")
    }

    #[test]
    fn cancel_stops_a_running_scan() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = many_games(dir.path(), 20);
        let (wake, started, release) = gated_wake();

        let mut controller = ScanController::new();
        controller.start(scanner, wake).unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        controller.cancel();
        drop(release);

        let events = drain_until_terminal(&mut controller);
        assert!(matches!(events.last(), Some(ScanEvent::Cancelled)), "{events:?}");
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Finished(_))));
        assert!(!progress_values(&events).contains(&100));
    }

    #[test]
    fn dropping_the_controller_cancels_its_scan() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = many_games(dir.path(), 20);
        let (gate, started, release) = gated_wake();
        let (alive_tx, alive_rx) = mpsc::channel::<()>();

        let mut controller = ScanController::new();
        controller
            .start(scanner, move || {
                gate();
                let _ = alive_tx.send(());
            })
            .unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        let token = controller.active.as_ref().unwrap().cancel.clone();
        drop(controller);
        assert!(token.is_cancelled());
        drop(release);

        // The wake callback is dropped with the scan thread.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            match alive_rx.recv_timeout(Duration::from_millis(50)) {
                Ok(()) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    assert!(Instant::now() < deadline, "scan thread kept running");
                }
            }
        }
    }
}
