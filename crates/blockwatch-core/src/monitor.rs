use crate::calculator::Calculator;
use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::data_structures::{BurnRate, SessionBlock, UsageEvent, UsageProjection};
use crate::dedup::Deduplicator;
use crate::error::BlockError;
use crate::identifier::SessionIdentifier;
use crate::loader::{default_data_dirs, DataLoader, EventSource, SecondarySource};
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

pub const DEFAULT_SECONDARY_INTERVAL_SECS: i64 = 5;

/// Incrementally re-scans log files and keeps reporting the active block.
///
/// Polling takes `&mut self`, so polls are serialized by the borrow checker.
/// Only files that are new or whose modification time increased are read,
/// and only bytes past the last consumed offset are parsed.
pub struct LiveMonitor {
    source: Arc<dyn EventSource>,
    secondary: Option<Arc<dyn SecondarySource>>,
    clock: Arc<dyn Clock>,
    identifier: SessionIdentifier,
    calculator: Calculator,
    file_mtimes: HashMap<PathBuf, SystemTime>,
    file_offsets: HashMap<PathBuf, usize>,
    dedup: Deduplicator,
    secondary_dedup: Deduplicator,
    events: Vec<UsageEvent>,
    blocks: Vec<SessionBlock>,
    cached_active: Option<SessionBlock>,
    current: Option<SessionBlock>,
    secondary_interval: Duration,
    last_secondary_fetch: Option<DateTime<Utc>>,
    last_poll: Option<DateTime<Utc>>,
}

impl LiveMonitor {
    pub fn new(
        source: Arc<dyn EventSource>,
        window_minutes: f64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BlockError> {
        Ok(Self {
            source,
            secondary: None,
            clock,
            identifier: SessionIdentifier::from_minutes(window_minutes)?,
            calculator: Calculator::new(),
            file_mtimes: HashMap::new(),
            file_offsets: HashMap::new(),
            dedup: Deduplicator::new(),
            secondary_dedup: Deduplicator::new(),
            events: Vec::new(),
            blocks: Vec::new(),
            cached_active: None,
            current: None,
            secondary_interval: Duration::seconds(DEFAULT_SECONDARY_INTERVAL_SECS),
            last_secondary_fetch: None,
            last_poll: None,
        })
    }

    /// Builds a monitor over the configured (or standard) Claude directories.
    pub fn from_config(config: &MonitorConfig, clock: Arc<dyn Clock>) -> Result<Self, BlockError> {
        config.validate()?;

        let roots = if config.paths.data_dirs.is_empty() {
            default_data_dirs()
        } else {
            config.paths.data_dirs.clone()
        };
        debug!(roots = ?roots, "building live monitor");

        let mut monitor = Self::new(Arc::new(DataLoader::new(roots)), config.window_minutes(), clock)?
            .with_secondary_interval(config.secondary_refresh());

        if !config.paths.secondary_dirs.is_empty() {
            monitor = monitor.with_secondary(Arc::new(DataLoader::secondary(
                config.paths.secondary_dirs.clone(),
            )));
        }

        Ok(monitor)
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn SecondarySource>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_secondary_interval(mut self, interval: std::time::Duration) -> Self {
        self.secondary_interval =
            Duration::from_std(interval).unwrap_or_else(|_| Duration::seconds(DEFAULT_SECONDARY_INTERVAL_SECS));
        self
    }

    /// Runs one refresh cycle and returns the block to display, if any.
    ///
    /// When no block is active any more, the previously active block is
    /// still returned while its last entry is less than one window old and
    /// its window has not ended.
    pub fn poll_active_block(&mut self) -> Option<SessionBlock> {
        let now = self.clock.now();

        self.ingest_changed_files();
        self.merge_secondary(now);

        self.blocks = self.identifier.identify_blocks(&self.events, now);
        let active = self.blocks.iter().rev().find(|b| b.is_active()).cloned();

        let result = match active {
            Some(block) => {
                self.cached_active = Some(block.clone());
                Some(block)
            }
            None => match self.cached_active.take() {
                Some(cached) if self.can_bridge(&cached, now) => {
                    debug!(block = cached.id(), "no active block, keeping previous one");
                    self.cached_active = Some(cached.clone());
                    Some(cached)
                }
                _ => None,
            },
        };

        debug!(
            events = self.events.len(),
            blocks = self.blocks.len(),
            files = self.file_mtimes.len(),
            active = result.is_some(),
            "poll complete"
        );

        self.last_poll = Some(now);
        self.current = result.clone();
        result
    }

    /// Forgets file modification times and offsets so the next poll re-reads
    /// every file. Identities, events and the cached block are kept.
    pub fn clear_cache(&mut self) {
        debug!(files = self.file_mtimes.len(), "clearing file cache");
        self.file_mtimes.clear();
        self.file_offsets.clear();
    }

    fn can_bridge(&self, cached: &SessionBlock, now: DateTime<Utc>) -> bool {
        let recent = cached
            .actual_end_time()
            .is_some_and(|last| now - last < self.identifier.session_duration());
        recent && now < cached.end_time()
    }

    fn ingest_changed_files(&mut self) {
        let files = match self.source.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "failed to list log files");
                return;
            }
        };

        let mut staged: Vec<(PathBuf, SystemTime)> = files
            .into_iter()
            .filter_map(|path| match self.source.modified(&path) {
                Ok(mtime) => {
                    let changed = self
                        .file_mtimes
                        .get(&path)
                        .map_or(true, |previous| mtime > *previous);
                    changed.then_some((path, mtime))
                }
                Err(e) => {
                    debug!(error = %e, "skipping file that could not be stat'ed");
                    None
                }
            })
            .collect();

        if staged.is_empty() {
            return;
        }
        staged.sort_by(|a, b| a.0.cmp(&b.0));

        let source = &self.source;
        let reads: Vec<(PathBuf, SystemTime, Result<Vec<u8>, BlockError>)> = staged
            .into_par_iter()
            .map(|(path, mtime)| {
                let bytes = source.read_file(&path);
                (path, mtime, bytes)
            })
            .collect();

        for (path, mtime, bytes) in reads {
            match bytes {
                Ok(bytes) => self.commit_file(path, mtime, &bytes),
                Err(e) => warn!(error = %e, "read failed, retrying next poll"),
            }
        }
    }

    fn commit_file(&mut self, path: PathBuf, mtime: SystemTime, bytes: &[u8]) {
        let mut offset = self.file_offsets.get(&path).copied().unwrap_or(0);
        if bytes.len() < offset {
            debug!(file = %path.display(), "file shrank, reading from the start");
            offset = 0;
        }

        let tail = &bytes[offset..];
        let mut consumed = 0;
        let mut added = 0;

        for line in tail.split_inclusive(|b| *b == b'\n') {
            let complete = line.ends_with(b"\n");
            if line.iter().all(u8::is_ascii_whitespace) {
                if complete {
                    consumed += line.len();
                }
                continue;
            }

            match self.source.parse_line(line) {
                Ok(event) => {
                    if self.dedup.accept(&event) {
                        self.events.push(event);
                        added += 1;
                    }
                }
                // an unterminated line may still be being written
                Err(_) if !complete => break,
                Err(e) => debug!(file = %path.display(), error = %e, "skipping log line"),
            }
            consumed += line.len();
        }

        debug!(file = %path.display(), added, "ingested log file");
        self.file_offsets.insert(path.clone(), offset + consumed);
        self.file_mtimes.insert(path, mtime);
    }

    fn merge_secondary(&mut self, now: DateTime<Utc>) {
        let Some(secondary) = self.secondary.as_ref() else {
            return;
        };
        let due = self
            .last_secondary_fetch
            .map_or(true, |last| now - last >= self.secondary_interval);
        if !due {
            return;
        }

        match secondary.fetch_events() {
            Ok(events) => {
                let mut added = 0;
                for event in events {
                    let event = match event.identity() {
                        Some(_) => event,
                        None => {
                            let key = content_key(&event);
                            event.with_identity(key)
                        }
                    };
                    if self.secondary_dedup.accept(&event) {
                        self.events.push(event);
                        added += 1;
                    }
                }
                debug!(added, "merged secondary events");
                self.last_secondary_fetch = Some(now);
            }
            Err(e) => warn!(error = %e, "secondary source failed, retrying next poll"),
        }
    }

    pub fn blocks(&self) -> &[SessionBlock] {
        &self.blocks
    }

    pub fn events(&self) -> &[UsageEvent] {
        &self.events
    }

    pub fn entry_count(&self) -> usize {
        self.events.len()
    }

    pub fn tracked_files(&self) -> usize {
        self.file_mtimes.len()
    }

    pub fn cached_active_block(&self) -> Option<&SessionBlock> {
        self.cached_active.as_ref()
    }

    /// Block returned by the most recent poll.
    pub fn current_block(&self) -> Option<&SessionBlock> {
        self.current.as_ref()
    }

    pub fn current_burn_rate(&self) -> Option<BurnRate> {
        let now = self.last_poll?;
        self.calculator.calculate_burn_rate(self.current.as_ref()?, now)
    }

    pub fn current_projection(&self) -> Option<UsageProjection> {
        let now = self.last_poll?;
        self.calculator.project_block_usage(self.current.as_ref()?, now)
    }

    pub fn last_poll(&self) -> Option<DateTime<Utc>> {
        self.last_poll
    }

    pub fn window(&self) -> Duration {
        self.identifier.session_duration()
    }

    pub fn calculator(&self) -> &Calculator {
        &self.calculator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Drop for LiveMonitor {
    fn drop(&mut self) {
        debug!(
            events = self.events.len(),
            identities = self.dedup.len() + self.secondary_dedup.len(),
            files = self.file_mtimes.len(),
            "live monitor dropped"
        );
    }
}

/// Stands in for an identity on secondary events that have none, since the
/// secondary source returns its full history on every fetch.
fn content_key(event: &UsageEvent) -> String {
    format!(
        "content:{}:{}:{}:{}:{}:{}",
        event.timestamp().timestamp_millis(),
        event.model(),
        event.input_tokens(),
        event.output_tokens(),
        event.cache_creation_tokens(),
        event.cache_read_tokens()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data_structures::SourceTag;
    use crate::error::ParseError;
    use chrono::TimeZone;
    use std::collections::{BTreeMap, HashSet};
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeSource {
        files: Mutex<BTreeMap<PathBuf, (SystemTime, Vec<u8>)>>,
        failing: Mutex<HashSet<PathBuf>>,
        reads: AtomicUsize,
        parser: FakeParser,
    }

    #[derive(Default)]
    struct FakeParser;

    impl FakeParser {
        fn parse(&self, line: &[u8]) -> Result<UsageEvent, ParseError> {
            DataLoader::new(Vec::new()).parse_line(line)
        }
    }

    impl FakeSource {
        fn write(&self, name: &str, mtime: u64, content: &str) {
            self.files.lock().unwrap().insert(
                PathBuf::from(name),
                (file_time(mtime), content.as_bytes().to_vec()),
            );
        }

        fn append(&self, name: &str, mtime: u64, content: &str) {
            let mut files = self.files.lock().unwrap();
            let entry = files
                .entry(PathBuf::from(name))
                .or_insert_with(|| (file_time(0), Vec::new()));
            entry.0 = file_time(mtime);
            entry.1.extend_from_slice(content.as_bytes());
        }

        fn set_failing(&self, name: &str, failing: bool) {
            let mut set = self.failing.lock().unwrap();
            if failing {
                set.insert(PathBuf::from(name));
            } else {
                set.remove(Path::new(name));
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl EventSource for FakeSource {
        fn list_files(&self) -> Result<Vec<PathBuf>, BlockError> {
            Ok(self.files.lock().unwrap().keys().cloned().collect())
        }

        fn modified(&self, path: &Path) -> Result<SystemTime, BlockError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(mtime, _)| *mtime)
                .ok_or_else(|| BlockError::source_read(path, io::ErrorKind::NotFound.into()))
        }

        fn read_file(&self, path: &Path) -> Result<Vec<u8>, BlockError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(path) {
                return Err(BlockError::source_read(path, io::Error::other("busy")));
            }
            self.files
                .lock()
                .unwrap()
                .get(path)
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| BlockError::source_read(path, io::ErrorKind::NotFound.into()))
        }

        fn parse_line(&self, line: &[u8]) -> Result<UsageEvent, ParseError> {
            self.parser.parse(line)
        }
    }

    struct FakeSecondary {
        events: Mutex<Vec<UsageEvent>>,
        fetches: AtomicUsize,
    }

    impl SecondarySource for FakeSecondary {
        fn fetch_events(&self) -> Result<Vec<UsageEvent>, BlockError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.events.lock().unwrap().clone())
        }
    }

    fn file_time(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(secs)
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn line(ts: DateTime<Utc>, input: u64, id: Option<&str>) -> String {
        let mut value = serde_json::json!({
            "timestamp": ts.to_rfc3339(),
            "message": {
                "model": "claude-sonnet-4-20250514",
                "usage": {"input_tokens": input, "output_tokens": 0}
            }
        });
        if let Some(id) = id {
            value["message"]["id"] = serde_json::json!(id);
            value["requestId"] = serde_json::json!(format!("req-{}", id));
        }
        format!("{}\n", value)
    }

    fn monitor(source: &Arc<FakeSource>, clock: &Arc<ManualClock>) -> LiveMonitor {
        LiveMonitor::new(source.clone(), 300.0, clock.clone()).unwrap()
    }

    #[test]
    fn test_end_to_end_active_block() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(9, 45)));
        source.write(
            "a.jsonl",
            1,
            &format!("{}{}", line(at(9, 0), 100, Some("m1")), line(at(9, 30), 200, Some("m2"))),
        );

        let mut monitor = monitor(&source, &clock);
        let block = monitor.poll_active_block().unwrap();

        assert_eq!(block.start_time(), at(9, 0));
        assert_eq!(block.token_counts().total(), 300);
        let burn_rate = monitor.current_burn_rate().unwrap();
        assert!((burn_rate.tokens_per_minute() - 6.666_666).abs() < 1e-3);
        assert!(monitor.current_projection().is_some());
    }

    #[test]
    fn test_unchanged_files_are_not_reread() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        source.write("a.jsonl", 1, &line(at(9, 0), 100, None));

        let mut monitor = monitor(&source, &clock);
        monitor.poll_active_block();
        monitor.poll_active_block();

        assert_eq!(source.reads(), 1);
        assert_eq!(monitor.entry_count(), 1);
    }

    #[test]
    fn test_appended_lines_parsed_once() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        source.write("a.jsonl", 1, &line(at(9, 0), 100, None));

        let mut monitor = monitor(&source, &clock);
        monitor.poll_active_block();

        source.append("a.jsonl", 2, &line(at(9, 10), 50, None));
        let block = monitor.poll_active_block().unwrap();

        assert_eq!(monitor.entry_count(), 2);
        assert_eq!(block.token_counts().total(), 150);
    }

    #[test]
    fn test_partial_line_waits_for_completion() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        let full = line(at(9, 5), 20, Some("m2"));
        let (head, rest) = full.split_at(30);
        source.write("a.jsonl", 1, &format!("{}{}", line(at(9, 0), 10, Some("m1")), head));

        let mut monitor = monitor(&source, &clock);
        monitor.poll_active_block();
        assert_eq!(monitor.entry_count(), 1);

        source.append("a.jsonl", 2, rest);
        monitor.poll_active_block();
        assert_eq!(monitor.entry_count(), 2);
    }

    #[test]
    fn test_failed_read_is_retried() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        source.write("a.jsonl", 1, &line(at(9, 0), 100, Some("m1")));
        source.set_failing("a.jsonl", true);

        let mut monitor = monitor(&source, &clock);
        assert!(monitor.poll_active_block().is_none());
        assert_eq!(monitor.entry_count(), 0);
        assert_eq!(monitor.tracked_files(), 0);

        source.set_failing("a.jsonl", false);
        assert!(monitor.poll_active_block().is_some());
        assert_eq!(monitor.entry_count(), 1);
        assert_eq!(source.reads(), 2);
    }

    #[test]
    fn test_clear_cache_rereads_without_duplicates() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        source.write(
            "a.jsonl",
            1,
            &format!("{}{}", line(at(9, 0), 100, Some("m1")), line(at(9, 5), 100, Some("m2"))),
        );
        source.write("b.jsonl", 1, &line(at(9, 20), 100, Some("m3")));

        let mut monitor = monitor(&source, &clock);
        monitor.poll_active_block();
        assert_eq!(source.reads(), 2);

        monitor.clear_cache();
        assert!(monitor.cached_active_block().is_some());
        let block = monitor.poll_active_block().unwrap();

        assert_eq!(source.reads(), 4);
        assert_eq!(monitor.entry_count(), 3);
        assert_eq!(block.token_counts().total(), 300);
    }

    #[test]
    fn test_truncated_file_is_read_from_start() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        source.write(
            "a.jsonl",
            1,
            &format!("{}{}", line(at(9, 0), 100, Some("m1")), line(at(9, 5), 100, Some("m2"))),
        );

        let mut monitor = monitor(&source, &clock);
        monitor.poll_active_block();

        source.write("a.jsonl", 2, &line(at(9, 30), 7, Some("m3")));
        monitor.poll_active_block();

        assert_eq!(monitor.entry_count(), 3);
    }

    #[test]
    fn test_flicker_bridge_keeps_previous_block() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(13, 30)));
        source.write("a.jsonl", 1, &line(at(9, 10), 100, Some("m1")));

        let mut monitor = monitor(&source, &clock);
        let first = monitor.poll_active_block().unwrap();
        assert_eq!(first.start_time(), at(9, 0));

        // a late event pulls 09:10 into an earlier block that is no longer active
        source.write("b.jsonl", 1, &line(at(5, 30), 10, Some("m0")));
        let bridged = monitor.poll_active_block().unwrap();
        assert!(monitor.blocks().iter().all(|b| !b.is_active()));
        assert_eq!(bridged.id(), first.id());

        clock.set(at(14, 0));
        assert!(monitor.poll_active_block().is_none());
        assert!(monitor.cached_active_block().is_none());
    }

    #[test]
    fn test_clock_stepping_back_keeps_previous_block() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(9, 30)));
        source.write("a.jsonl", 1, &line(at(9, 10), 100, Some("m1")));

        let mut monitor = monitor(&source, &clock);
        let first = monitor.poll_active_block().unwrap();
        assert_eq!(first.start_time(), at(9, 0));

        // no new events, the clock briefly reads earlier than the block start
        clock.set(at(8, 59));
        let bridged = monitor.poll_active_block().unwrap();
        assert!(monitor.blocks().iter().all(|b| !b.is_active()));
        assert_eq!(bridged.id(), first.id());
        assert_eq!(source.reads(), 1);

        clock.set(at(9, 31));
        let resumed = monitor.poll_active_block().unwrap();
        assert!(resumed.is_active());
        assert_eq!(resumed.id(), first.id());
    }

    #[test]
    fn test_block_expires_without_new_events() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(9, 30)));
        source.write("a.jsonl", 1, &line(at(9, 0), 100, None));

        let mut monitor = monitor(&source, &clock);
        assert!(monitor.poll_active_block().is_some());

        clock.set(at(14, 1));
        assert!(monitor.poll_active_block().is_none());
        assert!(monitor.current_burn_rate().is_none());
    }

    #[test]
    fn test_secondary_merged_on_cadence() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        let secondary = Arc::new(FakeSecondary {
            events: Mutex::new(vec![UsageEvent::new(
                at(9, 15),
                "claude-opus-4-20250514".to_string(),
                40,
                2,
                0,
                0,
                None,
            )
            .with_source(SourceTag::Secondary)]),
            fetches: AtomicUsize::new(0),
        });

        let mut monitor = monitor(&source, &clock).with_secondary(secondary.clone());
        let block = monitor.poll_active_block().unwrap();
        assert!(block.sources().contains(&SourceTag::Secondary));
        assert_eq!(secondary.fetches.load(Ordering::SeqCst), 1);

        clock.advance(Duration::seconds(2));
        monitor.poll_active_block();
        assert_eq!(secondary.fetches.load(Ordering::SeqCst), 1);

        clock.advance(Duration::seconds(3));
        monitor.poll_active_block();
        assert_eq!(secondary.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.entry_count(), 1);
    }

    #[test]
    fn test_invalid_window_rejected() {
        let source = Arc::new(FakeSource::default());
        let clock = Arc::new(ManualClock::new(at(10, 0)));
        assert!(matches!(
            LiveMonitor::new(source, 0.0, clock),
            Err(BlockError::InvalidConfiguration(_))
        ));
    }
}
