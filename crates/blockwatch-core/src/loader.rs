use crate::data_structures::{SourceTag, TokenCounts, UsageEvent};
use crate::dedup::{dedupe, identity_for};
use crate::error::{BlockError, ParseError};
use crate::pricing::{CostOracle, PricingProvider};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Where the live monitor gets its log files from.
pub trait EventSource: Send + Sync {
    fn list_files(&self) -> Result<Vec<PathBuf>, BlockError>;
    fn modified(&self, path: &Path) -> Result<SystemTime, BlockError>;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>, BlockError>;
    fn parse_line(&self, line: &[u8]) -> Result<UsageEvent, ParseError>;
}

/// A second log family polled on its own cadence and merged into the stream.
pub trait SecondarySource: Send + Sync {
    fn fetch_events(&self) -> Result<Vec<UsageEvent>, BlockError>;
}

const STANDARD_DATA_DIRS: [&str; 2] = ["~/.config/claude/projects", "~/.claude/projects"];

/// Project directories from `CLAUDE_CONFIG_DIR` (comma separated) or the
/// standard locations. Only directories that exist are returned.
pub fn default_data_dirs() -> Vec<PathBuf> {
    let candidates: Vec<PathBuf> = match std::env::var("CLAUDE_CONFIG_DIR") {
        Ok(value) if !value.trim().is_empty() => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| PathBuf::from(shellexpand::tilde(s).as_ref()).join("projects"))
            .collect(),
        _ => STANDARD_DATA_DIRS
            .iter()
            .map(|s| PathBuf::from(shellexpand::tilde(s).as_ref()))
            .collect(),
    };

    candidates.into_iter().filter(|p| p.is_dir()).collect()
}

/// Reads Claude-style JSONL conversation logs.
pub struct DataLoader {
    roots: Vec<PathBuf>,
    source: SourceTag,
    pricing: Arc<dyn CostOracle>,
}

impl DataLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            source: SourceTag::Primary,
            pricing: Arc::new(PricingProvider::new()),
        }
    }

    /// Events are tagged secondary and their identities namespaced so they
    /// never collide with primary identities.
    pub fn secondary(roots: Vec<PathBuf>) -> Self {
        Self {
            source: SourceTag::Secondary,
            ..Self::new(roots)
        }
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn CostOracle>) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<UsageEvent>> {
        let bytes = fs::read(&path)
            .with_context(|| format!("Failed to open file: {}", path.as_ref().display()))?;

        Ok(self.parse_lines(&bytes))
    }

    /// Every `.jsonl` file below `dir_path`, deduplicated and sorted by time.
    pub fn load_from_directory<P: AsRef<Path>>(&self, dir_path: P) -> Result<Vec<UsageEvent>> {
        let files = discover_jsonl(dir_path.as_ref())
            .with_context(|| format!("Failed to read directory: {}", dir_path.as_ref().display()))?;

        Ok(self.load_files(&files))
    }

    /// Every `.jsonl` file under all configured roots. A message mirrored
    /// under two roots is kept once.
    pub fn load_all(&self) -> Result<Vec<UsageEvent>> {
        let files = self.list_files().context("Failed to list data directories")?;
        Ok(self.load_files(&files))
    }

    fn load_files(&self, files: &[PathBuf]) -> Vec<UsageEvent> {
        let per_file: Vec<Vec<UsageEvent>> = files
            .par_iter()
            .map(|path| match self.load_from_file(path) {
                Ok(events) => events,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable log file");
                    Vec::new()
                }
            })
            .collect();

        let mut events = dedupe(per_file.into_iter().flatten().collect());
        events.sort_by_key(|e| e.timestamp());
        events
    }

    /// Parses every complete line, skipping lines that carry no usage.
    pub fn parse_lines(&self, bytes: &[u8]) -> Vec<UsageEvent> {
        let mut events = Vec::new();
        for line in bytes.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match self.parse_line(line) {
                Ok(event) => events.push(event),
                Err(e) => debug!(error = %e, "skipping log line"),
            }
        }
        events
    }

    fn parse_value(&self, json: &Value) -> Result<UsageEvent, ParseError> {
        let message = json.get("message");
        let (usage, model) = match message.and_then(|m| m.get("usage")) {
            Some(usage) => (
                usage,
                message
                    .and_then(|m| m.get("model"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown"),
            ),
            None => {
                let usage = json.get("usage").ok_or(ParseError::NoUsage)?;
                let model = json
                    .get("model")
                    .and_then(Value::as_str)
                    .ok_or(ParseError::MissingField("model"))?;
                (usage, model)
            }
        };

        let timestamp = parse_timestamp(json)?;
        let tokens = TokenCounts::new(
            extract_u64(usage, "input_tokens")?,
            extract_u64(usage, "output_tokens")?,
            extract_u64(usage, "cache_creation_input_tokens").unwrap_or(0),
            extract_u64(usage, "cache_read_input_tokens").unwrap_or(0),
        );

        let cost = ["costUSD", "cost_usd"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_f64))
            .or_else(|| self.pricing.cost_for(model, &tokens));

        let mut event = UsageEvent::new(
            timestamp,
            model.to_string(),
            tokens.input_tokens(),
            tokens.output_tokens(),
            tokens.cache_creation_tokens(),
            tokens.cache_read_tokens(),
            cost,
        )
        .with_source(self.source);

        let message_id = message
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let request_id = ["requestId", "request_id"]
            .iter()
            .find_map(|key| json.get(*key).and_then(Value::as_str))
            .unwrap_or_default();

        if let Some(identity) = identity_for(message_id, request_id) {
            event = match self.source {
                SourceTag::Primary => event.with_identity(identity),
                SourceTag::Secondary => event.with_identity(format!("secondary:{}", identity)),
            };
        }

        Ok(event)
    }
}

impl EventSource for DataLoader {
    fn list_files(&self) -> Result<Vec<PathBuf>, BlockError> {
        let mut files = Vec::new();
        for root in &self.roots {
            if !root.is_dir() {
                debug!(root = %root.display(), "data directory does not exist");
                continue;
            }
            match discover_jsonl(root) {
                Ok(found) => files.extend(found),
                Err(e) => warn!(root = %root.display(), error = %e, "skipping data directory"),
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    fn modified(&self, path: &Path) -> Result<SystemTime, BlockError> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|e| BlockError::source_read(path, e))
    }

    fn read_file(&self, path: &Path) -> Result<Vec<u8>, BlockError> {
        fs::read(path).map_err(|e| BlockError::source_read(path, e))
    }

    fn parse_line(&self, line: &[u8]) -> Result<UsageEvent, ParseError> {
        let json: Value = serde_json::from_slice(line)?;
        self.parse_value(&json)
    }
}

impl SecondarySource for DataLoader {
    fn fetch_events(&self) -> Result<Vec<UsageEvent>, BlockError> {
        let mut events = Vec::new();
        for path in self.list_files()? {
            match self.read_file(&path) {
                Ok(bytes) => events.extend(self.parse_lines(&bytes)),
                Err(e) => warn!(error = %e, "skipping secondary log file"),
            }
        }
        Ok(events)
    }
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new(default_data_dirs())
    }
}

fn discover_jsonl(root: &Path) -> Result<Vec<PathBuf>, BlockError> {
    let root_str = root
        .to_str()
        .ok_or_else(|| BlockError::Discovery(format!("non UTF-8 path: {}", root.display())))?;
    let pattern = format!("{}/**/*.jsonl", glob::Pattern::escape(root_str));

    let entries = glob::glob(&pattern).map_err(|e| BlockError::Discovery(e.to_string()))?;
    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "unreadable path during discovery"),
        }
    }
    files.sort();
    Ok(files)
}

fn parse_timestamp(json: &Value) -> Result<DateTime<Utc>, ParseError> {
    let raw = json
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("timestamp"))?;

    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ParseError::Timestamp(raw.to_string()))
}

fn extract_u64(json: &Value, key: &'static str) -> Result<u64, ParseError> {
    json.get(key)
        .and_then(Value::as_u64)
        .ok_or(ParseError::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const FLAT: &str = r#"{"timestamp": "2024-01-01T12:00:00Z", "model": "claude-3-sonnet-20240229", "usage": {"input_tokens": 100, "output_tokens": 50, "cache_creation_input_tokens": 25, "cache_read_input_tokens": 10}, "cost_usd": 0.001}"#;
    const NESTED: &str = r#"{"timestamp":"2024-01-01T13:00:00.000Z","requestId":"req_1","message":{"id":"msg_1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":200,"output_tokens":100}}}"#;

    #[test]
    fn test_parse_flat_line() {
        let loader = DataLoader::new(Vec::new());
        let event = loader.parse_line(FLAT.as_bytes()).unwrap();
        assert_eq!(event.model(), "claude-3-sonnet-20240229");
        assert_eq!(event.input_tokens(), 100);
        assert_eq!(event.cache_creation_tokens(), 25);
        assert_eq!(event.cache_read_tokens(), 10);
        assert_eq!(event.cost_usd(), 0.001);
        assert_eq!(event.identity(), None);
    }

    #[test]
    fn test_parse_nested_line_prices_and_identifies() {
        let loader = DataLoader::new(Vec::new());
        let event = loader.parse_line(NESTED.as_bytes()).unwrap();
        assert_eq!(event.identity(), Some("msg_1:req_1"));
        assert_eq!(event.source(), SourceTag::Primary);
        assert!(event.has_cost());
        assert!((event.cost_usd() - 0.0021).abs() < 1e-9);
    }

    #[test]
    fn test_secondary_identity_is_namespaced() {
        let loader = DataLoader::secondary(Vec::new());
        let event = loader.parse_line(NESTED.as_bytes()).unwrap();
        assert_eq!(event.identity(), Some("secondary:msg_1:req_1"));
        assert_eq!(event.source(), SourceTag::Secondary);
    }

    #[test]
    fn test_parse_errors() {
        let loader = DataLoader::new(Vec::new());
        assert!(matches!(
            loader.parse_line(br#"{"invalid": "json"#),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            loader.parse_line(br#"{"timestamp": "2024-01-01T12:00:00Z"}"#),
            Err(ParseError::NoUsage)
        ));
        assert!(matches!(
            loader.parse_line(
                br#"{"timestamp": "yesterday", "model": "m", "usage": {"input_tokens": 1, "output_tokens": 1}}"#
            ),
            Err(ParseError::Timestamp(_))
        ));
    }

    #[test]
    fn test_load_from_file_with_empty_lines() {
        let loader = DataLoader::new(Vec::new());
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}\n\n{}\nnot json\n", FLAT, NESTED).unwrap();

        let events = loader.load_from_file(temp_file.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].input_tokens(), 200);
    }

    #[test]
    fn test_list_files_and_load_directory() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("project-a");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("one.jsonl"), format!("{}\n{}\n", NESTED, FLAT)).unwrap();
        fs::write(project.join("two.jsonl"), format!("{}\n", NESTED)).unwrap();
        fs::write(project.join("notes.txt"), "ignored").unwrap();

        let loader = DataLoader::new(vec![dir.path().to_path_buf(), dir.path().join("missing")]);
        let files = loader.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("one.jsonl"));

        let events = loader.load_from_directory(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].timestamp() < events[1].timestamp());
    }

    #[test]
    fn test_load_all_keeps_mirrored_message_once() {
        let primary = TempDir::new().unwrap();
        let mirror = TempDir::new().unwrap();
        fs::write(primary.path().join("s.jsonl"), format!("{}\n{}\n", NESTED, FLAT)).unwrap();
        fs::write(mirror.path().join("s.jsonl"), format!("{}\n", NESTED)).unwrap();

        let loader = DataLoader::new(vec![primary.path().to_path_buf(), mirror.path().to_path_buf()]);
        let events = loader.load_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events.iter().filter(|e| e.identity() == Some("msg_1:req_1")).count(),
            1
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_undiscoverable_root_is_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good");
        let bad = dir.path().join(OsStr::from_bytes(b"bad-\xff"));
        fs::create_dir_all(&good).unwrap();
        fs::create_dir_all(&bad).unwrap();
        fs::write(good.join("one.jsonl"), format!("{}\n", NESTED)).unwrap();
        fs::write(bad.join("two.jsonl"), format!("{}\n", NESTED)).unwrap();

        let loader = DataLoader::new(vec![bad, good]);
        let files = loader.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("one.jsonl"));
    }

    #[test]
    fn test_fetch_events_from_secondary() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("vm.jsonl"), format!("{}\n", NESTED)).unwrap();

        let loader = DataLoader::secondary(vec![dir.path().to_path_buf()]);
        let events = loader.fetch_events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source(), SourceTag::Secondary);
    }
}
