use crate::data_structures::{SessionBlock, UsageEvent};
use crate::error::BlockError;
use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::debug;

pub const DEFAULT_SESSION_HOURS: f64 = 5.0;

/// Longest accepted session window (one leap year).
pub const MAX_SESSION_HOURS: f64 = 366.0 * 24.0;

/// Block start times are floored to this many seconds (whole UTC hours).
pub const BLOCK_ANCHOR_SECONDS: i64 = 3600;

pub fn floor_to_anchor(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::seconds(BLOCK_ANCHOR_SECONDS))
        .unwrap_or(timestamp)
}

/// Splits a stream of usage events into fixed-length billing blocks.
#[derive(Debug, Clone)]
pub struct SessionIdentifier {
    session_duration: Duration,
}

impl SessionIdentifier {
    pub fn new() -> Self {
        Self {
            session_duration: Duration::hours(5),
        }
    }

    /// The caller is responsible for passing a positive duration.
    pub fn with_duration(session_duration: Duration) -> Self {
        Self { session_duration }
    }

    pub fn from_hours(hours: f64) -> Result<Self, BlockError> {
        Self::from_minutes(hours * 60.0)
    }

    pub fn from_minutes(minutes: f64) -> Result<Self, BlockError> {
        if !minutes.is_finite() || minutes <= 0.0 {
            return Err(BlockError::InvalidConfiguration(format!(
                "session window must be a positive number of minutes, got {}",
                minutes
            )));
        }

        if minutes > MAX_SESSION_HOURS * 60.0 {
            return Err(BlockError::InvalidConfiguration(format!(
                "session window of {} minutes exceeds the {} hour maximum",
                minutes, MAX_SESSION_HOURS
            )));
        }

        let millis = (minutes * 60_000.0).round() as i64;
        if millis <= 0 {
            return Err(BlockError::InvalidConfiguration(format!(
                "session window of {} minutes is too short",
                minutes
            )));
        }

        Ok(Self::with_duration(Duration::milliseconds(millis)))
    }

    pub fn session_duration(&self) -> Duration {
        self.session_duration
    }

    /// Groups `events` into blocks. Input may be unsorted; ties keep their
    /// input order. Gap blocks are emitted between two real blocks whenever
    /// the idle time exceeds the window. Only the last real block can be
    /// active, and only while `now` falls inside its window.
    pub fn identify_blocks(&self, events: &[UsageEvent], now: DateTime<Utc>) -> Vec<SessionBlock> {
        if events.is_empty() {
            return Vec::new();
        }

        let mut sorted: Vec<&UsageEvent> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp());

        let mut blocks = Vec::new();
        let mut current: Option<SessionBlock> = None;

        for event in sorted {
            if current.is_none() {
                let mut block = self.create_block_for_event(event, None);
                block.add_event(event.clone());
                current = Some(block);
                continue;
            }
            let Some(block) = current.as_mut() else {
                continue;
            };

            let ts = event.timestamp();
            let since_start = ts - block.start_time();
            let since_last = block
                .actual_end_time()
                .map(|last| ts - last)
                .unwrap_or_else(Duration::zero);

            if since_start > self.session_duration || since_last > self.session_duration {
                let next_start = self.next_block_start(ts, block.end_time());
                let closed =
                    std::mem::replace(block, self.create_block_for_event(event, Some(next_start)));

                let gap = if since_last > self.session_duration {
                    closed
                        .actual_end_time()
                        .filter(|gap_start| *gap_start < next_start)
                        .map(|gap_start| SessionBlock::gap(gap_start, next_start))
                } else {
                    None
                };

                blocks.push(closed);
                if let Some(gap) = gap {
                    blocks.push(gap);
                }
            }

            block.add_event(event.clone());
        }

        if let Some(mut block) = current {
            block.set_active(block.start_time() <= now && now < block.end_time());
            blocks.push(block);
        }

        debug!(
            events = events.len(),
            blocks = blocks.len(),
            "identified session blocks"
        );

        blocks
    }

    fn create_block_for_event(
        &self,
        event: &UsageEvent,
        start: Option<DateTime<Utc>>,
    ) -> SessionBlock {
        let start_time = start.unwrap_or_else(|| self.block_start_for(event.timestamp()));
        SessionBlock::new(start_time, start_time + self.session_duration)
    }

    /// A new block never starts before the previous block's window ends.
    fn next_block_start(&self, ts: DateTime<Utc>, previous_end: DateTime<Utc>) -> DateTime<Utc> {
        self.block_start_for(ts).max(previous_end)
    }

    fn block_start_for(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let floored = floor_to_anchor(ts);
        // windows shorter than the anchor would otherwise leave the event outside its own block
        if ts - floored >= self.session_duration {
            ts
        } else {
            floored
        }
    }
}

impl Default for SessionIdentifier {
    fn default() -> Self {
        Self::new()
    }
}

pub fn identify_blocks(
    events: &[UsageEvent],
    window_minutes: f64,
    now: DateTime<Utc>,
) -> Result<Vec<SessionBlock>, BlockError> {
    Ok(SessionIdentifier::from_minutes(window_minutes)?.identify_blocks(events, now))
}

/// Blocks that started within the last `days` days, plus the active block.
pub fn filter_recent_blocks(
    blocks: &[SessionBlock],
    days: u32,
    now: DateTime<Utc>,
) -> Vec<SessionBlock> {
    let cutoff = now.checked_sub_signed(Duration::days(i64::from(days)));
    blocks
        .iter()
        .filter(|b| cutoff.map_or(true, |c| b.start_time() >= c) || b.is_active())
        .cloned()
        .collect()
}

/// Largest total token count among completed real blocks.
pub fn max_tokens_from_completed(blocks: &[SessionBlock]) -> Option<u64> {
    blocks
        .iter()
        .filter(|b| !b.is_gap() && !b.is_active())
        .map(|b| b.token_counts().total())
        .max()
}
