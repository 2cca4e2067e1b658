pub mod calculator;
pub mod clock;
pub mod config;
pub mod data_structures;
pub mod dedup;
pub mod error;
pub mod identifier;
pub mod loader;
pub mod monitor;
pub mod pricing;

pub use calculator::Calculator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MonitorConfig;
pub use data_structures::{
    BurnRate, BurnRateLevel, ClaudePlan, SessionBlock, SourceTag, TokenCounts, UsageEvent,
    UsageProjection,
};
pub use dedup::Deduplicator;
pub use error::{BlockError, ParseError};
pub use identifier::{
    filter_recent_blocks, floor_to_anchor, identify_blocks, max_tokens_from_completed,
    SessionIdentifier,
};
pub use loader::{DataLoader, EventSource, SecondarySource};
pub use monitor::LiveMonitor;
pub use pricing::{CostOracle, PricingProvider};

pub use chrono::{DateTime, Duration, Utc};

pub mod prelude {
    pub use crate::data_structures::{
        BurnRate, ClaudePlan, SessionBlock, UsageEvent, UsageProjection,
    };
    pub use crate::monitor::LiveMonitor;
    pub use crate::{BlockError, MonitorConfig};
    pub use chrono::{DateTime, Utc};
}
