use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use blockwatch_core::loader::default_data_dirs;
use blockwatch_core::prelude::*;
use blockwatch_core::{
    filter_recent_blocks, max_tokens_from_completed, BlockError, Calculator, SystemClock,
};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    DefaultTerminal, Frame,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

mod logging;
mod widgets;
use widgets::*;

#[derive(Debug, Clone, PartialEq)]
pub enum PopupType {
    CurrentBlock,
    BlockHistory,
}

/// Token limit used to size the usage gauge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlanLimit {
    Plan(ClaudePlan),
    /// Largest completed block seen so far.
    MaxObserved,
}

fn parse_plan(s: &str) -> Result<PlanLimit, BlockError> {
    if s.eq_ignore_ascii_case("max") {
        return Ok(PlanLimit::MaxObserved);
    }
    s.parse().map(PlanLimit::Plan)
}

#[derive(Parser, Debug)]
#[clap(author = "Red", version, about)]
struct Args {
    #[arg(short = 'v')]
    verbose: bool,

    /// pro, max5, max20, a token count, or "max" for the largest past block
    #[arg(short = 'p', long = "plan", default_value = "pro", value_parser = parse_plan)]
    plan: PlanLimit,

    #[arg(short = 'd', long = "data-dir")]
    data_dir: Vec<PathBuf>,

    #[arg(long = "secondary-dir")]
    secondary_dir: Vec<PathBuf>,

    #[arg(short = 'w', long = "window-hours")]
    window_hours: Option<f64>,

    /// Seconds between refreshes
    #[arg(short = 'i', long = "interval")]
    interval: Option<u64>,

    /// Print the active block, burn rate and projection as JSON and exit
    #[arg(long, conflicts_with = "blocks")]
    snapshot: bool,

    /// Print recent blocks as JSON and exit
    #[arg(long)]
    blocks: bool,
}

impl Args {
    fn apply(&self, config: &mut MonitorConfig) {
        if !self.data_dir.is_empty() {
            config.paths.data_dirs = self.data_dir.clone();
        }
        if !self.secondary_dir.is_empty() {
            config.paths.secondary_dirs = self.secondary_dir.clone();
        }
        if let Some(hours) = self.window_hours {
            config.blocks.window_hours = hours;
        }
        if let Some(secs) = self.interval {
            config.live.poll_interval_secs = secs;
        }
    }

    fn headless(&self) -> bool {
        self.snapshot || self.blocks
    }
}

/// What the dashboard needs from one monitor poll.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    pub active_block: Option<SessionBlock>,
    pub burn_rate: Option<BurnRate>,
    pub projection: Option<UsageProjection>,
    pub blocks: Vec<SessionBlock>,
    pub entry_count: usize,
    pub tracked_files: usize,
    pub polled_at: DateTime<Utc>,
}

impl MonitorSnapshot {
    fn poll(monitor: &mut LiveMonitor) -> Self {
        let active_block = monitor.poll_active_block();
        Self {
            active_block,
            burn_rate: monitor.current_burn_rate(),
            projection: monitor.current_projection(),
            blocks: monitor.blocks().to_vec(),
            entry_count: monitor.entry_count(),
            tracked_files: monitor.tracked_files(),
            polled_at: monitor.last_poll().unwrap_or_else(Utc::now),
        }
    }
}

/// Polls on a blocking thread; the UI state is only locked to store the result.
async fn refresh_state(monitor: Arc<Mutex<LiveMonitor>>, state: Arc<Mutex<AppState>>, reload: bool) {
    let polled = tokio::task::spawn_blocking(move || {
        let mut monitor = monitor.lock().ok()?;
        if reload {
            info!("full reload requested");
            monitor.clear_cache();
        }
        Some(MonitorSnapshot::poll(&mut monitor))
    })
    .await;

    match polled {
        Ok(Some(snapshot)) => {
            if let Ok(mut state) = state.lock() {
                state.apply(snapshot);
            }
        }
        Ok(None) => warn!("monitor lock poisoned, skipping refresh"),
        Err(e) => warn!(error = %e, "refresh task failed"),
    }
}

pub struct AppState {
    pub plan: PlanLimit,
    pub recent_days: u32,
    pub data_dirs: Vec<PathBuf>,
    pub window: TimeDelta,
    pub calculator: Calculator,
    pub blocks: Vec<SessionBlock>,
    pub entry_count: usize,
    pub tracked_files: usize,
    pub active_block: Option<SessionBlock>,
    pub burn_rate: Option<BurnRate>,
    pub projection: Option<UsageProjection>,
    pub last_update: DateTime<Utc>,
    pub spinner_state: usize,
    pub error_message: Option<String>,
    pub active_popup: Option<PopupType>,
}

impl AppState {
    fn new(window: TimeDelta, plan: PlanLimit, recent_days: u32, data_dirs: Vec<PathBuf>) -> Self {
        let error_message = data_dirs
            .is_empty()
            .then(|| "No Claude data directories found".to_string());

        Self {
            plan,
            recent_days,
            data_dirs,
            window,
            calculator: Calculator::new(),
            blocks: Vec::new(),
            entry_count: 0,
            tracked_files: 0,
            active_block: None,
            burn_rate: None,
            projection: None,
            last_update: Utc::now(),
            spinner_state: 0,
            error_message,
            active_popup: None,
        }
    }

    fn apply(&mut self, snapshot: MonitorSnapshot) {
        self.active_block = snapshot.active_block;
        self.burn_rate = snapshot.burn_rate;
        self.projection = snapshot.projection;
        self.blocks = snapshot.blocks;
        self.entry_count = snapshot.entry_count;
        self.tracked_files = snapshot.tracked_files;
        self.last_update = snapshot.polled_at;
    }

    fn update_spinner(&mut self) {
        self.spinner_state = (self.spinner_state + 1) % 10;
    }

    pub fn get_spinner_char(&self) -> char {
        const FRAMES: [char; 10] = ['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
        FRAMES[self.spinner_state % FRAMES.len()]
    }

    pub fn plan_name(&self) -> String {
        match self.plan {
            PlanLimit::Plan(plan) => plan.name(),
            PlanLimit::MaxObserved => "Max observed block".to_string(),
        }
    }

    pub fn token_limit(&self) -> u64 {
        match self.plan {
            PlanLimit::Plan(plan) => plan.max_tokens(),
            PlanLimit::MaxObserved => max_tokens_from_completed(&self.blocks)
                .filter(|max| *max > 0)
                .unwrap_or_else(|| ClaudePlan::Pro.max_tokens()),
        }
    }

    pub fn get_current_tokens(&self) -> u64 {
        self.active_block
            .as_ref()
            .map_or(0, |b| b.token_counts().total())
    }

    pub fn get_usage_percentage(&self) -> f64 {
        let limit = self.token_limit();
        if limit == 0 {
            return 0.0;
        }
        self.get_current_tokens() as f64 / limit as f64 * 100.0
    }

    pub fn recent_blocks(&self) -> Vec<SessionBlock> {
        filter_recent_blocks(&self.blocks, self.recent_days, self.last_update)
    }

    /// Remaining time in the active block and the elapsed fraction of it.
    pub fn get_time_to_reset_formatted(&self) -> (String, f64) {
        let Some(block) = &self.active_block else {
            return ("--:--".to_string(), 0.0);
        };

        let now = self.last_update;
        let remaining = (block.end_time() - now).num_seconds().max(0);
        let window = self.window.num_seconds().max(1);
        let elapsed = (now - block.start_time()).num_seconds() as f64 / window as f64;

        (
            format!("{}:{:02}", remaining / 3600, (remaining % 3600) / 60),
            elapsed.clamp(0.0, 1.0),
        )
    }
}

pub struct App {
    monitor: Arc<Mutex<LiveMonitor>>,
    state: Arc<Mutex<AppState>>,
    poll_interval: Duration,
    exit: bool,
}

impl App {
    pub fn new(mut monitor: LiveMonitor, mut state: AppState, poll_interval: Duration) -> Self {
        state.apply(MonitorSnapshot::poll(&mut monitor));

        Self {
            monitor: Arc::new(Mutex::new(monitor)),
            state: Arc::new(Mutex::new(state)),
            poll_interval,
            exit: false,
        }
    }

    pub async fn run(&mut self, terminal: &mut DefaultTerminal) -> Result<()> {
        let monitor = Arc::clone(&self.monitor);
        let state = Arc::clone(&self.state);
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = interval(poll_interval);
            loop {
                interval.tick().await;
                refresh_state(Arc::clone(&monitor), Arc::clone(&state), false).await;
            }
        });

        let mut tick_interval = interval(Duration::from_millis(100));

        loop {
            tick_interval.tick().await;

            if let Ok(mut state) = self.state.lock() {
                state.update_spinner();
            }
            terminal.draw(|frame| self.draw(frame))?;

            while event::poll(Duration::ZERO)? {
                let event = event::read()?;
                self.handle_event(event);
            }

            if self.exit {
                break;
            }
        }

        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Length(7),
                Constraint::Min(5),
                Constraint::Length(1),
            ])
            .split(area);

        if let Ok(state) = self.state.lock() {
            HeaderWidget::render(frame, chunks[0], &state);
            ProgressBarsWidget::render(frame, chunks[1], &state);
            StatisticsWidget::render(frame, chunks[2], &state);
            PredictionsWidget::render(frame, chunks[3], &state);
            ShortcutsWidget::render(frame, chunks[4], &state);

            match &state.active_popup {
                Some(PopupType::CurrentBlock) => PopupWidget::render(frame, area, &state),
                Some(PopupType::BlockHistory) => BlocksPopupWidget::render(frame, area, &state),
                None => {}
            }
        }
    }

    fn toggle_popup(&self, popup: PopupType) {
        if let Ok(mut state) = self.state.lock() {
            state.active_popup = if state.active_popup.as_ref() == Some(&popup) {
                None
            } else {
                Some(popup)
            };
        }
    }

    fn handle_event(&mut self, event: Event) {
        let Event::Key(key_event) = event else {
            return;
        };
        if key_event.kind != KeyEventKind::Press {
            return;
        }

        match key_event.code {
            KeyCode::Char('q') => self.exit = true,
            KeyCode::Char('r') => {
                tokio::spawn(refresh_state(
                    Arc::clone(&self.monitor),
                    Arc::clone(&self.state),
                    true,
                ));
            }
            KeyCode::Char('d') => self.toggle_popup(PopupType::CurrentBlock),
            KeyCode::Char('b') => self.toggle_popup(PopupType::BlockHistory),
            KeyCode::Esc => {
                if let Ok(mut state) = self.state.lock() {
                    state.active_popup = None;
                }
            }
            _ => {}
        }
    }
}

fn print_snapshot(monitor: &mut LiveMonitor) -> Result<()> {
    let active = monitor.poll_active_block();
    let snapshot = serde_json::json!({
        "generatedAt": monitor.last_poll(),
        "events": monitor.entry_count(),
        "activeBlock": active,
        "burnRate": monitor.current_burn_rate(),
        "burnLevel": monitor.current_burn_rate().map(|r| r.level()),
        "projection": monitor.current_projection(),
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn print_blocks(monitor: &mut LiveMonitor, recent_days: u32) -> Result<()> {
    monitor.poll_active_block();
    let now = monitor.last_poll().unwrap_or_else(Utc::now);
    let blocks = filter_recent_blocks(monitor.blocks(), recent_days, now);
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = MonitorConfig::load().context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate()?;

    let _log_guard = logging::init_logging(&config, args.verbose, args.headless())?;

    let data_dirs = if config.paths.data_dirs.is_empty() {
        default_data_dirs()
    } else {
        config.paths.data_dirs.clone()
    };
    info!(dirs = ?data_dirs, window_hours = config.blocks.window_hours, "starting blockwatch");

    let mut monitor = LiveMonitor::from_config(&config, Arc::new(SystemClock))
        .context("Failed to start the live monitor")?;

    if args.snapshot {
        return print_snapshot(&mut monitor);
    }
    if args.blocks {
        return print_blocks(&mut monitor, config.blocks.recent_days);
    }

    let state = AppState::new(monitor.window(), args.plan, config.blocks.recent_days, data_dirs);

    let mut terminal = ratatui::init();
    let mut app = App::new(monitor, state, config.poll_interval());

    let result = app.run(&mut terminal).await;

    ratatui::restore();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockwatch_core::ManualClock;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parse_plan() {
        assert_eq!(parse_plan("max").unwrap(), PlanLimit::MaxObserved);
        assert_eq!(parse_plan("max5").unwrap(), PlanLimit::Plan(ClaudePlan::Max5));
        assert_eq!(
            parse_plan("120000").unwrap(),
            PlanLimit::Plan(ClaudePlan::Custom(120_000))
        );
        assert!(parse_plan("gold").is_err());
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "blockwatch",
            "-d",
            "/data/a",
            "-d",
            "/data/b",
            "--window-hours",
            "2",
            "--snapshot",
        ]);
        let mut config = MonitorConfig::default();
        args.apply(&mut config);

        assert!(args.headless());
        assert_eq!(config.paths.data_dirs.len(), 2);
        assert_eq!(config.blocks.window_hours, 2.0);
    }

    fn monitor_over(dir: &TempDir, clock: Arc<ManualClock>) -> LiveMonitor {
        let mut config = MonitorConfig::default();
        config.paths.data_dirs = vec![dir.path().to_path_buf()];
        LiveMonitor::from_config(&config, clock).unwrap()
    }

    #[test]
    fn test_snapshot_fills_state() {
        let dir = TempDir::new().unwrap();
        let line = serde_json::json!({
            "timestamp": "2024-01-01T09:10:00Z",
            "model": "claude-sonnet-4-20250514",
            "usage": {"input_tokens": 400, "output_tokens": 100},
            "costUSD": 0.01
        });
        fs::write(dir.path().join("a.jsonl"), format!("{}\n", line)).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let mut monitor = monitor_over(&dir, Arc::new(ManualClock::new(now)));
        let mut state = AppState::new(monitor.window(), PlanLimit::MaxObserved, 3, vec![]);
        state.apply(MonitorSnapshot::poll(&mut monitor));

        assert_eq!(state.get_current_tokens(), 500);
        assert_eq!(state.entry_count, 1);
        assert_eq!(state.tracked_files, 1);
        assert_eq!(state.last_update, now);
        assert!(state.burn_rate.is_some());
        // no completed block yet
        assert_eq!(state.token_limit(), ClaudePlan::Pro.max_tokens());
        assert_eq!(state.get_time_to_reset_formatted().0, "4:00");
    }

    #[tokio::test]
    async fn test_reload_does_not_hold_state_lock() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let monitor = monitor_over(&dir, Arc::new(ManualClock::new(now)));
        let state = AppState::new(monitor.window(), PlanLimit::Plan(ClaudePlan::Pro), 3, vec![]);

        let monitor = Arc::new(Mutex::new(monitor));
        let state = Arc::new(Mutex::new(state));

        // while the monitor is busy the UI state stays available
        let busy = monitor.lock().unwrap();
        let pending = tokio::spawn(refresh_state(Arc::clone(&monitor), Arc::clone(&state), true));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.try_lock().is_ok());
        drop(busy);

        pending.await.unwrap();
        assert_eq!(state.lock().unwrap().last_update, now);
    }
}
