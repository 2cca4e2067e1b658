//! TUI widget modules

pub mod blocks_popup;
pub mod header;
pub mod popup;
pub mod predictions;
pub mod progress_bars;
pub mod shortcuts;
pub mod statistics;

pub use blocks_popup::*;
pub use header::*;
pub use popup::*;
pub use predictions::*;
pub use progress_bars::*;
pub use shortcuts::*;
pub use statistics::*;

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::Color;
use blockwatch_core::BurnRateLevel;

pub(crate) fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

pub(crate) fn burn_level_color(level: BurnRateLevel) -> Color {
    match level {
        BurnRateLevel::Normal => Color::Green,
        BurnRateLevel::Moderate => Color::Yellow,
        BurnRateLevel::High => Color::Red,
    }
}

/// Groups digits in threes: 1234567 -> "1,234,567".
pub(crate) fn format_tokens(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_tokens() {
        assert_eq!(format_tokens(0), "0");
        assert_eq!(format_tokens(999), "999");
        assert_eq!(format_tokens(1_234_567), "1,234,567");
    }
}
