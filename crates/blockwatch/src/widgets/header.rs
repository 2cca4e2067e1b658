use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph},
    Frame,
};

use crate::AppState;

pub struct HeaderWidget;

impl HeaderWidget {
    pub fn render(frame: &mut Frame, area: Rect, state: &AppState) {
        let title = format!("Blockwatch - {}", state.plan_name());
        let window_hours = state.window.num_minutes() as f64 / 60.0;

        let header_text = vec![Line::from(vec![
            Span::styled(
                title,
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("  ({:.1}h blocks) ", window_hours),
                Style::default().fg(Color::Gray),
            ),
            Span::styled(
                state.get_spinner_char().to_string(),
                Style::default().fg(Color::Yellow),
            ),
        ])];

        let header = Paragraph::new(header_text)
            .block(Block::bordered().title("Status"))
            .alignment(Alignment::Center);

        frame.render_widget(header, area);
    }
}
