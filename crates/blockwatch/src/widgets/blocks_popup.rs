use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph},
    Frame,
};

use super::{centered_rect, format_tokens};
use crate::AppState;

pub struct BlocksPopupWidget;

impl BlocksPopupWidget {
    pub fn render(frame: &mut Frame, area: Rect, state: &AppState) {
        let popup_area = centered_rect(70, 80, area);

        frame.render_widget(Clear, popup_area);

        let popup = Paragraph::new(Self::create_history_text(state))
            .block(
                Block::bordered()
                    .title(format!("Blocks (last {} days)", state.recent_days))
                    .title_alignment(Alignment::Center)
                    .style(Style::default().fg(Color::Cyan)),
            )
            .alignment(Alignment::Left);

        frame.render_widget(popup, popup_area);
    }

    fn create_history_text(state: &AppState) -> Vec<Line<'static>> {
        let blocks = state.recent_blocks();
        let calculator = &state.calculator;
        let now = state.last_update;

        let real: Vec<_> = blocks.iter().filter(|b| !b.is_gap()).collect();
        let mut text = vec![
            Line::from(vec![
                Span::styled("Total: ", Style::default().fg(Color::White)),
                Span::styled(
                    format!(
                        "{} tokens, ${:.2} in {} blocks",
                        format_tokens(calculator.calculate_total_tokens(&blocks)),
                        calculator.calculate_total_cost(&blocks),
                        real.len()
                    ),
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
        ];

        if let Some(peak) = calculator.calculate_peak_burn_rate(&blocks, now) {
            text.push(Line::from(vec![
                Span::styled("Peak Burn Rate: ", Style::default().fg(Color::White)),
                Span::styled(
                    format!("{:.1} tokens/min", peak.tokens_per_minute()),
                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                ),
            ]));
        }
        text.push(Line::from(" "));

        // newest first
        for block in blocks.iter().rev() {
            let start = block.start_time().format("%m-%d %H:%M");
            let line = if block.is_gap() {
                Line::from(Span::styled(
                    format!(
                        "  {}  idle until {}",
                        start,
                        block.end_time().format("%m-%d %H:%M")
                    ),
                    Style::default().fg(Color::DarkGray),
                ))
            } else {
                let rate = calculator
                    .calculate_burn_rate(block, now)
                    .map(|r| format!("{:.0} tok/min", r.tokens_per_minute()))
                    .unwrap_or_default();
                Line::from(vec![
                    Span::styled(
                        if block.is_active() { "* " } else { "  " },
                        Style::default().fg(Color::Green),
                    ),
                    Span::styled(
                        format!(
                            "{}  {:>12} tokens  ${:>7.2}  {}",
                            start,
                            format_tokens(block.token_counts().total()),
                            block.cost_usd(),
                            rate
                        ),
                        Style::default().fg(Color::White),
                    ),
                ])
            };
            text.push(line);
        }

        text.push(Line::from(" "));
        text.push(Line::from(vec![
            Span::styled("Press ", Style::default().fg(Color::Gray)),
            Span::styled(
                "b",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" to close", Style::default().fg(Color::Gray)),
        ]));

        text
    }
}
