use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Clear, Paragraph},
    Frame,
};
use std::collections::BTreeMap;

use super::{centered_rect, format_tokens};
use crate::AppState;

pub struct PopupWidget;

impl PopupWidget {
    pub fn render(frame: &mut Frame, area: Rect, state: &AppState) {
        let popup_area = centered_rect(60, 70, area);

        frame.render_widget(Clear, popup_area);

        let popup = Paragraph::new(Self::create_block_breakdown_text(state))
            .block(
                Block::bordered()
                    .title("Current Block Breakdown")
                    .title_alignment(Alignment::Center)
                    .style(Style::default().fg(Color::Cyan)),
            )
            .alignment(Alignment::Left);

        frame.render_widget(popup, popup_area);
    }

    fn field(name: &'static str, value: String, color: Color) -> Line<'static> {
        Line::from(vec![
            Span::styled(name, Style::default().fg(Color::White)),
            Span::styled(value, Style::default().fg(color).add_modifier(Modifier::BOLD)),
        ])
    }

    fn create_block_breakdown_text(state: &AppState) -> Vec<Line<'static>> {
        let Some(block) = &state.active_block else {
            return vec![
                Line::from("No active block"),
                Line::from(" "),
                Self::close_hint(),
            ];
        };

        let tokens = block.token_counts();
        let last = block
            .actual_end_time()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let sources: Vec<String> = block.sources().iter().map(|s| s.to_string()).collect();

        let mut text = vec![
            Self::field(
                "Window: ",
                format!(
                    "{} - {} UTC",
                    block.start_time().format("%H:%M"),
                    block.end_time().format("%H:%M")
                ),
                Color::Cyan,
            ),
            Self::field("Last Event: ", last, Color::Cyan),
            Self::field("Events: ", block.entries().len().to_string(), Color::Yellow),
            Self::field("Sources: ", sources.join(", "), Color::Yellow),
            Line::from(" "),
            Self::field("Input: ", format_tokens(tokens.input_tokens()), Color::Yellow),
            Self::field("Output: ", format_tokens(tokens.output_tokens()), Color::Yellow),
            Self::field(
                "Cache Create: ",
                format_tokens(tokens.cache_creation_tokens()),
                Color::Yellow,
            ),
            Self::field(
                "Cache Read: ",
                format_tokens(tokens.cache_read_tokens()),
                Color::Yellow,
            ),
            Self::field("Block Cost: ", format!("${:.3}", block.cost_usd()), Color::Green),
            Line::from(" "),
            Line::from(vec![Span::styled(
                "Model Breakdown:",
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )]),
        ];

        let mut per_model: BTreeMap<&str, (u64, f64)> = BTreeMap::new();
        for event in block.entries() {
            let entry = per_model.entry(event.model()).or_default();
            entry.0 += event.total_tokens();
            entry.1 += event.cost_usd();
        }

        for (model, (model_tokens, cost)) in per_model {
            text.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(
                    format!("{}: {} tokens, ${:.3}", model, format_tokens(model_tokens), cost),
                    Style::default().fg(Color::White),
                ),
            ]));
        }

        text.push(Line::from(" "));
        text.push(Self::close_hint());
        text
    }

    fn close_hint() -> Line<'static> {
        Line::from(vec![
            Span::styled("Press ", Style::default().fg(Color::Gray)),
            Span::styled(
                "d",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" to close", Style::default().fg(Color::Gray)),
        ])
    }
}
