use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph},
    Frame,
};

use super::format_tokens;
use crate::AppState;

pub struct PredictionsWidget;

impl PredictionsWidget {
    pub fn render(frame: &mut Frame, area: Rect, state: &AppState) {
        let predictions_text = match (state.burn_rate, state.projection) {
            (Some(br), Some(projection)) => {
                let limit = state.token_limit();
                let time_to_limit = state.calculator.calculate_time_to_limit(
                    state.get_current_tokens(),
                    limit,
                    br.tokens_per_minute(),
                );
                let (time_to_reset, _) = state.get_time_to_reset_formatted();
                let over_limit = projection.projected_total_tokens() > limit;

                vec![
                    Line::from(vec![
                        Span::styled("Projected at block end: ", Style::default().fg(Color::White)),
                        Span::styled(
                            format!(
                                "{} tokens, ${:.2}",
                                format_tokens(projection.projected_total_tokens()),
                                projection.projected_total_cost()
                            ),
                            Style::default()
                                .fg(if over_limit { Color::Red } else { Color::Green })
                                .add_modifier(Modifier::BOLD),
                        ),
                    ]),
                    Line::from(vec![
                        Span::styled("Estimated time to limit: ", Style::default().fg(Color::White)),
                        match time_to_limit {
                            Some(t) if t.num_minutes() < projection.remaining_minutes() as i64 => {
                                Span::styled(
                                    format!("{}h {:02}m", t.num_hours(), t.num_minutes() % 60),
                                    Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                                )
                            }
                            Some(_) => Span::styled(
                                "not before block reset",
                                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                            ),
                            None if state.get_current_tokens() < limit => Span::styled(
                                "not before block reset",
                                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
                            ),
                            None => Span::styled(
                                "Limit reached",
                                Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
                            ),
                        },
                    ]),
                    Line::from(vec![
                        Span::styled("Block time remaining: ", Style::default().fg(Color::White)),
                        Span::styled(
                            time_to_reset,
                            Style::default()
                                .fg(Color::Blue)
                                .add_modifier(Modifier::BOLD),
                        ),
                    ]),
                ]
            }
            _ => Self::render_no_data_text(state),
        };

        let predictions = Paragraph::new(predictions_text)
            .block(Block::bordered().title("Predictions"))
            .alignment(Alignment::Left);

        frame.render_widget(predictions, area);
    }

    fn render_no_data_text(state: &AppState) -> Vec<Line<'static>> {
        let has_data = state.entry_count > 0;
        let mut no_data_text = vec![
            Line::from(vec![Span::styled(
                if has_data {
                    "No active block"
                } else {
                    "No Claude usage data found"
                },
                Style::default().fg(if has_data { Color::Gray } else { Color::Red }),
            )]),
            Line::from(" "),
        ];

        if !has_data {
            no_data_text.push(Line::from(vec![Span::styled(
                "Searched in:",
                Style::default().fg(Color::Gray),
            )]));
            for dir in &state.data_dirs {
                no_data_text.push(Line::from(vec![Span::styled(
                    format!("  {}", dir.display()),
                    Style::default().fg(Color::Gray),
                )]));
            }
            if state.data_dirs.is_empty() {
                no_data_text.push(Line::from(vec![Span::styled(
                    "  ~/.claude/projects, ~/.config/claude/projects (missing)",
                    Style::default().fg(Color::Gray),
                )]));
            }
        }

        no_data_text
    }
}
