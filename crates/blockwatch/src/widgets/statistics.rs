use ratatui::{
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Paragraph},
    Frame,
};

use super::{burn_level_color, format_tokens};
use crate::AppState;

pub struct StatisticsWidget;

impl StatisticsWidget {
    pub fn render(frame: &mut Frame, area: Rect, state: &AppState) {
        let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::White));
        let entry_count = state.entry_count;

        let mut stats_text = vec![
            Line::from(vec![
                label("Events: "),
                Span::styled(
                    if entry_count > 0 {
                        format!("{} from {} files", entry_count, state.tracked_files)
                    } else {
                        "No data".to_string()
                    },
                    Style::default()
                        .fg(if entry_count > 0 {
                            Color::Green
                        } else {
                            Color::Red
                        })
                        .add_modifier(Modifier::BOLD),
                ),
            ]),
            Line::from(vec![
                label("Block Tokens: "),
                Span::styled(
                    format_tokens(state.get_current_tokens()),
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(
                    format!(" / {}", format_tokens(state.token_limit())),
                    Style::default().fg(Color::Gray),
                ),
            ]),
        ];

        match state.burn_rate {
            Some(br) => {
                let color = burn_level_color(br.level());
                stats_text.push(Line::from(vec![
                    label("Burn Rate: "),
                    Span::styled(
                        format!("{:.1} tokens/min", br.tokens_per_minute()),
                        Style::default().fg(color).add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        format!(
                            " ({:.1} in/out, {:?})",
                            br.tokens_per_minute_for_indicator(),
                            br.level()
                        ),
                        Style::default().fg(color),
                    ),
                ]));
                stats_text.push(Line::from(vec![
                    label("Cost Rate: "),
                    Span::styled(
                        format!("${:.2}/hour", br.cost_per_hour()),
                        Style::default()
                            .fg(Color::Green)
                            .add_modifier(Modifier::BOLD),
                    ),
                ]));
            }
            None => stats_text.push(Line::from(vec![
                label("Burn Rate: "),
                Span::styled("N/A", Style::default().fg(Color::Gray)),
            ])),
        }

        if let Some(error) = &state.error_message {
            let mut shown: String = error.chars().take(50).collect();
            if error.chars().count() > 50 {
                shown.push_str("...");
            }
            stats_text.push(Line::from(vec![
                Span::styled("Error: ", Style::default().fg(Color::Red)),
                Span::styled(shown, Style::default().fg(Color::Red)),
            ]));
        } else {
            stats_text.push(Line::from(vec![
                label("Last Update: "),
                Span::styled(
                    state.last_update.format("%H:%M:%S UTC").to_string(),
                    Style::default().fg(Color::Cyan),
                ),
            ]));
        }

        let stats = Paragraph::new(stats_text)
            .block(Block::bordered().title("Statistics"))
            .alignment(Alignment::Left);

        frame.render_widget(stats, area);
    }
}
