//! Help overlay showing keyboard shortcuts.

use ratatui::layout::{Alignment, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use ratatui::Frame;

use crate::ui::Theme;

const SHORTCUTS: &[(&str, &str)] = &[
    ("r", "Refresh all providers now"),
    ("p", "Toggle automatic polling"),
    ("j / Down", "Select next agent"),
    ("k / Up", "Select previous agent"),
    ("c", "Dismiss notifications"),
    ("?", "Toggle this help screen"),
    ("q / Esc", "Quit"),
];

/// Help overlay showing keyboard shortcuts.
pub struct HelpView;

impl HelpView {
    pub fn render(frame: &mut Frame, area: Rect, theme: &Theme) {
        let popup_area = Self::centered_rect(50, 50, area);
        frame.render_widget(Clear, popup_area);

        let mut lines = vec![
            Line::from(Span::styled(
                "Keyboard Shortcuts",
                Style::default().add_modifier(Modifier::BOLD),
            )),
            Line::from(""),
        ];
        lines.extend(SHORTCUTS.iter().map(|(key, action)| {
            Line::from(vec![
                Span::styled(format!("{key:<10}"), theme.key_style),
                Span::raw(*action),
            ])
        }));

        let help = Paragraph::new(lines)
            .block(
                Block::default()
                    .title("Agent Monitor Help")
                    .borders(Borders::ALL)
                    .style(theme.block_style),
            )
            .style(theme.normal_text)
            .alignment(Alignment::Left);

        frame.render_widget(help, popup_area);
    }

    /// Rect of the given percentage size centered in `r`.
    fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
        let width = r.width * percent_x / 100;
        let height = r.height * percent_y / 100;
        Rect {
            x: r.x + (r.width - width) / 2,
            y: r.y + (r.height - height) / 2,
            width,
            height,
        }
    }
}
