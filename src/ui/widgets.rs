use ratatui::{
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
    Frame,
};

use crate::app::App;
use crate::view::RenderView;

pub fn render_help_window(frame: &mut Frame, area: Rect) {
    let help_text = vec![
        Line::from(Span::styled(
            "lessonstream - Keyboard Shortcuts",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled("General:", Style::default().add_modifier(Modifier::BOLD))),
        Line::from("  Ctrl+H        - Show/hide this help"),
        Line::from("  Ctrl+C        - Quit (press twice)"),
        Line::from(""),
        Line::from(Span::styled("Request:", Style::default().add_modifier(Modifier::BOLD))),
        Line::from("  Enter         - Send prompt"),
        Line::from("  Esc           - Cancel running request"),
        Line::from("  Ctrl+P        - Switch provider"),
        Line::from(""),
        Line::from(Span::styled("Reply:", Style::default().add_modifier(Modifier::BOLD))),
        Line::from("  Tab           - Next view (Raw/Text/HTML/Rich)"),
        Line::from("  Ctrl+S        - Save current view to a file"),
        Line::from("  Up/Down       - Scroll"),
        Line::from("  PgUp/PgDn     - Scroll faster"),
        Line::from("  Home/End      - Jump to start/end"),
        Line::from(""),
        Line::from(Span::styled(
            "Press Ctrl+H or Esc to close",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let help_paragraph = Paragraph::new(help_text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Help ")
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .wrap(Wrap { trim: false });

    let popup_width = 60;
    let popup_height = 22;
    let x = (area.width.saturating_sub(popup_width)) / 2;
    let y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect {
        x: area.x + x,
        y: area.y + y,
        width: popup_width.min(area.width),
        height: popup_height.min(area.height),
    };

    frame.render_widget(Clear, popup_area);
    frame.render_widget(help_paragraph, popup_area);
}

pub fn render_view_tabs(frame: &mut Frame, app: &App, area: Rect) {
    let active = app.view();
    let mut spans = Vec::new();
    for view in RenderView::ALL {
        let style = if view == active {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(format!(" {} ", view.label()), style));
        spans.push(Span::raw(" "));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

pub fn render_bottom_bar(frame: &mut Frame, app: &App, area: Rect) {
    let (text, style) = if app.exit_pending {
        (
            "Press Ctrl+C again to exit, Esc to cancel",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        (
            "Ctrl+C: Quit | Ctrl+H: Help | Tab: View | Ctrl+P: Provider | Ctrl+S: Save",
            Style::default().fg(Color::DarkGray),
        )
    };

    let bar = Paragraph::new(text).alignment(Alignment::Center).style(style);

    frame.render_widget(bar, area);
}

pub fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let (label, color) = match app.status {
        Some(status) if status.is_error() => (status.label(), Color::Red),
        Some(status) if status.is_final() => (status.label(), Color::Green),
        Some(status) => (status.label(), Color::Yellow),
        None => ("Ready", Color::DarkGray),
    };

    let mut spans = vec![Span::styled(
        label,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    )];
    if !app.complete {
        spans.push(Span::styled(" (incomplete)", Style::default().fg(Color::Red)));
    }
    if let Some(notice) = &app.notice {
        spans.push(Span::styled(
            format!("  {notice}"),
            Style::default().fg(Color::Magenta),
        ));
    }

    let left = Paragraph::new(Line::from(spans));
    let right = Paragraph::new(format!("{} | course {}", app.provider, app.courseid))
        .alignment(Alignment::Right)
        .style(Style::default().fg(Color::Cyan));

    let [left_area, right_area] =
        Layout::horizontal([Constraint::Min(0), Constraint::Length(24)]).areas(area);
    frame.render_widget(left, left_area);
    frame.render_widget(right, right_area);
}

pub fn render_response(frame: &mut Frame, app: &mut App, area: Rect) {
    let lines = app.switcher.target().display_lines();

    if lines.is_empty() {
        let placeholder = if app.is_streaming {
            Line::from(Span::styled("...", Style::default().fg(Color::DarkGray)))
        } else {
            Line::from(Span::styled(
                "Type a lesson prompt below and press Enter",
                Style::default().fg(Color::Cyan),
            ))
        };
        frame.render_widget(Paragraph::new(placeholder).alignment(Alignment::Center), area);
        return;
    }

    // Account for wrapping to find the true visual height
    let available_width = (area.width as usize).max(1);
    let total_visual_lines: usize = lines
        .iter()
        .map(|line| line.width().div_ceil(available_width).max(1))
        .sum();

    let visible_height = area.height as usize;
    let max_scroll = total_visual_lines.saturating_sub(visible_height);
    let actual_scroll = app.scroll_offset.min(max_scroll);
    app.scroll_offset = actual_scroll;

    let response = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .scroll((u16::try_from(actual_scroll).unwrap_or(u16::MAX), 0));

    frame.render_widget(response, area);
}

pub fn render_input_field(frame: &mut Frame, app: &App, area: Rect) {
    let input_text = if app.input_buffer.is_empty() {
        "Describe the lesson to plan..."
    } else {
        &app.input_buffer
    };

    let input_style = if app.input_buffer.is_empty() {
        Style::default().fg(Color::Gray)
    } else {
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
    };

    let border_color = if app.is_streaming {
        Color::DarkGray
    } else {
        Color::Cyan
    };

    let input = Paragraph::new(input_text)
        .style(input_style)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border_color)),
        )
        .wrap(Wrap { trim: false });

    frame.render_widget(input, area);
}
