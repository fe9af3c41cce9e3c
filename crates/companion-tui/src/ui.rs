use companion_core::{DownloadStatus, ModelChoice, Role};
use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};

use crate::app::{App, FocusPane, InputMode, TextInput};

/// Style `**bold**` and `` `code` `` spans in one line of model output.
fn parse_markdown_line(text: &str) -> Line<'static> {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let code = Style::default().fg(Color::Green);

    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let next_bold = rest.find("**");
        let next_code = rest.find('`');

        let (start, marker, style) = match (next_bold, next_code) {
            (Some(b), Some(c)) if c < b => (c, "`", code),
            (Some(b), _) => (b, "**", bold),
            (None, Some(c)) => (c, "`", code),
            (None, None) => break,
        };

        let after = &rest[start + marker.len()..];
        let Some(len) = after.find(marker).filter(|len| *len > 0) else {
            // No closing marker, treat as literal
            spans.push(Span::raw(rest[..start + marker.len()].to_string()));
            rest = after;
            continue;
        };

        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(after[..len].to_string(), style));
        rest = &after[len + marker.len()..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    Line::from(spans)
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [chat_column, side_column] =
        Layout::horizontal([Constraint::Min(0), Constraint::Length(40)]).areas(body_area);

    render_chat(app, frame, chat_column);
    render_side_panel(app, frame, side_column);
    render_footer(app, frame, footer_area);

    if app.show_model_picker {
        render_model_picker(app, frame, area);
    }
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Code Companion ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("[{}]", app.session.model().as_str()),
            Style::default().fg(Color::White),
        ),
        Span::raw(" "),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match (app.input_mode, app.focus) {
        (InputMode::Normal, _) => " NORMAL ",
        (InputMode::Editing, FocusPane::Chat) => " CHAT ",
        (InputMode::Editing, FocusPane::Download) => " DOWNLOAD ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &'static str, label: &'static str| {
        [
            Span::styled(key, key_style),
            Span::styled(label, label_style),
        ]
    };

    let hints: Vec<Span> = if app.show_model_picker {
        [
            hint(" j/k ", " nav "),
            hint(" Enter ", " use "),
            hint(" p ", " pull "),
            hint(" Esc ", " close "),
        ]
        .concat()
    } else {
        match app.input_mode {
            InputMode::Editing => {
                let enter = match app.focus {
                    FocusPane::Chat => " send ",
                    FocusPane::Download => " download ",
                };
                [
                    hint(" Enter ", enter),
                    hint(" Tab ", " switch box "),
                    hint(" ^S ", " stop download "),
                    hint(" Esc ", " stop typing "),
                ]
                .concat()
            }
            InputMode::Normal => [
                hint(" i ", " type "),
                hint(" j/k ", " scroll "),
                hint(" m ", " model "),
                hint(" D ", " download "),
                hint(" S ", " stop "),
                hint(" n ", " new chat "),
                hint(" q ", " quit "),
            ]
            .concat(),
        }
    };

    let footer_content = Line::from(
        vec![
            Span::styled(mode_text, mode_style),
            Span::styled(" ", label_style),
        ]
        .into_iter()
        .chain(hints)
        .collect::<Vec<_>>(),
    );

    let footer = Paragraph::new(footer_content).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    let [chat_area, input_area] =
        Layout::vertical([Constraint::Min(0), Constraint::Length(3)]).areas(area);

    app.chat_area = Some(chat_area);
    // Inner size minus borders, used for scroll calculations
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(format!(" Chat: {} ", app.session.model().display_name()));

    let you_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let ai_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);

    let mut lines: Vec<Line> = Vec::new();
    for turn in app.session.turns() {
        match turn.role {
            Role::User => {
                lines.push(Line::from(Span::styled("You:", you_style)));
                lines.extend(turn.text.lines().map(|l| Line::from(l.to_string())));
            }
            Role::Assistant | Role::System if turn.diagnostic => {
                lines.push(Line::from(Span::styled("AI:", ai_style)));
                lines.extend(
                    turn.text
                        .lines()
                        .map(|l| Line::from(Span::styled(l.to_string(), Style::default().fg(Color::Red)))),
                );
            }
            Role::Assistant | Role::System => {
                lines.push(Line::from(Span::styled("AI:", ai_style)));
                lines.extend(turn.text.lines().map(parse_markdown_line));
            }
        }
        lines.push(Line::default());
    }

    if app.query_loading {
        lines.push(Line::from(Span::styled("AI:", ai_style)));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((app.animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    let chat = Paragraph::new(Text::from(lines))
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.chat_scroll, 0));
    frame.render_widget(chat, chat_area);

    let editing = app.input_mode == InputMode::Editing && app.focus == FocusPane::Chat;
    render_input(
        frame,
        input_area,
        &app.chat_input,
        " Type your coding question here ",
        editing,
    );
}

fn render_input(frame: &mut Frame, area: Rect, input: &TextInput, title: &str, editing: bool) {
    let border = if editing { Color::Yellow } else { Color::DarkGray };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title.to_string());

    let inner_width = area.width.saturating_sub(2) as usize;
    // Keep the cursor in view for long input
    let skip = input.cursor.saturating_sub(inner_width.saturating_sub(1));
    let visible: String = input.text.chars().skip(skip).collect();

    frame.render_widget(Paragraph::new(visible).block(block), area);

    if editing {
        let cursor_x = (input.cursor - skip) as u16;
        frame.set_cursor_position((area.x + 1 + cursor_x, area.y + 1));
    }
}

fn render_side_panel(app: &App, frame: &mut Frame, area: Rect) {
    let [model_area, command_area, log_area] = Layout::vertical([
        Constraint::Length(4),
        Constraint::Length(3),
        Constraint::Min(5),
    ])
    .areas(area);

    let model = app.session.model();
    let installed = if app.is_installed(model) {
        Span::styled("installed", Style::default().fg(Color::Green))
    } else {
        Span::styled("not pulled", Style::default().fg(Color::DarkGray))
    };
    let model_text = Text::from(vec![
        Line::from(Span::styled(model.as_str(), Style::default().bold())),
        Line::from(installed),
    ]);
    let model_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Model (m) ");
    frame.render_widget(Paragraph::new(model_text).block(model_block), model_area);

    let editing = app.input_mode == InputMode::Editing && app.focus == FocusPane::Download;
    render_input(
        frame,
        command_area,
        &app.download_input,
        " Download Model ",
        editing,
    );

    let status = app.download.status;
    let status_color = match status {
        DownloadStatus::Idle => Color::DarkGray,
        DownloadStatus::Running => Color::Cyan,
        DownloadStatus::Succeeded => Color::Green,
        DownloadStatus::Failed => Color::Red,
        DownloadStatus::Stopped => Color::Yellow,
    };

    let mut log_lines = vec![Line::from(vec![
        Span::raw("Status: "),
        Span::styled(status.label(), Style::default().fg(status_color).bold()),
    ])];
    if !app.download.command.is_empty() {
        log_lines.push(Line::from(Span::styled(
            format!("$ {}", app.download.command),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let status_line = app.download.status_line();
    if !status_line.is_empty() {
        log_lines.push(Line::from(status_line));
    }
    if let Some(notice) = &app.download_notice {
        log_lines.push(Line::default());
        log_lines.push(Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(Color::Yellow),
        )));
    }

    let log_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" Download Log ");
    let log = Paragraph::new(Text::from(log_lines))
        .block(log_block)
        .wrap(Wrap { trim: true });
    frame.render_widget(log, log_area);
}

fn render_model_picker(app: &mut App, frame: &mut Frame, area: Rect) {
    let models = ModelChoice::all();

    // Calculate popup size and position (centered)
    let popup_width = 44.min(area.width.saturating_sub(4));
    let popup_height = (models.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(" Select Model ");

    let current = app.session.model();
    let items: Vec<ListItem> = models
        .iter()
        .map(|model| {
            let prefix = if *model == current { "* " } else { "  " };
            let status = if app.is_installed(*model) { "" } else { " (not pulled)" };
            let style = if *model == current {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!("{}{}{}", prefix, model.as_str(), status)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, popup_area, &mut app.model_picker_state);
}
