use super::app::App;
use crate::commands::{format_seconds, format_timestamp};
use crate::metrics::Equivalents;
use crate::store::AggregateStore;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table},
};

pub fn render<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(8),    // Main content
            Constraint::Length(1), // Footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);
    render_main_content(frame, app, chunks[1]);
    render_footer(frame, app, chunks[2]);
}

fn render_header<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>, area: Rect) {
    let updated = app
        .last_update()
        .map(format_timestamp)
        .unwrap_or_else(|| "never".to_string());
    let totals = &app.snapshot().totals;

    let header = Line::from(vec![
        Span::styled(
            "envirotrack",
            Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(" LIVE ", Style::default().bg(Color::Green).fg(Color::Black)),
        Span::raw(format!(
            " {} queries │ last update {}",
            totals.query_count, updated
        )),
    ]);
    frame.render_widget(Paragraph::new(header), area);
}

fn render_main_content<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>, area: Rect) {
    // Left: platform table (60%) | right: totals over log (40%)
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);
    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Min(3)])
        .split(chunks[1]);

    render_platform_table(frame, app, chunks[0]);
    render_totals(frame, app, right[0]);
    render_log(frame, app, right[1]);
}

fn render_platform_table<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>, area: Rect) {
    let block = Block::default()
        .title(" Platforms ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    if app.rows().is_empty() {
        let empty = Paragraph::new("No AI queries recorded yet.")
            .style(Style::default().fg(Color::DarkGray))
            .block(block);
        frame.render_widget(empty, area);
        return;
    }

    let header_cells = ["Platform", "Queries", "Time", "Wh", "CO2 g", "Water ml"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .rows()
        .iter()
        .enumerate()
        .map(|(i, (_, agg))| {
            let style = if i == app.selected_row() {
                Style::default().bg(Color::DarkGray)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(agg.display_name.clone()),
                Cell::from(agg.query_count.to_string()),
                Cell::from(format_seconds(agg.cumulative_seconds)),
                Cell::from(format!("{:.3}", agg.cumulative_energy_kwh * 1000.0)),
                Cell::from(format!("{:.3}", agg.cumulative_co2_grams))
                    .style(Style::default().fg(color_for_co2(agg.cumulative_co2_grams))),
                Cell::from(format!("{:.2}", agg.cumulative_water_ml))
                    .style(Style::default().fg(Color::Blue)),
            ])
            .style(style)
        })
        .collect();

    let widths = [
        Constraint::Percentage(26),
        Constraint::Length(8),
        Constraint::Length(8),
        Constraint::Length(9),
        Constraint::Length(9),
        Constraint::Length(9),
    ];

    let table = Table::new(rows, widths).header(header).block(block);
    frame.render_widget(table, area);
}

fn render_totals<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>, area: Rect) {
    let t = &app.snapshot().totals;
    let eq = Equivalents::from_totals(t.energy_kwh, t.co2_grams);

    let label = Style::default().fg(Color::DarkGray);
    let lines = vec![
        Line::from(vec![
            Span::styled("Energy  ", label),
            Span::raw(format!("{:.3} Wh", t.energy_kwh * 1000.0)),
        ]),
        Line::from(vec![
            Span::styled("CO2     ", label),
            Span::styled(
                format!("{:.3} g", t.co2_grams),
                Style::default().fg(color_for_co2(t.co2_grams)),
            ),
        ]),
        Line::from(vec![
            Span::styled("Water   ", label),
            Span::styled(format!("{:.2} ml", t.water_ml), Style::default().fg(Color::Blue)),
        ]),
        Line::from(""),
        Line::from(format!("≈ {:.2} phone charges", eq.phones_charged)),
        Line::from(format!("≈ {:.3} km by car", eq.km_driven)),
        Line::from(format!("≈ {:.4} tree-years", eq.tree_years)),
    ];

    let block = Block::default()
        .title(" Totals ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_log<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>, area: Rect) {
    let items: Vec<ListItem> = app
        .log_tail()
        .iter()
        .map(|e| {
            let time = format_timestamp(e.timestamp);
            // Keep only HH:MM:SS
            let short = time.get(11..).unwrap_or(&time).to_string();
            ListItem::new(Line::from(vec![
                Span::styled(format!("{short} "), Style::default().fg(Color::DarkGray)),
                Span::raw(e.message.clone()),
            ]))
        })
        .collect();

    let block = Block::default()
        .title(" Recent activity ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    frame.render_widget(List::new(items).block(block), area);
}

fn render_footer<S: AggregateStore>(frame: &mut Frame, app: &App<'_, S>, area: Rect) {
    let line = if app.is_confirming_reset() {
        Line::from(Span::styled(
            " Clear all statistics? y to confirm, any other key to cancel ",
            Style::default().bg(Color::Red).fg(Color::White),
        ))
    } else if let Some(status) = app.status() {
        Line::from(Span::styled(
            format!(" {status} "),
            Style::default().bg(Color::Yellow).fg(Color::Black),
        ))
    } else {
        let key = Style::default().fg(Color::Cyan);
        Line::from(vec![
            Span::styled("q", key),
            Span::raw(" quit  "),
            Span::styled("r", key),
            Span::raw(" reset  "),
            Span::styled("u", key),
            Span::raw(" refresh  "),
            Span::styled("j/k", key),
            Span::raw(" select"),
        ])
    };
    frame.render_widget(Paragraph::new(line), area);
}

/// Green under 1 g, yellow under 10 g, red beyond.
fn color_for_co2(grams: f64) -> Color {
    if grams < 1.0 {
        Color::Green
    } else if grams < 10.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}
