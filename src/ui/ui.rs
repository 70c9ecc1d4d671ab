use image::DynamicImage;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use ratatui_image::{Resize, StatefulImage, picker::Picker, protocol::StatefulProtocol};
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::cache::PageImage;
use crate::viewer::layout::SpreadKind;
use crate::viewer::navigation::FlipDirection;
use crate::viewer::{PageSlot, SpreadView, ViewState};

pub type PageHandle = Arc<DynamicImage>;

#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub enum AppState {
    #[default]
    Loading,
    Ready,
}

pub struct App {
    pub state: AppState,
    pub loading_message: String,
    pub title: String,
    pub picker: Option<Picker>,
    pub page_states: HashMap<PageImage, StatefulProtocol>,
    pub background_state: Option<StatefulProtocol>,
    /// Scrubber track area from the last frame, used for mouse hit-testing.
    pub scrubber: Rect,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        let picker = Picker::from_query_stdio().ok();

        Self {
            state: AppState::Loading,
            loading_message: "Initializing...".to_string(),
            title: String::new(),
            picker,
            page_states: HashMap::new(),
            background_state: None,
            scrubber: Rect::default(),
        }
    }

    pub fn set_loading(&mut self, message: &str) {
        self.state = AppState::Loading;
        self.loading_message = message.to_string();
    }

    pub fn set_ready(&mut self, title: &str) {
        self.state = AppState::Ready;
        self.title = title.to_string();
    }

    /// Forgets rendered pages, e.g. when another issue is opened.
    pub fn reset_pages(&mut self) {
        self.page_states.clear();
        self.background_state = None;
    }

    /// Track offset of a terminal column, if it lies on the scrubber.
    pub fn scrubber_offset(&self, column: u16, row: u16) -> Option<f32> {
        let track = self.scrubber;
        let inside = track.width > 0
            && row >= track.y
            && row < track.y + track.height
            && column >= track.x
            && column < track.x + track.width;
        inside.then(|| f32::from(column - track.x))
    }

    /// Pointer-space width of the scrubber: the distance between its first
    /// and last column.
    pub fn track_width(&self) -> f32 {
        f32::from(self.scrubber.width.saturating_sub(1).max(1))
    }

    fn page_state(&mut self, page: &PageImage, image: &PageHandle) -> Option<&mut StatefulProtocol> {
        let picker = self.picker.as_ref()?;
        if !self.page_states.contains_key(page) {
            let protocol = picker.new_resize_protocol(DynamicImage::clone(image));
            self.page_states.insert(page.clone(), protocol);
        }
        self.page_states.get_mut(page)
    }

    fn background(&mut self, image: &PageHandle) -> Option<&mut StatefulProtocol> {
        let picker = self.picker.as_ref()?;
        if self.background_state.is_none() {
            self.background_state = Some(picker.new_resize_protocol(DynamicImage::clone(image)));
        }
        self.background_state.as_mut()
    }
}

pub fn ui(f: &mut Frame, app: &mut App, view: &ViewState<PageHandle>) {
    match app.state {
        AppState::Loading => draw_loading_screen(f, app),
        AppState::Ready => draw_reader(f, app, view),
    }
}

fn draw_loading_screen(f: &mut Frame, app: &App) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title("Magazine Viewer")
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let frame_idx = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
        / 100) as usize
        % spinner_frames.len();

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner_frames[frame_idx]),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
    ]);

    f.render_widget(
        Paragraph::new(loading_text).alignment(Alignment::Center),
        center_layout[1],
    );

    let message = Paragraph::new(&*app.loading_message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_reader(f: &mut Frame, app: &mut App, view: &ViewState<PageHandle>) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // title + progress
            Constraint::Min(10),   // spread
            Constraint::Length(3), // scrubber
            Constraint::Length(3), // footer
        ])
        .split(f.area());

    draw_header(f, root[0], app, view);
    draw_spread(f, root[1], app, view);
    draw_scrubber(f, root[2], app, view);
    draw_footer(f, root[3]);
}

fn draw_header(f: &mut Frame, area: Rect, app: &App, view: &ViewState<PageHandle>) {
    let mut spans = vec![Span::styled(
        app.title.clone(),
        Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
    )];

    if let Some(spread) = &view.spread {
        let pages = spread.page_numbers();
        let page_label = if pages.start() == pages.end() {
            format!("p. {}", pages.start())
        } else {
            format!("pp. {}-{}", pages.start(), pages.end())
        };
        spans.push(Span::styled(
            format!("   Spread {}/{}  ", view.current + 1, view.total),
            Style::default().fg(Color::Cyan),
        ));
        spans.push(Span::styled(
            format!("{} of {}", page_label, view.page_count),
            Style::default().fg(Color::DarkGray),
        ));
    }

    if view.is_flipping {
        let arrow = match view.flip_direction {
            FlipDirection::Next => "  ▶",
            FlipDirection::Prev => "  ◀",
        };
        spans.push(Span::styled(
            arrow,
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Magazine Viewer")
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(header, area);
}

fn draw_spread(f: &mut Frame, area: Rect, app: &mut App, view: &ViewState<PageHandle>) {
    if let Some(background) = &view.background {
        if let Some(state) = app.background(background) {
            let widget = StatefulImage::new().resize(Resize::Scale(None));
            f.render_stateful_widget(widget, area, state);
        }
    }

    let Some(spread) = &view.spread else {
        let empty = Paragraph::new("No content")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::DarkGray))
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(empty, area);
        return;
    };

    for (slot, slot_area) in spread.pages.iter().zip(page_areas(area, spread)) {
        draw_page(f, slot_area, app, slot);
    }
}

fn page_areas(area: Rect, spread: &SpreadView<PageHandle>) -> Vec<Rect> {
    let columns = Layout::default().direction(Direction::Horizontal);
    match spread.kind {
        SpreadKind::Single => {
            let split = columns
                .constraints([
                    Constraint::Percentage(25),
                    Constraint::Percentage(50),
                    Constraint::Percentage(25),
                ])
                .split(area);
            vec![split[1]]
        }
        SpreadKind::Double => columns
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(area)
            .to_vec(),
    }
}

fn draw_page(f: &mut Frame, area: Rect, app: &mut App, slot: &PageSlot<PageHandle>) {
    let name = slot.page().as_str().rsplit('/').next().unwrap_or_default();
    let block = Block::default()
        .borders(Borders::ALL)
        .title(truncate_text(name, area.width.saturating_sub(4) as usize))
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    f.render_widget(block, area);

    if inner.height < 2 || inner.width < 4 {
        return;
    }

    let placeholder = match slot {
        PageSlot::Ready { page, image } => match app.page_state(page, image) {
            Some(state) => {
                let widget = StatefulImage::new().resize(Resize::Scale(None));
                f.render_stateful_widget(widget, inner, state);
                return;
            }
            None => ("No image support in this terminal", Color::DarkGray),
        },
        PageSlot::Loading { .. } => ("Loading...", Color::DarkGray),
        PageSlot::Failed { .. } => ("Image unavailable", Color::Red),
    };

    let text = vec![
        Line::from(""),
        Line::from(Span::styled("📰", Style::default().fg(Color::Magenta))),
        Line::from(Span::styled(placeholder.0, Style::default().fg(placeholder.1))),
    ];
    f.render_widget(Paragraph::new(text).alignment(Alignment::Center), inner);
}

fn draw_scrubber(f: &mut Frame, area: Rect, app: &mut App, view: &ViewState<PageHandle>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    f.render_widget(block, area);
    app.scrubber = inner;

    if view.total == 0 || inner.width == 0 {
        return;
    }

    let track = scrubber_line(inner.width as usize, view.total, view.drag_offset);
    let spans: Vec<Span> = track
        .chars()
        .map(|c| {
            let style = if c == '●' {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Span::styled(c.to_string(), style)
        })
        .collect();
    f.render_widget(Paragraph::new(Line::from(spans)), inner);
}

/// Renders the track: one dot per spread and the handle at `offset`.
fn scrubber_line(width: usize, spreads: usize, offset: f32) -> String {
    let last_column = width.saturating_sub(1);
    let mut cells = vec!['─'; width];

    if spreads > 1 {
        for i in 0..spreads {
            let column = (i as f32 / (spreads - 1) as f32 * last_column as f32).round() as usize;
            cells[column.min(last_column)] = '·';
        }
    }
    let handle = (offset.max(0.0).round() as usize).min(last_column);
    cells[handle] = '●';

    cells.into_iter().collect()
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn draw_footer(f: &mut Frame, area: Rect) {
    let text = Line::from(vec![
        Span::styled("←/→", Style::default().fg(Color::Yellow)),
        Span::raw(": flip  "),
        Span::styled("Home/End", Style::default().fg(Color::Yellow)),
        Span::raw(": covers  "),
        Span::styled("drag", Style::default().fg(Color::Yellow)),
        Span::raw(": scrub  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(": quit"),
    ]);

    let p = Paragraph::new(text)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scrubber_marks_every_spread() {
        assert_eq!(scrubber_line(9, 5, 0.0), "●─·─·─·─·");
        assert_eq!(scrubber_line(9, 5, 8.0), "·─·─·─·─●");
        assert_eq!(scrubber_line(5, 1, 0.0), "●────");
    }

    #[test]
    fn long_page_names_are_truncated() {
        assert_eq!(truncate_text("cover.jpg", 20), "cover.jpg");
        assert_eq!(truncate_text("interior-spread-04.jpg", 10), "interio...");
    }

    #[test]
    fn handle_is_clamped_to_the_track() {
        assert_eq!(scrubber_line(4, 2, 99.0), "·──●");
        assert_eq!(scrubber_line(4, 2, -3.0), "●──·");
    }
}
