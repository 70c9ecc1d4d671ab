mod backend;
mod config;
mod ui;
mod viewer;

use backend::api::{HttpPageLoader, Issue, MagazineClient, build_client};
use config::ViewerConfig;
use ui::ui::{App, ui};
use viewer::{Viewer, ViewerEvent};

use clap::Parser;
use crossterm::{
    event::{
        DisableMouseCapture, EnableMouseCapture, Event, EventStream, KeyCode, KeyEvent,
        KeyEventKind, MouseButton, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use log::{error, info};
use ratatui::{Terminal, backend::CrosstermBackend};
use std::{error::Error, io};
use tokio::sync::mpsc;

/// Terminal reader for digitized magazine issues.
#[derive(Parser, Debug)]
#[command(name = "magazine-viewer", version, about)]
struct Cli {
    /// Issue id to fetch from the magazine service
    #[arg(required_unless_present = "pages", conflicts_with = "pages")]
    issue_id: Option<String>,

    /// Read these page image URLs instead of fetching an issue
    #[arg(long, num_args = 1.., value_name = "URL")]
    pages: Vec<String>,
}

enum IssueRequest {
    Remote(String),
    Pages(Vec<String>),
}

impl Cli {
    fn into_request(self) -> IssueRequest {
        match self.issue_id {
            Some(id) => IssueRequest::Remote(id),
            None => IssueRequest::Pages(self.pages),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let request = Cli::parse().into_request();

    let config = ViewerConfig::load();
    config::init_logging(&config);
    let client = build_client()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new();
    let (mut viewer, mut events) = Viewer::open(
        HttpPageLoader::new(client.clone()),
        Issue::empty("").pages,
        None,
        config.flip_duration(),
    );

    app.set_loading("Fetching issue...");
    terminal.draw(|f| ui(f, &mut app, &viewer.view()))?;

    let issue = match request {
        IssueRequest::Remote(id) => {
            let api = MagazineClient::new(client, &config.api_base_url, &config.language);
            api.fetch_issue(&id).await.unwrap_or_else(|e| {
                error!("Could not fetch issue {}: {}", id, e);
                Issue::empty("Issue unavailable")
            })
        }
        IssueRequest::Pages(urls) => Issue::from_urls(urls),
    };

    info!("Opening issue '{}' ({})", issue.title, issue.id);
    viewer.reopen(issue.pages, issue.background);
    app.reset_pages();
    app.set_ready(&issue.title);

    let res = run_app(&mut terminal, &mut app, &mut viewer, &mut events).await;

    viewer.close();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("{err}");
    }
    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    viewer: &mut Viewer<HttpPageLoader>,
    events: &mut mpsc::UnboundedReceiver<ViewerEvent>,
) -> io::Result<()> {
    let mut event_stream = EventStream::new();
    let mut track_width = 0.0;

    loop {
        let view = viewer.view();
        terminal.draw(|f| ui(f, app, &view))?;

        // The scrubber is only measured once it has been drawn.
        if app.track_width() != track_width {
            track_width = app.track_width();
            viewer.set_track_width(track_width);
        }

        tokio::select! {
            // Redraw tick for the spinner and freshly cached images
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(50)) => {}

            Some(Ok(event)) = event_stream.next() => {
                match event {
                    Event::Key(key) if key.kind == KeyEventKind::Press => {
                        if !handle_key(viewer, key) {
                            info!("Quit requested");
                            return Ok(());
                        }
                    }
                    Event::Mouse(mouse) => handle_mouse(app, viewer, mouse),
                    _ => {}
                }
            }

            Some(event) = events.recv() => {
                viewer.handle_event(event);
            }
        }
    }
}

/// Returns `false` when the reader asked to quit.
fn handle_key(viewer: &mut Viewer<HttpPageLoader>, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::Right | KeyCode::Char('l') | KeyCode::Char(' ') => viewer.next(),
        KeyCode::Left | KeyCode::Char('h') => viewer.prev(),
        KeyCode::Home => viewer.go_to(0),
        KeyCode::End => {
            let last = viewer.last_index();
            viewer.go_to(last);
        }
        _ => {}
    }
    true
}

fn handle_mouse(app: &App, viewer: &mut Viewer<HttpPageLoader>, mouse: MouseEvent) {
    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) | MouseEventKind::Drag(MouseButton::Left) => {
            if let Some(offset) = app.scrubber_offset(mouse.column, mouse.row) {
                viewer.drag(offset, app.track_width());
            }
        }
        MouseEventKind::Up(MouseButton::Left) => viewer.release_pointer(),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<IssueRequest, clap::Error> {
        let argv = std::iter::once("magazine-viewer").chain(args.iter().copied());
        Cli::try_parse_from(argv).map(Cli::into_request)
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_issue_id() {
        assert!(matches!(
            parse(&["spring-2024"]),
            Ok(IssueRequest::Remote(id)) if id == "spring-2024"
        ));
    }

    #[test]
    fn parses_page_list() {
        assert!(matches!(
            parse(&["--pages", "a.jpg", "b.jpg"]),
            Ok(IssueRequest::Pages(urls)) if urls == ["a.jpg", "b.jpg"]
        ));
    }

    #[test]
    fn rejects_missing_or_conflicting_input() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--pages"]).is_err());
        assert!(parse(&["spring-2024", "--pages", "a.jpg"]).is_err());
    }
}
