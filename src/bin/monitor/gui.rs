use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame, Terminal,
};
use std::{
    error::Error,
    io,
    time::{Duration, Instant},
};

use soundcompass::{
    geodesy::{local_offset, GeoPoint},
    guidance::GuidanceSnapshot,
};

type SnapshotSource = Box<dyn FnMut() -> Option<GuidanceSnapshot>>;

/// Fixes kept for the trail.
const TRAIL_LEN: usize = 600;

struct App {
    origin: GeoPoint,
    source: SnapshotSource,
    snapshot: Option<GuidanceSnapshot>,
    trail: Vec<(f64, f64)>,
}

impl App {
    fn new(origin: GeoPoint, source: SnapshotSource) -> App {
        App {
            origin,
            source,
            snapshot: None,
            trail: vec![],
        }
    }

    fn on_tick(&mut self) {
        self.snapshot = (self.source)();
        let Some(position) = self.snapshot.as_ref().and_then(|s| s.position) else {
            return;
        };
        let point = local_offset(self.origin, position);
        if self.trail.last() != Some(&point) {
            self.trail.push(point);
        }
        if self.trail.len() > TRAIL_LEN {
            self.trail.remove(0);
        }
    }

    fn offset(&self, point: GeoPoint) -> (f64, f64) {
        local_offset(self.origin, point)
    }
}

pub fn engage_gui(origin: GeoPoint, source: SnapshotSource) -> Result<(), Box<dyn Error>> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // create app and run it
    let tick_rate = Duration::from_millis(100);
    let app = App::new(origin, source);
    let res = run_app(&mut terminal, app, tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    tick_rate: Duration,
) -> io::Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

/// Square bounds around every point of interest, with some margin.
fn bounds(points: &[(f64, f64)]) -> ([f64; 2], [f64; 2]) {
    let (mut min_x, mut max_x, mut min_y, mut max_y) = (-10.0f64, 10.0f64, -10.0f64, 10.0f64);
    for &(x, y) in points {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }
    let half = (max_x - min_x).max(max_y - min_y) / 2.0 * 1.1;
    let (cx, cy) = ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0);
    ([cx - half, cx + half], [cy - half, cy + half])
}

fn labels(bounds: [f64; 2]) -> Vec<Span<'static>> {
    let mid = (bounds[0] + bounds[1]) / 2.0;
    [bounds[0], mid, bounds[1]]
        .iter()
        .map(|v| Span::from(format!("{:.0}", v)))
        .collect()
}

fn degrees(value: Option<f64>) -> String {
    value.map_or_else(|| "--".to_owned(), |v| format!("{:5.1}°", v))
}

fn meters(value: Option<f64>) -> String {
    value.map_or_else(|| "--".to_owned(), |v| format!("{:.0} m", v))
}

fn status_lines(snapshot: &GuidanceSnapshot) -> Vec<Line<'static>> {
    let mut lines = vec![
        Line::from(format!(
            "heading {}  (raw {})",
            degrees(snapshot.heading),
            degrees(snapshot.raw_heading)
        )),
        Line::from(format!(
            "destination {} at {}",
            degrees(snapshot.destination_bearing),
            meters(snapshot.destination_distance)
        )),
        Line::from(format!(
            "waypoint {} at {}",
            degrees(snapshot.waypoint_bearing),
            meters(snapshot.waypoint_distance)
        )),
        Line::from(format!(
            "route {}, {} chimes, audio {}",
            snapshot.route,
            snapshot.chimes_fired,
            if snapshot.audio_running { "on" } else { "off" }
        )),
        Line::from(""),
    ];
    lines.extend(snapshot.log.iter().rev().map(|l| Line::from(l.clone())));
    lines
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(f.size());

    let Some(snapshot) = &app.snapshot else {
        f.render_widget(
            Paragraph::new("Waiting for the first frame...")
                .block(Block::default().borders(Borders::ALL)),
            f.size(),
        );
        return;
    };

    let destination = vec![app.offset(snapshot.destination)];
    let waypoint: Vec<_> = snapshot.waypoint.map(|w| app.offset(w)).into_iter().collect();
    let mut everything = app.trail.clone();
    everything.extend(&destination);
    everything.extend(&waypoint);
    let (x_bounds, y_bounds) = bounds(&everything);

    let chart = Chart::new(vec![
        Dataset::default()
            .name("Fixes")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&app.trail),
        Dataset::default()
            .name("Waypoint")
            .marker(symbols::Marker::Block)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Yellow))
            .data(&waypoint),
        Dataset::default()
            .name("Destination")
            .marker(symbols::Marker::Block)
            .graph_type(GraphType::Scatter)
            .style(Style::default().fg(Color::Red))
            .data(&destination),
    ])
    .block(
        Block::default()
            .title(" Track (m from start) ")
            .borders(Borders::ALL),
    )
    .x_axis(
        Axis::default()
            .title(Span::styled("East", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds(x_bounds)
            .labels(labels(x_bounds)),
    )
    .y_axis(
        Axis::default()
            .title(Span::styled("North", Style::default().fg(Color::Red)))
            .style(Style::default().fg(Color::White))
            .bounds(y_bounds)
            .labels(labels(y_bounds)),
    );
    f.render_widget(chart, chunks[0]);

    let status = Paragraph::new(status_lines(snapshot))
        .block(Block::default().title(" Guidance ").borders(Borders::ALL));
    f.render_widget(status, chunks[1]);
}
