use std::{io::stdout, sync::mpsc, thread, time::Duration};

use crate::gui::error::GuiError;

use crossterm::{
    event::{self, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};

use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Runs a function over and over on a worker thread until the user presses
/// a key, showing the lines returned by `status` meanwhile.
///
/// The function can be thought of as a recursive fold. `init` contains the
/// initial state of the loop, then `f` is called on the initial state to
/// produce a new state, and then `f` is called on that new state, and so on
/// until the user indicates that this should stop. The last state is
/// returned.
pub fn fold_until_stop<F, T, S>(title: &str, init: T, mut f: F, status: S) -> Result<T, GuiError>
where
    F: FnMut(T) -> T + Send + 'static,
    T: Send + 'static,
    S: Fn() -> Vec<String>,
{
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (res_tx, res_rx) = mpsc::channel();

    let th = thread::spawn(move || {
        let mut val = init;
        // a closed channel means the UI is gone, stop as well
        while let Err(mpsc::TryRecvError::Empty) = stop_rx.try_recv() {
            val = f(val);
        }
        // only fails if the UI stopped listening
        let _ = res_tx.send(val);
    });

    loop {
        let heading = Title::from(Span::styled(
            format!(" {} ", title),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ));
        let hint = Title::from(" Press any key to stop ".cyan())
            .alignment(Alignment::Center)
            .position(Position::Bottom);
        let lines: Vec<Line> = status().into_iter().map(Line::from).collect();
        let block = Block::default()
            .title(heading.alignment(Alignment::Center))
            .title(hint)
            .borders(Borders::ALL);
        let text = Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .block(block);
        terminal.draw(|frame| {
            let area = frame.size();
            frame.render_widget(text, area);
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let event::Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    break;
                }
            }
        }
    }

    stop_tx.send(())?;
    let res = res_rx.recv()?;
    th.join().map_err(|_| GuiError::JoinError)?;
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(res)
}
