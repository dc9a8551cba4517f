use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io;
use water_billing::UsageMatrix;

/// How many unit columns fit on screen at once
const VISIBLE_UNITS: usize = 7;

pub struct App {
    pub matrix: UsageMatrix,
    pub state: TableState,
    pub unit_offset: usize,
}

impl App {
    pub fn new(matrix: UsageMatrix) -> Self {
        let mut state = TableState::default();
        if !matrix.dates.is_empty() {
            state.select(Some(0));
        }

        Self {
            matrix,
            state,
            unit_offset: 0,
        }
    }

    pub fn next(&mut self) {
        let i = match self.state.selected() {
            Some(i) if i + 1 < self.matrix.dates.len() => i + 1,
            Some(i) => i,
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous(&mut self) {
        let i = self.state.selected().map(|i| i.saturating_sub(1)).unwrap_or(0);
        self.state.select(Some(i));
    }

    pub fn scroll_right(&mut self) {
        if self.unit_offset + VISIBLE_UNITS < self.matrix.units.len() {
            self.unit_offset += 1;
        }
    }

    pub fn scroll_left(&mut self) {
        self.unit_offset = self.unit_offset.saturating_sub(1);
    }

    fn visible_units(&self) -> &[String] {
        let end = (self.unit_offset + VISIBLE_UNITS).min(self.matrix.units.len());
        &self.matrix.units[self.unit_offset..end]
    }
}

pub fn run_ui(app: &mut App) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let res = run_app(&mut terminal, app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Down | KeyCode::Char('j') => app.next(),
                KeyCode::Up | KeyCode::Char('k') => app.previous(),
                KeyCode::Right | KeyCode::Char('l') => app.scroll_right(),
                KeyCode::Left | KeyCode::Char('h') => app.scroll_left(),
                KeyCode::Home => app.state.select(Some(0)),
                KeyCode::End => {
                    if !app.matrix.dates.is_empty() {
                        app.state.select(Some(app.matrix.dates.len() - 1));
                    }
                }
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(f.size());

    let visible = app.visible_units().to_vec();

    let mut header_cells = vec![Cell::from("Date").style(
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )];
    header_cells.extend(visible.iter().map(|u| {
        Cell::from(u.as_str().to_string()).style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
    }));
    let header = Row::new(header_cells).height(1);

    let rows = app.matrix.dates.iter().enumerate().map(|(di, date)| {
        let mut cells = vec![Cell::from(date.format("%Y-%m-%d").to_string())];
        for ui_idx in 0..visible.len() {
            let gallons = app.matrix.cells[di][app.unit_offset + ui_idx];
            let text = if gallons == 0.0 {
                "-".to_string()
            } else {
                format!("{:.1}", gallons)
            };
            cells.push(Cell::from(text));
        }
        Row::new(cells).height(1)
    });

    let mut widths = vec![Constraint::Length(12)];
    widths.extend(std::iter::repeat(Constraint::Length(14)).take(visible.len()));

    let title = format!(
        " Usage (gallons) - units {}-{} of {} ",
        app.unit_offset + 1,
        app.unit_offset + visible.len(),
        app.matrix.units.len()
    );
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    f.render_stateful_widget(table, chunks[0], &mut app.state);

    let help = Paragraph::new("↑/↓ scroll days  ←/→ scroll units  q quit")
        .style(Style::default().fg(Color::DarkGray));
    f.render_widget(help, chunks[1]);
}
