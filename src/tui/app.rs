use crate::error::Result;
use crate::metrics::{AggregatesChanged, MetricsAggregator};
use crate::pending::Millis;
use crate::platform::PlatformId;
use crate::store::{AggregateStore, EventLogEntry, PlatformAggregate, Snapshot};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, prelude::*};
use std::io::{self, stdout};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::{self, error::TryRecvError};

use super::ui;

/// How often the cheap `last_update` probe runs between full refreshes.
const CHANGE_PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Number of diagnostic entries kept on screen.
const LOG_TAIL: usize = 8;

pub struct App<'a, S> {
    rt: &'a Runtime,
    aggregator: &'a MetricsAggregator<S>,
    changes: broadcast::Receiver<AggregatesChanged>,
    refresh: Duration,
    last_refresh: Instant,
    last_probe: Instant,
    running: bool,

    snapshot: Snapshot,
    rows: Vec<(PlatformId, PlatformAggregate)>,
    log_tail: Vec<EventLogEntry>,
    selected_row: usize,
    confirm_reset: bool,
    status: Option<(String, Instant)>,
}

impl<'a, S: AggregateStore> App<'a, S> {
    pub fn new(rt: &'a Runtime, aggregator: &'a MetricsAggregator<S>, refresh: Duration) -> Self {
        App {
            rt,
            aggregator,
            changes: aggregator.subscribe(),
            refresh,
            last_refresh: Instant::now(),
            last_probe: Instant::now(),
            running: true,
            snapshot: Snapshot::default(),
            rows: Vec::new(),
            log_tail: Vec::new(),
            selected_row: 0,
            confirm_reset: false,
            status: None,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        self.reload()?;

        enable_raw_mode()?;
        let mut stdout = stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let result = self.main_loop(&mut terminal);

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    fn main_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
        while self.running {
            if event::poll(Duration::from_millis(50))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code)?;
            }

            self.tick()?;

            terminal.draw(|frame| {
                ui::render(frame, &*self);
            })?;
        }
        Ok(())
    }

    /// Reload when the periodic refresh is due, a local change was announced,
    /// or another process moved `last_update`.
    fn tick(&mut self) -> Result<()> {
        if self.last_refresh.elapsed() >= self.refresh || self.drain_changes() {
            return self.reload();
        }
        if self.last_probe.elapsed() >= CHANGE_PROBE_INTERVAL {
            self.last_probe = Instant::now();
            let stored = self.rt.block_on(self.aggregator.store().last_update())?;
            if stored != self.snapshot.last_update {
                return self.reload();
            }
        }
        Ok(())
    }

    fn drain_changes(&mut self) -> bool {
        let mut changed = false;
        loop {
            match self.changes.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => changed = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return changed,
            }
        }
    }

    pub fn reload(&mut self) -> Result<()> {
        let store = self.aggregator.store();
        let (snapshot, log) = self
            .rt
            .block_on(async { Ok::<_, crate::Error>((store.snapshot().await?, store.diagnostic_log().await?)) })?;

        let mut rows: Vec<_> = snapshot
            .aggregates
            .iter()
            .map(|(id, a)| (id.clone(), a.clone()))
            .collect();
        rows.sort_by(|a, b| b.1.query_count.cmp(&a.1.query_count).then_with(|| a.0.cmp(&b.0)));

        self.rows = rows;
        self.log_tail = log.into_iter().rev().take(LOG_TAIL).collect();
        self.snapshot = snapshot;
        self.selected_row = self.selected_row.min(self.rows.len().saturating_sub(1));
        self.last_refresh = Instant::now();
        self.last_probe = Instant::now();
        Ok(())
    }

    pub fn handle_key(&mut self, key: KeyCode) -> Result<()> {
        if self.confirm_reset {
            self.confirm_reset = false;
            if matches!(key, KeyCode::Char('y') | KeyCode::Char('Y')) {
                self.rt.block_on(self.aggregator.reset())?;
                self.set_status("Statistics cleared");
                self.reload()?;
            } else {
                self.set_status("Reset cancelled");
            }
            return Ok(());
        }

        match key {
            KeyCode::Char('q') | KeyCode::Esc => self.running = false,
            KeyCode::Char('r') => self.confirm_reset = true,
            KeyCode::Char('u') => self.reload()?,
            KeyCode::Char('j') | KeyCode::Down => {
                self.selected_row = (self.selected_row + 1).min(self.rows.len().saturating_sub(1));
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected_row = self.selected_row.saturating_sub(1);
            }
            KeyCode::Char('g') | KeyCode::Home => self.selected_row = 0,
            KeyCode::Char('G') | KeyCode::End => {
                self.selected_row = self.rows.len().saturating_sub(1);
            }
            _ => {}
        }
        Ok(())
    }

    fn set_status(&mut self, message: &str) {
        self.status = Some((message.to_string(), Instant::now()));
    }

    // Getters for UI
    pub fn rows(&self) -> &[(PlatformId, PlatformAggregate)] {
        &self.rows
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn log_tail(&self) -> &[EventLogEntry] {
        &self.log_tail
    }

    pub fn selected_row(&self) -> usize {
        self.selected_row
    }

    pub fn last_update(&self) -> Option<Millis> {
        self.snapshot.last_update
    }

    pub fn is_confirming_reset(&self) -> bool {
        self.confirm_reset
    }

    /// Status messages fade after a few seconds.
    pub fn status(&self) -> Option<&str> {
        self.status
            .as_ref()
            .filter(|(_, at)| at.elapsed() < Duration::from_secs(3))
            .map(|(m, _)| m.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}
