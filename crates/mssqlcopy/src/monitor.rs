//! Progress reporting.
//!
//! Copy stages publish [`Event`]s into a bounded channel; a single
//! [`Monitor`] owns all rendering state and redraws on a timer, so progress
//! accounting never races with the tasks producing it.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CopyError, Result};

/// Capacity of the event channel shared by all copy tasks.
pub const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Interval between interactive redraws.
pub const RENDER_INTERVAL: Duration = Duration::from_millis(10);

/// Assumed row total until the real count arrives.
const DEFAULT_TOTAL: i64 = 10_000;

const BAR_WIDTH: usize = 100;

/// Progress events published by copy tasks. `table` is the rendered
/// `[schema].[table]` name, which keys all monitor state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started { table: String },
    CountKnown { table: String, total: i64 },
    Progress { table: String, rows: i64 },
    Finished { table: String },
    Failed { table: String, error: String },
}

impl Event {
    fn table(&self) -> &str {
        match self {
            Event::Started { table }
            | Event::CountKnown { table, .. }
            | Event::Progress { table, .. }
            | Event::Finished { table }
            | Event::Failed { table, .. } => table,
        }
    }
}

/// Rendering state for one table.
struct ProgressReporter {
    table: String,
    total: i64,
    total_known: bool,
    rows_copied: i64,
    started: Instant,
    done: bool,
    error: Option<String>,
}

impl ProgressReporter {
    fn new(table: String) -> Self {
        Self {
            table,
            total: DEFAULT_TOTAL,
            total_known: false,
            rows_copied: 0,
            started: Instant::now(),
            done: false,
            error: None,
        }
    }

    fn render_bar(&self) -> String {
        let copied = self.rows_copied.min(self.total);
        let pct = if self.total > 0 {
            copied * 100 / self.total
        } else {
            100
        };
        let filled = (pct as usize).min(BAR_WIDTH);
        let bar = format!("{}{}", "█".repeat(filled), " ".repeat(BAR_WIDTH - filled));

        let elapsed = self.started.elapsed();
        let per_sec = if elapsed.as_secs_f64() > 0.0 {
            self.rows_copied as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let rate = (per_sec * 3600.0) as i64;
        let eta = if per_sec > 0.0 {
            ((self.total - copied) as f64 / per_sec) as u64
        } else {
            0
        };

        format!(
            "\r{} {:>3}% |{}| ({}/{}, {} it/hr) [{}s:{}s]",
            self.table,
            pct,
            bar,
            self.rows_copied,
            self.total,
            rate,
            elapsed.as_secs(),
            eta,
        )
    }
}

/// Consumes copy events and renders progress to `writer`.
///
/// In interactive mode the monitor repaints a block of terminal lines, one
/// bar per table, sorted by rendered table name. In CI mode it appends one
/// plain line per table whenever its row count has grown.
pub struct Monitor<W> {
    events: mpsc::Receiver<Event>,
    ci: bool,
    writer: W,
    reporters: BTreeMap<String, ProgressReporter>,
    managed_lines: usize,
    last_ci_counts: HashMap<String, i64>,
    tick: Duration,
}

impl<W: Write + Send + 'static> Monitor<W> {
    pub fn new(events: mpsc::Receiver<Event>, ci: bool, writer: W) -> Self {
        Self {
            events,
            ci,
            writer,
            reporters: BTreeMap::new(),
            managed_lines: 0,
            last_ci_counts: HashMap::new(),
            tick: RENDER_INTERVAL,
        }
    }

    /// Override the redraw interval.
    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Drive rendering until every registered table has finished or failed,
    /// the event channel closes, or `cancel` fires. A final frame is always
    /// rendered before returning.
    ///
    /// Events are drained ahead of the termination check so a terminal event
    /// arriving together with the next table's start does not end the loop
    /// between scheduler chunks.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let start = tokio::time::Instant::now() + self.tick;
        let mut ticker = tokio::time::interval_at(start, self.tick);

        loop {
            tokio::select! {
                biased;

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            self.handle(event)?;
                            if self.events.is_empty() && self.all_done() {
                                self.render()?;
                                return Ok(());
                            }
                        }
                        None => {
                            self.render()?;
                            return Ok(());
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    self.render()?;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.render()?;
                }
            }
        }
    }

    fn all_done(&self) -> bool {
        !self.reporters.is_empty() && self.reporters.values().all(|r| r.done)
    }

    fn handle(&mut self, event: Event) -> Result<()> {
        let key = event.table().to_string();
        match event {
            Event::Started { .. } => {
                if self.reporters.contains_key(&key) {
                    return Err(CopyError::Monitor(format!(
                        "monitor already exists for table {key}"
                    )));
                }
                self.reporters.insert(key.clone(), ProgressReporter::new(key));
            }
            Event::CountKnown { total, .. } => {
                let reporter = self.reporter(&key)?;
                reporter.total = total;
                reporter.total_known = true;
            }
            Event::Progress { rows, .. } => {
                self.reporter(&key)?.rows_copied += rows;
            }
            Event::Finished { .. } => {
                self.reporter(&key)?.done = true;
            }
            Event::Failed { error, .. } => {
                let reporter = self.reporter(&key)?;
                reporter.done = true;
                reporter.error = Some(error);
            }
        }
        Ok(())
    }

    fn reporter(&mut self, key: &str) -> Result<&mut ProgressReporter> {
        self.reporters
            .get_mut(key)
            .ok_or_else(|| CopyError::Monitor(format!("no monitor found for table {key}")))
    }

    fn render(&mut self) -> Result<()> {
        if self.ci {
            self.render_ci()
        } else {
            self.render_interactive()
        }
    }

    /// Append-only output for non-terminal environments. A table gets a new
    /// line only when its count actually grew and its total is known.
    fn render_ci(&mut self) -> Result<()> {
        for reporter in self.reporters.values() {
            if !reporter.total_known || reporter.total == 0 {
                continue;
            }
            let last = self
                .last_ci_counts
                .get(&reporter.table)
                .copied()
                .unwrap_or(-1);
            if reporter.rows_copied > last {
                writeln!(
                    self.writer,
                    "{} copied {} of {}",
                    reporter.table, reporter.rows_copied, reporter.total
                )?;
                self.last_ci_counts
                    .insert(reporter.table.clone(), reporter.rows_copied);
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    fn render_interactive(&mut self) -> Result<()> {
        // Move up and clear every line of the previous frame.
        for _ in 0..self.managed_lines {
            write!(self.writer, "\x1b[1F\x1b[2K")?;
        }

        let tables: Vec<&str> = self.reporters.keys().map(String::as_str).collect();
        write!(self.writer, "Copying from {}\n\n", tables.join(", "))?;

        for reporter in self.reporters.values() {
            match &reporter.error {
                Some(error) => write!(self.writer, "{} = FAILED : {}\n\n", reporter.table, error)?,
                None => write!(self.writer, "{}\n\n", reporter.render_bar())?,
            }
        }
        self.writer.flush()?;

        self.managed_lines = 2 + 2 * self.reporters.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// A tick long enough that only explicit events trigger renders.
    fn slow_tick() -> Duration {
        Duration::from_secs(3600)
    }

    #[tokio::test]
    async fn renders_initial_bar_for_new_table() {
        let buf = SharedBuf::default();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Monitor::new(rx, false, buf.clone()).with_tick_interval(slow_tick());
        let handle = tokio::spawn(monitor.run(CancellationToken::new()));

        tx.send(Event::Started {
            table: "[dbo].[test]".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        let expected = format!(
            "Copying from [dbo].[test]\n\n\r[dbo].[test]   0% |{}| (0/10000, 0 it/hr) [0s:0s]",
            " ".repeat(100)
        );
        assert_eq!(buf.contents().trim_end(), expected);
    }

    #[tokio::test]
    async fn tables_render_in_lexical_order() {
        let buf = SharedBuf::default();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Monitor::new(rx, false, buf.clone()).with_tick_interval(slow_tick());
        let handle = tokio::spawn(monitor.run(CancellationToken::new()));

        for table in ["[dbo].[test]", "[dbo].[test2]"] {
            tx.send(Event::Started {
                table: table.to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap().unwrap();

        // ']' sorts after '2', so [dbo].[test2] comes first.
        let out = buf.contents();
        assert!(out.contains("Copying from [dbo].[test2], [dbo].[test]"));
        let first = out.find("\r[dbo].[test2]").unwrap();
        let second = out.rfind("\r[dbo].[test] ").unwrap();
        assert!(first < second);
    }

    #[tokio::test]
    async fn failed_table_renders_error_line() {
        let buf = SharedBuf::default();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Monitor::new(rx, false, buf.clone()).with_tick_interval(slow_tick());
        let handle = tokio::spawn(monitor.run(CancellationToken::new()));

        tx.send(Event::Started {
            table: "[dbo].[test]".to_string(),
        })
        .await
        .unwrap();
        tx.send(Event::Failed {
            table: "[dbo].[test]".to_string(),
            error: "connection reset".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap().unwrap();

        assert!(buf
            .contents()
            .contains("[dbo].[test] = FAILED : connection reset"));
    }

    #[tokio::test]
    async fn ci_mode_appends_only_on_growth() {
        let (_tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut monitor = Monitor::new(rx, true, Vec::new());

        let key = "[dbo].[test]".to_string();
        monitor
            .handle(Event::Started { table: key.clone() })
            .unwrap();
        // Total still unknown, nothing to report.
        monitor.render().unwrap();
        assert!(monitor.writer.is_empty());

        monitor
            .handle(Event::CountKnown {
                table: key.clone(),
                total: 100,
            })
            .unwrap();
        monitor
            .handle(Event::Progress {
                table: key.clone(),
                rows: 5,
            })
            .unwrap();
        monitor.render().unwrap();
        monitor.render().unwrap();
        monitor
            .handle(Event::Progress {
                table: key.clone(),
                rows: 5,
            })
            .unwrap();
        monitor.render().unwrap();

        let out = String::from_utf8(monitor.writer.clone()).unwrap();
        assert_eq!(
            out,
            "[dbo].[test] copied 5 of 100\n[dbo].[test] copied 10 of 100\n"
        );
    }

    #[tokio::test]
    async fn events_for_unknown_tables_are_errors() {
        let (_tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut monitor = Monitor::new(rx, false, Vec::new());

        let err = monitor
            .handle(Event::Progress {
                table: "[dbo].[nope]".to_string(),
                rows: 1,
            })
            .unwrap_err();
        assert!(err.to_string().contains("no monitor found"));

        monitor
            .handle(Event::Started {
                table: "[dbo].[t]".to_string(),
            })
            .unwrap();
        let err = monitor
            .handle(Event::Started {
                table: "[dbo].[t]".to_string(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
