use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;
use crate::moveup::{MoveUpStrategy, RawOutput};
use crate::state::SimState;

/// One move-up decision as the loop saw it.
#[derive(Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub timestamp: f64,
    pub ambulance: usize,
    pub strategy: String,
    pub encoded_state: Vec<f64>,
    pub raw_output: RawOutput,
    pub moved_ambulances: Vec<usize>,
    pub target_stations: Vec<usize>,
}

impl LogEntry {
    pub fn decision_count(&self) -> usize {
        self.moved_ambulances.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(value) => Some(*value),
            _ => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Cell::Number(value) => value.to_string(),
            Cell::Text(text) => text.clone(),
            Cell::Empty => String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl LogTable {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.columns.iter().position(|column| column == name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    pub fn numbers(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name)?
            .into_iter()
            .map(Cell::as_number)
            .collect()
    }
}

/// Append-only record of decisions for one run. Callers clear it between
/// independent runs.
#[derive(Clone, Debug, Default)]
pub struct DecisionLogger {
    entries: Vec<LogEntry>,
}

impl DecisionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_entry(
        strategy: &dyn MoveUpStrategy,
        state: &SimState,
        ambulance: usize,
        encoded_state: Vec<f64>,
        raw_output: RawOutput,
        moved_ambulances: Vec<usize>,
        target_stations: Vec<usize>,
    ) -> LogEntry {
        LogEntry {
            timestamp: state.time,
            ambulance,
            strategy: strategy.name().to_string(),
            encoded_state,
            raw_output,
            moved_ambulances,
            target_stations,
        }
    }

    pub fn add_entry(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Columns: timestamp, ambulance, strategy, decisions, moves,
    /// `state_1..state_k`, then `output` when every raw output is a scalar or
    /// `output_1..output_n` otherwise.
    pub fn to_table(&self) -> LogTable {
        if self.entries.is_empty() {
            warn!("decision log is empty; exporting an empty table");
            return LogTable::default();
        }

        let state_width = self
            .entries
            .iter()
            .map(|entry| entry.encoded_state.len())
            .max()
            .unwrap_or(0);
        let scalar_output = self
            .entries
            .iter()
            .all(|entry| matches!(entry.raw_output, RawOutput::Scalar(_)));
        let output_width = if scalar_output {
            1
        } else {
            self.entries
                .iter()
                .map(|entry| entry.raw_output.len())
                .max()
                .unwrap_or(0)
        };

        let mut columns = ["timestamp", "ambulance", "strategy", "decisions", "moves"]
            .iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        columns.extend((1..=state_width).map(|idx| format!("state_{}", idx)));
        if scalar_output {
            columns.push("output".to_string());
        } else {
            columns.extend((1..=output_width).map(|idx| format!("output_{}", idx)));
        }

        let rows = self
            .entries
            .iter()
            .map(|entry| {
                let mut row = vec![
                    Cell::Number(entry.timestamp),
                    Cell::Number(entry.ambulance as f64),
                    Cell::Text(entry.strategy.clone()),
                    Cell::Number(entry.decision_count() as f64),
                    Cell::Text(render_moves(entry)),
                ];
                row.extend(padded(&entry.encoded_state, state_width));
                let outputs = match &entry.raw_output {
                    RawOutput::Vector(values) => values.clone(),
                    RawOutput::Scalar(value) => vec![*value],
                };
                row.extend(padded(&outputs, output_width));
                row
            })
            .collect();

        LogTable { columns, rows }
    }

    /// Writes the table as CSV, adding a `.csv` extension when missing and
    /// replacing any existing file. Returns the path written.
    pub fn save_to_csv(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = csv_path(path.as_ref());
        let table = self.to_table();
        let mut writer = csv::Writer::from_path(&path)?;
        if !table.columns.is_empty() {
            writer.write_record(&table.columns)?;
        }
        for row in &table.rows {
            writer.write_record(row.iter().map(Cell::render))?;
        }
        writer.flush()?;
        Ok(path)
    }
}

fn csv_path(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == "csv") {
        return path.to_path_buf();
    }
    let mut name = OsString::from(path.as_os_str());
    name.push(".csv");
    PathBuf::from(name)
}

fn render_moves(entry: &LogEntry) -> String {
    entry
        .moved_ambulances
        .iter()
        .zip(&entry.target_stations)
        .map(|(amb, station)| format!("{}->{}", amb, station))
        .collect::<Vec<_>>()
        .join(";")
}

fn padded(values: &[f64], width: usize) -> Vec<Cell> {
    (0..width)
        .map(|idx| values.get(idx).map_or(Cell::Empty, |value| Cell::Number(*value)))
        .collect()
}
