//! Per-run accounting of what was uploaded or failed.
//!
//! Upload and catalog failures do not abort a run; they are collected
//! here and returned to the caller.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Uploaded { rows: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub datasource: String,
    pub table: String,
    /// `k=v/k=v` form of the field partitions, when the table is partitioned.
    pub partition: Option<String>,
    pub outcome: Outcome,
}

/// A degraded-but-continuing condition (count mismatch, missing root, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub datasource: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    outcomes: Vec<TableOutcome>,
    anomalies: Vec<Anomaly>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        datasource: &str,
        table: &str,
        partition: Option<String>,
        outcome: Outcome,
    ) {
        self.outcomes.push(TableOutcome {
            datasource: datasource.to_string(),
            table: table.to_string(),
            partition,
            outcome,
        });
    }

    pub fn uploaded(&mut self, datasource: &str, table: &str, partition: Option<String>, rows: usize) {
        self.record(datasource, table, partition, Outcome::Uploaded { rows });
    }

    pub fn failed(
        &mut self,
        datasource: &str,
        table: &str,
        partition: Option<String>,
        error: impl fmt::Display,
    ) {
        self.record(
            datasource,
            table,
            partition,
            Outcome::Failed {
                error: error.to_string(),
            },
        );
    }

    pub fn anomaly(&mut self, datasource: &str, message: impl Into<String>) {
        self.anomalies.push(Anomaly {
            datasource: datasource.to_string(),
            message: message.into(),
        });
    }

    pub fn outcomes(&self) -> &[TableOutcome] {
        &self.outcomes
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    pub fn upload_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Uploaded { .. }))
            .count()
    }

    /// Outcomes for one table, in the order they were recorded.
    pub fn for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a TableOutcome> + 'a {
        self.outcomes.iter().filter(move |o| o.table == table)
    }
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.datasource, self.table)?;
        if let Some(p) = &self.partition {
            write!(f, " [{}]", p)?;
        }
        match &self.outcome {
            Outcome::Uploaded { rows } => write!(f, ": uploaded {} rows", rows),
            Outcome::Failed { error } => write!(f, ": FAILED ({})", error),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for o in &self.outcomes {
            writeln!(f, "{}", o)?;
        }
        for a in &self.anomalies {
            writeln!(f, "{}: warning: {}", a.datasource, a.message)?;
        }
        write!(
            f,
            "{} uploads, {} failures, {} anomalies",
            self.upload_count(),
            self.failures().count(),
            self.anomalies.len()
        )
    }
}
