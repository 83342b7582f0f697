use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::config::OutputTargets;
use crate::db;
use crate::error::SinkWriteError;
use crate::record::{Record, COLUMNS};

/// A destination for the final record set. Every write fully replaces what was there.
pub trait Sink {
    fn name(&self) -> &'static str;
    fn target(&self) -> &Path;
    fn write(&self, records: &[Record]) -> Result<usize, SinkWriteError>;
}

pub struct SinkReport {
    pub sink: &'static str,
    pub target: PathBuf,
    pub outcome: Result<usize, SinkWriteError>,
}

impl SinkReport {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub fn from_targets(targets: &OutputTargets) -> Vec<Box<dyn Sink>> {
    vec![
        Box::new(TabularWriter::new(&targets.tabular)),
        Box::new(DocumentWriter::new(&targets.document)),
        Box::new(RelationalWriter::new(&targets.relational)),
    ]
}

/// Hand the same records to every sink. A failing sink is logged and reported,
/// the others still run.
pub fn write_all(sinks: &[Box<dyn Sink>], records: &[Record]) -> Vec<SinkReport> {
    sinks
        .iter()
        .map(|sink| {
            let outcome = sink.write(records);
            match &outcome {
                Ok(n) => info!("{}: wrote {} records to {}", sink.name(), n, sink.target().display()),
                Err(e) => warn!("{} sink failed: {}", sink.name(), e),
            }
            SinkReport {
                sink: sink.name(),
                target: sink.target().to_path_buf(),
                outcome,
            }
        })
        .collect()
}

// ── File replacement ──

/// Write into a temp file beside `path`, then rename it over `path`.
fn replace_file<F>(path: &Path, fill: F) -> Result<(), SinkWriteError>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<(), SinkWriteError>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| SinkWriteError::io(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SinkWriteError::io(path, e))?;
    {
        let mut out = BufWriter::new(&mut tmp);
        fill(&mut out)?;
        out.flush().map_err(|e| SinkWriteError::io(path, e))?;
    }
    tmp.persist(path)
        .map_err(|e| SinkWriteError::io(path, e.error))?;
    Ok(())
}

// ── Tabular (CSV) ──

pub struct TabularWriter {
    path: PathBuf,
}

impl TabularWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for TabularWriter {
    fn name(&self) -> &'static str {
        "tabular"
    }

    fn target(&self) -> &Path {
        &self.path
    }

    fn write(&self, records: &[Record]) -> Result<usize, SinkWriteError> {
        let csv_err = |source| SinkWriteError::Csv {
            path: self.path.clone(),
            source,
        };
        replace_file(&self.path, |out| {
            // Header is written by hand so an empty run still yields it.
            let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(out);
            wtr.write_record(COLUMNS).map_err(csv_err)?;
            for r in records {
                wtr.serialize(r).map_err(csv_err)?;
            }
            wtr.flush().map_err(|e| SinkWriteError::io(&self.path, e))
        })?;
        Ok(records.len())
    }
}

// ── Document (JSON) ──

pub struct DocumentWriter {
    path: PathBuf,
}

impl DocumentWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for DocumentWriter {
    fn name(&self) -> &'static str {
        "document"
    }

    fn target(&self) -> &Path {
        &self.path
    }

    fn write(&self, records: &[Record]) -> Result<usize, SinkWriteError> {
        replace_file(&self.path, |out| {
            serde_json::to_writer_pretty(&mut *out, records).map_err(|source| {
                SinkWriteError::Json {
                    path: self.path.clone(),
                    source,
                }
            })?;
            out.write_all(b"\n")
                .map_err(|e| SinkWriteError::io(&self.path, e))
        })?;
        Ok(records.len())
    }
}

// ── Relational (SQLite) ──

pub struct RelationalWriter {
    path: PathBuf,
}

impl RelationalWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Sink for RelationalWriter {
    fn name(&self) -> &'static str {
        "relational"
    }

    fn target(&self) -> &Path {
        &self.path
    }

    fn write(&self, records: &[Record]) -> Result<usize, SinkWriteError> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| SinkWriteError::io(dir, e))?;
        }
        let db_err = |source| SinkWriteError::Database {
            path: self.path.clone(),
            source,
        };
        let conn = db::connect(&self.path).map_err(db_err)?;
        db::replace_products(&conn, records).map_err(db_err)
    }
}
