use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow_array::RecordBatch;
use tracing::debug;

use crate::error::{DetectError, Result};

/// Tabular storage the detector reads its inputs from and writes results to.
///
/// `load_table` returns `Ok(None)` when the table does not exist at all, so
/// callers decide whether absence is fatal.
pub trait TableStore {
    fn load_table(&self, name: &str, columns: &[&str]) -> Result<Option<RecordBatch>>;

    fn write_table(&self, table: &RecordBatch, category: &str, kind: &str, name: &str) -> Result<()>;
}

/// Keep only `columns`, in the requested order. An empty list keeps everything.
pub fn project_columns(table_name: &str, batch: &RecordBatch, columns: &[&str]) -> Result<RecordBatch> {
    if columns.is_empty() {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|column| {
            schema.index_of(column).map_err(|_| DetectError::MissingColumn {
                table: table_name.to_string(),
                column: column.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(batch.project(&indices)?)
}

// ── Directory-backed store ──

/// Reads `<root>/<name>.arrow` (Arrow IPC file) or `<root>/<name>.csv`, and
/// writes results to `<root>/<category>/<kind>/<name>.arrow`.
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn output_path(&self, category: &str, kind: &str, name: &str) -> PathBuf {
        self.root.join(category).join(kind).join(format!("{name}.arrow"))
    }

    /// Read back a table previously written with `write_table`.
    pub fn read_output(&self, category: &str, kind: &str, name: &str) -> Result<Option<RecordBatch>> {
        let path = self.output_path(category, kind, name);
        if !path.exists() {
            return Ok(None);
        }
        read_ipc(&path).map(Some)
    }
}

impl TableStore for DirStore {
    fn load_table(&self, name: &str, columns: &[&str]) -> Result<Option<RecordBatch>> {
        let ipc_path = self.root.join(format!("{name}.arrow"));
        let csv_path = self.root.join(format!("{name}.csv"));

        let batch = if ipc_path.exists() {
            read_ipc(&ipc_path)?
        } else if csv_path.exists() {
            read_csv(&csv_path)?
        } else {
            debug!(table = name, root = %self.root.display(), "table not present");
            return Ok(None);
        };

        debug!(table = name, rows = batch.num_rows(), "table loaded");
        project_columns(name, &batch, columns).map(Some)
    }

    fn write_table(&self, table: &RecordBatch, category: &str, kind: &str, name: &str) -> Result<()> {
        let path = self.output_path(category, kind, name);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let file = File::create(&path)?;
        let mut writer = FileWriter::try_new(file, &table.schema())?;
        writer.write(table)?;
        writer.finish()?;
        debug!(path = %path.display(), rows = table.num_rows(), "table written");
        Ok(())
    }
}

fn read_ipc(path: &Path) -> Result<RecordBatch> {
    let reader = FileReader::try_new(File::open(path)?, None)?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

fn read_csv(path: &Path) -> Result<RecordBatch> {
    let mut file = File::open(path)?;
    let (schema, _) = Format::default().with_header(true).infer_schema(&mut file, None)?;
    file.rewind()?;

    let schema = Arc::new(schema);
    let reader = arrow::csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

// ── In-memory store ──

/// Holds source tables and captured writes in memory. Used by tests and
/// benchmarks, and by callers that already have their data as Arrow batches.
#[derive(Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, RecordBatch>,
    written: RefCell<BTreeMap<String, RecordBatch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, batch: RecordBatch) {
        self.tables.insert(name.to_string(), batch);
    }

    pub fn written(&self, category: &str, kind: &str, name: &str) -> Option<RecordBatch> {
        self.written.borrow().get(&output_key(category, kind, name)).cloned()
    }

    /// Keys of every written table, as `category/kind/name`.
    pub fn written_keys(&self) -> Vec<String> {
        self.written.borrow().keys().cloned().collect()
    }
}

impl TableStore for MemoryStore {
    fn load_table(&self, name: &str, columns: &[&str]) -> Result<Option<RecordBatch>> {
        match self.tables.get(name) {
            Some(batch) => project_columns(name, batch, columns).map(Some),
            None => Ok(None),
        }
    }

    fn write_table(&self, table: &RecordBatch, category: &str, kind: &str, name: &str) -> Result<()> {
        self.written
            .borrow_mut()
            .insert(output_key(category, kind, name), table.clone());
        Ok(())
    }
}

fn output_key(category: &str, kind: &str, name: &str) -> String {
    format!("{category}/{kind}/{name}")
}
