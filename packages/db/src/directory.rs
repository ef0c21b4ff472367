//! Ordered catalog of datasets.
//!
//! The catalog is rebuilt from table names in storage and kept in memory as
//! a copy-on-write list. Structural changes (creating or dropping datasets)
//! serialize on one async exclusive section; readers never wait for them.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use jobsdb_core::{Dataset, DatasetIndex, TableKind};
use serde::Deserialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::schema::dataset_ddl;
use crate::{Database, DbError, Tables, Transaction};

/// Where a new dataset goes in the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateMode {
    /// After every existing dataset.
    Append,
    /// Immediately before the given dataset.
    InsertBefore(DatasetIndex),
}

/// Dataset tables found in storage.
#[derive(Debug, Default, Clone)]
pub struct StorageScan {
    /// Datasets with both tables present, ascending.
    pub datasets: Vec<Dataset>,
    /// Tables whose partner table is missing.
    pub orphans: Vec<(TableKind, DatasetIndex, String)>,
}

impl StorageScan {
    /// Indices holding at least one table, registered or not.
    fn occupied_indices(&self) -> impl Iterator<Item = &DatasetIndex> {
        self.datasets
            .iter()
            .map(|d| &d.index)
            .chain(self.orphans.iter().map(|(_, index, _)| index))
    }
}

/// Proof that the caller holds the directory's exclusive section.
pub struct DirectoryGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[derive(Debug, Deserialize)]
struct DbInfo {
    #[serde(default)]
    tables: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: i64,
}

/// Ordered catalog of the datasets of one queue.
pub struct DatasetDirectory {
    db: Database,
    tables: Tables,
    datasets: RwLock<Arc<Vec<Dataset>>>,
    structure: Mutex<()>,
}

impl DatasetDirectory {
    /// Build the catalog from the tables currently in storage.
    pub async fn load(db: Database, tables: Tables) -> Result<Self, DbError> {
        let directory = Self {
            db,
            tables,
            datasets: RwLock::new(Arc::new(Vec::new())),
            structure: Mutex::new(()),
        };
        directory.refresh().await?;
        Ok(directory)
    }

    pub fn prefix(&self) -> &str {
        self.tables.prefix()
    }

    /// Snapshot of all datasets, ascending by index.
    pub fn list(&self) -> Arc<Vec<Dataset>> {
        self.datasets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, index: &DatasetIndex) -> Option<Dataset> {
        self.list().iter().find(|d| &d.index == index).cloned()
    }

    pub fn last(&self) -> Option<Dataset> {
        self.list().last().cloned()
    }

    /// The dataset immediately before `index`.
    pub fn previous(&self, index: &DatasetIndex) -> Option<Dataset> {
        self.list()
            .iter()
            .take_while(|d| &d.index < index)
            .last()
            .cloned()
    }

    /// Enter the exclusive section for structural changes.
    pub async fn exclusive(&self) -> DirectoryGuard<'_> {
        DirectoryGuard {
            _guard: self.structure.lock().await,
        }
    }

    /// List the dataset tables present in storage.
    pub async fn scan(&self) -> Result<StorageScan, DbError> {
        let mut result = self.db.query("INFO FOR DB").await?;
        let info: Option<DbInfo> = result.take(0)?;
        let names = info.map(|i| i.tables).unwrap_or_default();

        let mut found: BTreeMap<DatasetIndex, (Option<String>, Option<String>)> = BTreeMap::new();
        for name in names.into_keys() {
            if let Some((kind, index)) = Dataset::parse_table_name(self.prefix(), &name) {
                let entry = found.entry(index).or_default();
                match kind {
                    TableKind::Jobs => entry.0 = Some(name),
                    TableKind::Statuses => entry.1 = Some(name),
                }
            }
        }

        let mut scan = StorageScan::default();
        for (index, tables) in found {
            match tables {
                (Some(_), Some(_)) => scan.datasets.push(Dataset::new(self.prefix(), index)),
                (Some(name), None) => scan.orphans.push((TableKind::Jobs, index, name)),
                (None, Some(name)) => scan.orphans.push((TableKind::Statuses, index, name)),
                (None, None) => {}
            }
        }
        Ok(scan)
    }

    /// Rebuild the catalog from storage.
    pub async fn refresh(&self) -> Result<StorageScan, DbError> {
        let scan = self.scan().await?;
        self.replace(scan.datasets.clone());
        tracing::info!(
            "[{}] Dataset directory loaded: {} datasets, {} orphan tables",
            self.prefix(),
            scan.datasets.len(),
            scan.orphans.len()
        );
        Ok(scan)
    }

    fn replace(&self, datasets: Vec<Dataset>) {
        *self.datasets.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(datasets);
    }

    /// Choose the index of a new dataset.
    ///
    /// Indices already present in storage, orphaned or complete but not
    /// registered, are never reused so that a retried creation cannot
    /// collide with leftovers of a failed one.
    pub fn plan_index(
        datasets: &[Dataset],
        scan: &StorageScan,
        mode: &CreateMode,
    ) -> Result<DatasetIndex, DbError> {
        match mode {
            CreateMode::Append => {
                let top = datasets
                    .iter()
                    .map(|d| &d.index)
                    .chain(scan.occupied_indices())
                    .max();
                Ok(top.map_or_else(DatasetIndex::first, DatasetIndex::next_append))
            }
            CreateMode::InsertBefore(before) => {
                if !datasets.iter().any(|d| &d.index == before) {
                    return Err(DbError::NotFound(format!("dataset {before}")));
                }
                let prev = datasets
                    .iter()
                    .map(|d| &d.index)
                    .chain(scan.occupied_indices())
                    .filter(|index| *index < before)
                    .max();
                DatasetIndex::between(prev, before).ok_or_else(|| {
                    DbError::Query(format!("no room for a dataset before {before}"))
                })
            }
        }
    }

    /// Name the dataset a creation in `mode` would produce.
    pub async fn plan(
        &self,
        _guard: &DirectoryGuard<'_>,
        mode: &CreateMode,
    ) -> Result<Dataset, DbError> {
        let scan = self.scan().await?;
        let index = Self::plan_index(&self.list(), &scan, mode)?;
        Ok(Dataset::new(self.prefix(), index))
    }

    /// Create both tables of `dataset` in one transaction without adding it
    /// to the catalog.
    pub async fn create_tables(
        &self,
        _guard: &DirectoryGuard<'_>,
        dataset: &Dataset,
    ) -> Result<(), DbError> {
        let mut txn = Transaction::new();
        for statement in dataset_ddl(dataset) {
            txn.push(statement);
        }
        txn.commit(&self.db).await?;
        tracing::info!("[{}] Created tables for dataset {}", self.prefix(), dataset.index);
        Ok(())
    }

    /// Make `dataset` visible to readers.
    pub fn register(&self, _guard: &DirectoryGuard<'_>, dataset: Dataset) {
        let mut datasets = self.list().as_ref().clone();
        if datasets.iter().any(|d| d.index == dataset.index) {
            return;
        }
        datasets.push(dataset);
        datasets.sort_by(|a, b| a.index.cmp(&b.index));
        self.replace(datasets);
    }

    /// Plan, create and register a dataset.
    pub async fn create(
        &self,
        guard: &DirectoryGuard<'_>,
        mode: &CreateMode,
    ) -> Result<Dataset, DbError> {
        let dataset = self.plan(guard, mode).await?;
        self.create_tables(guard, &dataset).await?;
        self.register(guard, dataset.clone());
        Ok(dataset)
    }

    /// Remove both tables of the dataset at `index` and forget it.
    pub async fn drop_dataset(
        &self,
        guard: &DirectoryGuard<'_>,
        index: &DatasetIndex,
    ) -> Result<(), DbError> {
        let dataset = Dataset::new(self.prefix(), index.clone());
        self.drop_table(guard, &dataset.jobs_table).await?;
        self.drop_table(guard, &dataset.status_table).await?;

        let datasets: Vec<Dataset> = self
            .list()
            .iter()
            .filter(|d| &d.index != index)
            .cloned()
            .collect();
        self.replace(datasets);

        tracing::warn!("[{}] Dropped dataset {}", self.prefix(), index);
        Ok(())
    }

    /// Number of rows in a dataset table.
    pub async fn row_count(&self, table: &str) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", table.to_string()))
            .await?;

        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows.into_iter().next().map_or(0, |r| r.count.max(0) as u64))
    }

    /// Remove one dataset table if it exists.
    pub async fn drop_table(
        &self,
        _guard: &DirectoryGuard<'_>,
        table: &str,
    ) -> Result<(), DbError> {
        if Dataset::parse_table_name(self.prefix(), table).is_none() {
            return Err(DbError::InvalidName(format!("not a dataset table: {table}")));
        }
        self.db
            .query(format!("REMOVE TABLE IF EXISTS {table}"))
            .await?
            .check()?;
        Ok(())
    }
}
