//! System catalog for MiniDB
//!
//! The catalog holds every table schema plus the ordered list of page ids
//! that make up each table's file. It is loaded once at startup, owned by
//! the execution engine, and written back on every DDL and at shutdown.

use super::schema::Schema;
use crate::error::{Error, Result};
use crate::storage::page::PageId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Marker recorded in the catalog file describing how pages are laid out
/// on disk: one file per table containing concatenated 4 KB pages.
const PAGE_LAYOUT: &str = "table-file";

/// Everything the catalog knows about one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub schema: Schema,
    /// Page ids in allocation order; scans visit pages in this order.
    pub pages: Vec<PageId>,
}

/// System catalog
#[derive(Debug)]
pub struct Catalog {
    tables: BTreeMap<String, TableEntry>,
    path: PathBuf,
}

/// Serializable proxy for Catalog
#[derive(Serialize, Deserialize)]
struct CatalogData {
    page_layout: String,
    tables: BTreeMap<String, TableEntry>,
}

impl Catalog {
    /// Create a new empty catalog that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            tables: BTreeMap::new(),
            path: path.into(),
        }
    }

    /// Load the catalog from disk, or start empty if the file is absent.
    ///
    /// A present-but-unreadable catalog is an unrecoverable startup
    /// failure and surfaces as an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new(path));
        }

        let json = std::fs::read_to_string(path)?;
        let data: CatalogData = serde_json::from_str(&json)
            .map_err(|e| Error::Runtime(format!("corrupt catalog file '{}': {}", path.display(), e)))?;

        Ok(Self {
            tables: data.tables,
            path: path.to_path_buf(),
        })
    }

    /// Save the catalog to disk.
    pub fn save(&self) -> Result<()> {
        let data = CatalogData {
            page_layout: PAGE_LAYOUT.to_string(),
            tables: self.tables.clone(),
        };
        let json = serde_json::to_string_pretty(&data)
            .map_err(|e| Error::Runtime(format!("catalog serialization failed: {}", e)))?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Register a new table.
    pub fn create_table(&mut self, name: &str, schema: Schema) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(Error::Runtime(format!("table '{}' already exists", name)));
        }
        self.tables.insert(
            name.to_string(),
            TableEntry {
                schema,
                pages: Vec::new(),
            },
        );
        Ok(())
    }

    /// Remove a table.
    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        if self.tables.remove(name).is_none() {
            return Err(Error::Runtime(format!("table '{}' not found", name)));
        }
        Ok(())
    }

    /// Look up a table entry.
    pub fn get(&self, name: &str) -> Result<&TableEntry> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::Runtime(format!("table '{}' not found", name)))
    }

    /// Check if a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// List all table names
    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.keys().map(|s| s.as_str()).collect()
    }

    /// Replace a table's page list after the file manager grew it.
    pub fn set_pages(&mut self, name: &str, pages: Vec<PageId>) -> Result<()> {
        let entry = self
            .tables
            .get_mut(name)
            .ok_or_else(|| Error::Runtime(format!("table '{}' not found", name)))?;
        entry.pages = pages;
        Ok(())
    }

    /// Get table schema info as a formatted string
    pub fn describe(&self, name: &str) -> Result<String> {
        let entry = self.get(name)?;
        let mut info = format!("Table: {}\n", name);
        for col in entry.schema.columns() {
            let mut flags = Vec::new();
            if col.primary_key {
                flags.push("PRIMARY KEY".to_string());
            }
            if let Some(r) = &col.references {
                flags.push(format!("REFERENCES {}({})", r.table, r.column));
            }
            let flags_str = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            info.push_str(&format!("  {} {}{}\n", col.name, col.data_type, flags_str));
        }
        Ok(info)
    }
}
