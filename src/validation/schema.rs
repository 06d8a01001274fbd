//! Schema allowlist for identifier checks.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::datasource::TableSchema;

/// Known tables and their columns, compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaAllowlist {
    tables: HashMap<String, HashSet<String>>,
}

impl SchemaAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table with its columns.
    pub fn with_table<I, S>(mut self, table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_table(table, columns);
        self
    }

    pub fn add_table<I, S>(&mut self, table: &str, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = self.tables.entry(table.to_lowercase()).or_default();
        entry.extend(columns.into_iter().map(|c| c.as_ref().to_lowercase()));
    }

    /// Build from the config's `table -> [columns]` map.
    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Self {
        let mut allowlist = Self::new();
        for (table, columns) in map {
            allowlist.add_table(table, columns);
        }
        allowlist
    }

    /// Build from an introspected schema.
    pub fn from_tables(tables: &[TableSchema]) -> Self {
        let mut allowlist = Self::new();
        for table in tables {
            allowlist.add_table(&table.name, table.columns.iter().map(|c| c.name.as_str()));
        }
        allowlist
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    /// True if any known table has this column.
    pub fn has_column(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.tables.values().any(|columns| columns.contains(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::ColumnSchema;

    #[test]
    fn test_case_insensitive_lookup() {
        let allowlist = SchemaAllowlist::new().with_table("NETFLIX_MOVIES", ["Title", "release_year"]);
        assert!(allowlist.has_table("netflix_movies"));
        assert!(allowlist.has_column("TITLE"));
        assert!(allowlist.has_column("release_year"));
        assert!(!allowlist.has_column("budget"));
        assert!(!allowlist.has_table("users"));
    }

    #[test]
    fn test_from_map() {
        let mut map = BTreeMap::new();
        map.insert("movies".to_string(), vec!["title".to_string()]);
        let allowlist = SchemaAllowlist::from_map(&map);
        assert!(allowlist.has_table("movies"));
        assert!(allowlist.has_column("title"));
    }

    #[test]
    fn test_from_tables() {
        let tables = vec![TableSchema {
            name: "movies".to_string(),
            columns: vec![ColumnSchema {
                name: "genre".to_string(),
                data_type: "TEXT".to_string(),
            }],
        }];
        let allowlist = SchemaAllowlist::from_tables(&tables);
        assert!(allowlist.has_column("genre"));
        assert!(!allowlist.is_empty());
    }
}
