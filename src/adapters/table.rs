//! Tabular schemas: CSV/TSV data checked against a declared column set.

use crate::domain::model::{Resource, Schema, Value};
use crate::domain::ports::Validator;
use crate::domain::table::{Cell, Column, DataType, Table};
use crate::utils::error::{MeillionenError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Payload of a `table` schema.
///
/// Recognised options: `columns` (name and dtype, required), `min_rows`,
/// `max_rows`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSchema {
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, dtype: DataType) -> Self {
        self.columns.push(Column::new(name, dtype));
        self
    }

    pub fn min_rows(mut self, rows: usize) -> Self {
        self.min_rows = Some(rows);
        self
    }

    pub fn max_rows(mut self, rows: usize) -> Self {
        self.max_rows = Some(rows);
        self
    }

    pub fn to_payload(&self) -> Vec<u8> {
        // Plain structs of strings and integers always serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn into_schema(self, name: impl Into<String>) -> Schema {
        Schema::new(name, TableValidator::TYPE_NAME, self.to_payload())
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let parsed: TableSchema =
            serde_json::from_slice(payload).map_err(|e| MeillionenError::InvalidPayload {
                type_name: TableValidator::TYPE_NAME.to_string(),
                message: e.to_string(),
            })?;
        let mut seen = HashSet::new();
        for column in &parsed.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(MeillionenError::InvalidPayload {
                    type_name: TableValidator::TYPE_NAME.to_string(),
                    message: format!("column '{}' declared twice", column.name),
                });
            }
        }
        Ok(parsed)
    }

    fn column_list(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        format!("columns [{}]", names.join(", "))
    }

    fn check_row_count(&self, schema: &Schema, rows: usize) -> Result<()> {
        if let Some(min) = self.min_rows {
            if rows < min {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    format!("at least {} rows", min),
                    format!("{} rows", rows),
                ));
            }
        }
        if let Some(max) = self.max_rows {
            if rows > max {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    format!("at most {} rows", max),
                    format!("{} rows", rows),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TableValidator;

impl TableValidator {
    pub const TYPE_NAME: &'static str = "table";

    fn delimiter(schema: &Schema, format: &str) -> Result<u8> {
        match format {
            "csv" => Ok(b','),
            "tsv" => Ok(b'\t'),
            other => Err(MeillionenError::mismatch(
                &schema.name,
                "csv or tsv data",
                format!("'{}' data", other),
            )),
        }
    }

    fn parse(schema: &Schema, spec: &TableSchema, data: &[u8], delimiter: u8) -> Result<Table> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .trim(csv::Trim::Headers)
            .from_reader(data);

        let headers = reader
            .headers()
            .map_err(|e| MeillionenError::mismatch(&schema.name, "a header row", e.to_string()))?
            .clone();
        let header_names: Vec<&str> = headers.iter().collect();

        let declared: HashSet<&str> = spec.columns.iter().map(|c| c.name.as_str()).collect();
        let present: HashSet<&str> = header_names.iter().copied().collect();
        if declared != present || present.len() != header_names.len() {
            return Err(MeillionenError::mismatch(
                &schema.name,
                spec.column_list(),
                format!("columns [{}]", header_names.join(", ")),
            ));
        }

        // Position of each declared column in the file.
        let positions: Vec<usize> = spec
            .columns
            .iter()
            .map(|c| header_names.iter().position(|h| *h == c.name).unwrap_or(0))
            .collect();

        let mut table = Table::new(spec.columns.clone());
        for (row_idx, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                MeillionenError::mismatch(&schema.name, "well-formed delimited rows", e.to_string())
            })?;
            let mut row = Vec::with_capacity(spec.columns.len());
            for (column, &pos) in spec.columns.iter().zip(&positions) {
                let raw = record.get(pos).unwrap_or("");
                let cell = Cell::parse(raw, column.dtype).ok_or_else(|| {
                    MeillionenError::mismatch(
                        &schema.name,
                        format!("{} values in column '{}'", column.dtype, column.name),
                        format!("'{}' on row {}", raw, row_idx + 1),
                    )
                })?;
                row.push(cell);
            }
            table.push_row(row);
        }

        spec.check_row_count(schema, table.num_rows())?;
        Ok(table)
    }

    fn write(table: &Table, spec: &TableSchema, delimiter: u8) -> Result<Vec<u8>> {
        let positions: Vec<usize> = spec
            .columns
            .iter()
            .filter_map(|c| table.column_index(&c.name))
            .collect();

        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(Vec::new());
        writer.write_record(spec.columns.iter().map(|c| c.name.as_str()))?;
        for row in &table.rows {
            writer.write_record(positions.iter().map(|&i| row[i].to_string()))?;
        }
        writer
            .into_inner()
            .map_err(|e| MeillionenError::IoError(e.into_error()))
    }
}

impl Validator for TableValidator {
    fn decode(&self, schema: &Schema, resource: &Resource) -> Result<Value> {
        let spec = TableSchema::from_payload(&schema.payload)?;
        let table = match resource {
            Resource::Inline { data, type_tag } => {
                let delimiter = Self::delimiter(schema, type_tag)?;
                Self::parse(schema, &spec, data, delimiter)?
            }
            Resource::File { path, format } => {
                let delimiter = Self::delimiter(schema, format)?;
                let data = read_existing(schema, path)?;
                Self::parse(schema, &spec, &data, delimiter)?
            }
            Resource::Handle { .. } => {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    "inline data or a file",
                    resource.describe(),
                ))
            }
        };
        tracing::debug!(
            "Decoded table '{}' with {} rows",
            schema.name,
            table.num_rows()
        );
        Ok(Value::Table(table))
    }

    fn check(&self, schema: &Schema, value: &Value) -> Result<()> {
        let spec = TableSchema::from_payload(&schema.payload)?;
        let table = value.as_table().ok_or_else(|| {
            MeillionenError::mismatch(&schema.name, "a table", format!("a {} value", value.kind()))
        })?;

        let same_columns = table.columns.len() == spec.columns.len()
            && spec.columns.iter().all(|c| table.columns.contains(c));
        if !same_columns {
            let actual: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{}:{}", c.name, c.dtype))
                .collect();
            let expected: Vec<String> = spec
                .columns
                .iter()
                .map(|c| format!("{}:{}", c.name, c.dtype))
                .collect();
            return Err(MeillionenError::mismatch(
                &schema.name,
                format!("columns [{}]", expected.join(", ")),
                format!("columns [{}]", actual.join(", ")),
            ));
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            if row.len() != table.columns.len() {
                return Err(MeillionenError::mismatch(
                    &schema.name,
                    format!("{} cells per row", table.columns.len()),
                    format!("{} cells on row {}", row.len(), row_idx + 1),
                ));
            }
            for (cell, column) in row.iter().zip(&table.columns) {
                // An empty field reads back as null.
                if matches!(cell, Cell::Text(text) if text.is_empty()) {
                    return Err(MeillionenError::mismatch(
                        &schema.name,
                        format!("null for empty values in column '{}'", column.name),
                        format!("an empty string on row {}", row_idx + 1),
                    ));
                }
                if !cell.conforms_to(column.dtype) {
                    return Err(MeillionenError::mismatch(
                        &schema.name,
                        format!("{} values in column '{}'", column.dtype, column.name),
                        format!("{:?} on row {}", cell, row_idx + 1),
                    ));
                }
            }
        }

        spec.check_row_count(schema, table.num_rows())
    }

    /// Reorders the columns of a checked table to the declared order.
    fn normalize(&self, schema: &Schema, value: &Value) -> Result<Value> {
        self.check(schema, value)?;
        let spec = TableSchema::from_payload(&schema.payload)?;
        let table = value.as_table().ok_or_else(|| {
            MeillionenError::mismatch(&schema.name, "a table", value.kind())
        })?;
        if table.columns == spec.columns {
            return Ok(value.clone());
        }

        let positions: Vec<usize> = spec
            .columns
            .iter()
            .filter_map(|c| table.column_index(&c.name))
            .collect();
        let rows = table
            .rows
            .iter()
            .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(Value::Table(Table::new(spec.columns.clone()).with_rows(rows)))
    }

    fn encode(
        &self,
        schema: &Schema,
        value: &Value,
        destination: Option<&Resource>,
    ) -> Result<Resource> {
        self.check(schema, value)?;
        let spec = TableSchema::from_payload(&schema.payload)?;
        let table = value.as_table().ok_or_else(|| {
            MeillionenError::mismatch(&schema.name, "a table", value.kind())
        })?;

        match destination {
            Some(Resource::File { path, format }) => {
                let data = Self::write(table, &spec, Self::delimiter(schema, format)?)?;
                write_file(path, &data)?;
                Ok(Resource::file(path.clone(), format.clone()))
            }
            Some(Resource::Inline { type_tag, .. }) => {
                let data = Self::write(table, &spec, Self::delimiter(schema, type_tag)?)?;
                Ok(Resource::inline(data, type_tag.clone()))
            }
            _ => {
                let data = Self::write(table, &spec, b',')?;
                Ok(Resource::inline(data, "csv"))
            }
        }
    }

    fn default_format(&self) -> &str {
        "csv"
    }
}

/// Reads a file, reporting a missing one as a shape mismatch.
pub(crate) fn read_existing(schema: &Schema, path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(MeillionenError::mismatch(
            &schema.name,
            "an existing file",
            format!("missing file {}", path.display()),
        ));
    }
    Ok(std::fs::read(path)?)
}

pub(crate) fn write_file(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, data)?;
    Ok(())
}
