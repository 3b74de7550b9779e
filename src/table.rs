//! Small column-named table used for catalog-level merging.
//!
//! Per-unit files are typed (`Fan`, `Blotch`), but the catalog merge combines
//! tables from several producers whose extra columns the pipeline only passes
//! through. `Table` keeps every cell as a [`Value`] so numeric columns can be
//! averaged, rounded and formatted while text columns travel untouched.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use crate::error::{AppResult, CatalogError};

/// One table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Empty field or `NaN`.
    Missing,
    /// Whole number.
    Integer(i64),
    /// Floating point number.
    Number(f64),
    /// Anything else.
    Text(String),
}

impl Value {
    /// Interprets a raw CSV field.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
            return Value::Missing;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Integer(i);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_nan() => Value::Missing,
            Ok(f) => Value::Number(f),
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    /// Numeric view of the cell.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Number(f) => Some(*f),
            Value::Missing | Value::Text(_) => None,
        }
    }

    /// Text view of the cell.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the cell is empty.
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Renders the cell for CSV output.
    pub fn render(&self, format: FloatFormat) -> String {
        match (self, format) {
            (Value::Missing, _) => String::new(),
            (Value::Integer(i), _) => i.to_string(),
            (Value::Number(f), FloatFormat::Natural) => f.to_string(),
            (Value::Number(f), FloatFormat::Fixed(digits)) => format!("{f:.digits$}"),
            (Value::Text(s), _) => s.clone(),
        }
    }

    fn key(&self) -> KeyPart {
        match self {
            Value::Missing => KeyPart::Missing,
            Value::Text(s) => KeyPart::Text(s.clone()),
            // Integers and floats compare by numeric value: "5" joins "5.0000000".
            Value::Integer(_) | Value::Number(_) => {
                let f = self.as_f64().unwrap_or_default();
                KeyPart::Number(if f == 0.0 { 0 } else { f.to_bits() })
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            Value::Missing
        } else {
            Value::Number(value)
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// How floating point cells are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatFormat {
    /// Shortest representation that round-trips.
    Natural,
    /// Fixed number of decimal digits.
    Fixed(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Missing,
    Number(u64),
    Text(String),
}

/// Rounds `value` to `decimals` decimal digits.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Row accounting of an inner join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinReport {
    /// Rows on the left side.
    pub left_rows: usize,
    /// Rows in the joined output.
    pub output_rows: usize,
    /// Left row indices without any partner on the right.
    pub unmatched: Vec<usize>,
}

impl JoinReport {
    /// Left rows lost by the join.
    pub fn dropped(&self) -> usize {
        self.unmatched.len()
    }

    /// Output rows minus input rows; negative when rows were lost.
    pub fn row_delta(&self) -> i64 {
        self.output_rows as i64 - self.left_rows as i64
    }
}

/// An in-memory table with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Empty table with the given columns.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Reads a CSV file with a header line.
    pub fn read_csv(path: impl AsRef<Path>) -> AppResult<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref())?;
        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut table = Self::new(columns);
        for record in reader.records() {
            let record = record?;
            table.rows.push(record.iter().map(Value::parse).collect());
        }
        Ok(table)
    }

    /// Writes the table as CSV, creating parent directories as needed.
    pub fn write_csv(&self, path: impl AsRef<Path>, format: FloatFormat) -> AppResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.render(format)))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Column names in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows.
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether `name` is a column.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Position of column `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Index of `name`, or a `MissingColumn` error mentioning `context`.
    pub fn require_column(&self, name: &str, context: &str) -> AppResult<usize> {
        self.column_index(name)
            .ok_or_else(|| CatalogError::MissingColumn {
                column: name.to_string(),
                context: context.to_string(),
            })
    }

    /// Cell at `row` in column `name`.
    pub fn get(&self, row: usize, name: &str) -> Option<&Value> {
        let col = self.column_index(name)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Appends a row; its width must match the header.
    pub fn push_row(&mut self, row: Vec<Value>) -> AppResult<()> {
        if row.len() != self.columns.len() {
            return Err(CatalogError::InvalidValue {
                column: "<row>".to_string(),
                value: format!("{} fields", row.len()),
                context: format!("table with {} columns", self.columns.len()),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Stacks tables; columns are the union in first-seen order, gaps are `Missing`.
    pub fn concat(tables: impl IntoIterator<Item = Table>) -> Table {
        let mut out = Table::default();
        for table in tables {
            for column in &table.columns {
                if !out.has_column(column) {
                    out.columns.push(column.clone());
                    for row in out.rows.iter_mut() {
                        row.push(Value::Missing);
                    }
                }
            }
            let mapping: Vec<usize> = out
                .columns
                .iter()
                .map(|c| table.column_index(c).unwrap_or(usize::MAX))
                .collect();
            for row in table.rows {
                let mut row: Vec<Option<Value>> = row.into_iter().map(Some).collect();
                out.rows.push(
                    mapping
                        .iter()
                        .map(|&i| row.get_mut(i).and_then(Option::take).unwrap_or(Value::Missing))
                        .collect(),
                );
            }
        }
        out
    }

    /// Removes the named columns; names not present are ignored.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.as_str()))
            .collect();
        let mut flags = keep.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&true));
        for row in self.rows.iter_mut() {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
    }

    /// Renames columns by `(from, to)` pairs; absent sources are ignored.
    pub fn rename_columns(&mut self, renames: &[(&str, &str)]) {
        for column in self.columns.iter_mut() {
            if let Some((_, to)) = renames.iter().find(|(from, _)| column == from) {
                *column = (*to).to_string();
            }
        }
    }

    /// New table with exactly `names`, in that order.
    pub fn select(&self, names: &[&str], context: &str) -> AppResult<Table> {
        let indices = names
            .iter()
            .map(|n| self.require_column(n, context))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(Table {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Sets `name` to `value` in every row, adding the column if needed.
    pub fn set_column(&mut self, name: &str, value: Value) {
        match self.column_index(name) {
            Some(col) => {
                for row in self.rows.iter_mut() {
                    row[col] = value.clone();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in self.rows.iter_mut() {
                    row.push(value.clone());
                }
            }
        }
    }

    /// Sets `name` to one value per row, adding the column if needed.
    pub fn set_column_values(&mut self, name: &str, values: Vec<Value>) -> AppResult<()> {
        if values.len() != self.rows.len() {
            return Err(CatalogError::InvalidValue {
                column: name.to_string(),
                value: format!("{} values", values.len()),
                context: format!("table with {} rows", self.rows.len()),
            });
        }
        let col = match self.column_index(name) {
            Some(col) => col,
            None => {
                self.columns.push(name.to_string());
                for row in self.rows.iter_mut() {
                    row.push(Value::Missing);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[col] = value;
        }
        Ok(())
    }

    /// Replaces missing cells of `name` with `value`; adds the column if absent.
    ///
    /// Returns the number of cells filled.
    pub fn fill_missing(&mut self, name: &str, value: Value) -> usize {
        let Some(col) = self.column_index(name) else {
            self.set_column(name, value);
            return self.rows.len();
        };
        let mut filled = 0;
        for row in self.rows.iter_mut() {
            if row[col].is_missing() {
                row[col] = value.clone();
                filled += 1;
            }
        }
        filled
    }

    /// Rounds every numeric cell of the named columns to `decimals` digits.
    pub fn round_columns(&mut self, names: &[&str], decimals: i32, context: &str) -> AppResult<()> {
        for name in names {
            let col = self.require_column(name, context)?;
            for row in self.rows.iter_mut() {
                row[col] = match &row[col] {
                    Value::Number(f) => Value::Number(round_to(*f, decimals)),
                    Value::Text(s) => {
                        return Err(CatalogError::InvalidValue {
                            column: name.to_string(),
                            value: s.clone(),
                            context: context.to_string(),
                        })
                    }
                    other => other.clone(),
                };
            }
        }
        Ok(())
    }

    /// Converts a numeric column to integers, truncating toward zero.
    pub fn cast_to_integer(&mut self, name: &str, context: &str) -> AppResult<()> {
        let col = self.require_column(name, context)?;
        for row in self.rows.iter_mut() {
            row[col] = match &row[col] {
                Value::Integer(i) => Value::Integer(*i),
                Value::Number(f) if f.is_finite() => Value::Integer(f.trunc() as i64),
                other => {
                    return Err(CatalogError::InvalidValue {
                        column: name.to_string(),
                        value: other.render(FloatFormat::Natural),
                        context: context.to_string(),
                    })
                }
            };
        }
        Ok(())
    }

    /// Keeps rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&Table, usize) -> bool) {
        let flags: Vec<bool> = (0..self.rows.len()).map(|i| keep(self, i)).collect();
        let mut flags = flags.into_iter();
        self.rows.retain(|_| flags.next().unwrap_or(true));
    }

    /// Removes exact duplicate rows, keeping the first occurrence.
    pub fn drop_duplicates(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen = HashSet::new();
        self.rows
            .retain(|row| seen.insert(row.iter().map(Value::key).collect::<Vec<_>>()));
        before - self.rows.len()
    }

    /// Distinct values of `name` rendered as text, in first-seen order.
    pub fn unique_values(&self, name: &str, context: &str) -> AppResult<Vec<String>> {
        let col = self.require_column(name, context)?;
        let mut seen = HashSet::new();
        Ok(self
            .rows
            .iter()
            .map(|row| row[col].render(FloatFormat::Natural))
            .filter(|v| !v.is_empty() && seen.insert(v.clone()))
            .collect())
    }

    /// Inner join on `left_on == right_on`.
    ///
    /// Output columns are the left columns followed by the right columns. A right
    /// key column with the same name as its left key is not repeated; other name
    /// clashes get a `_right` suffix. Keys compare exactly: numeric keys must be
    /// brought to a common precision beforehand.
    pub fn inner_join(
        &self,
        right: &Table,
        left_on: &[&str],
        right_on: &[&str],
        context: &str,
    ) -> AppResult<(Table, JoinReport)> {
        let left_keys = left_on
            .iter()
            .map(|c| self.require_column(c, context))
            .collect::<AppResult<Vec<_>>>()?;
        let right_keys = right_on
            .iter()
            .map(|c| right.require_column(c, context))
            .collect::<AppResult<Vec<_>>>()?;

        let skip_right: HashSet<usize> = left_on
            .iter()
            .zip(right_on)
            .zip(&right_keys)
            .filter(|((l, r), _)| l == r)
            .map(|(_, &idx)| idx)
            .collect();
        let right_cols: Vec<usize> = (0..right.columns.len())
            .filter(|i| !skip_right.contains(i))
            .collect();

        let mut columns = self.columns.clone();
        for &i in &right_cols {
            let name = &right.columns[i];
            if columns.contains(name) {
                columns.push(format!("{name}_right"));
            } else {
                columns.push(name.clone());
            }
        }

        let mut index: HashMap<Vec<KeyPart>, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            let key = right_keys.iter().map(|&k| row[k].key()).collect();
            index.entry(key).or_default().push(i);
        }

        let mut out = Table {
            columns,
            rows: Vec::new(),
        };
        let mut report = JoinReport {
            left_rows: self.rows.len(),
            ..Default::default()
        };
        for (i, row) in self.rows.iter().enumerate() {
            let key: Vec<KeyPart> = left_keys.iter().map(|&k| row[k].key()).collect();
            match index.get(&key) {
                Some(partners) => {
                    for &p in partners {
                        let mut joined = row.clone();
                        joined.extend(right_cols.iter().map(|&c| right.rows[p][c].clone()));
                        out.rows.push(joined);
                    }
                }
                None => report.unmatched.push(i),
            }
        }
        report.output_rows = out.rows.len();
        Ok((out, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        let mut t = Table::new(columns.iter().copied());
        for row in rows {
            t.push_row(row).unwrap();
        }
        t
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse(""), Value::Missing);
        assert_eq!(Value::parse("NaN"), Value::Missing);
        assert_eq!(Value::parse("42"), Value::Integer(42));
        assert_eq!(Value::parse("0.25"), Value::Number(0.25));
        assert_eq!(Value::parse("ESP_011350_0945"), Value::from("ESP_011350_0945"));
    }

    #[test]
    fn test_render_formats() {
        assert_eq!(Value::Number(0.1).render(FloatFormat::Fixed(7)), "0.1000000");
        assert_eq!(Value::Integer(3).render(FloatFormat::Fixed(7)), "3");
        assert_eq!(Value::Number(2.5).render(FloatFormat::Natural), "2.5");
        assert_eq!(Value::Missing.render(FloatFormat::Natural), "");
    }

    #[test]
    fn test_csv_round_trip_keeps_text_and_numbers() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sub").join("t.csv");
        let t = table(
            &["obsid", "x", "n"],
            vec![
                vec!["A".into(), 1.123456789.into(), 3i64.into()],
                vec!["B".into(), Value::Missing, 4i64.into()],
            ],
        );
        t.write_csv(&path, FloatFormat::Fixed(7)).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("A,1.1234568,3"));
        assert!(text.contains("B,,4"));
        let back = Table::read_csv(&path).unwrap();
        assert_eq!(back.get(0, "x"), Some(&Value::Number(1.1234568)));
        assert_eq!(back.get(1, "x"), Some(&Value::Missing));
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = table(&["a", "b"], vec![vec![1i64.into(), 2i64.into()]]);
        let b = table(&["b", "c"], vec![vec![3i64.into(), 4i64.into()]]);
        let t = Table::concat([a, b]);
        assert_eq!(t.columns(), ["a", "b", "c"]);
        assert_eq!(
            t.rows()[0],
            vec![Value::Integer(1), Value::Integer(2), Value::Missing]
        );
        assert_eq!(
            t.rows()[1],
            vec![Value::Missing, Value::Integer(3), Value::Integer(4)]
        );
    }

    #[test]
    fn test_drop_rename_select() {
        let mut t = table(
            &["image_id", "Line", "x"],
            vec![vec!["APF1".into(), 1i64.into(), 2i64.into()]],
        );
        t.drop_columns(&["Line", "not_there"]);
        t.rename_columns(&[("image_id", "tile_id")]);
        assert_eq!(t.columns(), ["tile_id", "x"]);
        let s = t.select(&["x", "tile_id"], "test").unwrap();
        assert_eq!(s.rows()[0], vec![Value::Integer(2), Value::from("APF1")]);
        assert!(matches!(
            t.select(&["y"], "test"),
            Err(CatalogError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_join_matches_integer_and_float_keys() {
        let left = table(
            &["obsid", "image_x"],
            vec![
                vec!["A".into(), 5i64.into()],
                vec!["A".into(), 6.5.into()],
                vec!["B".into(), 5i64.into()],
            ],
        );
        let right = table(
            &["obsid", "image_x", "lat"],
            vec![
                vec!["A".into(), 5.0.into(), 10.0.into()],
                vec!["A".into(), 6.5.into(), 11.0.into()],
            ],
        );
        let (joined, report) = left
            .inner_join(&right, &["obsid", "image_x"], &["obsid", "image_x"], "test")
            .unwrap();
        assert_eq!(joined.columns(), ["obsid", "image_x", "lat"]);
        assert_eq!(joined.len(), 2);
        assert_eq!(report.unmatched, vec![2]);
        assert_eq!(report.row_delta(), -1);
    }

    #[test]
    fn test_join_different_key_names_keeps_both() {
        let left = table(&["obsid", "v"], vec![vec!["A".into(), 1i64.into()]]);
        let right = table(
            &["OBSERVATION_ID", "v"],
            vec![vec!["A".into(), 2i64.into()]],
        );
        let (joined, report) = left
            .inner_join(&right, &["obsid"], &["OBSERVATION_ID"], "test")
            .unwrap();
        assert_eq!(joined.columns(), ["obsid", "v", "OBSERVATION_ID", "v_right"]);
        assert_eq!(report.dropped(), 0);
    }

    #[test]
    fn test_round_and_cast() {
        let mut t = table(
            &["x", "version"],
            vec![vec![1.234567891.into(), 2.0.into()]],
        );
        t.round_columns(&["x"], 7, "test").unwrap();
        assert_eq!(t.get(0, "x"), Some(&Value::Number(1.2345679)));
        t.cast_to_integer("version", "test").unwrap();
        assert_eq!(t.get(0, "version"), Some(&Value::Integer(2)));

        let mut bad = table(&["version"], vec![vec!["one".into()]]);
        assert!(bad.cast_to_integer("version", "test").is_err());
    }

    #[test]
    fn test_drop_duplicates_and_fill() {
        let mut t = table(
            &["a", "b"],
            vec![
                vec![1i64.into(), Value::Missing],
                vec![1.0.into(), Value::Missing],
                vec![2i64.into(), 0.5.into()],
            ],
        );
        assert_eq!(t.drop_duplicates(), 1);
        assert_eq!(t.fill_missing("b", 1.0.into()), 1);
        assert_eq!(t.get(0, "b"), Some(&Value::Number(1.0)));
        assert_eq!(t.fill_missing("c", 1.0.into()), 2);
        assert!(t.has_column("c"));
    }

    #[test]
    fn test_retain_rows_and_unique() {
        let mut t = table(
            &["obsid"],
            vec![vec!["B".into()], vec!["A".into()], vec!["B".into()]],
        );
        assert_eq!(t.unique_values("obsid", "test").unwrap(), vec!["B", "A"]);
        t.retain_rows(|t, i| t.get(i, "obsid") == Some(&Value::from("B")));
        assert_eq!(t.len(), 2);
    }
}
