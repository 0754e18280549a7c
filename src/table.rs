//! Small in-memory table used for local display of collected results.
//!
//! Cells keep their type so that a column renders the way a pandas frame
//! with the same dtype prints: integers as is, floats with six decimals
//! trimmed of shared trailing zeros, missing floats as `NaN`.

use crate::client::ClientError;
use crate::error::{SparkError, SparkErrorKind};
use crate::io::IoError;

use arrow::array::{Array, AsArray, RecordBatch};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::error::ArrowError;
use arrow::util::display::{ArrayFormatter, FormatOptions};
use std::fmt;

/// Digits after the decimal point.
const PRECISION: usize = 6;
const SEPARATOR: &str = " ";
const NAN: &str = "NaN";

/// A single cell.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(int) => Some(*int as f64),
            Value::Float(float) if !float.is_nan() => Some(*float),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Value {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Value {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Value {
        Value::Text(value.to_string())
    }
}

/// How the cells of a column are rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dtype {
    Int64,
    /// Integers render with a decimal point and nulls as `NaN`.
    Float64,
    /// Anything else, rendered as text with nulls as `None`.
    Object,
}

impl Dtype {
    fn of(data_type: &DataType) -> Dtype {
        match data_type {
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64 => Dtype::Int64,
            DataType::Float16
            | DataType::Float32
            | DataType::Float64
            | DataType::Decimal128(..)
            | DataType::Decimal256(..) => Dtype::Float64,
            _ => Dtype::Object,
        }
    }

    /// Integers with a missing value become floats; a column without any value is an object column.
    fn infer<'a>(values: impl IntoIterator<Item = &'a Value>) -> Dtype {
        let mut dtype = None;
        let mut nulls = false;

        for value in values {
            let kind = match value {
                Value::Null => {
                    nulls = true;
                    continue;
                }
                Value::Int(_) => Dtype::Int64,
                Value::Float(_) => Dtype::Float64,
                Value::Text(_) => Dtype::Object,
            };
            dtype = Some(dtype.map_or(kind, |current: Dtype| current.common(kind)));
        }

        match dtype {
            Some(Dtype::Int64) if nulls => Dtype::Float64,
            Some(dtype) => dtype,
            None => Dtype::Object,
        }
    }

    fn common(self, other: Dtype) -> Dtype {
        match (self, other) {
            (Dtype::Int64, Dtype::Int64) => Dtype::Int64,
            (Dtype::Object, _) | (_, Dtype::Object) => Dtype::Object,
            _ => Dtype::Float64,
        }
    }

    fn is_numeric(self) -> bool {
        self != Dtype::Object
    }
}

/// Labelled rows of typed cells.
///
/// Rows are labelled `0..n` unless the table was transposed, in which case
/// the former column labels become the row labels.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalTable {
    columns: Vec<String>,
    dtypes: Vec<Dtype>,
    index: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl LocalTable {
    /// Fails unless every row has one cell per column. Column dtypes are
    /// inferred from the cells.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<LocalTable, SparkError> {
        if let Some((row, cells)) = rows.iter().enumerate().find(|(_, cells)| cells.len() != columns.len()) {
            return Err(SparkError::new(SparkErrorKind::RaggedRow {
                row,
                cells: cells.len(),
                columns: columns.len(),
            }));
        }

        let dtypes = (0..columns.len())
            .map(|position| Dtype::infer(rows.iter().map(|cells| &cells[position])))
            .collect();

        Ok(LocalTable::with_dtypes(columns, dtypes, rows))
    }

    fn with_dtypes(columns: Vec<String>, dtypes: Vec<Dtype>, rows: Vec<Vec<Value>>) -> LocalTable {
        let index = (0..rows.len()).map(|position| position.to_string()).collect();

        LocalTable { columns, dtypes, index, rows }
    }

    /// Reads the batches, taking each column's dtype from its Arrow type.
    pub fn from_batches(batches: &[RecordBatch]) -> Result<LocalTable, SparkError> {
        let Some(first) = batches.first() else {
            return LocalTable::new(vec![], vec![]);
        };

        let schema = first.schema();
        let columns = schema.fields().iter().map(|field| field.name().to_string()).collect();
        let mut dtypes: Vec<Dtype> = schema.fields().iter().map(|field| Dtype::of(field.data_type())).collect();

        let options = FormatOptions::new();
        let mut rows: Vec<Vec<Value>> = vec![];

        for batch in batches {
            let values = batch
                .columns()
                .iter()
                .zip(&dtypes)
                .map(|(array, &dtype)| column_values(array.as_ref(), dtype, &options))
                .collect::<Result<Vec<_>, _>>()
                .map_err(IoError::from)
                .map_err(ClientError::from)?;

            for row in 0..batch.num_rows() {
                rows.push(values.iter().map(|column| column[row].clone()).collect());
            }
        }

        for (position, dtype) in dtypes.iter_mut().enumerate() {
            if *dtype == Dtype::Int64 && rows.iter().any(|cells| cells[position] == Value::Null) {
                *dtype = Dtype::Float64;
            }
        }

        Ok(LocalTable::with_dtypes(columns, dtypes, rows))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn dtypes(&self) -> &[Dtype] {
        &self.dtypes
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Swaps rows and columns, including their labels.
    ///
    /// Every resulting column gets the dtype all former columns fit in, so
    /// integers next to floats become floats.
    pub fn transpose(&self) -> LocalTable {
        let dtype = self
            .dtypes
            .iter()
            .copied()
            .reduce(Dtype::common)
            .unwrap_or(Dtype::Object);

        let rows = (0..self.num_columns())
            .map(|column| self.rows.iter().map(|cells| cells[column].clone()).collect())
            .collect();

        LocalTable {
            columns: self.index.clone(),
            dtypes: vec![dtype; self.num_rows()],
            index: self.columns.clone(),
            rows,
        }
    }

    fn formatted_column(&self, position: usize) -> Vec<String> {
        let values: Vec<&Value> = self.rows.iter().map(|cells| &cells[position]).collect();

        match self.dtypes[position] {
            Dtype::Int64 => values
                .into_iter()
                .map(|value| match value {
                    Value::Int(int) => signed(int.to_string()),
                    other => object_cell(other),
                })
                .collect(),
            Dtype::Float64 => float_cells(&values),
            Dtype::Object => values.into_iter().map(object_cell).collect(),
        }
    }
}

fn column_values(array: &dyn Array, dtype: Dtype, options: &FormatOptions) -> Result<Vec<Value>, ArrowError> {
    match dtype {
        Dtype::Int64 => {
            let ints = cast(array, &DataType::Int64)?;
            Ok(ints
                .as_primitive::<Int64Type>()
                .iter()
                .map(|value| value.map_or(Value::Null, Value::Int))
                .collect())
        }
        Dtype::Float64 => {
            let floats = cast(array, &DataType::Float64)?;
            Ok(floats
                .as_primitive::<Float64Type>()
                .iter()
                .map(|value| value.map_or(Value::Null, Value::Float))
                .collect())
        }
        Dtype::Object => {
            let formatter = ArrayFormatter::try_new(array, options)?;
            Ok((0..array.len())
                .map(|row| match array.is_null(row) {
                    true => Value::Null,
                    false => Value::Text(formatter.value(row).to_string()),
                })
                .collect())
        }
    }
}

/// Non-negative numbers get a leading blank where the sign would go.
fn signed(number: String) -> String {
    match number.starts_with('-') {
        true => number,
        false => format!(" {number}"),
    }
}

fn object_cell(value: &Value) -> String {
    match value {
        Value::Null => " None".to_string(),
        Value::Int(int) => format!(" {int}"),
        Value::Float(float) => {
            let mut cell = vec![Some(signed(format!("{float:.prec$}", prec = PRECISION)))];
            trim_zeros(&mut cell);
            cell.pop().flatten().unwrap_or_else(|| NAN.to_string())
        }
        Value::Text(text) => format!(" {text}"),
    }
}

/// Fixed notation unless a non-zero value would round away, then scientific.
fn float_cells(values: &[&Value]) -> Vec<String> {
    let numbers: Vec<Option<f64>> = values.iter().map(|value| value.as_f64()).collect();
    let smallest = 10f64.powi(-(PRECISION as i32));
    let scientific = numbers
        .iter()
        .flatten()
        .any(|number| *number != 0.0 && number.abs() < smallest);

    let mut cells: Vec<Option<String>> = numbers
        .iter()
        .map(|number| {
            number.map(|number| match scientific {
                true => exponent(number),
                false => signed(format!("{number:.prec$}", prec = PRECISION)),
            })
        })
        .collect();

    if !scientific {
        trim_zeros(&mut cells);
    }

    cells
        .into_iter()
        .map(|cell| cell.unwrap_or_else(|| NAN.to_string()))
        .collect()
}

/// `1.000000e-07` rather than Rust's `1.000000e-7`.
fn exponent(number: f64) -> String {
    let text = format!("{number:.prec$e}", prec = PRECISION);

    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or_default();
            let sign = if exp < 0 { '-' } else { '+' };
            signed(format!("{mantissa}e{sign}{:02}", exp.unsigned_abs()))
        }
        None => signed(text),
    }
}

fn is_decimal(cell: &str) -> bool {
    let number = cell.trim_start().trim_start_matches(['+', '-']);

    match number.split_once('.') {
        Some((whole, fraction)) => {
            !whole.is_empty()
                && whole.bytes().all(|byte| byte.is_ascii_digit())
                && fraction.bytes().all(|byte| byte.is_ascii_digit())
        }
        None => false,
    }
}

/// Drops trailing zeros shared by every decimal cell, keeping one digit after the point.
fn trim_zeros(cells: &mut [Option<String>]) {
    loop {
        let mut decimals = cells.iter().flatten().filter(|cell| is_decimal(cell)).peekable();
        let trim = decimals.peek().is_some() && decimals.all(|cell| cell.ends_with('0'));
        if !trim {
            break;
        }

        for cell in cells.iter_mut().flatten().filter(|cell| is_decimal(cell)) {
            cell.pop();
        }
    }

    for cell in cells.iter_mut().flatten() {
        if is_decimal(cell) && cell.ends_with('.') {
            cell.push('0');
        }
    }
}

fn width(text: &str) -> usize {
    text.chars().count()
}

impl fmt::Display for LocalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() || self.index.is_empty() {
            write!(f, "Empty DataFrame")?;
            write!(f, "\nColumns: [{}]", self.columns.join(", "))?;
            return write!(f, "\nIndex: [{}]", self.index.join(", "));
        }

        let cells: Vec<Vec<String>> = (0..self.num_columns()).map(|position| self.formatted_column(position)).collect();
        let headers: Vec<String> = self
            .columns
            .iter()
            .zip(&self.dtypes)
            .map(|(header, dtype)| match dtype.is_numeric() {
                true => format!(" {header}"),
                false => header.clone(),
            })
            .collect();

        let index_width = self.index.iter().map(|label| width(label)).max().unwrap_or(0);
        let widths: Vec<usize> = headers
            .iter()
            .zip(&cells)
            .map(|(header, column)| column.iter().map(|cell| width(cell)).fold(width(header), usize::max))
            .collect();

        write!(f, "{:index_width$}", "")?;
        for (header, &column_width) in headers.iter().zip(&widths) {
            write!(f, "{SEPARATOR}{header:>column_width$}")?;
        }

        for (row, label) in self.index.iter().enumerate() {
            write!(f, "\n{label:<index_width$}")?;
            for (column, &column_width) in cells.iter().zip(&widths) {
                write!(f, "{SEPARATOR}{:>column_width$}", column[row])?;
            }
        }

        Ok(())
    }
}
