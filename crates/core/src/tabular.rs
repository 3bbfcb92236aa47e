use serde_json::{Map, Value};

static NULL_CELL: CellValue = CellValue::Null;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl CellValue {
    #[must_use]
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Number(number) => number.as_f64().map_or(Self::Null, Self::Number),
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    /// Numeric reading of the cell: numbers as-is, strings after stripping
    /// thousand separators when the remainder parses fully as a float.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Number(number) => number.is_finite().then_some(*number),
            Self::Text(text) => parse_numeric_text(text),
        }
    }

    /// Value used for arithmetic; anything non-numeric counts as zero.
    #[must_use]
    pub fn numeric_or_zero(&self) -> f64 {
        self.as_number().unwrap_or(0.0)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Text shown in tabular views and chart labels. Null renders empty.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(number) => format_number(*number),
            Self::Text(text) => text.clone(),
        }
    }
}

fn parse_numeric_text(text: &str) -> Option<f64> {
    let cleaned = text.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TabularResult {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl TabularResult {
    /// Builds a result whose rows are already aligned with `columns`.
    /// Short rows are padded with nulls and long rows truncated.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    /// Normalizes backend records. An explicit column order wins over the
    /// key order of the first record.
    #[must_use]
    pub fn from_records(records: &[Map<String, Value>], column_order: Option<Vec<String>>) -> Self {
        let columns = column_order
            .filter(|columns| !columns.is_empty())
            .unwrap_or_else(|| {
                records
                    .first()
                    .map(|first| first.keys().cloned().collect())
                    .unwrap_or_default()
            });

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|column| record.get(column).map_or(CellValue::Null, CellValue::from_json))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Iterates one column top to bottom. Unknown columns yield nulls.
    pub fn column_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a CellValue> + 'a {
        let index = self.column_index(name);
        self.rows.iter().map(move |row| match index {
            Some(index) => &row[index],
            None => &NULL_CELL,
        })
    }

    #[must_use]
    pub fn display_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(CellValue::display).collect())
            .collect()
    }

    /// Back to JSON records in declared column order.
    #[must_use]
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(column, cell)| {
                        let value = match cell {
                            CellValue::Null => Value::Null,
                            CellValue::Number(number) => serde_json::Number::from_f64(*number)
                                .map_or(Value::Null, Value::Number),
                            CellValue::Text(text) => Value::String(text.clone()),
                        };
                        (column.clone(), value)
                    })
                    .collect()
            })
            .collect()
    }
}
