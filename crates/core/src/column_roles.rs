use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tabular::{CellValue, TabularResult};

const NUMERIC_SHARE_THRESHOLD: f64 = 0.8;
const NAME_LIKE_SHARE_THRESHOLD: f64 = 0.5;
const TEMPORAL_SHARE_THRESHOLD: f64 = 0.5;

static METRIC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)count|sum|total|amount|avg|price|sales|revenue|profit|quantity|number")
});
static CATEGORY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"(?i)name|customer|client|person|user|category|type|description")
});
static TEMPORAL_NAME: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?i)date|year|month|day|week|quarter"));
static YEAR_VALUE: LazyLock<Regex> = LazyLock::new(|| compile(r"^(19|20)\d{2}$"));
static DATE_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r"^(\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}|\d{4}-\d{2}-\d{2}([ T].*)?)$")
});
static UPPERCASE: LazyLock<Regex> = LazyLock::new(|| compile(r"[A-Z]"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s"));
static ALL_DIGITS: LazyLock<Regex> = LazyLock::new(|| compile(r"^\d+$"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("column role patterns are valid regexes")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Metric,
    Category,
    Temporal,
}

/// Column roles in declared column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnRoles {
    entries: Vec<(String, ColumnRole)>,
}

impl ColumnRoles {
    #[must_use]
    pub fn role(&self, column: &str) -> Option<ColumnRole> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, role)| *role)
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, ColumnRole)] {
        &self.entries
    }

    #[must_use]
    pub fn columns_with(&self, role: ColumnRole) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, candidate)| *candidate == role)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[must_use]
pub fn is_metric_name(column: &str) -> bool {
    METRIC_NAME.is_match(column)
}

#[must_use]
pub fn is_category_name(column: &str) -> bool {
    CATEGORY_NAME.is_match(column)
}

#[must_use]
pub fn is_temporal_name(column: &str) -> bool {
    TEMPORAL_NAME.is_match(column)
}

#[must_use]
pub fn is_name_like_value(value: &CellValue) -> bool {
    let CellValue::Text(text) = value else {
        return false;
    };
    UPPERCASE.is_match(text) && WHITESPACE.is_match(text) && !ALL_DIGITS.is_match(text)
}

#[must_use]
pub fn is_temporal_value(value: &CellValue) -> bool {
    let text = value.display();
    YEAR_VALUE.is_match(&text) || DATE_VALUE.is_match(&text)
}

type NamePredicate = fn(&str) -> bool;
type ValuePredicate = fn(&[&CellValue]) -> bool;

const NAME_RULES: [(NamePredicate, ColumnRole); 3] = [
    (is_metric_name, ColumnRole::Metric),
    (is_category_name, ColumnRole::Category),
    (is_temporal_name, ColumnRole::Temporal),
];

const VALUE_RULES: [(ValuePredicate, ColumnRole); 3] = [
    (mostly_numeric, ColumnRole::Metric),
    (mostly_name_like, ColumnRole::Category),
    (mostly_temporal, ColumnRole::Temporal),
];

fn share(values: &[&CellValue], predicate: impl Fn(&CellValue) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = values.iter().filter(|&&value| predicate(value)).count() as f64 / values.len() as f64;
    ratio
}

fn mostly_numeric(values: &[&CellValue]) -> bool {
    !values.is_empty() && share(values, |value| value.as_number().is_some()) >= NUMERIC_SHARE_THRESHOLD
}

fn mostly_name_like(values: &[&CellValue]) -> bool {
    !values.is_empty() && share(values, is_name_like_value) >= NAME_LIKE_SHARE_THRESHOLD
}

fn mostly_temporal(values: &[&CellValue]) -> bool {
    !values.is_empty() && share(values, is_temporal_value) >= TEMPORAL_SHARE_THRESHOLD
}

/// Classifies a single column: name rules first, then value rules over the
/// non-null cells, then a numeric-majority fallback.
#[must_use]
pub fn classify_column(result: &TabularResult, column: &str) -> ColumnRole {
    if let Some((_, role)) = NAME_RULES.iter().find(|(predicate, _)| predicate(column)) {
        return *role;
    }

    let values = result
        .column_values(column)
        .filter(|value| !value.is_null())
        .collect::<Vec<_>>();

    if let Some((_, role)) = VALUE_RULES.iter().find(|(predicate, _)| predicate(&values)) {
        return *role;
    }

    if share(&values, |value| value.as_number().is_some()) > 0.5 {
        ColumnRole::Metric
    } else {
        ColumnRole::Category
    }
}

#[must_use]
pub fn classify_columns(result: &TabularResult) -> ColumnRoles {
    ColumnRoles {
        entries: result
            .columns()
            .iter()
            .map(|column| (column.clone(), classify_column(result, column)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_column, classify_columns, is_name_like_value, ColumnRole};
    use crate::tabular::{CellValue, TabularResult};

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn single_column(name: &str, values: Vec<CellValue>) -> TabularResult {
        TabularResult::new(
            vec![name.to_string()],
            values.into_iter().map(|value| vec![value]).collect(),
        )
    }

    #[test]
    fn name_rules_win_in_priority_order() {
        let result = TabularResult::new(
            vec![
                "customer_count".to_string(),
                "customer_name".to_string(),
                "order_date".to_string(),
            ],
            vec![vec![text("abc"), text("42"), text("x")]],
        );
        let roles = classify_columns(&result);

        assert_eq!(roles.role("customer_count"), Some(ColumnRole::Metric));
        assert_eq!(roles.role("customer_name"), Some(ColumnRole::Category));
        assert_eq!(roles.role("order_date"), Some(ColumnRole::Temporal));
    }

    #[test]
    fn numeric_values_need_eighty_percent_of_non_null_cells() {
        let mostly = single_column(
            "x",
            vec![
                text("1"),
                text("2,000"),
                CellValue::Number(3.0),
                text("4"),
                text("n/a"),
                CellValue::Null,
            ],
        );
        assert_eq!(classify_column(&mostly, "x"), ColumnRole::Metric);

        let not_enough = single_column("x", vec![text("1"), text("a"), text("b"), text("2")]);
        assert_eq!(classify_column(&not_enough, "x"), ColumnRole::Category);
    }

    #[test]
    fn capitalized_multi_word_values_are_categories() {
        let result = single_column(
            "who",
            vec![text("Ada Lovelace"), text("Alan Turing"), text("grace")],
        );
        assert_eq!(classify_column(&result, "who"), ColumnRole::Category);
        assert!(!is_name_like_value(&text("lowercase words")));
    }

    #[test]
    fn date_like_values_are_temporal() {
        let result = single_column(
            "period",
            vec![text("01/02/2024"), text("2024-03-01"), text("soon")],
        );
        assert_eq!(classify_column(&result, "period"), ColumnRole::Temporal);
    }

    #[test]
    fn year_values_without_a_name_hint_read_as_metrics() {
        let result = single_column(
            "period",
            vec![CellValue::Number(2020.0), CellValue::Number(2021.0)],
        );
        assert_eq!(classify_column(&result, "period"), ColumnRole::Metric);
    }

    #[test]
    fn all_null_column_falls_back_to_category() {
        let result = single_column("misc", vec![CellValue::Null, CellValue::Null]);
        assert_eq!(classify_column(&result, "misc"), ColumnRole::Category);
    }

    #[test]
    fn roles_follow_declared_column_order() {
        let result = TabularResult::new(
            vec!["Revenue".to_string(), "Year".to_string()],
            vec![vec![CellValue::Number(1.0), CellValue::Number(2020.0)]],
        );
        let roles = classify_columns(&result);
        let names = roles
            .entries()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Revenue", "Year"]);
        assert_eq!(roles.columns_with(ColumnRole::Temporal), vec!["Year"]);
    }
}
