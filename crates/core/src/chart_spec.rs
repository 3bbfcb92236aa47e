use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::column_roles::{is_metric_name, is_name_like_value, ColumnRole, ColumnRoles};
use crate::tabular::{CellValue, TabularResult};

pub const PALETTE: [&str; 12] = [
    "#0eaba9", "#1781e3", "#5944c6", "#a63297", "#e61e64", "#ff8800", "#06bf7f", "#5e35b1",
    "#d81b60", "#1e88e5", "#00acc1", "#43a047",
];

const BAR_FILL_ALPHA: f64 = 0.7;
const LINE_FILL_ALPHA: f64 = 0.2;
const Y_AXIS_HEADROOM: f64 = 1.1;
const EMPTY_Y_AXIS_MAX: f64 = 100.0;
const UNKNOWN_SERIES_LABEL: &str = "Unknown";
const YEAR_COLUMN: &str = "Year";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Table,
    Bar,
    Line,
    Pie,
    RawSql,
}

impl ChartType {
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Table => "Table View",
            Self::Bar => "Bar Chart",
            Self::Line => "Line Chart",
            Self::Pie => "Pie Chart",
            Self::RawSql => "SQL Query",
        }
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Chart types a result may be shown as. Only 2-3 column results with at
/// least two rows get real charts; pie needs exactly two columns.
#[must_use]
pub fn chart_options(result: &TabularResult) -> Vec<ChartType> {
    let table_only = vec![ChartType::Table, ChartType::RawSql];
    if result.row_count() < 2 {
        return table_only;
    }

    match result.column_count() {
        2 => vec![
            ChartType::Table,
            ChartType::Bar,
            ChartType::Line,
            ChartType::Pie,
            ChartType::RawSql,
        ],
        3 => vec![
            ChartType::Table,
            ChartType::Bar,
            ChartType::Line,
            ChartType::RawSql,
        ],
        _ => table_only,
    }
}

#[must_use]
pub fn is_chart_eligible(result: &TabularResult) -> bool {
    chart_options(result).contains(&ChartType::Bar)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AxisSelection {
    pub x_key: String,
    pub y_key: String,
}

impl AxisSelection {
    fn new(x_key: &str, y_key: &str) -> Self {
        Self {
            x_key: x_key.to_string(),
            y_key: y_key.to_string(),
        }
    }
}

fn name_like_score(result: &TabularResult, column: &str) -> usize {
    result
        .column_values(column)
        .filter(|value| is_name_like_value(value))
        .count()
}

/// Picks x and y columns. Never fails: with fewer than two columns the
/// missing side repeats the first column (or is empty for no columns).
#[must_use]
pub fn select_axes(result: &TabularResult, roles: &ColumnRoles) -> AxisSelection {
    let columns = result.columns();
    let metrics = roles.columns_with(ColumnRole::Metric);
    let categories = roles.columns_with(ColumnRole::Category);
    let temporals = roles.columns_with(ColumnRole::Temporal);

    if roles.role(YEAR_COLUMN) == Some(ColumnRole::Temporal) {
        if let Some(metric) = metrics.iter().find(|metric| **metric != YEAR_COLUMN) {
            return AxisSelection::new(YEAR_COLUMN, metric);
        }
    }

    if let ([category], [metric]) = (categories.as_slice(), metrics.as_slice()) {
        return AxisSelection::new(category, metric);
    }

    if let ([temporal], [metric]) = (temporals.as_slice(), metrics.as_slice()) {
        return AxisSelection::new(temporal, metric);
    }

    let non_metrics = columns
        .iter()
        .map(String::as_str)
        .filter(|column| roles.role(column) != Some(ColumnRole::Metric))
        .collect::<Vec<_>>();

    if !metrics.is_empty() && !non_metrics.is_empty() {
        // Stable sorts keep declared order among equal scores.
        let mut x_candidates = non_metrics;
        x_candidates.sort_by_key(|column| {
            (
                roles.role(column) != Some(ColumnRole::Category),
                std::cmp::Reverse(name_like_score(result, column)),
            )
        });
        let mut y_candidates = metrics;
        y_candidates.sort_by_key(|column| !is_metric_name(column));
        return AxisSelection::new(x_candidates[0], y_candidates[0]);
    }

    let first = columns.first().map_or("", String::as_str);
    let second = columns.get(1).map_or(first, String::as_str);
    AxisSelection::new(first, second)
}

/// Preferred chart for a fresh result: time series as lines, anything else
/// chartable as bars, otherwise the table.
#[must_use]
pub fn default_chart_type(
    options: &[ChartType],
    roles: &ColumnRoles,
    axes: &AxisSelection,
) -> ChartType {
    let temporal_x = roles.role(&axes.x_key) == Some(ColumnRole::Temporal);
    if temporal_x && options.contains(&ChartType::Line) {
        return ChartType::Line;
    }
    if options.contains(&ChartType::Bar) {
        return ChartType::Bar;
    }
    ChartType::Table
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// `[0, ceil(max * 1.1)]` over the y column; `[0, 100]` for no values.
#[must_use]
pub fn y_axis_range(result: &TabularResult, y_key: &str) -> AxisRange {
    let max = result
        .column_values(y_key)
        .map(CellValue::numeric_or_zero)
        .fold(None, |acc: Option<f64>, value| {
            Some(acc.map_or(value, |current| current.max(value)))
        });

    match max {
        Some(max) => AxisRange {
            min: 0.0,
            max: (max * Y_AXIS_HEADROOM).ceil().max(0.0),
        },
        None => AxisRange {
            min: 0.0,
            max: EMPTY_Y_AXIS_MAX,
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartOptions {
    pub display_precision: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            display_precision: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub label: String,
    pub values: Vec<f64>,
    pub border_color: String,
    pub fill_color: String,
    /// Per-point colors, used by single-series bar charts.
    pub point_colors: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesChart {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
    pub y_range: AxisRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PieSlice {
    pub label: String,
    pub value: f64,
    pub percentage: f64,
    pub percentage_label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartBody {
    Table(TableView),
    Series(SeriesChart),
    Pie(Vec<PieSlice>),
    RawSql,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub x_key: String,
    pub y_key: String,
    pub series_key: Option<String>,
    pub body: ChartBody,
}

#[must_use]
pub fn palette_color(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// `#rrggbb` to `rgba(r, g, b, alpha)`.
#[must_use]
pub fn to_rgba(hex: &str, alpha: f64) -> String {
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|digits| u8::from_str_radix(digits, 16).ok())
            .unwrap_or(0)
    };
    format!(
        "rgba({}, {}, {}, {alpha})",
        channel(1..3),
        channel(3..5),
        channel(5..7)
    )
}

#[must_use]
pub fn round_to_precision(value: f64, precision: u32) -> f64 {
    let factor = 10_f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}

fn series_key_for(result: &TabularResult, axes: &AxisSelection) -> Option<String> {
    if result.column_count() <= 2 {
        return None;
    }
    result
        .columns()
        .iter()
        .find(|column| **column != axes.x_key && **column != axes.y_key)
        .cloned()
}

/// Builds a renderable spec. `y_range` is passed in so a cached range
/// survives chart type switches.
#[must_use]
pub fn build_chart_spec(
    result: &TabularResult,
    roles: &ColumnRoles,
    axes: &AxisSelection,
    y_range: AxisRange,
    chart_type: ChartType,
    options: &ChartOptions,
) -> ChartSpec {
    let series_key = match chart_type {
        ChartType::Bar | ChartType::Line => series_key_for(result, axes),
        _ => None,
    };

    let body = match chart_type {
        ChartType::Table => ChartBody::Table(TableView {
            columns: result.columns().to_vec(),
            rows: result.display_rows(),
        }),
        ChartType::RawSql => ChartBody::RawSql,
        ChartType::Pie => ChartBody::Pie(pie_slices(result, axes, options)),
        ChartType::Bar | ChartType::Line => {
            let x_sorted_numerically = roles.role(&axes.x_key) == Some(ColumnRole::Temporal);
            let chart = match &series_key {
                Some(series_key) => grouped_series(
                    result,
                    axes,
                    series_key,
                    chart_type,
                    x_sorted_numerically,
                    y_range,
                ),
                None => single_series(result, axes, chart_type, y_range),
            };
            ChartBody::Series(chart)
        }
    };

    ChartSpec {
        chart_type,
        x_key: axes.x_key.clone(),
        y_key: axes.y_key.clone(),
        series_key,
        body,
    }
}

fn fill_alpha(chart_type: ChartType) -> f64 {
    if chart_type == ChartType::Line {
        LINE_FILL_ALPHA
    } else {
        BAR_FILL_ALPHA
    }
}

fn single_series(
    result: &TabularResult,
    axes: &AxisSelection,
    chart_type: ChartType,
    y_range: AxisRange,
) -> SeriesChart {
    let labels = result
        .column_values(&axes.x_key)
        .map(CellValue::display)
        .collect::<Vec<_>>();
    let values = result
        .column_values(&axes.y_key)
        .map(CellValue::numeric_or_zero)
        .collect::<Vec<_>>();

    let color = palette_color(0);
    let point_colors = (chart_type == ChartType::Bar).then(|| {
        (0..labels.len())
            .map(|index| palette_color(index).to_string())
            .collect()
    });

    SeriesChart {
        labels,
        datasets: vec![Dataset {
            label: axes.y_key.clone(),
            values,
            border_color: color.to_string(),
            fill_color: to_rgba(color, fill_alpha(chart_type)),
            point_colors,
        }],
        y_range,
    }
}

fn grouped_series(
    result: &TabularResult,
    axes: &AxisSelection,
    series_key: &str,
    chart_type: ChartType,
    x_sorted_numerically: bool,
    y_range: AxisRange,
) -> SeriesChart {
    let mut x_values: Vec<(String, Option<f64>)> = Vec::new();
    let mut series_order: Vec<String> = Vec::new();
    let mut points: HashMap<(String, String), f64> = HashMap::new();

    let rows = result
        .column_values(&axes.x_key)
        .zip(result.column_values(&axes.y_key))
        .zip(result.column_values(series_key));
    for ((x, y), series) in rows {
        let x_label = x.display();
        let series_label = if series.is_null() {
            UNKNOWN_SERIES_LABEL.to_string()
        } else {
            series.display()
        };

        if !x_values.iter().any(|(label, _)| *label == x_label) {
            x_values.push((x_label.clone(), x.as_number()));
        }
        if !series_order.contains(&series_label) {
            series_order.push(series_label.clone());
        }
        points.insert((series_label, x_label), y.numeric_or_zero());
    }

    if x_sorted_numerically && x_values.iter().all(|(_, number)| number.is_some()) {
        x_values.sort_by(|(_, a), (_, b)| a.unwrap_or(0.0).total_cmp(&b.unwrap_or(0.0)));
    }
    let labels = x_values
        .into_iter()
        .map(|(label, _)| label)
        .collect::<Vec<_>>();

    let datasets = series_order
        .into_iter()
        .enumerate()
        .map(|(index, series)| {
            let color = palette_color(index);
            let values = labels
                .iter()
                .map(|x| {
                    points
                        .get(&(series.clone(), x.clone()))
                        .copied()
                        .unwrap_or(0.0)
                })
                .collect();
            Dataset {
                label: series,
                values,
                border_color: color.to_string(),
                fill_color: to_rgba(color, fill_alpha(chart_type)),
                point_colors: None,
            }
        })
        .collect();

    SeriesChart {
        labels,
        datasets,
        y_range,
    }
}

#[allow(clippy::float_cmp)]
fn pie_slices(result: &TabularResult, axes: &AxisSelection, options: &ChartOptions) -> Vec<PieSlice> {
    let values = result
        .column_values(&axes.y_key)
        .map(CellValue::numeric_or_zero)
        .collect::<Vec<_>>();
    let total = values.iter().sum::<f64>();
    let precision = options.display_precision;

    result
        .column_values(&axes.x_key)
        .zip(values)
        .enumerate()
        .map(|(index, (label, value))| {
            let percentage = if total == 0.0 {
                0.0
            } else {
                round_to_precision(value / total * 100.0, precision)
            };
            PieSlice {
                label: label.display(),
                value,
                percentage,
                percentage_label: format!("{percentage:.prec$}%", prec = precision as usize),
                color: palette_color(index).to_string(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        build_chart_spec, chart_options, default_chart_type, select_axes, to_rgba, y_axis_range,
        AxisSelection, ChartBody, ChartOptions, ChartType,
    };
    use crate::column_roles::classify_columns;
    use crate::tabular::{CellValue, TabularResult};

    fn num(value: f64) -> CellValue {
        CellValue::Number(value)
    }

    fn text(value: &str) -> CellValue {
        CellValue::Text(value.to_string())
    }

    fn table(columns: &[&str], rows: Vec<Vec<CellValue>>) -> TabularResult {
        TabularResult::new(columns.iter().map(|c| (*c).to_string()).collect(), rows)
    }

    fn spec_for(result: &TabularResult, chart_type: ChartType) -> super::ChartSpec {
        let roles = classify_columns(result);
        let axes = select_axes(result, &roles);
        let range = y_axis_range(result, &axes.y_key);
        build_chart_spec(result, &roles, &axes, range, chart_type, &ChartOptions::default())
    }

    #[test]
    fn year_revenue_maps_to_year_x_axis_and_defaults_to_line() {
        let result = table(
            &["Year", "Revenue"],
            vec![vec![num(2020.0), num(100.0)], vec![num(2021.0), num(150.0)]],
        );
        let roles = classify_columns(&result);
        let axes = select_axes(&result, &roles);

        assert_eq!(
            axes,
            AxisSelection {
                x_key: "Year".to_string(),
                y_key: "Revenue".to_string()
            }
        );
        let options = chart_options(&result);
        assert_eq!(default_chart_type(&options, &roles, &axes), ChartType::Line);
    }

    #[test]
    fn category_metric_pair_defaults_to_bar() {
        let result = table(
            &["Category", "Count"],
            vec![vec![text("A"), num(5.0)], vec![text("B"), num(10.0)]],
        );
        let roles = classify_columns(&result);
        let axes = select_axes(&result, &roles);
        assert_eq!(axes.x_key, "Category");
        assert_eq!(axes.y_key, "Count");
        assert_eq!(
            default_chart_type(&chart_options(&result), &roles, &axes),
            ChartType::Bar
        );
    }

    #[test]
    fn pie_percentages_round_to_display_precision() {
        let result = table(
            &["Category", "Count"],
            vec![vec![text("A"), num(5.0)], vec![text("B"), num(10.0)]],
        );
        let ChartBody::Pie(slices) = spec_for(&result, ChartType::Pie).body else {
            panic!("expected pie body");
        };

        let labels = slices
            .iter()
            .map(|slice| slice.percentage_label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["33.33%", "66.67%"]);
        let sum = slices.iter().map(|slice| slice.percentage).sum::<f64>();
        assert!((sum - 100.0).abs() < 0.01);
    }

    #[test]
    fn zero_sum_pie_yields_zero_percent_slices() {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> =
            serde_json::from_value(serde_json::json!([{"A": 0}, {"B": 0}]))
                .expect("rows should deserialize");
        let result = TabularResult::from_records(&rows, None);

        let ChartBody::Pie(slices) = spec_for(&result, ChartType::Pie).body else {
            panic!("expected pie body");
        };
        assert_eq!(slices.len(), 2);
        assert!(slices.iter().all(|slice| slice.percentage_label == "0.00%"));
        assert!(slices.iter().all(|slice| slice.percentage.abs() < f64::EPSILON));
    }

    #[test]
    fn tiny_non_zero_totals_keep_their_percentages() {
        let result = table(
            &["Category", "Count"],
            vec![vec![text("A"), num(1e-17)], vec![text("B"), num(2e-17)]],
        );
        let ChartBody::Pie(slices) = spec_for(&result, ChartType::Pie).body else {
            panic!("expected pie body");
        };

        let labels = slices
            .iter()
            .map(|slice| slice.percentage_label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["33.33%", "66.67%"]);
    }

    #[test]
    fn single_column_results_are_table_only() {
        let result = table(
            &["name"],
            (0..5).map(|i| vec![text(&format!("row {i}"))]).collect(),
        );
        let options = chart_options(&result);
        assert_eq!(options, vec![ChartType::Table, ChartType::RawSql]);
        assert!(!options.contains(&ChartType::Pie));
    }

    #[test]
    fn single_row_still_gets_an_axis_pair() {
        let result = table(&["only"], vec![vec![num(1.0)]]);
        let roles = classify_columns(&result);
        let axes = select_axes(&result, &roles);
        assert_eq!(axes.x_key, "only");
        assert_eq!(axes.y_key, "only");
        assert_eq!(chart_options(&result), vec![ChartType::Table, ChartType::RawSql]);
    }

    #[test]
    fn three_columns_offer_no_pie_and_four_are_table_only() {
        let three = table(
            &["a", "b", "c"],
            vec![vec![num(1.0), num(2.0), num(3.0)]; 2],
        );
        assert_eq!(
            chart_options(&three),
            vec![ChartType::Table, ChartType::Bar, ChartType::Line, ChartType::RawSql]
        );
        let four = table(&["a", "b", "c", "d"], vec![vec![num(1.0); 4]; 2]);
        assert_eq!(chart_options(&four), vec![ChartType::Table, ChartType::RawSql]);
    }

    #[test]
    fn series_are_realigned_onto_the_union_of_x_values() {
        let result = table(
            &["Year", "Revenue", "Category"],
            vec![
                vec![num(2021.0), num(10.0), text("Books")],
                vec![num(2020.0), num(5.0), text("Books")],
                vec![num(2021.0), num(7.0), text("Games")],
            ],
        );
        let spec = spec_for(&result, ChartType::Bar);
        assert_eq!(spec.series_key.as_deref(), Some("Category"));

        let ChartBody::Series(chart) = spec.body else {
            panic!("expected series body");
        };
        assert_eq!(chart.labels, vec!["2020".to_string(), "2021".to_string()]);
        assert_eq!(chart.datasets.len(), 2);
        assert_eq!(chart.datasets[0].label, "Books");
        assert_eq!(chart.datasets[0].values, vec![5.0, 10.0]);
        assert_eq!(chart.datasets[1].label, "Games");
        assert_eq!(chart.datasets[1].values, vec![0.0, 7.0]);
        assert_eq!(chart.datasets[0].border_color, "#0eaba9");
        assert_eq!(chart.datasets[1].border_color, "#1781e3");
    }

    #[test]
    fn y_range_adds_ten_percent_headroom() {
        let result = table(
            &["Category", "Count"],
            vec![vec![text("A"), num(5.0)], vec![text("B"), text("1,000")]],
        );
        let range = y_axis_range(&result, "Count");
        assert!((range.min - 0.0).abs() < f64::EPSILON);
        assert!((range.max - 1100.0).abs() < f64::EPSILON);

        let empty = table(&["Category", "Count"], Vec::new());
        assert!((y_axis_range(&empty, "Count").max - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ambiguous_columns_prefer_name_like_x_and_metric_named_y() {
        let result = table(
            &["code", "label", "score", "total_sales"],
            vec![
                vec![text("a1"), text("Big Store"), num(1.0), num(10.0)],
                vec![text("b2"), text("Small Shop"), num(2.0), num(20.0)],
            ],
        );
        let roles = classify_columns(&result);
        let axes = select_axes(&result, &roles);
        assert_eq!(axes.x_key, "label");
        assert_eq!(axes.y_key, "total_sales");
    }

    #[test]
    fn table_view_renders_nulls_as_empty_cells() {
        let result = table(
            &["name", "total"],
            vec![vec![text("A"), CellValue::Null], vec![text("B"), num(2.0)]],
        );
        let ChartBody::Table(view) = spec_for(&result, ChartType::Table).body else {
            panic!("expected table body");
        };
        assert_eq!(view.rows[0], vec!["A".to_string(), String::new()]);
    }

    #[test]
    fn rgba_conversion_reads_hex_channels() {
        assert_eq!(to_rgba("#0eaba9", 0.7), "rgba(14, 171, 169, 0.7)");
    }
}
