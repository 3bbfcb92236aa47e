use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use thiserror::Error;
use tracing::debug;

use crate::chart_spec::{
    build_chart_spec, chart_options, default_chart_type, select_axes, y_axis_range, AxisRange,
    AxisSelection, ChartOptions, ChartSpec, ChartType,
};
use crate::column_roles::{classify_columns, ColumnRoles};
use crate::tabular::{CellValue, TabularResult};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartTypeError {
    #[error("`{chart_type}` is not offered for this result")]
    NotOffered { chart_type: ChartType },
    #[error("no result message with id `{0}`")]
    UnknownMessage(String),
}

/// Heuristic output for one result, kept until the result changes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultAnalysis {
    pub roles: ColumnRoles,
    pub axes: AxisSelection,
    pub y_range: AxisRange,
    pub chart_options: Vec<ChartType>,
    pub default_chart_type: ChartType,
}

impl ResultAnalysis {
    #[must_use]
    pub fn analyze(result: &TabularResult) -> Self {
        let roles = classify_columns(result);
        let axes = select_axes(result, &roles);
        let y_range = y_axis_range(result, &axes.y_key);
        let chart_options = chart_options(result);
        let default_chart_type = default_chart_type(&chart_options, &roles, &axes);
        Self {
            roles,
            axes,
            y_range,
            chart_options,
            default_chart_type,
        }
    }

    #[must_use]
    pub fn offers(&self, chart_type: ChartType) -> bool {
        self.chart_options.contains(&chart_type)
    }
}

#[derive(Debug)]
struct CachedAnalysis {
    fingerprint: u64,
    analysis: ResultAnalysis,
}

/// Chart builder with axis choices cached per response id. Switching chart
/// type reuses the cached axes and y range; a changed result re-runs the
/// heuristics.
#[derive(Debug, Default)]
pub struct VisualizationEngine {
    options: ChartOptions,
    cache: HashMap<String, CachedAnalysis>,
    analysis_runs: u64,
}

impl VisualizationEngine {
    #[must_use]
    pub fn new(options: ChartOptions) -> Self {
        Self {
            options,
            cache: HashMap::new(),
            analysis_runs: 0,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ChartOptions {
        &self.options
    }

    #[must_use]
    pub fn analysis_runs(&self) -> u64 {
        self.analysis_runs
    }

    #[must_use]
    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    pub fn analysis(&mut self, response_id: &str, result: &TabularResult) -> &ResultAnalysis {
        let fingerprint = fingerprint_result(result);
        let stale = !matches!(
            self.cache.get(response_id),
            Some(cached) if cached.fingerprint == fingerprint
        );

        if stale {
            debug!(response_id, "analyzing result shape");
            self.analysis_runs += 1;
            self.cache.insert(
                response_id.to_string(),
                CachedAnalysis {
                    fingerprint,
                    analysis: ResultAnalysis::analyze(result),
                },
            );
        }

        &self.cache[response_id].analysis
    }

    pub fn chart_spec(
        &mut self,
        response_id: &str,
        result: &TabularResult,
        chart_type: ChartType,
    ) -> Result<ChartSpec, ChartTypeError> {
        let options = self.options.clone();
        let analysis = self.analysis(response_id, result);
        if !analysis.offers(chart_type) {
            return Err(ChartTypeError::NotOffered { chart_type });
        }

        Ok(build_chart_spec(
            result,
            &analysis.roles,
            &analysis.axes,
            analysis.y_range,
            chart_type,
            &options,
        ))
    }

    pub fn forget(&mut self, response_id: &str) {
        self.cache.remove(response_id);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

fn fingerprint_result(result: &TabularResult) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    result.columns().hash(&mut hasher);
    for row in result.rows() {
        for cell in row {
            match cell {
                CellValue::Null => 0_u8.hash(&mut hasher),
                CellValue::Number(number) => {
                    1_u8.hash(&mut hasher);
                    number.to_bits().hash(&mut hasher);
                }
                CellValue::Text(text) => {
                    2_u8.hash(&mut hasher);
                    text.hash(&mut hasher);
                }
            }
        }
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::{ChartTypeError, VisualizationEngine};
    use crate::chart_spec::{ChartBody, ChartOptions, ChartType};
    use crate::tabular::{CellValue, TabularResult};

    fn sales(revenue: &[f64]) -> TabularResult {
        TabularResult::new(
            vec!["Year".to_string(), "Revenue".to_string()],
            revenue
                .iter()
                .enumerate()
                .map(|(offset, value)| {
                    #[allow(clippy::cast_precision_loss)]
                    let year = 2020.0 + offset as f64;
                    vec![CellValue::Number(year), CellValue::Number(*value)]
                })
                .collect(),
        )
    }

    #[test]
    fn switching_chart_type_reuses_cached_axes_and_range() {
        let mut engine = VisualizationEngine::new(ChartOptions::default());
        let result = sales(&[100.0, 150.0]);

        let line = engine
            .chart_spec("1-response", &result, ChartType::Line)
            .expect("line should be offered");
        let bar = engine
            .chart_spec("1-response", &result, ChartType::Bar)
            .expect("bar should be offered");

        assert_eq!(engine.analysis_runs(), 1);
        assert_eq!((line.x_key.as_str(), line.y_key.as_str()), ("Year", "Revenue"));
        assert_eq!((bar.x_key.as_str(), bar.y_key.as_str()), ("Year", "Revenue"));

        let (ChartBody::Series(line), ChartBody::Series(bar)) = (line.body, bar.body) else {
            panic!("expected series bodies");
        };
        assert_eq!(line.y_range, bar.y_range);
        assert!((line.y_range.max - 165.0).abs() < f64::EPSILON);
    }

    #[test]
    fn changed_result_recomputes_analysis() {
        let mut engine = VisualizationEngine::new(ChartOptions::default());
        engine.analysis("1-response", &sales(&[100.0, 150.0]));
        engine.analysis("1-response", &sales(&[100.0, 150.0]));
        assert_eq!(engine.analysis_runs(), 1);

        let updated = engine.analysis("1-response", &sales(&[100.0, 1000.0]));
        assert!((updated.y_range.max - 1100.0).abs() < f64::EPSILON);
        assert_eq!(engine.analysis_runs(), 2);
    }

    #[test]
    fn chart_types_outside_the_options_are_rejected() {
        let mut engine = VisualizationEngine::new(ChartOptions::default());
        let single_column = TabularResult::new(
            vec!["name".to_string()],
            vec![vec![CellValue::Text("a".to_string())]; 5],
        );

        let err = engine
            .chart_spec("2-response", &single_column, ChartType::Pie)
            .expect_err("pie should not be offered");
        assert_eq!(
            err,
            ChartTypeError::NotOffered {
                chart_type: ChartType::Pie
            }
        );
        assert!(engine
            .chart_spec("2-response", &single_column, ChartType::Table)
            .is_ok());
    }

    #[test]
    fn forget_and_clear_drop_cached_entries() {
        let mut engine = VisualizationEngine::default();
        engine.analysis("a", &sales(&[1.0, 2.0]));
        engine.analysis("b", &sales(&[1.0, 2.0]));
        engine.forget("a");
        assert_eq!(engine.cached_results(), 1);
        engine.clear();
        assert_eq!(engine.cached_results(), 0);
    }
}
