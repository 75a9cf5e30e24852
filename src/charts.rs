//! The chart catalogue: which dataset and drawing function back each
//! exportable chart, and what positional arguments the function takes.
//!
//! Arguments passed after `(canvasId, parsedData)`:
//!
//! - `fossil-fuels-consumption`: `type: string`, `labels: bool`,
//!   `trendline: bool`, then `xmin`, `xmax`, `ymin`, `ymax` as int or null
//! - `per-capita-energy-use`: optional options object (`entity`, `type`,
//!   `showLabels`, `showTrendline`, `xMin`, `xMax`)
//! - `energy-consumption-by-source`: optional options object (`entity`,
//!   `xMin`, `xMax`)
//!
//! Omitted integer bounds are passed as `null`; omitted options objects are
//! not passed at all so the drawing function applies its own defaults.

use crate::widget::DrawParam;
use std::collections::HashMap;
use thiserror::Error;

/// A query parameter that does not fit the chart's argument contract
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid `{name}` parameter: {reason}")]
pub struct ParamError {
    pub name: String,
    pub reason: String,
}

impl ParamError {
    fn new(name: &str, reason: impl Into<String>) -> Self {
        Self { name: name.to_string(), reason: reason.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Bool,
    Int,
}

/// One positional argument read from a query parameter of the same name
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    /// Query text used when the parameter is absent; `None` passes `null`
    pub default: Option<&'static str>,
}

/// How a chart's arguments are taken from the query string
#[derive(Debug, Clone, Copy)]
pub enum ParamSchema {
    Positional(&'static [ParamSpec]),
    /// A single `params` query parameter holding a JSON object
    OptionsObject,
}

#[derive(Debug, Clone, Copy)]
pub struct ChartSpec {
    pub name: &'static str,
    pub dataset_id: &'static str,
    pub draw_function: &'static str,
    pub schema: ParamSchema,
}

const FOSSIL_FUELS_PARAMS: &[ParamSpec] = &[
    ParamSpec { name: "type", kind: ParamKind::Text, default: Some("line") },
    ParamSpec { name: "labels", kind: ParamKind::Bool, default: Some("false") },
    ParamSpec { name: "trendline", kind: ParamKind::Bool, default: Some("false") },
    ParamSpec { name: "xmin", kind: ParamKind::Int, default: None },
    ParamSpec { name: "xmax", kind: ParamKind::Int, default: None },
    ParamSpec { name: "ymin", kind: ParamKind::Int, default: None },
    ParamSpec { name: "ymax", kind: ParamKind::Int, default: None },
];

pub const CHARTS: &[ChartSpec] = &[
    ChartSpec {
        name: "fossil-fuels-consumption",
        dataset_id: "fossil-fuels-consumption",
        draw_function: "window.drawFossilFuelsConsumptionChart",
        schema: ParamSchema::Positional(FOSSIL_FUELS_PARAMS),
    },
    ChartSpec {
        name: "per-capita-energy-use",
        dataset_id: "per-capita-energy-use",
        draw_function: "window.drawPerCapitaEnergyUseChart",
        schema: ParamSchema::OptionsObject,
    },
    ChartSpec {
        name: "energy-consumption-by-source",
        dataset_id: "energy-consumption-by-source",
        draw_function: "window.drawEnergyConsumptionBySourceChart",
        schema: ParamSchema::OptionsObject,
    },
];

pub fn find(name: &str) -> Option<&'static ChartSpec> {
    CHARTS.iter().find(|c| c.name == name)
}

impl ChartSpec {
    /// Turn a raw query string (without the leading `?`) into draw arguments
    pub fn params_from_query(&self, query: &str) -> Result<Vec<DrawParam>, ParamError> {
        let pairs: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        match self.schema {
            ParamSchema::Positional(specs) => specs
                .iter()
                .map(|spec| {
                    let raw = pairs.get(spec.name).map(String::as_str).or(spec.default);
                    match raw {
                        Some(text) => parse_value(spec, text),
                        None => Ok(DrawParam::Null),
                    }
                })
                .collect(),
            ParamSchema::OptionsObject => match pairs.get("params") {
                None => Ok(Vec::new()),
                Some(text) => match serde_json::from_str::<serde_json::Value>(text) {
                    Ok(serde_json::Value::Object(map)) => Ok(vec![DrawParam::Object(map)]),
                    Ok(_) => Err(ParamError::new("params", "expected a JSON object")),
                    Err(e) => Err(ParamError::new("params", e.to_string())),
                },
            },
        }
    }
}

fn parse_value(spec: &ParamSpec, text: &str) -> Result<DrawParam, ParamError> {
    match spec.kind {
        ParamKind::Text => Ok(DrawParam::Text(text.to_string())),
        ParamKind::Bool => match text {
            "true" | "1" | "on" => Ok(DrawParam::Bool(true)),
            "false" | "0" | "off" => Ok(DrawParam::Bool(false)),
            other => Err(ParamError::new(spec.name, format!("`{}` is not a boolean", other))),
        },
        ParamKind::Int => {
            if text.is_empty() || text == "null" {
                return Ok(DrawParam::Null);
            }
            text.parse::<i64>()
                .map(DrawParam::Int)
                .map_err(|_| ParamError::new(spec.name, format!("`{}` is not an integer", text)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fossil_fuels_query_maps_positionally() {
        let chart = find("fossil-fuels-consumption").unwrap();
        let query = "ymax=20&type=line&labels=true&trendline=false&xmin=1990&xmax=2000&ymin=0";
        let params = chart.params_from_query(query).unwrap();
        assert_eq!(
            params,
            vec![
                DrawParam::Text("line".into()),
                DrawParam::Bool(true),
                DrawParam::Bool(false),
                DrawParam::Int(1990),
                DrawParam::Int(2000),
                DrawParam::Int(0),
                DrawParam::Int(20),
            ]
        );
    }

    #[test]
    fn fossil_fuels_defaults() {
        let chart = find("fossil-fuels-consumption").unwrap();
        let params = chart.params_from_query("").unwrap();
        assert_eq!(params[0], DrawParam::Text("line".into()));
        assert_eq!(params[1], DrawParam::Bool(false));
        assert!(params[3..].iter().all(|p| *p == DrawParam::Null));
    }

    #[test]
    fn bad_values_are_rejected() {
        let chart = find("fossil-fuels-consumption").unwrap();
        assert_eq!(chart.params_from_query("labels=maybe").unwrap_err().name, "labels");
        assert_eq!(chart.params_from_query("xmin=19x0").unwrap_err().name, "xmin");
    }

    #[test]
    fn options_object_is_parsed_as_json() {
        let chart = find("per-capita-energy-use").unwrap();
        let q = "params=%7B%22entity%22%3A%22World%22%2C%22xMin%22%3A1970%7D";
        let params = chart.params_from_query(q).unwrap();
        match &params[..] {
            [DrawParam::Object(map)] => {
                assert_eq!(map["entity"], "World");
                assert_eq!(map["xMin"], 1970);
            }
            other => panic!("unexpected params: {other:?}"),
        }
        assert!(chart.params_from_query("").unwrap().is_empty());
        assert!(chart.params_from_query("params=%5B1%5D").is_err());
        assert!(chart.params_from_query("params=%7Bentity").is_err());
    }

    #[test]
    fn every_chart_has_a_known_dataset() {
        for chart in CHARTS {
            assert!(crate::dataset::DEFAULT_DATASETS.contains(&chart.dataset_id), "{}", chart.name);
        }
        assert!(find("nope").is_none());
    }
}
