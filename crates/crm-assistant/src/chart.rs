use serde::{Deserialize, Serialize};
use serde_json::Value;

const CHART_FENCE: &str = "```chart";
const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Pie,
    Line,
    Doughnut,
}

impl ChartType {
    pub const ALL: [Self; 4] = [Self::Bar, Self::Pie, Self::Line, Self::Doughnut];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Pie => "pie",
            Self::Line => "line",
            Self::Doughnut => "doughnut",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub data: Vec<f64>,
    #[serde(
        rename = "backgroundColor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub background_color: Option<Vec<String>>,
}

/// Chart payload carried inside a reply's fenced block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSpec {
    #[serde(rename = "type")]
    pub chart_type: ChartType,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
}

impl ChartSpec {
    /// # Errors
    /// Returns [`ReplyContractError::NoDatasets`] or
    /// [`ReplyContractError::LengthMismatch`] when the chart cannot be drawn
    /// as declared.
    pub fn validate(&self) -> Result<(), ReplyContractError> {
        if self.datasets.is_empty() {
            return Err(ReplyContractError::NoDatasets);
        }
        for (index, dataset) in self.datasets.iter().enumerate() {
            if dataset.data.len() != self.labels.len() {
                return Err(ReplyContractError::LengthMismatch {
                    dataset: index,
                    labels: self.labels.len(),
                    values: dataset.data.len(),
                });
            }
        }
        Ok(())
    }
}

/// A reply split into its prose and optional chart.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub prose: String,
    pub chart: Option<ChartSpec>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReplyContractError {
    #[error("reply contains {0} chart blocks; at most one is allowed")]
    MultipleCharts(usize),
    #[error("chart block is not closed")]
    UnterminatedChart,
    #[error("chart block is not a valid chart payload: {0}")]
    MalformedChart(String),
    #[error("unsupported chart type: {0}")]
    UnsupportedChartType(String),
    #[error("chart has no datasets")]
    NoDatasets,
    #[error("dataset {dataset} has {values} values for {labels} labels")]
    LengthMismatch {
        dataset: usize,
        labels: usize,
        values: usize,
    },
    #[error("reply has no prose")]
    MissingProse,
}

/// Splits a model reply into prose and at most one chart payload.
///
/// # Errors
/// Returns a [`ReplyContractError`] naming the first way the reply breaks
/// the response contract.
pub fn parse_reply(raw: &str) -> Result<AssistantReply, ReplyContractError> {
    let blocks = raw.matches(CHART_FENCE).count();
    if blocks > 1 {
        return Err(ReplyContractError::MultipleCharts(blocks));
    }

    let Some(start) = raw.find(CHART_FENCE) else {
        let prose = raw.trim();
        if prose.is_empty() {
            return Err(ReplyContractError::MissingProse);
        }
        return Ok(AssistantReply {
            prose: prose.to_string(),
            chart: None,
        });
    };

    let rest = &raw[start + CHART_FENCE.len()..];
    let end = rest.find(FENCE).ok_or(ReplyContractError::UnterminatedChart)?;
    let chart = parse_chart(&rest[..end])?;

    let prose = [raw[..start].trim(), rest[end + FENCE.len()..].trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    if prose.is_empty() {
        return Err(ReplyContractError::MissingProse);
    }

    Ok(AssistantReply {
        prose,
        chart: Some(chart),
    })
}

fn parse_chart(body: &str) -> Result<ChartSpec, ReplyContractError> {
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|err| ReplyContractError::MalformedChart(err.to_string()))?;
    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        if ChartType::parse(kind).is_none() {
            return Err(ReplyContractError::UnsupportedChartType(kind.to_string()));
        }
    }
    let chart: ChartSpec = serde_json::from_value(value)
        .map_err(|err| ReplyContractError::MalformedChart(err.to_string()))?;
    chart.validate()?;
    Ok(chart)
}
