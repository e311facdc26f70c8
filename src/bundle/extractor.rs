//! Single-pass extraction of one station's forecast from the MOSMIX document events.
//!
//! Three accumulators watch the same event sequence, each as its own small state machine:
//! the issue time, the forecast time steps, and the parameter arrays of the target station's
//! placemark.

use crate::bundle::document::{DocumentEvent, Element};
use crate::bundle::error::BundleError;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use std::collections::HashMap;

const ISSUE_TIME: &str = "IssueTime";
const FORECAST_TIME_STEPS: &str = "ForecastTimeSteps";
const TIME_STEP: &str = "TimeStep";
const PLACEMARK: &str = "Placemark";
const NAME: &str = "name";
const FORECAST: &str = "Forecast";
const ELEMENT_NAME_SUFFIX: &str = "elementName";
const VALUE: &str = "value";
const UNDEFINED_VALUE: &str = "-";

/// Parses an ISO-8601 instant; a trailing `Z` or a missing offset both mean UTC.
pub(crate) fn parse_utc(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Splits a whitespace separated value list, `-` meaning "no value".
fn parse_values(parameter: &str, text: &str) -> Vec<Option<f64>> {
    text.split_whitespace()
        .map(|token| {
            if token == UNDEFINED_VALUE {
                return None;
            }
            match token.parse::<f64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring unparseable {} value '{}'", parameter, token);
                    None
                }
            }
        })
        .collect()
}

#[derive(Debug, Default)]
struct IssueTimeAccumulator {
    issue_time: Option<DateTime<Utc>>,
}

impl IssueTimeAccumulator {
    fn on_enter(&mut self, element: &Element) {
        if !element.name.ends_with(ISSUE_TIME) {
            return;
        }
        let Some(text) = element.text.as_deref() else {
            return;
        };
        match parse_utc(text) {
            Some(time) => self.issue_time = Some(time),
            None => warn!("Ignoring unparseable issue time '{}'", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeStepState {
    Idle,
    InTimeSteps,
}

#[derive(Debug)]
struct TimeStepAccumulator {
    state: TimeStepState,
    time_steps: Vec<DateTime<Utc>>,
    blocks_completed: usize,
}

impl TimeStepAccumulator {
    fn new() -> Self {
        Self {
            state: TimeStepState::Idle,
            time_steps: Vec::new(),
            blocks_completed: 0,
        }
    }

    fn on_enter(&mut self, element: &Element) -> Result<(), BundleError> {
        match (self.state, element.name.as_str()) {
            (_, FORECAST_TIME_STEPS) => {
                self.time_steps.clear();
                self.state = TimeStepState::InTimeSteps;
            }
            (TimeStepState::InTimeSteps, TIME_STEP) => {
                if let Some(text) = element.text.as_deref() {
                    // A skipped step would shift every value array against the time axis.
                    let time = parse_utc(text).ok_or_else(|| {
                        BundleError::MalformedDocument(format!("unparseable time step '{}'", text))
                    })?;
                    self.time_steps.push(time);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_exit(&mut self, name: &str) {
        if self.state == TimeStepState::InTimeSteps && name == FORECAST_TIME_STEPS {
            self.state = TimeStepState::Idle;
            self.blocks_completed += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlacemarkState {
    Idle,
    InPlacemark,
    CollectingStation,
}

#[derive(Debug)]
struct StationAccumulator {
    station_id: String,
    state: PlacemarkState,
    current_parameter: Option<String>,
    parameters: HashMap<String, Vec<Option<f64>>>,
    station_seen: bool,
    station_closed: bool,
}

impl StationAccumulator {
    fn new(station_id: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            state: PlacemarkState::Idle,
            current_parameter: None,
            parameters: HashMap::new(),
            station_seen: false,
            station_closed: false,
        }
    }

    fn on_enter(&mut self, element: &Element) {
        match (self.state, element.name.as_str()) {
            (_, PLACEMARK) => {
                self.state = PlacemarkState::InPlacemark;
                self.current_parameter = None;
            }
            (PlacemarkState::InPlacemark | PlacemarkState::CollectingStation, NAME) => {
                let Some(text) = element.text.as_deref() else {
                    return;
                };
                if text.trim() == self.station_id {
                    debug!("Found placemark of station {}", self.station_id);
                    self.parameters.clear();
                    self.station_seen = true;
                    self.state = PlacemarkState::CollectingStation;
                } else {
                    self.state = PlacemarkState::InPlacemark;
                }
            }
            (PlacemarkState::CollectingStation, FORECAST) => {
                self.current_parameter = element
                    .attribute_ending_with(ELEMENT_NAME_SUFFIX)
                    .map(str::to_string);
            }
            (PlacemarkState::CollectingStation, VALUE) => {
                if let (Some(parameter), Some(text)) =
                    (self.current_parameter.as_ref(), element.text.as_deref())
                {
                    let values = parse_values(parameter, text);
                    self.parameters.insert(parameter.clone(), values);
                }
            }
            _ => {}
        }
    }

    fn on_exit(&mut self, name: &str) {
        if name != PLACEMARK {
            return;
        }
        if self.state == PlacemarkState::CollectingStation {
            self.station_closed = true;
        }
        self.state = PlacemarkState::Idle;
        self.current_parameter = None;
    }
}

/// What the extractor found for the target station.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedForecast {
    pub issue_time_utc: DateTime<Utc>,
    pub time_steps: Vec<DateTime<Utc>>,
    /// Values per element code, one entry per time step.
    pub parameters: HashMap<String, Vec<Option<f64>>>,
}

/// Collects the issue time, the time steps and one station's parameter arrays from a stream
/// of [`DocumentEvent`]s. Unknown elements are ignored.
#[derive(Debug)]
pub struct IncrementalDocumentExtractor {
    issue_time: IssueTimeAccumulator,
    time_steps: TimeStepAccumulator,
    station: StationAccumulator,
}

impl IncrementalDocumentExtractor {
    pub fn new(station_id: &str) -> Self {
        Self {
            issue_time: IssueTimeAccumulator::default(),
            time_steps: TimeStepAccumulator::new(),
            station: StationAccumulator::new(station_id),
        }
    }

    pub fn station_id(&self) -> &str {
        &self.station.station_id
    }

    pub fn consume(&mut self, event: &DocumentEvent) -> Result<(), BundleError> {
        match event {
            DocumentEvent::Enter(element) => {
                self.issue_time.on_enter(element);
                self.time_steps.on_enter(element)?;
                self.station.on_enter(element);
            }
            DocumentEvent::Exit(name) => {
                self.time_steps.on_exit(name);
                self.station.on_exit(name);
            }
        }
        Ok(())
    }

    /// True once everything needed has been seen: the issue time, a closed time step block and
    /// the closed placemark of the station. The rest of the document can then be skipped.
    pub fn is_complete(&self) -> bool {
        self.issue_time.issue_time.is_some()
            && self.time_steps.blocks_completed > 0
            && self.station.station_closed
    }

    pub fn finish(self) -> Result<ExtractedForecast, BundleError> {
        let issue_time_utc = self
            .issue_time
            .issue_time
            .ok_or(BundleError::MissingIssueTime)?;
        if self.time_steps.time_steps.is_empty() {
            return Err(BundleError::NoTimeSteps);
        }
        if !self.station.station_seen {
            return Err(BundleError::StationNotFound(self.station.station_id));
        }
        Ok(ExtractedForecast {
            issue_time_utc,
            time_steps: self.time_steps.time_steps,
            parameters: self.station.parameters,
        })
    }
}
