//! Alignment of sparse interval annotations to the timestamp grids
//! produced by event-based embedding models.
//!
//! Ground truth arrives as labeled time intervals per clip; embeddings
//! arrive as a sequence of (timestamp, vector) pairs. The policies here
//! turn the intervals into one label entry per timestamp so both sides
//! can be consolidated row for row.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Interval ends are widened by this much (milliseconds) so that a
/// timestamp falling exactly on an event boundary still counts as
/// inside the event.
const END_EPSILON_MS: f64 = 1e-4;

/// One annotated interval. Times are milliseconds, `end >= start`.
/// Discrete tasks carry `label`; continuous tasks carry `values`
/// (and may omit `end`, which interpolation never reads).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelInterval {
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,
}

/// Per-clip ground truth as it appears in a split's JSON: scene tasks
/// list class names, timestamped tasks list intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClipLabels {
    Tags(Vec<String>),
    Events(Vec<LabelInterval>),
}

impl ClipLabels {
    /// The clip's class names. An empty event list counts as no tags.
    pub fn tags(&self) -> Result<&[String]> {
        match self {
            ClipLabels::Tags(tags) => Ok(tags),
            ClipLabels::Events(events) if events.is_empty() => Ok(&[]),
            ClipLabels::Events(_) => Err(Error::Metadata(
                "expected a list of class names, found event intervals".into(),
            )),
        }
    }

    /// The clip's intervals. An empty tag list counts as no events
    /// (an empty JSON array deserializes as `Tags`).
    pub fn events(&self) -> Result<&[LabelInterval]> {
        match self {
            ClipLabels::Events(events) => Ok(events),
            ClipLabels::Tags(tags) if tags.is_empty() => Ok(&[]),
            ClipLabels::Tags(_) => Err(Error::Metadata(
                "expected event intervals, found a list of class names".into(),
            )),
        }
    }
}

/// How interval annotations map onto a timestamp grid.
#[derive(Debug, Clone, PartialEq)]
pub enum LabelPolicy {
    /// Set membership per timestamp. With `onehot` set, the raw sets are
    /// stabilized into exactly one label per timestamp, using the given
    /// fallback class.
    Discrete { onehot: Option<String> },
    /// Linear interpolation of per-interval scalars (parsed from `label`).
    Smoothed,
    /// Linear interpolation of per-interval `values` vectors.
    Continuous,
}

impl LabelPolicy {
    pub fn from_name(name: &str, onehot_default: Option<String>) -> Result<Self> {
        match name {
            "default" => Ok(LabelPolicy::Discrete {
                onehot: onehot_default,
            }),
            "smoothed" => Ok(LabelPolicy::Smoothed),
            "continuous" => Ok(LabelPolicy::Continuous),
            other => Err(Error::UnsupportedPolicy(other.to_string())),
        }
    }
}

/// Aligned output: one entry per timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TimestampLabels {
    Classes(Vec<Vec<String>>),
    Vectors(Vec<Vec<f64>>),
}

impl TimestampLabels {
    pub fn len(&self) -> usize {
        match self {
            TimestampLabels::Classes(rows) => rows.len(),
            TimestampLabels::Vectors(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Point-stab queries over a clip's intervals, ends pre-widened.
struct IntervalIndex<'a> {
    /// (start, widened end, label), sorted by start.
    spans: Vec<(f64, f64, &'a str)>,
}

impl<'a> IntervalIndex<'a> {
    fn new(events: &'a [LabelInterval]) -> Result<Self> {
        let mut spans = Vec::with_capacity(events.len());
        for event in events {
            let label = event.label.as_deref().ok_or_else(|| {
                Error::Metadata("event interval without a label".into())
            })?;
            spans.push((event.start, event.end + END_EPSILON_MS, label));
        }
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(IntervalIndex { spans })
    }

    /// Labels of all intervals covering `t`, in onset order.
    fn covering(&self, t: f64) -> Vec<&'a str> {
        let cut = self.spans.partition_point(|&(start, _, _)| start <= t);
        self.spans[..cut]
            .iter()
            .filter(|&&(_, end, _)| t < end)
            .map(|&(_, _, label)| label)
            .collect()
    }
}

/// A sorted (onset, value vector) series ready for interpolation.
struct OnsetSeries {
    onsets: Vec<f64>,
    values: Vec<Vec<f64>>,
}

impl OnsetSeries {
    fn new(mut points: Vec<(f64, Vec<f64>)>) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::Metadata(
                "cannot interpolate: clip has no annotated onsets".into(),
            ));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let width = points[0].1.len();
        if points.iter().any(|(_, v)| v.len() != width) {
            return Err(Error::Dimension(
                "annotation value vectors vary in width within one clip".into(),
            ));
        }
        let (onsets, values) = points.into_iter().unzip();
        Ok(OnsetSeries { onsets, values })
    }

    fn from_values(events: &[LabelInterval]) -> Result<Self> {
        let points = events
            .iter()
            .map(|event| {
                let values = event.values.clone().ok_or_else(|| {
                    Error::Metadata("interval without a values vector".into())
                })?;
                Ok((event.start, values))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(points)
    }

    fn from_scalar_labels(events: &[LabelInterval]) -> Result<Self> {
        let points = events
            .iter()
            .map(|event| {
                let label = event.label.as_deref().ok_or_else(|| {
                    Error::Metadata("interval without a label".into())
                })?;
                let value: f64 = label.parse().map_err(|_| {
                    Error::Metadata(format!("label {label:?} is not a number"))
                })?;
                Ok((event.start, vec![value]))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(points)
    }

    /// Piecewise-linear lookup: clamped outside the onset range, exact
    /// at recorded onsets, blended in between.
    fn interpolate(&self, timestamps: &[f32]) -> Vec<Vec<f64>> {
        timestamps
            .iter()
            .map(|&t| {
                let t = f64::from(t);
                let idx = self.onsets.partition_point(|&o| o < t);
                if idx == 0 {
                    self.values[0].clone()
                } else if idx == self.onsets.len() {
                    self.values[idx - 1].clone()
                } else {
                    let lower = self.onsets[idx - 1];
                    let upper = self.onsets[idx];
                    let alpha = (t - lower) / (upper - lower);
                    self.values[idx - 1]
                        .iter()
                        .zip(&self.values[idx])
                        .map(|(a, b)| a * (1.0 - alpha) + b * alpha)
                        .collect()
                }
            })
            .collect()
    }
}

/// Aligns one clip's intervals to its timestamp grid under `policy`.
/// The output always has exactly one entry per timestamp.
pub fn labels_for_timestamps(
    events: &[LabelInterval],
    timestamps: &[f32],
    policy: &LabelPolicy,
) -> Result<TimestampLabels> {
    match policy {
        LabelPolicy::Discrete { onehot: None } => {
            let index = IntervalIndex::new(events)?;
            let rows = timestamps
                .iter()
                .map(|&t| {
                    index
                        .covering(f64::from(t))
                        .into_iter()
                        .map(str::to_string)
                        .collect()
                })
                .collect();
            Ok(TimestampLabels::Classes(rows))
        }
        LabelPolicy::Discrete {
            onehot: Some(default_label),
        } => {
            let index = IntervalIndex::new(events)?;
            let mut rows = Vec::with_capacity(timestamps.len());
            // One label per timestamp. Gaps and overlaps both prefer the
            // previous choice so the sequence stays stable; the fallback
            // class takes over when continuity is impossible. True label
            // transitions therefore lag by one timestamp.
            let mut prev: Option<String> = None;
            for &t in timestamps {
                let matches = index.covering(f64::from(t));
                let choice = match (matches.as_slice(), prev.as_deref()) {
                    ([only], _) => (*only).to_string(),
                    ([], Some(p)) => p.to_string(),
                    ([], None) => default_label.clone(),
                    (many, Some(p)) if many.contains(&p) => p.to_string(),
                    _ => default_label.clone(),
                };
                prev = Some(choice.clone());
                rows.push(vec![choice]);
            }
            Ok(TimestampLabels::Classes(rows))
        }
        LabelPolicy::Smoothed => {
            let series = OnsetSeries::from_scalar_labels(events)?;
            Ok(TimestampLabels::Vectors(series.interpolate(timestamps)))
        }
        LabelPolicy::Continuous => {
            let series = OnsetSeries::from_values(events)?;
            Ok(TimestampLabels::Vectors(series.interpolate(timestamps)))
        }
    }
}
