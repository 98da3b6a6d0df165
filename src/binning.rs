//! Quantile (decile) colour banding for choropleth and line-colour layers.
//!
//! Breakpoints are taken at rank `floor((i + 1) * len / n) - 1` of the sorted
//! values, so small or skewed inputs produce repeated breakpoints. Repeats are
//! kept: the map layer receives exactly one stop per palette entry.

use serde::{Deserialize, Serialize};

/// Number of bands the regional view uses.
pub const BAND_COUNT: usize = 10;

/// Blue to white ramp used by the regional view, low to high.
pub const DEFAULT_PALETTE: [&str; BAND_COUNT] = [
    "#0000ff", "#4b00ff", "#8000ff", "#aa00ff", "#d100ff", "#ff00ff", "#ff66ff", "#ff99ff",
    "#ffccff", "#ffffff",
];

/// Which features take part in the band computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionFilter {
    All,
    Only(String),
}

impl RegionFilter {
    /// Builds a filter from a UI label; the all-regions sentinel, an empty
    /// label, or no label at all select everything.
    pub fn from_label(label: Option<&str>, all_regions_label: &str) -> Self {
        match label.map(str::trim) {
            None | Some("") => RegionFilter::All,
            Some(l) if l == all_regions_label => RegionFilter::All,
            Some(l) => RegionFilter::Only(l.to_string()),
        }
    }

    pub fn matches(&self, region: &str) -> bool {
        match self {
            RegionFilter::All => true,
            RegionFilter::Only(label) => label == region,
        }
    }
}

/// Anything carrying a region label and a bag of optional numeric attributes.
pub trait Banded {
    fn region(&self) -> &str;
    fn attribute(&self, name: &str) -> Option<f64>;
}

/// One `[value, color]` pair of a Mapbox property-stop function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub value: f64,
    pub color: String,
}

impl ColorStop {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!([self.value, self.color])
    }
}

/// Ranks into a sorted array of `len` values for `n` quantile breakpoints.
/// Empty for an empty array.
pub fn quantile_indices(len: usize, n: usize) -> Vec<usize> {
    if len == 0 {
        return Vec::new();
    }
    // With len < n the leading ranks floor to -1; they clamp to the first value.
    (0..n)
        .map(|i| ((i + 1) * len / n).saturating_sub(1))
        .collect()
}

/// Breakpoint values over `sorted`, one per band.
pub fn quantile_breaks(sorted: &[f64], n: usize) -> Vec<f64> {
    quantile_indices(sorted.len(), n)
        .into_iter()
        .map(|idx| sorted[idx])
        .collect()
}

/// Values of `attribute` for features passing `filter`, nulls dropped, sorted
/// ascending.
pub fn filtered_values<F: Banded>(features: &[F], attribute: &str, filter: &RegionFilter) -> Vec<f64> {
    let mut values: Vec<f64> = features
        .iter()
        .filter(|f| filter.matches(f.region()))
        .filter_map(|f| f.attribute(attribute))
        .filter(|v| !v.is_nan())
        .collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values
}

/// Builds one colour stop per palette entry from the decile breakpoints of the
/// filtered attribute. Returns no stops when nothing passes the filter.
pub fn color_stops<F: Banded>(
    features: &[F],
    attribute: &str,
    filter: &RegionFilter,
    palette: &[String],
) -> Vec<ColorStop> {
    let values = filtered_values(features, attribute, filter);
    let breaks = quantile_breaks(&values, palette.len());
    tracing::debug!(attribute, ?filter, ?breaks, "computed quantiles");

    breaks
        .into_iter()
        .zip(palette.iter())
        .map(|(value, color)| ColorStop {
            value,
            color: color.clone(),
        })
        .collect()
}

/// Largest value of the filtered attribute, if any.
pub fn attribute_max<F: Banded>(features: &[F], attribute: &str, filter: &RegionFilter) -> Option<f64> {
    filtered_values(features, attribute, filter).last().copied()
}

pub fn default_palette() -> Vec<String> {
    DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
}
