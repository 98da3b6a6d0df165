use crate::binning::{self, Banded, ColorStop, RegionFilter};
use anyhow::{anyhow, Context, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::algorithm::euclidean_distance::EuclideanDistance;
use geo::{Geometry, Point};
use geojson::GeoJson;
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::convert::TryInto;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One feature of the regional GeoJSON asset.
#[derive(Debug, Clone)]
pub struct RegionalFeature {
    pub region: String,
    // Numeric properties; `None` where the asset carries null
    pub attributes: HashMap<String, Option<f64>>,
    pub properties: Map<String, Value>,
    pub geometry: Option<Geometry<f64>>,
}

impl Banded for RegionalFeature {
    fn region(&self) -> &str {
        &self.region
    }

    fn attribute(&self, name: &str) -> Option<f64> {
        self.attributes.get(name).copied().flatten()
    }
}

impl RegionalFeature {
    /// `key: value` lines shown in the click popup.
    pub fn popup_lines(&self) -> Vec<String> {
        self.properties
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}: {}", key, s),
                other => format!("{}: {}", key, other),
            })
            .collect()
    }
}

// Wrapper for RTree indexing
struct FeatureIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Regional features plus a bounding-box index for point lookups.
pub struct RegionalLayer {
    features: Vec<RegionalFeature>,
    tree: RTree<FeatureIndex>,
}

impl RegionalLayer {
    pub fn load(path: &Path, region_property: &str) -> Result<Self> {
        tracing::info!("Loading regional GeoJSON from {:?}...", path);
        let file = File::open(path)
            .with_context(|| format!("Failed to open regional GeoJSON: {:?}", path))?;
        let reader = BufReader::new(file);
        let geojson = GeoJson::from_reader(reader).context("Failed to parse regional GeoJSON")?;
        let layer = Self::from_geojson(geojson, region_property)?;
        tracing::info!("Loaded {} regional features", layer.features.len());
        Ok(layer)
    }

    pub fn from_geojson(geojson: GeoJson, region_property: &str) -> Result<Self> {
        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(anyhow!("Regional GeoJSON must be a FeatureCollection")),
        };

        let features: Vec<RegionalFeature> = collection
            .features
            .into_par_iter()
            .map(|feature| decode_feature(feature, region_property))
            .collect::<Result<_>>()?;

        Ok(Self::from_features(features))
    }

    pub fn from_features(features: Vec<RegionalFeature>) -> Self {
        let tree_items: Vec<FeatureIndex> = features
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| {
                let rect = feature.geometry.as_ref()?.bounding_rect()?;
                Some(FeatureIndex {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        Self {
            features,
            tree: RTree::bulk_load(tree_items),
        }
    }

    pub fn features(&self) -> &[RegionalFeature] {
        &self.features
    }

    /// Distinct region labels present in the asset, sorted.
    pub fn regions(&self) -> Vec<String> {
        self.features
            .iter()
            .map(|f| f.region.clone())
            .filter(|r| !r.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.features.iter().any(|f| f.attributes.contains_key(attribute))
    }

    pub fn bands(&self, attribute: &str, filter: &RegionFilter, palette: &[String]) -> Vec<ColorStop> {
        binning::color_stops(&self.features, attribute, filter, palette)
    }

    pub fn attribute_max(&self, attribute: &str, filter: &RegionFilter) -> Option<f64> {
        let max = binning::attribute_max(&self.features, attribute, filter);
        tracing::debug!(attribute, ?max, "attribute max");
        max
    }

    /// Polygon containing the point, else the nearest line feature within
    /// `tolerance` degrees.
    pub fn feature_at(&self, lon: f64, lat: f64, tolerance: f64) -> Option<&RegionalFeature> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_corners([lon - tolerance, lat - tolerance], [lon + tolerance, lat + tolerance]);

        let candidates: Vec<&RegionalFeature> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.features.get(candidate.index))
            .collect();

        if let Some(hit) = candidates.iter().copied().find(|f| polygon_contains(f, &point)) {
            return Some(hit);
        }

        candidates
            .into_iter()
            .filter_map(|f| line_distance(f, &point).map(|d| (f, d)))
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(f, _)| f)
    }
}

fn polygon_contains(feature: &RegionalFeature, point: &Point<f64>) -> bool {
    match &feature.geometry {
        Some(Geometry::Polygon(p)) => p.contains(point),
        Some(Geometry::MultiPolygon(mp)) => mp.contains(point),
        _ => false,
    }
}

fn line_distance(feature: &RegionalFeature, point: &Point<f64>) -> Option<f64> {
    match &feature.geometry {
        Some(Geometry::Line(l)) => Some(point.euclidean_distance(l)),
        Some(Geometry::LineString(ls)) => Some(point.euclidean_distance(ls)),
        Some(Geometry::MultiLineString(mls)) => Some(point.euclidean_distance(mls)),
        _ => None,
    }
}

fn decode_feature(feature: geojson::Feature, region_property: &str) -> Result<RegionalFeature> {
    let properties = feature.properties.unwrap_or_default();

    let region = match properties.get(region_property) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let attributes = properties
        .iter()
        .filter_map(|(key, value)| match value {
            Value::Number(n) => Some((key.clone(), n.as_f64())),
            Value::Null => Some((key.clone(), None)),
            _ => None,
        })
        .collect();

    let geometry = match feature.geometry {
        Some(geom) => {
            let geometry: Geometry<f64> = geom
                .value
                .try_into()
                .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
            Some(geometry)
        }
        None => None,
    };

    Ok(RegionalFeature {
        region,
        attributes,
        properties,
        geometry,
    })
}
