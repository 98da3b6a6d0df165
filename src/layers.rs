//! Mapbox GL source/layer descriptors handed to the browser map widget.
//!
//! Everything here is plain JSON; the client adds sources and layers verbatim.

use crate::binning::ColorStop;
use crate::config::MapConfig;
use crate::types::Schema;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::{Geometry, GeometryCollection, Rect};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Layer the overlays are inserted beneath so labels stay readable.
pub const LABEL_LAYER: &str = "road-label-simple";

pub const REGIONAL_SOURCE: &str = "regional";
pub const REGIONAL_LAYER: &str = "region";
pub const STUDY_SOURCE: &str = "user_geoms";
pub const STUDY_LAYER: &str = "user_geoms";
pub const FIT_PADDING: u32 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// Arguments for constructing a map instance on the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapInit {
    pub access_token: String,
    pub style: String,
    pub center: [f64; 2],
    pub zoom: f64,
}

impl MapInit {
    pub fn new(config: &MapConfig, theme: Theme) -> Self {
        let style = match theme {
            Theme::Dark => config.dark_style.clone(),
            Theme::Light => config.light_style.clone(),
        };
        Self {
            access_token: config.access_token.clone(),
            style,
            center: config.center,
            zoom: config.zoom,
        }
    }
}

/// A layer plus the id of the layer it goes before.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    pub layer: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSpec {
    pub id: String,
    pub source: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub colors: Vec<String>,
    pub low_label: String,
    pub high_label: String,
}

impl Legend {
    pub fn new(palette: &[String]) -> Self {
        Self {
            colors: palette.to_vec(),
            low_label: "Low".to_string(),
            high_label: "High".to_string(),
        }
    }
}

/// Line layer colouring regional features by attribute quantile.
///
/// With no stops (empty selection) the line colour is the constant
/// `fallback_color`; a stop function with an empty `stops` array is invalid.
pub fn regional_line_layer(
    attribute: &str,
    stops: &[ColorStop],
    region_property: &str,
    region: Option<&str>,
    fallback_color: &str,
) -> LayerSpec {
    let line_color = if stops.is_empty() {
        json!(fallback_color)
    } else {
        json!({
            "property": attribute,
            "stops": stops.iter().map(ColorStop::to_json).collect::<Vec<_>>(),
        })
    };

    let mut layer = json!({
        "id": REGIONAL_LAYER,
        "type": "line",
        "source": REGIONAL_SOURCE,
        "paint": {
            "line-width": 2,
            "line-color": line_color,
        },
    });
    if let Some(label) = region {
        layer["filter"] = json!(["==", ["get", region_property], label]);
    }

    LayerSpec {
        layer,
        before_id: Some(LABEL_LAYER.to_string()),
    }
}

pub fn regional_source(data_url: &str) -> SourceSpec {
    SourceSpec {
        id: REGIONAL_SOURCE.to_string(),
        source: json!({ "type": "geojson", "data": data_url }),
    }
}

/// Vector tile source for the schema's base network.
pub fn network_source(schema: Schema) -> SourceSpec {
    match schema {
        Schema::Lts => SourceSpec {
            id: "lts_tile".to_string(),
            source: json!({
                "type": "vector",
                "url": "https://www.tiles.dvrpc.org/data/lts_v2.json",
                "minzoom": 8,
                "promoteId": "id",
            }),
        },
        Schema::Sidewalk => SourceSpec {
            id: "sw_tile".to_string(),
            source: json!({
                "type": "vector",
                "url": "https://www.tiles.dvrpc.org/data/pedestrian-network.json",
                "minzoom": 8,
            }),
        },
    }
}

/// Id of the base network layer; the study overlay goes before it.
pub fn network_layer_id(schema: Schema) -> &'static str {
    match schema {
        Schema::Lts => "lts",
        Schema::Sidewalk => "sw",
    }
}

pub fn network_layer(schema: Schema) -> LayerSpec {
    let layer = match schema {
        Schema::Lts => json!({
            "id": network_layer_id(schema),
            "type": "line",
            "source": "lts_tile",
            "source-layer": "lts",
            "paint": {
                "line-width": 1,
                "line-opacity": {
                    "property": "lts",
                    "stops": [[1, 1], [2, 1], [3, 0.5], [4, 0.5]],
                },
                "line-color": {
                    "property": "lts",
                    "stops": [[1, "green"], [2, "lightgreen"], [3, "yellow"], [4, "red"]],
                },
            },
        }),
        Schema::Sidewalk => json!({
            "id": network_layer_id(schema),
            "type": "line",
            "source": "sw_tile",
            "source-layer": "ped_lines",
            "paint": {
                "line-width": 1,
                "line-opacity": 1,
                "line-color": ["match", ["get", "feat_type"], "UNMARKED", "#FF0000", "#00A36C"],
            },
        }),
    };
    LayerSpec {
        layer,
        before_id: Some(LABEL_LAYER.to_string()),
    }
}

pub fn study_source(geojson: &Value) -> SourceSpec {
    SourceSpec {
        id: STUDY_SOURCE.to_string(),
        source: json!({ "type": "geojson", "data": geojson }),
    }
}

pub fn study_layer(schema: Schema) -> LayerSpec {
    LayerSpec {
        layer: json!({
            "id": STUDY_LAYER,
            "type": "fill",
            "source": STUDY_SOURCE,
            "paint": {
                "fill-color": "teal",
                "fill-opacity": 0.5,
            },
        }),
        before_id: Some(network_layer_id(schema).to_string()),
    }
}

/// `[min_x, min_y, max_x, max_y]` over every geometry in a GeoJSON document,
/// or `None` if it has no coordinates.
pub fn geojson_bounds(geojson: &geojson::GeoJson) -> Option<[f64; 4]> {
    let geometries: Vec<Geometry<f64>> = match geojson {
        geojson::GeoJson::FeatureCollection(fc) => fc
            .features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .filter_map(|g| Geometry::try_from(g.value.clone()).ok())
            .collect(),
        geojson::GeoJson::Feature(f) => f
            .geometry
            .as_ref()
            .and_then(|g| Geometry::try_from(g.value.clone()).ok())
            .into_iter()
            .collect(),
        geojson::GeoJson::Geometry(g) => Geometry::try_from(g.value.clone()).ok().into_iter().collect(),
    };

    let rect: Rect<f64> = GeometryCollection(geometries).bounding_rect()?;
    Some([rect.min().x, rect.min().y, rect.max().x, rect.max().y])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops() -> Vec<ColorStop> {
        vec![
            ColorStop { value: 1.0, color: "#0000ff".into() },
            ColorStop { value: 5.0, color: "#ffffff".into() },
        ]
    }

    #[test]
    fn map_init_picks_style_by_theme() {
        let config = MapConfig {
            access_token: "pk.abc".into(),
            ..MapConfig::default()
        };
        let dark = MapInit::new(&config, Theme::Dark);
        assert_eq!(dark.style, "mapbox://styles/mapbox/dark-v11");
        assert_eq!(dark.access_token, "pk.abc");

        let light = MapInit::new(&config, Theme::Light);
        assert_eq!(light.style, "mapbox://styles/mapbox/light-v11");

        let json = serde_json::to_value(&light).unwrap();
        assert_eq!(json["accessToken"], "pk.abc");
        assert_eq!(json["center"], json!([-75.16, 40.05]));
    }

    #[test]
    fn regional_layer_uses_property_stops_and_filter() {
        let spec = regional_line_layer("lep", &stops(), "co_name", Some("Mercer"), "#0000ff");
        let layer = &spec.layer;
        assert_eq!(layer["id"], "region");
        assert_eq!(layer["paint"]["line-width"], 2);
        assert_eq!(layer["paint"]["line-color"]["property"], "lep");
        assert_eq!(
            layer["paint"]["line-color"]["stops"],
            json!([[1.0, "#0000ff"], [5.0, "#ffffff"]])
        );
        assert_eq!(layer["filter"], json!(["==", ["get", "co_name"], "Mercer"]));
        assert_eq!(spec.before_id.as_deref(), Some(LABEL_LAYER));
    }

    #[test]
    fn regional_layer_falls_back_to_constant_colour() {
        let spec = regional_line_layer("lep", &[], "co_name", None, "#123456");
        assert_eq!(spec.layer["paint"]["line-color"], json!("#123456"));
        assert!(spec.layer.get("filter").is_none());
    }

    #[test]
    fn study_layer_sits_under_network_layer() {
        assert_eq!(study_layer(Schema::Lts).before_id.as_deref(), Some("lts"));
        assert_eq!(study_layer(Schema::Sidewalk).before_id.as_deref(), Some("sw"));
        assert_eq!(network_source(Schema::Sidewalk).id, "sw_tile");
        assert_eq!(network_layer(Schema::Sidewalk).layer["source-layer"], "ped_lines");
        assert_eq!(network_layer(Schema::Lts).layer["paint"]["line-color"]["stops"][3][1], "red");
    }

    #[test]
    fn bounds_cover_all_features() {
        let geojson: geojson::GeoJson = serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [-75.2, 39.9]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "LineString", "coordinates": [[-75.0, 40.0], [-74.9, 40.1]]}}
            ]
        }))
        .unwrap();
        assert_eq!(geojson_bounds(&geojson), Some([-75.2, 39.9, -74.9, 40.1]));

        let empty: geojson::GeoJson =
            serde_json::from_value(json!({"type": "FeatureCollection", "features": []})).unwrap();
        assert_eq!(geojson_bounds(&empty), None);
    }
}
