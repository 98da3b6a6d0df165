use crate::api::{ApiClient, ApiError};
use crate::config::MapConfig;
use crate::layers::{self, LayerSpec, MapInit, SourceSpec, Theme, FIT_PADDING};
use crate::table::format_number;
use crate::types::{Schema, Study, StudyKey};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const INTERPRETATION_URL: &str =
    "https://dvrpc.github.io/link-docs/getting-started/Interpreting-the-results/";
pub const ATTRIBUTION_URL: &str = "https://cloud.dvrpc.org/webmaps/link/login";
pub const DATA_SOURCES: &str = "Data sources: US Census American Community Survey (ACS) 5-year \
estimates (2017-2021), American Census Bureau's LODES 8 dataset (2020), NJDOT (2019-2023), \
PennDOT (2019-2023), NJTransit (2023), SEPTA (2023)";
pub const DISCLAIMER: &str = "This web page is a public resource of general information. The \
Delaware Valley Regional Planning Commission (DVRPC) makes no warranty, representation, or \
guarantee as to the content, sequence, accuracy, timeliness, or completeness of any of the \
spatial data or database information provided herein. DVRPC and partner state, local, and other \
agencies shall assume no liability for errors, omissions, or inaccuracies in the information \
provided regardless of how caused; or any decision made or action taken or not taken by any \
person relying on any information or data furnished within.";

/// Why a shared study page cannot be shown.
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("Study not found")]
    NotFound,

    #[error("Study not shared")]
    NotShared,
}

/// Fetches a study for its public page. Any failure to fetch counts as
/// "not found"; a study the owner has not shared is refused.
pub async fn resolve_shared_study(api: &ApiClient, key: &StudyKey) -> Result<Study, StudyError> {
    let study = match api.find_study(key).await {
        Ok(Some(study)) => study,
        Ok(None) => return Err(StudyError::NotFound),
        Err(err) => {
            tracing::error!(study = %key, "Error fetching study: {}", err);
            return Err(StudyError::NotFound);
        }
    };
    if !study.shared {
        return Err(StudyError::NotShared);
    }
    Ok(study)
}

/// A labelled row of the study detail table. Pair rows carry two
/// label/value cells, list rows a single one spanning the table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetailRow {
    Pair {
        left: (String, String),
        right: (String, String),
    },
    Wide {
        label: String,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyDetail {
    pub title: String,
    pub legend: &'static str,
    pub rows: Vec<DetailRow>,
    pub interpretation_url: &'static str,
    pub attribution_url: &'static str,
    pub data_sources: &'static str,
    pub disclaimer: &'static str,
}

fn pair(l: &str, lv: String, r: &str, rv: String) -> DetailRow {
    DetailRow::Pair {
        left: (l.to_string(), lv),
        right: (r.to_string(), rv),
    }
}

impl StudyDetail {
    pub fn new(study: &Study, schema: Schema) -> Self {
        let n = |v: u64| format_number(v as f64);
        let mut rows = vec![
            pair(
                "Username",
                study.username.clone(),
                "Has Isochrone",
                if study.has_isochrone { "Yes" } else { "No" }.to_string(),
            ),
            pair("Miles", format_number(study.miles), "Total Population", n(study.total_pop)),
            pair("Disabled", n(study.disabled), "Ethnic Minority", n(study.ethnic_minority)),
            pair("Female", n(study.female), "Foreign Born", n(study.foreign_born)),
            pair("LEP", n(study.lep), "Low Income", n(study.low_income)),
            pair("Older Adult", n(study.older_adult), "Racial Minority", n(study.racial_minority)),
            pair("Youth", n(study.youth), "Total Jobs", n(study.total_jobs)),
            DetailRow::Wide {
                label: "Hispanic/Latino".to_string(),
                value: n(study.hisp_lat),
            },
        ];

        rows.extend(study.bike_ped_crashes.iter().enumerate().map(|(i, crash)| DetailRow::Wide {
            label: format!("Bike/Pedestrian Crash {}", i + 1),
            value: crash.to_string(),
        }));
        rows.extend(study.essential_services.iter().enumerate().map(|(i, service)| DetailRow::Wide {
            label: format!("Essential Service {}", i + 1),
            value: service.to_string(),
        }));
        rows.extend(study.rail_stations.iter().enumerate().map(|(i, station)| DetailRow::Wide {
            label: format!("Rail Station {}", i + 1),
            value: station.to_string(),
        }));

        Self {
            title: format!("Study Name: {}", study.seg_name),
            legend: schema.short_name(),
            rows,
            interpretation_url: INTERPRETATION_URL,
            attribution_url: ATTRIBUTION_URL,
            data_sources: DATA_SOURCES,
            disclaimer: DISCLAIMER,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = vec![self.title.clone(), String::new()];
        for row in &self.rows {
            match row {
                DetailRow::Pair { left, right } => {
                    out.push(format!("{}: {}", left.0, left.1));
                    out.push(format!("{}: {}", right.0, right.1));
                }
                DetailRow::Wide { label, value } => out.push(format!("{}: {}", label, value)),
            }
        }
        out.push(String::new());
        out.push(format!("How to interpret these results: {}", self.interpretation_url));
        out.join("\n")
    }
}

/// Sources, layers and camera for a study's map.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapView {
    pub init: MapInit,
    pub sources: Vec<SourceSpec>,
    pub layers: Vec<LayerSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit_bounds: Option<[f64; 4]>,
    pub fit_padding: u32,
}

impl MapView {
    /// Base network for the schema with the study geometry drawn beneath it.
    pub fn for_study(map: &MapConfig, theme: Theme, schema: Schema, geoms: &Value) -> Result<Self, ApiError> {
        let parsed: geojson::GeoJson = serde_json::from_value(geoms.clone())?;
        Ok(Self {
            init: MapInit::new(map, theme),
            sources: vec![layers::network_source(schema), layers::study_source(geoms)],
            layers: vec![layers::network_layer(schema), layers::study_layer(schema)],
            fit_bounds: layers::geojson_bounds(&parsed),
            fit_padding: FIT_PADDING,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::{fake_backend, spawn_backend};
    use crate::types::{CrashEntry, FeatureCount};
    use serde_json::json;

    fn study() -> Study {
        Study {
            username: "alice".into(),
            seg_name: "Market St".into(),
            shared: true,
            miles: 1.5,
            total_pop: 4200,
            hisp_lat: 1234,
            bike_ped_crashes: vec![
                CrashEntry::Totals { bike: 1, pedestrian: 2 },
                CrashEntry::Message("414 Request-URI Too Large".into()),
            ],
            essential_services: vec![FeatureCount::Typed { kind: "grocery".into(), count: 3 }],
            rail_stations: vec![FeatureCount::Typed { kind: "PATCO".into(), count: 1 }],
            ..Default::default()
        }
    }

    #[test]
    fn detail_lists_pairs_then_collections() {
        let detail = StudyDetail::new(&study(), Schema::Lts);
        assert_eq!(detail.title, "Study Name: Market St");
        assert_eq!(detail.legend, "bike");
        assert_eq!(detail.rows.len(), 7 + 1 + 2 + 1 + 1);

        assert_eq!(
            detail.rows[1],
            pair("Miles", "1.5".into(), "Total Population", "4,200".into())
        );
        assert_eq!(
            detail.rows[7],
            DetailRow::Wide { label: "Hispanic/Latino".into(), value: "1,234".into() }
        );
        assert_eq!(
            detail.rows[8],
            DetailRow::Wide {
                label: "Bike/Pedestrian Crash 1".into(),
                value: "Bike: 1, Pedestrian: 2".into()
            }
        );
        assert_eq!(
            detail.rows[9],
            DetailRow::Wide {
                label: "Bike/Pedestrian Crash 2".into(),
                value: "414 Request-URI Too Large".into()
            }
        );
        assert_eq!(
            detail.rows[10],
            DetailRow::Wide { label: "Essential Service 1".into(), value: "grocery: 3".into() }
        );
        assert_eq!(
            detail.rows[11],
            DetailRow::Wide { label: "Rail Station 1".into(), value: "PATCO: 1".into() }
        );

        let text = detail.render_text();
        assert!(text.contains("Username: alice"));
        assert!(text.contains("Hispanic/Latino: 1,234"));
        assert!(text.contains("Rail Station 1: PATCO: 1"));
    }

    #[test]
    fn map_view_layers_and_bounds() {
        let geoms = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {},
                "geometry": {"type": "Polygon", "coordinates": [[
                    [-75.2, 39.9], [-75.0, 39.9], [-75.0, 40.1], [-75.2, 39.9]
                ]]}
            }]
        });
        let view = MapView::for_study(&MapConfig::default(), Theme::Dark, Schema::Sidewalk, &geoms).unwrap();
        assert_eq!(view.sources[0].id, "sw_tile");
        assert_eq!(view.sources[1].id, "user_geoms");
        assert_eq!(view.layers[1].before_id.as_deref(), Some("sw"));
        assert_eq!(view.fit_bounds, Some([-75.2, 39.9, -75.0, 40.1]));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["fitPadding"], 100);
        assert_eq!(json["init"]["style"], "mapbox://styles/mapbox/dark-v11");

        assert!(MapView::for_study(&MapConfig::default(), Theme::Dark, Schema::Lts, &json!(42)).is_err());
    }

    #[tokio::test]
    async fn shared_study_resolution() {
        let api = ApiClient::new(&spawn_backend(fake_backend()).await);

        let shared = resolve_shared_study(&api, &StudyKey::new("alice", Schema::Lts, "Market St"))
            .await
            .unwrap();
        assert_eq!(shared.seg_name, "Market St");

        let private = resolve_shared_study(&api, &StudyKey::new("alice", Schema::Lts, "Private Rd"))
            .await
            .unwrap_err();
        assert!(matches!(private, StudyError::NotShared));
        assert_eq!(private.to_string(), "Study not shared");

        let missing = resolve_shared_study(&api, &StudyKey::new("bob", Schema::Lts, "Any"))
            .await
            .unwrap_err();
        assert_eq!(missing.to_string(), "Study not found");

        let offline = ApiClient::new("http://127.0.0.1:9");
        let err = resolve_shared_study(&offline, &StudyKey::new("alice", Schema::Lts, "Market St"))
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::NotFound));
    }
}
