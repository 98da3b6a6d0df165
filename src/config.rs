use crate::binning::default_palette;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const MAPBOX_TOKEN_ENV: &str = "MAPBOX_ACCESS_TOKEN";
pub const API_URL_ENV: &str = "STUDY_API_URL";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub regional: RegionalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
}

/// Everything a map view needs to initialise; handed to `MapInit::new`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MapConfig {
    pub access_token: String,
    pub center: [f64; 2],
    pub zoom: f64,
    pub dark_style: String,
    pub light_style: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            center: [-75.16, 40.05],
            zoom: 8.5,
            dark_style: "mapbox://styles/mapbox/dark-v11".to_string(),
            light_style: "mapbox://styles/mapbox/light-v11".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RegionalConfig {
    pub geojson: PathBuf,
    pub region_property: String,
    pub all_regions_label: String,
    pub regions: Vec<String>,
    pub attributes: Vec<String>,
    pub palette: Vec<String>, // Hex codes, low to high
    pub fallback_color: Option<String>,
    // Degrees; how close a click must land to a line feature
    pub line_tolerance: f64,
}

impl Default for RegionalConfig {
    fn default() -> Self {
        Self {
            geojson: PathBuf::from("static/for_mapbox.geojson"),
            region_property: "co_name".to_string(),
            all_regions_label: "DVRPC Region (All Counties)".to_string(),
            regions: [
                "Bucks", "Burlington", "Camden", "Chester", "Delaware", "Gloucester", "Mercer",
                "Montgomery", "Philadelphia",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            attributes: [
                "total_pop", "disabled", "ethnic_minority", "female", "foreign_born", "lep",
                "low_income", "older_adult", "racial_minority", "youth", "total_jobs",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            palette: default_palette(),
            fallback_color: None,
            line_tolerance: 0.0005,
        }
    }
}

impl RegionalConfig {
    /// Colour used when no feature passes the region filter.
    pub fn fallback_color(&self) -> &str {
        self.fallback_color
            .as_deref()
            .or_else(|| self.palette.first().map(String::as_str))
            .unwrap_or("#0000ff")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
    pub public_link_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            static_dir: PathBuf::from("static"),
            public_link_prefix: "/webmaps/link".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the TOML file, overlays the process environment and validates.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        Ok(config)
    }

    /// Applies `MAPBOX_ACCESS_TOKEN` and `STUDY_API_URL`. Takes a lookup so
    /// callers (and tests) decide where variables come from.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(MAPBOX_TOKEN_ENV).filter(|t| !t.is_empty()) {
            self.map.access_token = token;
        }
        if let Some(url) = lookup(API_URL_ENV).filter(|u| !u.is_empty()) {
            self.api.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid api.base_url: {}", self.api.base_url))?;

        if self.regional.palette.is_empty() {
            bail!("regional.palette must contain at least one colour");
        }
        for color in self.regional.palette.iter().chain(self.regional.fallback_color.iter()) {
            if !is_hex_color(color) {
                return Err(anyhow!("Invalid colour '{}', expected #rrggbb", color));
            }
        }
        let tolerance = self.regional.line_tolerance;
        if tolerance.is_nan() || tolerance < 0.0 {
            bail!("regional.line_tolerance must be a non-negative number");
        }
        if self.map.access_token.is_empty() {
            tracing::warn!("No Mapbox access token configured; set {}", MAPBOX_TOKEN_ENV);
        }
        Ok(())
    }
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7 && s.starts_with('#') && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}
