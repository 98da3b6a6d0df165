//! Study shelf table: a fixed column schema and the formatting rule for each
//! column, consumed by whatever renders the table (browser widget or CLI).

use crate::types::{FeatureCount, Schema, Study};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFormat {
    Text,
    YesNo,
    /// en-US digit grouping, at most three fraction digits.
    Number,
    /// Share state plus the public link when shared.
    SharedLink,
    CrashBike,
    CrashPedestrian,
    CountList,
    JsonOrNa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub key: &'static str,
    pub header: &'static str,
    pub format: CellFormat,
}

const fn col(key: &'static str, header: &'static str, format: CellFormat) -> Column {
    Column { key, header, format }
}

pub const COLUMNS: &[Column] = &[
    col("shared", "Shared", CellFormat::SharedLink),
    col("username", "Username", CellFormat::Text),
    col("seg_name", "Segment Name", CellFormat::Text),
    col("has_isochrone", "Has Isochrone", CellFormat::YesNo),
    col("miles", "Miles", CellFormat::Number),
    col("total_pop", "Total Population", CellFormat::Number),
    col("disabled", "Disabled Individuals", CellFormat::Number),
    col("ethnic_minority", "Ethnic Minorities", CellFormat::Number),
    col("female", "Female", CellFormat::Number),
    col("foreign_born", "Foreign Born", CellFormat::Number),
    col("lep", "Limited English Proficiency (LEP)", CellFormat::Number),
    col("low_income", "Low Income", CellFormat::Number),
    col("older_adult", "Older Adults", CellFormat::Number),
    col("racial_minority", "Racial Minorities", CellFormat::Number),
    col("youth", "Youth", CellFormat::Number),
    col("circuit_trails", "Circuit", CellFormat::JsonOrNa),
    col("total_jobs", "Total Jobs", CellFormat::Number),
    col("bike_crashes", "Bike Crashes", CellFormat::CrashBike),
    col("ped_crashes", "Pedestrian Crashes", CellFormat::CrashPedestrian),
    col("essential_services", "Essential Services", CellFormat::CountList),
    col("rail_stations", "Rail Stations", CellFormat::CountList),
];

pub const NOT_AVAILABLE: &str = "N/A";

/// Public URL of a shared study.
pub fn public_link(prefix: &str, study: &Study, schema: Schema) -> String {
    format!(
        "{}/user/{}/{}/study/{}",
        prefix.trim_end_matches('/'),
        study.username,
        schema.as_str(),
        study.seg_name
    )
}

/// Formats like `Number.prototype.toLocaleString('en-US')`.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    // Ties round away from zero, as ICU's halfExpand does.
    let rounded = format!("{:.3}", (value.abs() * 1000.0).round() / 1000.0);
    let (int_part, frac_part) = rounded.split_once('.').unwrap_or((&rounded, ""));
    let frac_part = frac_part.trim_end_matches('0');

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 && (int_part != "0" || !frac_part.is_empty()) {
        "-"
    } else {
        ""
    };
    if frac_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac_part)
    }
}

fn format_counts(items: &[FeatureCount]) -> String {
    if items.is_empty() {
        return NOT_AVAILABLE.to_string();
    }
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn format_json(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => NOT_AVAILABLE.to_string(),
        Some(Value::String(s)) if s.is_empty() => NOT_AVAILABLE.to_string(),
        Some(Value::Array(a)) if a.is_empty() => NOT_AVAILABLE.to_string(),
        Some(Value::Object(o)) if o.is_empty() => NOT_AVAILABLE.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
}

impl StudyTable {
    pub fn build(studies: &[Study], schema: Schema, link_prefix: &str) -> Self {
        let rows = studies
            .iter()
            .map(|study| {
                // Serialized once per row so numeric/text columns are looked up by key.
                let record = serde_json::to_value(study).unwrap_or(Value::Null);
                let crashes = study.crash_summary();
                COLUMNS
                    .iter()
                    .map(|column| match column.format {
                        CellFormat::Text => match record.get(column.key) {
                            Some(Value::String(s)) => s.clone(),
                            other => format_json(other),
                        },
                        CellFormat::YesNo => match record.get(column.key) {
                            Some(Value::Bool(true)) => "Yes".to_string(),
                            _ => "No".to_string(),
                        },
                        CellFormat::Number => record
                            .get(column.key)
                            .and_then(Value::as_f64)
                            .map(format_number)
                            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                        CellFormat::SharedLink => {
                            if study.shared {
                                format!("Yes ({})", public_link(link_prefix, study, schema))
                            } else {
                                "No".to_string()
                            }
                        }
                        CellFormat::CrashBike => crashes.bike.clone(),
                        CellFormat::CrashPedestrian => crashes.pedestrian.clone(),
                        CellFormat::CountList => match column.key {
                            "essential_services" => format_counts(&study.essential_services),
                            "rail_stations" => format_counts(&study.rail_stations),
                            _ => NOT_AVAILABLE.to_string(),
                        },
                        CellFormat::JsonOrNa => format_json(record.get(column.key)),
                    })
                    .collect()
            })
            .collect();

        Self {
            columns: COLUMNS.to_vec(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Aligned plain-text rendering for terminals.
    pub fn render_text(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.header.chars().count()).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |cells: Vec<&str>| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                .collect::<Vec<_>>()
                .join(" | ")
                .trim_end()
                .to_string()
        };

        let mut out = Vec::with_capacity(self.rows.len() + 2);
        out.push(line(self.columns.iter().map(|c| c.header).collect()));
        out.push(
            widths
                .iter()
                .map(|w| "-".repeat(*w))
                .collect::<Vec<_>>()
                .join("-+-"),
        );
        for row in &self.rows {
            out.push(line(row.iter().map(String::as_str).collect()));
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CrashEntry;
    use serde_json::json;

    fn study() -> Study {
        Study {
            username: "alice".into(),
            seg_name: "Market St".into(),
            shared: true,
            has_isochrone: true,
            miles: 1234.56789,
            total_pop: 1234567,
            youth: 12,
            circuit_trails: Some(json!(["Schuylkill River Trail"])),
            bike_ped_crashes: vec![CrashEntry::Totals { bike: 3, pedestrian: 4 }],
            essential_services: vec![FeatureCount::Typed { kind: "school".into(), count: 2 }],
            ..Default::default()
        }
    }

    fn cell<'a>(table: &'a StudyTable, row: usize, key: &str) -> &'a str {
        let idx = table.columns.iter().position(|c| c.key == key).unwrap();
        &table.rows[row][idx]
    }

    #[test]
    fn numbers_use_en_us_grouping() {
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(999.0), "999");
        assert_eq!(format_number(1000.0), "1,000");
        assert_eq!(format_number(1234567.0), "1,234,567");
        assert_eq!(format_number(1234.56789), "1,234.568");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(-1500.25), "-1,500.25");
        assert_eq!(format_number(-0.0001), "0");
    }

    #[test]
    fn number_ties_round_away_from_zero() {
        assert_eq!(format_number(1.0625), "1.063");
        assert_eq!(format_number(0.0625), "0.063");
        assert_eq!(format_number(-1.0625), "-1.063");
        assert_eq!(format_number(2.0005), "2.001");
    }

    #[test]
    fn schema_has_fixed_columns() {
        assert_eq!(COLUMNS.len(), 21);
        assert_eq!(COLUMNS[0].header, "Shared");
        assert_eq!(COLUMNS.last().unwrap().header, "Rail Stations");
        let lep = COLUMNS.iter().find(|c| c.key == "lep").unwrap();
        assert_eq!(lep.header, "Limited English Proficiency (LEP)");
        assert_eq!(lep.format, CellFormat::Number);
    }

    #[test]
    fn rows_are_formatted_per_column() {
        let table = StudyTable::build(&[study()], Schema::Lts, "/webmaps/link");
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].len(), COLUMNS.len());

        assert_eq!(
            cell(&table, 0, "shared"),
            "Yes (/webmaps/link/user/alice/lts/study/Market St)"
        );
        assert_eq!(cell(&table, 0, "seg_name"), "Market St");
        assert_eq!(cell(&table, 0, "has_isochrone"), "Yes");
        assert_eq!(cell(&table, 0, "miles"), "1,234.568");
        assert_eq!(cell(&table, 0, "total_pop"), "1,234,567");
        assert_eq!(cell(&table, 0, "disabled"), "0");
        assert_eq!(cell(&table, 0, "circuit_trails"), r#"["Schuylkill River Trail"]"#);
        assert_eq!(cell(&table, 0, "bike_crashes"), "3");
        assert_eq!(cell(&table, 0, "ped_crashes"), "4");
        assert_eq!(cell(&table, 0, "essential_services"), "school: 2");
        assert_eq!(cell(&table, 0, "rail_stations"), NOT_AVAILABLE);
    }

    #[test]
    fn unshared_and_sparse_studies() {
        let sparse = Study {
            username: "bob".into(),
            seg_name: "Trail".into(),
            ..Default::default()
        };
        let table = StudyTable::build(&[sparse], Schema::Sidewalk, "/webmaps/link/");
        assert_eq!(cell(&table, 0, "shared"), "No");
        assert_eq!(cell(&table, 0, "has_isochrone"), "No");
        assert_eq!(cell(&table, 0, "circuit_trails"), NOT_AVAILABLE);
        assert_eq!(cell(&table, 0, "bike_crashes"), "0");
    }

    #[test]
    fn public_link_uses_backend_schema_name() {
        let s = study();
        assert_eq!(
            public_link("/webmaps/link/", &s, Schema::Sidewalk),
            "/webmaps/link/user/alice/sidewalk/study/Market St"
        );
    }

    #[test]
    fn text_rendering_aligns_columns() {
        let table = StudyTable::build(&[study()], Schema::Lts, "/webmaps/link");
        let text = table.render_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Shared"));
        assert!(lines[1].starts_with("---"));
        assert!(lines[2].contains("1,234,567"));

        let empty = StudyTable::build(&[], Schema::Lts, "/webmaps/link");
        assert!(empty.is_empty());
        assert_eq!(empty.render_text().lines().count(), 2);
    }
}
