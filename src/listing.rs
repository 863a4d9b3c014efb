//! # Listing Model
//! The raw store row and the normalised per-request view built from it.
//!
//! `ListingRow` mirrors what the SELECT returns (numeric coercions included);
//! `VehiclePayload` is the canonical wire shape used for targets, candidates,
//! and the `/listings/{id}` endpoint. Rows are read-only to this service.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::normalize::{
    age_months, clean, extract_year, normalize_category, normalize_colour, parse_mileage,
    parse_price, parse_registration, BODY_TYPE_MAP, FUEL_MAP, TRANSMISSION_MAP,
};

/// One row of the listings table, as selected by the store adapter. The
/// `*_num` fields carry the SQL-side coercions of the free-form price /
/// mileage / power columns.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ListingRow {
    pub vehicle_id: String,
    pub listing_url: Option<String>,
    pub price: Option<String>,
    pub mileage_raw: Option<String>,
    pub first_registration_raw: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub color: Option<String>,
    pub interior_color: Option<String>,
    pub upholstery_color: Option<String>,
    pub description: Option<String>,
    pub data_source: Option<String>,
    pub images: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub price_num: Option<f64>,
    pub mileage_num: Option<f64>,
    pub power_num: Option<f64>,
}

impl ListingRow {
    /// Best-effort numeric price: SQL coercion first, free-form parse second.
    pub fn price_value(&self) -> Option<f64> {
        self.price_num.or_else(|| parse_price(self.price.as_deref()))
    }

    pub fn mileage_value(&self) -> Option<f64> {
        self.mileage_num
            .or_else(|| parse_mileage(self.mileage_raw.as_deref()))
    }

    pub fn power_value(&self) -> Option<f64> {
        self.power_num
    }
}

/// Canonical listing payload: raw identity fields plus the derived view
/// (canonical groups, numeric price/mileage, age and freshness).
#[derive(Debug, Clone, Serialize)]
pub struct VehiclePayload {
    pub id: String,
    pub url: Option<String>,
    pub price_eur: Option<f64>,
    pub price_raw: Option<String>,
    pub mileage_km: Option<f64>,
    pub mileage_raw: Option<String>,
    pub year: Option<i32>,
    pub age_months: Option<i64>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub fuel_group: Option<String>,
    pub transmission_group: Option<String>,
    pub body_group: Option<String>,
    pub color: Option<String>,
    pub color_canonical: Option<String>,
    pub interior_color: Option<String>,
    pub interior_color_effective: Option<String>,
    pub upholstery_color: Option<String>,
    pub description: String,
    pub data_source: Option<String>,
    pub power_kw: Option<f64>,
    pub images: Vec<String>,
    pub first_registration_raw: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub freshness_days: Option<f64>,
}

impl VehiclePayload {
    /// Normalise one row. `now` is injected so derived ages are testable.
    pub fn from_row(row: &ListingRow, now: DateTime<Utc>) -> Self {
        let age = row
            .first_registration_raw
            .as_deref()
            .and_then(parse_registration)
            .map(|reg| age_months(reg, now.naive_utc()));

        // Interior colour falls back to the upholstery column.
        let interior_raw = clean(row.interior_color.as_deref())
            .or_else(|| clean(row.upholstery_color.as_deref()))
            .map(str::to_string);

        let freshness_days = row
            .updated_at
            .or(row.created_at)
            .map(|ts| ((now - ts).num_seconds() as f64 / 86_400.0).max(0.0));

        Self {
            id: row.vehicle_id.clone(),
            url: row.listing_url.clone(),
            price_eur: row.price_value(),
            price_raw: row.price.clone(),
            mileage_km: row.mileage_value(),
            mileage_raw: row.mileage_raw.clone(),
            year: extract_year(row.first_registration_raw.as_deref()),
            age_months: age,
            make: row.make.clone(),
            model: row.model.clone(),
            fuel_group: normalize_category(row.fuel_type.as_deref(), &FUEL_MAP),
            transmission_group: normalize_category(row.transmission.as_deref(), &TRANSMISSION_MAP),
            body_group: normalize_category(row.body_type.as_deref(), &BODY_TYPE_MAP),
            color: row.color.clone(),
            color_canonical: normalize_colour(row.color.as_deref()),
            interior_color: interior_raw.clone(),
            interior_color_effective: normalize_colour(interior_raw.as_deref()),
            upholstery_color: row.upholstery_color.clone(),
            description: row.description.clone().unwrap_or_default(),
            data_source: row.data_source.clone(),
            power_kw: row.power_value(),
            images: parse_images(row.images.as_deref()),
            first_registration_raw: row.first_registration_raw.clone(),
            created_at: row.created_at,
            freshness_days,
        }
    }
}

/// Decode the images column: either a JSON-encoded array or nothing usable.
/// Non-string members are stringified; empty entries are dropped.
pub fn parse_images(raw: Option<&str>) -> Vec<String> {
    let Some(text) = clean(raw) else {
        return Vec::new();
    };
    match serde_json::from_str::<Vec<serde_json::Value>>(text) {
        Ok(values) => values
            .into_iter()
            .filter_map(|value| match value {
                serde_json::Value::Null => None,
                serde_json::Value::String(s) if s.is_empty() => None,
                serde_json::Value::String(s) => Some(s),
                other => Some(other.to_string()),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> ListingRow {
        ListingRow {
            vehicle_id: "veh-1".into(),
            listing_url: Some("https://example.test/veh-1".into()),
            price: Some("24.990 €".into()),
            mileage_raw: Some("45000".into()),
            first_registration_raw: Some("2021-06-01".into()),
            make: Some("BMW".into()),
            model: Some("3er".into()),
            fuel_type: Some("Benzin".into()),
            transmission: Some("Automatik".into()),
            body_type: Some("Limousine".into()),
            color: Some("Schwarz Metallic".into()),
            interior_color: None,
            upholstery_color: Some("Beige".into()),
            description: Some("Sitzheizung, Panoramadach".into()),
            data_source: Some("autoscout24".into()),
            images: Some(r#"["a.jpg", "", null, 7]"#.into()),
            created_at: Some(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()),
            updated_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            price_num: Some(24990.0),
            mileage_num: Some(45000.0),
            power_num: Some(120.0),
        }
    }

    #[test]
    fn payload_normalises_groups_and_ages() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let payload = VehiclePayload::from_row(&row(), now);

        assert_eq!(payload.price_eur, Some(24990.0));
        assert_eq!(payload.year, Some(2021));
        assert_eq!(payload.age_months, Some(48));
        assert_eq!(payload.fuel_group.as_deref(), Some("petrol"));
        assert_eq!(payload.transmission_group.as_deref(), Some("automatic"));
        assert_eq!(payload.body_group.as_deref(), Some("sedan"));
        assert_eq!(payload.color_canonical.as_deref(), Some("black"));
        // Interior falls back to the upholstery column.
        assert_eq!(payload.interior_color.as_deref(), Some("Beige"));
        assert_eq!(payload.interior_color_effective.as_deref(), Some("beige"));
        assert_eq!(payload.images, vec!["a.jpg".to_string(), "7".to_string()]);
        assert_eq!(payload.freshness_days, Some(14.5));
    }

    #[test]
    fn sql_coercion_takes_precedence_over_raw_parse() {
        let mut r = row();
        r.price_num = Some(19999.0);
        r.price = Some("garbage".into());
        assert_eq!(r.price_value(), Some(19999.0));

        r.price_num = None;
        r.price = Some("21 500 EUR".into());
        assert_eq!(r.price_value(), Some(21500.0));
    }

    #[test]
    fn images_decode_is_lenient() {
        assert!(parse_images(None).is_empty());
        assert!(parse_images(Some("not json")).is_empty());
        assert_eq!(parse_images(Some(r#"["x"]"#)), vec!["x".to_string()]);
    }
}
