//! Normalization of driver location payloads.
//!
//! Backends have historically shipped positions in two families of
//! shapes: a geodesic form with a longitude-first `coordinates` array
//! (possibly nested under `geometry`), and flat objects keyed by
//! `lat`/`lng` or `latitude`/`longitude`. Everything funnels through
//! [`normalize_location`] so the rest of the SDK only ever sees a
//! [`DriverLocation`].

use serde_json::Value;

use crate::models::DriverLocation;

/// Numeric field, tolerating numbers serialized as strings.
fn as_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn in_range(latitude: f64, longitude: f64) -> Option<DriverLocation> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return None;
    }
    if latitude.abs() > 90.0 || longitude.abs() > 180.0 {
        return None;
    }
    Some(DriverLocation::new(latitude, longitude))
}

/// Normalizes a raw location payload to latitude/longitude.
///
/// Accepted shapes, in precedence order:
/// - `{"coordinates": [lng, lat]}` (note: longitude first)
/// - `{"geometry": {"coordinates": [lng, lat]}}`
/// - `{"lat": .., "lng": ..}` and the `latitude`/`longitude`/`lon`
///   spellings
///
/// Returns `None` for anything unparseable or outside valid ranges;
/// callers drop such updates rather than propagate garbage.
pub fn normalize_location(raw: &Value) -> Option<DriverLocation> {
    let coordinates = raw
        .get("coordinates")
        .or_else(|| raw.get("geometry").and_then(|g| g.get("coordinates")));
    if let Some(coords) = coordinates {
        let pair = coords.as_array()?;
        if pair.len() < 2 {
            return None;
        }
        let longitude = as_f64(&pair[0])?;
        let latitude = as_f64(&pair[1])?;
        return in_range(latitude, longitude);
    }

    let latitude = raw
        .get("lat")
        .or_else(|| raw.get("latitude"))
        .and_then(as_f64)?;
    let longitude = raw
        .get("lng")
        .or_else(|| raw.get("lon"))
        .or_else(|| raw.get("longitude"))
        .and_then(as_f64)?;
    in_range(latitude, longitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_geodesic_and_flat_agree() {
        // Same physical point in both encodings.
        let geodesic = normalize_location(&json!({"coordinates": [38.75, 9.03]})).unwrap();
        let flat = normalize_location(&json!({"lat": 9.03, "lng": 38.75})).unwrap();
        assert_eq!(geodesic, flat);
        assert_eq!(geodesic.latitude, 9.03);
        assert_eq!(geodesic.longitude, 38.75);
    }

    #[test]
    fn test_nested_geometry() {
        let loc =
            normalize_location(&json!({"geometry": {"coordinates": [38.7, 9.0]}})).unwrap();
        assert_eq!(loc.latitude, 9.0);
        assert_eq!(loc.longitude, 38.7);
    }

    #[test]
    fn test_alternate_flat_spellings() {
        let loc = normalize_location(&json!({"latitude": 9.01, "longitude": 38.74})).unwrap();
        assert_eq!(loc.latitude, 9.01);
        let loc = normalize_location(&json!({"lat": 9.01, "lon": 38.74})).unwrap();
        assert_eq!(loc.longitude, 38.74);
    }

    #[test]
    fn test_numbers_as_strings() {
        let loc = normalize_location(&json!({"lat": "9.03", "lng": "38.75"})).unwrap();
        assert_eq!(loc.latitude, 9.03);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(normalize_location(&json!({})).is_none());
        assert!(normalize_location(&json!({"lat": 9.03})).is_none());
        assert!(normalize_location(&json!({"coordinates": [38.75]})).is_none());
        assert!(normalize_location(&json!({"coordinates": "38.75,9.03"})).is_none());
        assert!(normalize_location(&json!({"lat": "north", "lng": 38.75})).is_none());
        assert!(normalize_location(&json!(null)).is_none());
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(normalize_location(&json!({"lat": 91.0, "lng": 38.75})).is_none());
        assert!(normalize_location(&json!({"lat": 9.03, "lng": 181.0})).is_none());
        assert!(normalize_location(&json!({"coordinates": [200.0, 9.03]})).is_none());
    }

    #[test]
    fn test_coordinates_key_takes_precedence() {
        // When both shapes appear, the geodesic array wins.
        let loc = normalize_location(&json!({
            "coordinates": [38.75, 9.03],
            "lat": 1.0,
            "lng": 1.0
        }))
        .unwrap();
        assert_eq!(loc.latitude, 9.03);
    }
}
