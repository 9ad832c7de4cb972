use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use geo_types::{MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject};
use reqwest::blocking::get;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{PrepError, Result};
use crate::model::{AdminLevel, CountryShape, EnrichedStation, RepresentativePoint, StationRecord};

const NATURAL_EARTH_URL: &str =
    "https://raw.githubusercontent.com/nvkelso/natural-earth-vector/master/geojson";

/// Columns a station CSV must have.
pub const REQUIRED_STATION_COLUMNS: [&str; 3] = ["country", "geo_lat", "geo_lon"];

/// Natural Earth admin-0 file name for a scale such as `"110m"` or `"10m"`.
pub fn boundaries_filename(scale: &str) -> String {
    format!("ne_{scale}_admin_0_countries.geojson")
}

/// Download the Natural Earth country boundaries into `dir` unless already there.
pub fn lazy_download_boundaries(dir: &Path, scale: &str) -> Result<PathBuf> {
    let filename = boundaries_filename(scale);
    let output_path = dir.join(&filename);
    if output_path.exists() {
        debug!("{} already present", output_path.display());
        return Ok(output_path);
    }

    let url = format!("{NATURAL_EARTH_URL}/{filename}");
    info!("Downloading {}", url);
    let download_err = |source| PrepError::Download {
        url: url.clone(),
        source,
    };
    let data = get(&url)
        .and_then(|response| response.error_for_status())
        .and_then(|response| response.bytes())
        .map_err(download_err)?;

    write_atomic(&output_path, &data)?;
    info!("Saved {} ({} bytes)", output_path.display(), data.len());
    Ok(output_path)
}

/// Write `bytes` to a temporary file beside `path`, not yet renamed.
pub(crate) fn stage(path: &Path, bytes: &[u8]) -> Result<NamedTempFile> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| PrepError::io(dir, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PrepError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| PrepError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PrepError::io(tmp.path(), e))?;
    Ok(tmp)
}

/// Replace `path` with `bytes` so readers never see a partial file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    stage(path, bytes)?
        .persist(path)
        .map_err(|e| PrepError::io(path, e.error))?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, &serde_json::to_vec_pretty(value)?)
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
    Ok(serde_json::from_str(&text)?)
}

fn property_str(feature: &Feature, key: &str) -> Option<String> {
    match feature.property(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn property_i64(feature: &Feature, key: &str) -> Option<i64> {
    let value = feature.property(key)?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// Natural Earth marks missing ISO codes with "-99"; the `_EH` column carries
/// the usable code for those.
fn iso2_code(feature: &Feature) -> String {
    match property_str(feature, "ISO_A2") {
        Some(code) if code != "-99" => code,
        _ => property_str(feature, "ISO_A2_EH")
            .filter(|code| code != "-99")
            .unwrap_or_default(),
    }
}

fn admin_level(feature: &Feature) -> AdminLevel {
    if let Some(level) = property_i64(feature, "ADMIN_LEVEL") {
        if let Ok(level) = AdminLevel::try_from(level.clamp(0, u8::MAX as i64) as u8) {
            return level;
        }
    }
    property_str(feature, "TYPE")
        .map(|kind| AdminLevel::from_natural_earth_type(&kind))
        .unwrap_or(AdminLevel::Sovereign)
}

fn alternate_names(feature: &Feature) -> Vec<String> {
    feature
        .properties
        .iter()
        .flat_map(|properties| properties.iter())
        .filter(|(key, _)| key.to_ascii_uppercase().starts_with("NAME") && key.as_str() != "NAME")
        .filter_map(|(_, value)| value.as_str())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn feature_polygons(feature: &Feature) -> Vec<Polygon<f64>> {
    let mut polygons: Vec<Polygon<f64>> = vec![];
    if let Some(geometry) = feature.geometry.as_ref() {
        if let Ok(polygon) = Polygon::try_from(geometry) {
            polygons = vec![polygon];
        }
        if let Ok(multi_polygon) = MultiPolygon::try_from(geometry) {
            polygons.extend(multi_polygon)
        }
    }
    polygons
}

/// Load country shapes from a Natural Earth style admin-0 GeoJSON file.
///
/// Features sharing an `ADMIN` name are merged into one shape; the first
/// feature supplies the metadata.
pub fn load_country_shapes(path: &Path) -> Result<Vec<CountryShape>> {
    let geojson_str = fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
    let geojson_err = |e| PrepError::GeoJson {
        path: path.to_path_buf(),
        source: Box::new(e),
    };
    let geojson = geojson_str.parse::<GeoJson>().map_err(geojson_err)?;
    let collection = FeatureCollection::try_from(geojson).map_err(geojson_err)?;

    let mut shapes: Vec<CountryShape> = Vec::new();
    let mut by_admin: HashMap<String, usize> = HashMap::new();
    let mut fixed_iso = 0;
    for feature in &collection.features {
        let Some(admin) = property_str(feature, "ADMIN").or_else(|| property_str(feature, "NAME")) else {
            warn!("Skipping feature without ADMIN or NAME");
            continue;
        };
        if admin == "-99" {
            continue;
        }
        let polygons = feature_polygons(feature);
        if let Some(&i) = by_admin.get(&admin) {
            shapes[i].geometry.0.extend(polygons);
            continue;
        }
        if property_str(feature, "ISO_A2").as_deref() == Some("-99") {
            fixed_iso += 1;
        }
        by_admin.insert(admin.clone(), shapes.len());
        shapes.push(CountryShape {
            name: property_str(feature, "NAME").unwrap_or_else(|| admin.clone()),
            iso2: iso2_code(feature),
            iso3: property_str(feature, "ISO_A3").unwrap_or_default(),
            continent: property_str(feature, "CONTINENT").unwrap_or_default(),
            population: property_i64(feature, "POP_EST").unwrap_or(0),
            admin_level: admin_level(feature),
            alternate_names: alternate_names(feature),
            geometry: MultiPolygon::new(polygons),
            admin,
        });
    }
    info!(
        "Loaded {} country shapes from {} ({} ISO codes fixed)",
        shapes.len(),
        path.display(),
        fixed_iso
    );
    Ok(shapes)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

fn csv_cell(column: &str, raw: &str) -> std::result::Result<Value, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Value::Null);
    }
    let invalid = || format!("column '{column}' has invalid value '{raw}'");
    match column {
        "geo_lat" | "geo_lon" => raw
            .parse::<f64>()
            .map(|f| json!(f))
            .map_err(|_| invalid()),
        "place_size" => raw
            .parse::<f64>()
            .map(|f| json!(f.round() as i64))
            .map_err(|_| invalid()),
        "boost" | "channel_secure" => parse_bool(raw).map(Value::Bool).ok_or_else(invalid),
        _ => Ok(Value::String(raw.to_string())),
    }
}

fn station_from_object(path: &Path, row: usize, mut object: Map<String, Value>) -> Result<StationRecord> {
    // Nulls in the flag columns mean "not set".
    for flag in ["boost", "channel_secure"] {
        if object.get(flag).map(Value::is_null).unwrap_or(false) {
            object.insert(flag.to_string(), Value::Bool(false));
        }
    }
    serde_json::from_value(Value::Object(object)).map_err(|e| PrepError::InvalidRecord {
        path: path.to_path_buf(),
        row,
        reason: e.to_string(),
    })
}

/// Load crawler output from CSV.
pub fn load_stations_csv(path: &Path) -> Result<Vec<StationRecord>> {
    let csv_err = |source| PrepError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    for column in REQUIRED_STATION_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(PrepError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    let mut stations = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let mut object = Map::new();
        for (column, raw) in headers.iter().zip(record.iter()) {
            let value = csv_cell(column, raw).map_err(|reason| PrepError::InvalidRecord {
                path: path.to_path_buf(),
                row,
                reason,
            })?;
            object.insert(column.to_string(), value);
        }
        stations.push(station_from_object(path, row, object)?);
    }
    info!("Loaded {} stations from {}", stations.len(), path.display());
    Ok(stations)
}

/// Load crawler output from a JSON array of objects.
pub fn load_stations_json(path: &Path) -> Result<Vec<StationRecord>> {
    let rows: Vec<Map<String, Value>> = read_json(path)?;
    let mut stations = Vec::with_capacity(rows.len());
    for (row, object) in rows.into_iter().enumerate() {
        for column in REQUIRED_STATION_COLUMNS {
            if !object.contains_key(column) {
                return Err(PrepError::MissingColumn {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                });
            }
        }
        stations.push(station_from_object(path, row, object)?);
    }
    info!("Loaded {} stations from {}", stations.len(), path.display());
    Ok(stations)
}

/// Load stations, choosing the reader from the file extension.
pub fn load_stations(path: &Path) -> Result<Vec<StationRecord>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => load_stations_json(path),
        _ => load_stations_csv(path),
    }
}

pub fn write_enriched(path: &Path, stations: &[EnrichedStation]) -> Result<()> {
    write_json(path, stations)?;
    info!("Saved {} stations to {}", stations.len(), path.display());
    Ok(())
}

pub fn read_enriched(path: &Path) -> Result<Vec<EnrichedStation>> {
    read_json(path)
}

/// GeoJSON point collection of representative points.
pub fn centroids_geojson(points: &[(&CountryShape, RepresentativePoint)]) -> GeoJson {
    let features = points
        .iter()
        .map(|(shape, point)| {
            let mut properties = JsonObject::new();
            properties.insert("name".to_string(), json!(shape.name));
            properties.insert("admin".to_string(), json!(shape.admin));
            properties.insert("iso_a2".to_string(), json!(shape.iso2));
            properties.insert("iso_a3".to_string(), json!(shape.iso3));
            properties.insert("continent".to_string(), json!(shape.continent));
            properties.insert("method".to_string(), json!(point.method));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(geojson::Value::Point(vec![point.lon, point.lat]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

pub fn write_centroids(path: &Path, points: &[(&CountryShape, RepresentativePoint)]) -> Result<()> {
    write_atomic(path, centroids_geojson(points).to_string().as_bytes())?;
    info!("Saved {} centroids to {}", points.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const COUNTRIES: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {
          "type": "Feature",
          "properties": {"ADMIN": "Norway", "NAME": "Norway", "NAME_LONG": "Kingdom of Norway",
                         "ISO_A2": "-99", "ISO_A2_EH": "NO", "ISO_A3": "NOR",
                         "CONTINENT": "Europe", "POP_EST": 5347896.0, "TYPE": "Sovereign country"},
          "geometry": {"type": "MultiPolygon", "coordinates": [
            [[[5.0, 58.0], [10.0, 58.0], [10.0, 63.0], [5.0, 63.0], [5.0, 58.0]]],
            [[[15.0, 78.0], [16.0, 78.0], [16.0, 79.0], [15.0, 79.0], [15.0, 78.0]]]
          ]}
        },
        {
          "type": "Feature",
          "properties": {"ADMIN": "Greenland", "NAME": "Greenland", "ISO_A2": "GL", "ISO_A3": "GRL",
                         "CONTINENT": "North America", "POP_EST": 56225, "TYPE": "Dependency"},
          "geometry": {"type": "Polygon", "coordinates": [
            [[-50.0, 60.0], [-30.0, 60.0], [-30.0, 80.0], [-50.0, 80.0], [-50.0, 60.0]]
          ]}
        }
      ]
    }"#;

    #[test]
    fn loads_shapes_with_fixed_codes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("countries.geojson");
        fs::write(&path, COUNTRIES).unwrap();

        let shapes = load_country_shapes(&path).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].iso2, "NO");
        assert_eq!(shapes[0].population, 5_347_896);
        assert_eq!(shapes[0].geometry.0.len(), 2);
        assert_eq!(shapes[0].alternate_names, vec!["Kingdom of Norway".to_string()]);
        assert_eq!(shapes[1].admin_level, AdminLevel::Dependency);
        assert_eq!(shapes[1].geometry.0.len(), 1);
    }

    #[test]
    fn loads_station_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.csv");
        fs::write(
            &path,
            "place_id,channel_id,channel_name,country,geo_lat,geo_lon,channel_resolved_url,channel_secure,place_size,boost\n\
             p1,c1,Radio One,Norway,59.9,10.7,https://one.example/stream,True,8,False\n\
             p2,c2,Radio Two,Norway,60.3,5.3,,False,3,True\n",
        )
        .unwrap();

        let stations = load_stations(&path).unwrap();
        assert_eq!(stations.len(), 2);
        assert_eq!(stations[0].lat, 59.9);
        assert!(stations[0].secure);
        assert_eq!(stations[0].place_size, Some(8));
        assert_eq!(stations[0].channel_id(), Some("c1"));
        assert_eq!(stations[0].extra["channel_name"], "Radio One");
        assert_eq!(stations[1].stream_url, None);
        assert!(stations[1].boost);
    }

    #[test]
    fn missing_station_column_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.csv");
        fs::write(&path, "country,geo_lat\nNorway,59.9\n").unwrap();
        assert!(matches!(
            load_stations(&path),
            Err(PrepError::MissingColumn { column, .. }) if column == "geo_lon"
        ));
    }

    #[test]
    fn bad_coordinate_reports_row() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.csv");
        fs::write(&path, "country,geo_lat,geo_lon\nNorway,59.9,10.7\nNorway,north,10.7\n").unwrap();
        assert!(matches!(
            load_stations(&path),
            Err(PrepError::InvalidRecord { row: 1, .. })
        ));
    }

    #[test]
    fn blank_label_and_coordinates_still_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("output.csv");
        fs::write(
            &path,
            "country,geo_lat,geo_lon\nNorway,59.9,10.7\n,60.0,10.0\nNorway,,\n",
        )
        .unwrap();

        let stations = load_stations(&path).unwrap();
        assert_eq!(stations.len(), 3);
        assert!(stations[0].has_coordinates());
        assert_eq!(stations[1].country, "");
        assert!(stations[1].has_coordinates());
        assert_eq!(stations[2].country, "Norway");
        assert!(stations[2].lat.is_nan() && stations[2].lon.is_nan());
    }

    #[test]
    fn enriched_stations_round_trip() {
        let dir = TempDir::new().unwrap();
        let countries = dir.path().join("countries.geojson");
        fs::write(&countries, COUNTRIES).unwrap();
        let shapes = load_country_shapes(&countries).unwrap();

        let csv_path = dir.path().join("output.csv");
        fs::write(
            &csv_path,
            "place_id,channel_id,channel_name,country,geo_lat,geo_lon,channel_resolved_url,channel_secure,place_size,boost\n\
             p1,007,Radio One,Norway,59.9,10.7,https://one.example/stream,True,8,False\n\
             p2,c2,Radio Two,Greenland,64.2,-51.7,,False,,True\n",
        )
        .unwrap();
        let stations = load_stations(&csv_path).unwrap();
        let enriched: Vec<EnrichedStation> = stations
            .into_iter()
            .zip(&shapes)
            .map(|(station, shape)| EnrichedStation {
                country: shape.metadata(),
                station,
            })
            .collect();

        let path = dir.path().join("stations_enriched.json");
        write_enriched(&path, &enriched).unwrap();
        let read_back = read_enriched(&path).unwrap();
        assert_eq!(read_back, enriched);
        assert_eq!(read_back[0].station.channel_id(), Some("007"));
        assert_eq!(read_back[1].country.admin_level, AdminLevel::Dependency);
        assert!(!read_back[0].station.extra.contains_key("ADMIN"));
    }

    #[test]
    fn centroids_are_point_features() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("countries.geojson");
        fs::write(&path, COUNTRIES).unwrap();
        let shapes = load_country_shapes(&path).unwrap();
        let (points, _) = crate::geometry::reduce_all(&shapes);

        let out = dir.path().join("out").join("centroids.geojson");
        write_centroids(&out, &points).unwrap();
        let written: Value = read_json(&out).unwrap();
        assert_eq!(written["features"].as_array().unwrap().len(), 2);
        assert_eq!(written["features"][0]["geometry"]["type"], "Point");
        assert_eq!(written["features"][0]["properties"]["iso_a2"], "NO");
    }
}
