// API models and data fetching for Halifax Transit (HRM)
// Halifax Transit open data: https://www.halifax.ca/transportation/halifax-transit/transit-technology
//
// Halifax Transit Endpoints:
// - GTFS-RT Vehicle Positions: https://gtfs.halifax.ca/realtime/Vehicle/VehiclePositions.pb
// - GTFS Static Bundle: https://gtfs.halifax.ca/static/google_transit.zip
//   (routes.txt inside the bundle carries the route_id -> route_long_name table)

use reqwest::blocking;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use gtfs_rt::FeedMessage;
use prost::Message;
use chrono::{TimeZone, Utc};
use chrono_tz::America::Halifax;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::io::Cursor;
use zip::ZipArchive;
use std::time::{SystemTime, UNIX_EPOCH};
use std::path::PathBuf;
use std::fs;

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub id: String,
    #[serde(rename = "routeId")]
    pub route_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    pub speed: f64,
}

// ============================================================================
// Route Table Disk Cache (24-hour persistence, survives restarts)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTableCache {
    pub routes: HashMap<String, String>,
    pub cached_at: u64,
}

impl RouteTableCache {
    pub fn is_expired(&self, max_age_seconds: u64) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        now.saturating_sub(self.cached_at) >= max_age_seconds
    }

    pub fn cache_path() -> PathBuf {
        let mut path = dirs::cache_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("hrm_bus_tracker");
        fs::create_dir_all(&path).ok();
        path.push("routes_cache.json");
        path
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::cache_path();
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HrmError::FileError(format!("Failed to serialize route cache: {}", e)))?;

        fs::write(&path, json)
            .map_err(|e| HrmError::FileError(format!("Failed to write route cache: {}", e)))?;

        println!("✓ Route table cache saved to: {:?}", path);
        Ok(())
    }

    pub fn load(max_age_seconds: u64) -> Option<Self> {
        let path = Self::cache_path();

        if !path.exists() {
            println!("ℹ️  No route table cache found, will download fresh data");
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(contents) => {
                match serde_json::from_str::<RouteTableCache>(&contents) {
                    Ok(cache) => {
                        if cache.is_expired(max_age_seconds) {
                            println!("⚠️  Route table cache expired, refreshing...");
                            None
                        } else {
                            println!("✓ Route table cache loaded ({} bus routes)", cache.routes.len());
                            Some(cache)
                        }
                    }
                    Err(e) => {
                        println!("⚠️  Failed to parse route cache ({}), will refresh", e);
                        None
                    }
                }
            }
            Err(e) => {
                println!("⚠️  Failed to read route cache file ({}), will refresh", e);
                None
            }
        }
    }
}

// ============================================================================
// Cache Structure for concurrent serving
// ============================================================================

#[derive(Debug, Clone)]
pub struct CachedTransitData {
    pub buses: Vec<VehicleRecord>,
    pub routes: HashMap<String, String>,
    pub stale_count: u64,
    pub last_fingerprint: Option<u64>,
    pub last_dynamic_update: u64,
    pub last_static_update: u64,
}

impl CachedTransitData {
    pub fn new() -> Self {
        CachedTransitData {
            buses: Vec::new(),
            routes: HashMap::new(),
            stale_count: 0,
            last_fingerprint: None,
            last_dynamic_update: 0,
            last_static_update: 0,
        }
    }

    // Write policy for a successful vehicle fetch: an unchanged non-empty
    // snapshot freezes the cache at the last real change and bumps the
    // staleness counter; anything else replaces the snapshot wholesale and
    // resets the counter. Returns whether the fetch was a stale repeat.
    pub fn apply_snapshot(&mut self, buses: Vec<VehicleRecord>) -> bool {
        let (fingerprint, is_stale) = HRMModels::observe_snapshot(&buses, self.last_fingerprint);

        if is_stale {
            self.stale_count += 1;
        } else {
            self.buses = buses;
            self.stale_count = 0;
        }

        self.last_fingerprint = Some(fingerprint);
        self.last_dynamic_update = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        is_stale
    }

    // A failed fetch counts as a stale cycle: the last good snapshot stays
    // untouched so downstream consumers see a frozen feed, not an empty one.
    pub fn record_fetch_failure(&mut self) {
        self.stale_count += 1;
    }

    pub fn apply_routes(&mut self, routes: HashMap<String, String>) {
        self.routes = routes;
        self.last_static_update = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum HrmError {
    NetworkError(String),
    DecodeError(String),
    StaticFetchError(String),
    FileError(String),
}

impl std::fmt::Display for HrmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HrmError::NetworkError(e) => write!(f, "Network error: {}", e),
            HrmError::DecodeError(e) => write!(f, "Decode error: {}", e),
            HrmError::StaticFetchError(e) => write!(f, "Static fetch error: {}", e),
            HrmError::FileError(e) => write!(f, "File error: {}", e),
        }
    }
}

impl std::error::Error for HrmError {}

pub type Result<T> = std::result::Result<T, HrmError>;

// ============================================================================
// Main Implementation
// ============================================================================

pub struct HRMModels;

impl HRMModels {
    const GTFS_RT_VEHICLES_URL: &'static str =
        "https://gtfs.halifax.ca/realtime/Vehicle/VehiclePositions.pb";
    const GTFS_STATIC_URL: &'static str =
        "https://gtfs.halifax.ca/static/google_transit.zip";
    const ROUTES_FILE_NAME: &'static str = "routes.txt";
    // Upstream rejects non-browser agents, so the client identifies as one.
    const USER_AGENT: &'static str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
    // GTFS route_type: 3 = bus, 4 = ferry. Halifax Transit publishes both;
    // only bus routes are served.
    const BUS_ROUTE_TYPE: &'static str = "3";
    const REQUEST_TIMEOUT_SECS: u64 = 30;

    pub const STALE_COUNT_HEADER: &'static str = "X-Stale-Count";
    pub const REALTIME_REFRESH_SECS: u64 = 15;
    pub const STATIC_REFRESH_SECS: u64 = 86400;

    // ============================================================================
    // Vehicle Position Feed (GTFS-RT)
    // ============================================================================

    fn create_http_client() -> Result<blocking::Client> {
        blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .user_agent(Self::USER_AGENT)
            .build()
            .map_err(|e| HrmError::NetworkError(format!("Failed to create HTTP client: {}", e)))
    }

    pub fn fetch_vehicle_positions() -> Result<Vec<VehicleRecord>> {
        let client = Self::create_http_client()?;

        let response = client.get(Self::GTFS_RT_VEHICLES_URL)
            .send()
            .map_err(|e| HrmError::NetworkError(format!("Failed to fetch vehicle positions: {}", e)))?;

        if !response.status().is_success() {
            return Err(HrmError::NetworkError(format!(
                "Vehicle positions request failed with status: {}",
                response.status()
            )));
        }

        let body = response.bytes()
            .map_err(|e| HrmError::NetworkError(format!("Failed to read vehicles response: {}", e)))?;

        Self::decode_vehicle_positions(&body)
    }

    pub fn decode_vehicle_positions(bytes: &[u8]) -> Result<Vec<VehicleRecord>> {
        let feed = FeedMessage::decode(bytes)
            .map_err(|e| HrmError::DecodeError(format!("Failed to decode vehicles feed: {}", e)))?;

        let mut buses: Vec<VehicleRecord> = feed
            .entity
            .into_iter()
            .filter_map(|entity| {
                // Entities without a vehicle position (trip updates, alerts)
                // are dropped here rather than treated as errors.
                entity.vehicle.map(|vehicle| {
                    let route_id = vehicle
                        .trip
                        .as_ref()
                        .and_then(|t| t.route_id.clone())
                        .unwrap_or_else(|| "Unknown".to_string());

                    let (latitude, longitude, bearing, speed) = vehicle
                        .position
                        .as_ref()
                        .map(|p| {
                            (
                                p.latitude as f64,
                                p.longitude as f64,
                                p.bearing.unwrap_or(0.0) as f64,
                                p.speed.unwrap_or(0.0) as f64,
                            )
                        })
                        .unwrap_or((0.0, 0.0, 0.0, 0.0));

                    VehicleRecord {
                        id: entity.id,
                        route_id,
                        latitude,
                        longitude,
                        bearing,
                        speed,
                    }
                })
            })
            .collect();

        // Upstream entity order is not stable; sorting by vehicle id keeps the
        // served order and the staleness fingerprint deterministic.
        buses.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(buses)
    }

    // ============================================================================
    // Staleness Detection
    // ============================================================================

    pub fn snapshot_fingerprint(buses: &[VehicleRecord]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for bus in buses {
            bus.id.hash(&mut hasher);
            bus.route_id.hash(&mut hasher);
            bus.latitude.to_bits().hash(&mut hasher);
            bus.longitude.to_bits().hash(&mut hasher);
            bus.bearing.to_bits().hash(&mut hasher);
            bus.speed.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    // An empty feed never counts as a repeat: a genuine service gap (night
    // hours, holidays) must not read as a stuck upstream.
    pub fn observe_snapshot(buses: &[VehicleRecord], previous: Option<u64>) -> (u64, bool) {
        let fingerprint = Self::snapshot_fingerprint(buses);
        let is_stale = !buses.is_empty() && previous == Some(fingerprint);
        (fingerprint, is_stale)
    }

    // ============================================================================
    // Route Table (GTFS Static Bundle)
    // ============================================================================

    pub fn load_route_table() -> Result<HashMap<String, String>> {
        if let Some(cached) = RouteTableCache::load(Self::STATIC_REFRESH_SECS) {
            return Ok(cached.routes);
        }

        let routes = Self::fetch_route_table()?;

        let cache = RouteTableCache {
            routes: routes.clone(),
            cached_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        if let Err(e) = cache.save() {
            eprintln!("⚠️  Warning: Could not save route table cache: {}", e);
        }

        Ok(routes)
    }

    pub fn fetch_route_table() -> Result<HashMap<String, String>> {
        println!("📥 Downloading Halifax Transit GTFS bundle...");

        let client = blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(Self::REQUEST_TIMEOUT_SECS * 3)) // Longer timeout for the full bundle
            .user_agent(Self::USER_AGENT)
            .build()
            .map_err(|e| HrmError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        let response = client.get(Self::GTFS_STATIC_URL)
            .send()
            .map_err(|e| HrmError::NetworkError(format!("Failed to download GTFS bundle: {}", e)))?;

        if !response.status().is_success() {
            return Err(HrmError::NetworkError(format!(
                "Download failed with status: {}",
                response.status()
            )));
        }

        let zip_bytes = response.bytes()
            .map_err(|e| HrmError::NetworkError(format!("Failed to read GTFS zip: {}", e)))?;

        println!("✓ Downloaded {} KB, extracting...", zip_bytes.len() / 1024);

        let cursor = Cursor::new(zip_bytes);
        let mut archive = ZipArchive::new(cursor)
            .map_err(|e| HrmError::StaticFetchError(format!("Failed to open GTFS zip: {}", e)))?;

        let contents = Self::read_archive_entry(&mut archive, Self::ROUTES_FILE_NAME)?;

        Self::parse_route_table(&contents)
    }

    fn read_archive_entry(
        archive: &mut ZipArchive<Cursor<bytes::Bytes>>,
        name: &str,
    ) -> Result<String> {
        let mut entry = archive.by_name(name)
            .map_err(|e| HrmError::StaticFetchError(format!("{} not found in bundle: {}", name, e)))?;

        let mut contents = String::new();
        entry.read_to_string(&mut contents)
            .map_err(|e| HrmError::StaticFetchError(format!("Failed to read {}: {}", name, e)))?;

        Ok(contents)
    }

    pub fn parse_route_table(text: &str) -> Result<HashMap<String, String>> {
        // Halifax exports routes.txt with a UTF-8 BOM on the header line.
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(text.as_bytes());

        let headers = rdr.headers()
            .map_err(|e| HrmError::StaticFetchError(format!("Failed to read routes.txt header: {}", e)))?
            .clone();

        let route_id_idx = headers.iter().position(|h| h == "route_id")
            .ok_or_else(|| HrmError::StaticFetchError("routes.txt is missing the route_id column".to_string()))?;
        let long_name_idx = headers.iter().position(|h| h == "route_long_name")
            .ok_or_else(|| HrmError::StaticFetchError("routes.txt is missing the route_long_name column".to_string()))?;
        let route_type_idx = headers.iter().position(|h| h == "route_type");

        let mut routes = HashMap::new();

        for result in rdr.records() {
            if let Ok(record) = result {
                // Without a route_type column every row counts as a bus route.
                let category = match route_type_idx {
                    Some(idx) => record.get(idx).unwrap_or(""),
                    None => Self::BUS_ROUTE_TYPE,
                };

                if category != Self::BUS_ROUTE_TYPE {
                    continue;
                }

                if let (Some(route_id), Some(long_name)) =
                    (record.get(route_id_idx), record.get(long_name_idx)) {
                    if !route_id.is_empty() && !long_name.is_empty() {
                        // Last row wins on duplicate route_id.
                        routes.insert(route_id.to_string(), long_name.to_string());
                    }
                }
            }
        }

        Ok(routes)
    }

    // ============================================================================
    // Timestamps
    // ============================================================================

    pub fn format_timestamp_full(timestamp: i64) -> String {
        match Utc.timestamp_opt(timestamp, 0).single() {
            Some(dt) => {
                let halifax_time = dt.with_timezone(&Halifax);
                halifax_time.format("%Y-%m-%d %H:%M:%S").to_string()
            }
            None => format!("Invalid timestamp: {}", timestamp),
        }
    }

    pub fn get_current_timestamp() -> i64 {
        Utc::now().timestamp()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gtfs_rt::{FeedEntity, FeedHeader, Position, TripDescriptor, VehicleDescriptor, VehiclePosition};

    fn vehicle_entity(id: &str, route_id: Option<&str>, lat: f32, lon: f32) -> FeedEntity {
        FeedEntity {
            id: id.to_string(),
            vehicle: Some(VehiclePosition {
                trip: route_id.map(|r| TripDescriptor {
                    route_id: Some(r.to_string()),
                    ..Default::default()
                }),
                vehicle: Some(VehicleDescriptor {
                    id: Some(id.to_string()),
                    ..Default::default()
                }),
                position: Some(Position {
                    latitude: lat,
                    longitude: lon,
                    bearing: Some(90.0),
                    speed: Some(12.5),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn encode_feed(entities: Vec<FeedEntity>) -> Vec<u8> {
        let feed = FeedMessage {
            header: FeedHeader {
                gtfs_realtime_version: "2.0".to_string(),
                ..Default::default()
            },
            entity: entities,
        };
        feed.encode_to_vec()
    }

    fn bus(id: &str, route_id: &str) -> VehicleRecord {
        VehicleRecord {
            id: id.to_string(),
            route_id: route_id.to_string(),
            latitude: 44.6488,
            longitude: -63.5752,
            bearing: 180.0,
            speed: 10.0,
        }
    }

    // ------------------------------------------------------------------
    // Feed decoder
    // ------------------------------------------------------------------

    #[test]
    fn test_decode_skips_entities_without_vehicle() {
        let bare_entity = FeedEntity {
            id: "no-vehicle".to_string(),
            ..Default::default()
        };
        let bytes = encode_feed(vec![
            vehicle_entity("A", Some("1"), 44.65, -63.57),
            bare_entity,
        ]);

        let buses = HRMModels::decode_vehicle_positions(&bytes).unwrap();

        assert_eq!(buses.len(), 1);
        assert_eq!(buses[0].id, "A");
    }

    #[test]
    fn test_decode_defaults_route_id_when_trip_missing() {
        let bytes = encode_feed(vec![vehicle_entity("B", None, 44.65, -63.57)]);

        let buses = HRMModels::decode_vehicle_positions(&bytes).unwrap();

        assert_eq!(buses.len(), 1);
        assert_eq!(buses[0].route_id, "Unknown");
    }

    #[test]
    fn test_decode_orders_buses_by_id() {
        let bytes = encode_feed(vec![
            vehicle_entity("B", Some("90"), 44.66, -63.58),
            vehicle_entity("A", Some("1"), 44.65, -63.57),
        ]);

        let buses = HRMModels::decode_vehicle_positions(&bytes).unwrap();

        assert_eq!(buses.len(), 2);
        assert_eq!(buses[0].id, "A");
        assert_eq!(buses[0].route_id, "1");
        assert_eq!(buses[1].id, "B");
        assert_eq!(buses[1].route_id, "90");
    }

    #[test]
    fn test_decode_reads_position_fields() {
        let bytes = encode_feed(vec![vehicle_entity("A", Some("1"), 44.65, -63.57)]);

        let buses = HRMModels::decode_vehicle_positions(&bytes).unwrap();

        assert!((buses[0].latitude - 44.65).abs() < 1e-4);
        assert!((buses[0].longitude - -63.57).abs() < 1e-4);
        assert!((buses[0].bearing - 90.0).abs() < 1e-4);
        assert!((buses[0].speed - 12.5).abs() < 1e-4);
    }

    #[test]
    fn test_decode_rejects_invalid_bytes() {
        let result = HRMModels::decode_vehicle_positions(&[0xFF, 0xFE, 0x00, 0x01]);

        assert!(matches!(result, Err(HrmError::DecodeError(_))));
    }

    #[test]
    fn test_decode_empty_payload_is_empty_snapshot() {
        // An empty byte array decodes to a default FeedMessage with no
        // entities, which is a valid (empty) snapshot rather than an error.
        let buses = HRMModels::decode_vehicle_positions(&[]).unwrap();

        assert!(buses.is_empty());
    }

    // ------------------------------------------------------------------
    // Route table parser
    // ------------------------------------------------------------------

    #[test]
    fn test_parse_strips_bom_and_quotes() {
        let text = "\u{feff}route_id,route_long_name,route_type\n1,\"Main, Street\",3\n";

        let routes = HRMModels::parse_route_table(text).unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(routes.get("1").map(String::as_str), Some("Main, Street"));
    }

    #[test]
    fn test_parse_bom_and_quoting_do_not_change_result() {
        let decorated = "\u{feff}\"route_id\",\"route_long_name\",\"route_type\"\n\"1\",\"Spring Garden\",\"3\"\n";
        let plain = "route_id,route_long_name,route_type\n1,Spring Garden,3\n";

        let from_decorated = HRMModels::parse_route_table(decorated).unwrap();
        let from_plain = HRMModels::parse_route_table(plain).unwrap();

        assert_eq!(from_decorated, from_plain);
    }

    #[test]
    fn test_parse_excludes_ferry_routes() {
        let text = "route_id,route_long_name,route_type\n\
                    1,Spring Garden,3\n\
                    FerryD,Alderney Ferry,4\n\
                    FerryW,Woodside Ferry,4\n\
                    90,Larry Uteck,3\n";

        let routes = HRMModels::parse_route_table(text).unwrap();

        assert_eq!(routes.len(), 2);
        assert!(routes.contains_key("1"));
        assert!(routes.contains_key("90"));
        assert!(!routes.contains_key("FerryD"));
        assert!(!routes.contains_key("FerryW"));
    }

    #[test]
    fn test_parse_defaults_to_bus_without_route_type_column() {
        let text = "route_id,route_long_name\n7,Robie\n";

        let routes = HRMModels::parse_route_table(text).unwrap();

        assert_eq!(routes.get("7").map(String::as_str), Some("Robie"));
    }

    #[test]
    fn test_parse_last_row_wins_on_duplicate_route_id() {
        let text = "route_id,route_long_name,route_type\n\
                    1,Old Name,3\n\
                    1,New Name,3\n";

        let routes = HRMModels::parse_route_table(text).unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(routes.get("1").map(String::as_str), Some("New Name"));
    }

    #[test]
    fn test_parse_skips_rows_missing_fields() {
        let text = "route_id,route_long_name,route_type\n\
                    1,,3\n\
                    ,Nameless,3\n\
                    2,Gottingen,3\n";

        let routes = HRMModels::parse_route_table(text).unwrap();

        assert_eq!(routes.len(), 1);
        assert_eq!(routes.get("2").map(String::as_str), Some("Gottingen"));
    }

    #[test]
    fn test_parse_fails_without_route_id_column() {
        let text = "route_long_name,route_type\nSpring Garden,3\n";

        let result = HRMModels::parse_route_table(text);

        assert!(matches!(result, Err(HrmError::StaticFetchError(_))));
    }

    // ------------------------------------------------------------------
    // Staleness detection
    // ------------------------------------------------------------------

    #[test]
    fn test_identical_snapshot_is_stale_on_second_observation() {
        let buses = vec![bus("A", "1"), bus("B", "90")];

        let (first, stale_first) = HRMModels::observe_snapshot(&buses, None);
        assert!(!stale_first);

        let (second, stale_second) = HRMModels::observe_snapshot(&buses, Some(first));
        assert!(stale_second);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_snapshot_is_never_stale() {
        let empty: Vec<VehicleRecord> = Vec::new();

        let (first, _) = HRMModels::observe_snapshot(&empty, None);
        let (_, stale) = HRMModels::observe_snapshot(&empty, Some(first));

        assert!(!stale);
    }

    #[test]
    fn test_fingerprint_changes_when_position_changes() {
        let before = vec![bus("A", "1")];
        let mut moved = before.clone();
        moved[0].latitude += 0.001;

        assert_ne!(
            HRMModels::snapshot_fingerprint(&before),
            HRMModels::snapshot_fingerprint(&moved)
        );
    }

    // ------------------------------------------------------------------
    // Cache write policy
    // ------------------------------------------------------------------

    #[test]
    fn test_fresh_snapshot_replaces_cache_and_resets_counter() {
        let mut cache = CachedTransitData::new();

        let stale = cache.apply_snapshot(vec![bus("A", "1"), bus("B", "90")]);

        assert!(!stale);
        assert_eq!(cache.buses.len(), 2);
        assert_eq!(cache.stale_count, 0);
    }

    #[test]
    fn test_three_identical_fetches_count_two_stale_cycles() {
        let mut cache = CachedTransitData::new();
        let buses = vec![bus("A", "1"), bus("B", "90")];

        assert!(!cache.apply_snapshot(buses.clone()));
        assert!(cache.apply_snapshot(buses.clone()));
        assert!(cache.apply_snapshot(buses.clone()));

        assert_eq!(cache.stale_count, 2);
        assert_eq!(cache.buses.len(), 2);
    }

    #[test]
    fn test_stale_snapshot_does_not_replace_cache() {
        let mut cache = CachedTransitData::new();
        let buses = vec![bus("A", "1")];

        cache.apply_snapshot(buses.clone());
        let before = cache.buses.clone();

        cache.apply_snapshot(buses);

        assert_eq!(cache.buses.len(), before.len());
        assert_eq!(cache.buses[0].id, before[0].id);
        assert_eq!(cache.stale_count, 1);
    }

    #[test]
    fn test_failed_fetch_keeps_snapshot_and_increments_counter() {
        let mut cache = CachedTransitData::new();
        cache.apply_snapshot(vec![bus("A", "1"), bus("B", "90")]);

        cache.record_fetch_failure();

        assert_eq!(cache.buses.len(), 2);
        assert_eq!(cache.stale_count, 1);

        // A recovered fetch with changed data resets the counter.
        let mut moved = vec![bus("A", "1"), bus("B", "90")];
        moved[0].latitude += 0.01;
        assert!(!cache.apply_snapshot(moved));
        assert_eq!(cache.stale_count, 0);
    }

    #[test]
    fn test_route_table_replaced_wholesale() {
        let mut cache = CachedTransitData::new();

        let mut first = HashMap::new();
        first.insert("1".to_string(), "Spring Garden".to_string());
        first.insert("90".to_string(), "Larry Uteck".to_string());
        cache.apply_routes(first);

        let mut second = HashMap::new();
        second.insert("7".to_string(), "Robie".to_string());
        cache.apply_routes(second);

        assert_eq!(cache.routes.len(), 1);
        assert!(cache.routes.contains_key("7"));
        assert!(!cache.routes.contains_key("1"));
    }

    #[test]
    fn test_vehicle_record_serializes_with_route_id_key() {
        let json = serde_json::to_value(bus("2093", "90")).unwrap();

        assert_eq!(json["id"], "2093");
        assert_eq!(json["routeId"], "90");
        assert!(json.get("route_id").is_none());
    }
}
