// Backend API server for the HRM bus tracker map
// Halifax Transit real-time vehicle positions + static route names, cached
// in-process and served read-only to the map client.

use actix_web::{web, App, HttpServer, HttpResponse, middleware};
use actix_cors::Cors;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time;

mod hrm_api_models;
use hrm_api_models::{CachedTransitData, HRMModels};

#[derive(Clone)]
struct AppState {
    cache: Arc<RwLock<CachedTransitData>>,
}

// ============================================================================
// API Endpoints
// ============================================================================

async fn get_buses(state: web::Data<AppState>) -> HttpResponse {
    match state.cache.read() {
        Ok(cache) => {
            println!("🚌 Buses requested: {} active, {} stale cycles",
                     cache.buses.len(),
                     cache.stale_count);
            HttpResponse::Ok()
                .insert_header((HRMModels::STALE_COUNT_HEADER, cache.stale_count.to_string()))
                .json(&cache.buses)
        }
        Err(e) => {
            eprintln!("❌ Failed to lock cache: {}", e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to fetch bus data" }))
        }
    }
}

async fn get_routes(state: web::Data<AppState>) -> HttpResponse {
    match state.cache.read() {
        Ok(cache) => {
            println!("🗺️  Routes requested: {} bus routes", cache.routes.len());
            HttpResponse::Ok().json(&cache.routes)
        }
        Err(e) => {
            eprintln!("❌ Failed to lock cache: {}", e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to fetch route data" }))
        }
    }
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    match state.cache.read() {
        Ok(cache) => {
            HttpResponse::Ok().json(serde_json::json!({
                "status": "healthy",
                "service": "HRM Bus Tracker API",
                "version": "1.0.0",
                "vehicles": cache.buses.len(),
                "bus_routes": cache.routes.len(),
                "stale_count": cache.stale_count,
                "last_vehicle_update": cache.last_dynamic_update,
                "last_static_update": cache.last_static_update,
                "timestamp": HRMModels::get_current_timestamp()
            }))
        }
        Err(e) => {
            eprintln!("❌ Failed to lock cache: {}", e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "Failed to read cache state" }))
        }
    }
}

// ============================================================================
// Background Tasks
// ============================================================================

async fn realtime_refresh_task(state: Arc<RwLock<CachedTransitData>>) {
    let mut interval = time::interval(Duration::from_secs(HRMModels::REALTIME_REFRESH_SECS));

    loop {
        interval.tick().await;

        match tokio::task::spawn_blocking(HRMModels::fetch_vehicle_positions).await {
            Ok(Ok(buses)) => {
                match state.write() {
                    Ok(mut cache) => {
                        let was_stale = cache.apply_snapshot(buses);
                        if was_stale {
                            println!("⚠️  Vehicle feed unchanged since last cycle ({} stale cycles)",
                                     cache.stale_count);
                        } else {
                            println!("✓ Vehicle positions refreshed: {} buses tracked",
                                     cache.buses.len());
                        }
                    }
                    Err(e) => {
                        eprintln!("❌ Failed to lock cache for vehicle update: {}", e);
                    }
                }
            }
            Ok(Err(e)) => {
                eprintln!("⚠️  Vehicle fetch failed ({}), keeping last snapshot", e);
                if let Ok(mut cache) = state.write() {
                    cache.record_fetch_failure();
                }
            }
            Err(e) => {
                eprintln!("❌ Vehicle fetch task panicked: {}", e);
                if let Ok(mut cache) = state.write() {
                    cache.record_fetch_failure();
                }
            }
        }
    }
}

async fn static_refresh_task(state: Arc<RwLock<CachedTransitData>>) {
    let mut interval = time::interval(Duration::from_secs(HRMModels::STATIC_REFRESH_SECS));

    loop {
        interval.tick().await;

        println!("\n🔄 Refreshing route table...");

        match tokio::task::spawn_blocking(HRMModels::load_route_table).await {
            Ok(Ok(routes)) => {
                match state.write() {
                    Ok(mut cache) => {
                        cache.apply_routes(routes);
                        println!("✓ Route table refreshed: {} bus routes at {}",
                                 cache.routes.len(),
                                 HRMModels::format_timestamp_full(HRMModels::get_current_timestamp()));
                    }
                    Err(e) => {
                        eprintln!("❌ Failed to lock cache for route table update: {}", e);
                    }
                }
            }
            Ok(Err(e)) => {
                eprintln!("⚠️  Route table refresh failed ({}), keeping previous table", e);
            }
            Err(e) => {
                eprintln!("❌ Route table refresh task panicked: {}", e);
            }
        }
    }
}

// ============================================================================
// Server Setup
// ============================================================================

async fn run_server(cache: CachedTransitData) -> std::io::Result<()> {
    let app_state = AppState {
        cache: Arc::new(RwLock::new(cache)),
    };

    // Start background refresh tasks; their first ticks fire immediately, so
    // the realtime task doubles as the cold-start fetch.
    let realtime_cache = app_state.cache.clone();
    tokio::spawn(async move {
        realtime_refresh_task(realtime_cache).await;
    });

    let static_cache = app_state.cache.clone();
    tokio::spawn(async move {
        static_refresh_task(static_cache).await;
    });

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║   🚀 HRM Bus Tracker Backend                               ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");
    println!("🌐 Server running on: http://0.0.0.0:3000");
    println!("🔄 Vehicle refresh: every {} seconds", HRMModels::REALTIME_REFRESH_SECS);
    println!("🔄 Route table refresh: every 24 hours\n");

    println!("📍 Available Routes:");
    println!("┌─────────────────────────────────────────────────────────────┐");
    println!("│   GET  /buses     - Live vehicle positions (JSON array)     │");
    println!("│                     X-Stale-Count header carries the        │");
    println!("│                     consecutive-stale-cycle counter         │");
    println!("│   GET  /routes    - route_id -> route name (JSON object)    │");
    println!("│   GET  /health    - Service health and cache statistics     │");
    println!("└─────────────────────────────────────────────────────────────┘\n");

    HttpServer::new(move || {
        // The map client runs cross-origin and reads the staleness counter
        // from the response header, so that header must be exposed.
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .expose_headers([HRMModels::STALE_COUNT_HEADER]);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .route("/buses", web::get().to(get_buses))
            .route("/routes", web::get().to(get_routes))
            .route("/health", web::get().to(health_check))
    })
        .bind(("0.0.0.0", 3000))?
        .run()
        .await
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> std::io::Result<()> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║                                                            ║");
    println!("║    🚌 HRM Bus Tracker Backend                              ║");
    println!("║       Halifax Transit real-time feed cache                 ║");
    println!("║                                                            ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    println!("📡 Starting with an empty cache; background tasks will populate it.");
    println!("   Started at {}\n", HRMModels::format_timestamp_full(HRMModels::get_current_timestamp()));

    let cache = CachedTransitData::new();

    actix_web::rt::System::new().block_on(run_server(cache))
}
