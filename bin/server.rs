// Water Billing System - Web Server
// JSON API over the billing core: roster, rates, payments, bill
// preview/commit, and usage ingestion. PDF rendering stays client-side.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Local, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use water_billing::{
    assign_tenant, collect_billing_files, commit_many, commit_one, ingest_directory, list_payments,
    list_rates, list_units, query_usage, record_payment, set_balance, sum_gallons_by_unit,
    update_rate, viewer_snapshot, BillingEngine, BillingPeriod, CommitOutcome, ComputedBill,
    RateTable, RETENTION_DAYS,
};

/// Shared application state. The mutex is what serializes balance
/// commits; each request holds the single connection for its duration.
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
    export_dir: PathBuf,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(e: anyhow::Error) -> Response {
    eprintln!("Request failed: {:#}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
}

fn parse_date(s: &str) -> Result<NaiveDate, Response> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("bad date: {}", s)))
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Deserialize)]
struct TenantUpdate {
    name: String,
}

#[derive(Deserialize)]
struct BalanceUpdate {
    balance: f64,
}

#[derive(Deserialize)]
struct RateUpdate {
    rate: f64,
}

#[derive(Deserialize)]
struct PaymentRequest {
    tenant_id: i64,
    amount: f64,
    date: String,
}

#[derive(Deserialize)]
struct BillsFromFiles {
    files: Vec<String>,
}

#[derive(Deserialize)]
struct BillsFromRange {
    start_date: String,
    end_date: String,
}

#[derive(Serialize)]
struct BillsResponse {
    bills: Vec<ComputedBill>,
    period_defaulted: bool,
}

#[derive(Deserialize)]
struct BillsFromData {
    bills: Vec<ComputedBill>,
}

#[derive(Deserialize)]
struct CommitRequest {
    bills: Vec<ComputedBill>,
}

#[derive(Deserialize)]
struct CommitOneRequest {
    bill: ComputedBill,
}

#[derive(Serialize)]
struct UnitUsageResponse {
    unit_number: String,
    property: String,
    address: String,
    tenant_name: String,
    total_gallons: f64,
    daily_usage: Vec<DailyUsage>,
}

#[derive(Serialize)]
struct DailyUsage {
    date: NaiveDate,
    gallons: f64,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/units - Roster with tenants and balances
async fn get_units(State(state): State<AppState>) -> Response {
    let conn = state.db.lock().unwrap();
    match list_units(&conn) {
        Ok(units) => Json(ApiResponse::ok(units)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PUT /api/tenants/:unit_id - Replace a unit's tenant (blank name clears)
async fn put_tenant(
    State(state): State<AppState>,
    Path(unit_id): Path<i64>,
    Json(body): Json<TenantUpdate>,
) -> Response {
    let conn = state.db.lock().unwrap();
    match assign_tenant(&conn, unit_id, &body.name) {
        Ok(tenant_id) => Json(ApiResponse::ok(tenant_id)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PUT /api/balances/:tenant_id - Operator balance correction
async fn put_balance(
    State(state): State<AppState>,
    Path(tenant_id): Path<i64>,
    Json(body): Json<BalanceUpdate>,
) -> Response {
    let conn = state.db.lock().unwrap();
    match set_balance(&conn, tenant_id, body.balance) {
        Ok(()) => Json(ApiResponse::ok(())).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/usage-costs - The six charge categories
async fn get_rates(State(state): State<AppState>) -> Response {
    let conn = state.db.lock().unwrap();
    match list_rates(&conn) {
        Ok(rates) => Json(ApiResponse::ok(rates)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// PUT /api/usage-costs/:id - Update one category's rate
async fn put_rate(
    State(state): State<AppState>,
    Path(rate_id): Path<i64>,
    Json(body): Json<RateUpdate>,
) -> Response {
    let conn = state.db.lock().unwrap();
    match update_rate(&conn, rate_id, body.rate) {
        Ok(()) => Json(ApiResponse::ok(())).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/payments - Payment history, newest first
async fn get_payments(State(state): State<AppState>) -> Response {
    let conn = state.db.lock().unwrap();
    match list_payments(&conn) {
        Ok(payments) => Json(ApiResponse::ok(payments)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/payments - Record a payment and decrement the balance
async fn post_payment(
    State(state): State<AppState>,
    Json(body): Json<PaymentRequest>,
) -> Response {
    let date = match parse_date(&body.date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    match record_payment(&conn, body.tenant_id, body.amount, date) {
        Ok(payment_id) => Json(ApiResponse::ok(payment_id)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/bills/from-files - Preview bills from export files.
/// Strict: any unreadable file fails the whole request.
async fn bills_from_files(
    State(state): State<AppState>,
    Json(body): Json<BillsFromFiles>,
) -> Response {
    let paths: Vec<PathBuf> = body.files.iter().map(PathBuf::from).collect();
    let inputs = match collect_billing_files(&paths) {
        Ok(inputs) => inputs,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    };

    let conn = state.db.lock().unwrap();
    let result = list_units(&conn).and_then(|units| {
        let engine = BillingEngine::new(RateTable::new(list_rates(&conn)?));
        Ok(engine.compute_bills(&units, &inputs.gallons_by_unit, &inputs.period))
    });

    match result {
        Ok(bills) => Json(ApiResponse::ok(BillsResponse {
            bills,
            period_defaulted: inputs.period_defaulted,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/bills/from-range - Preview bills from the stored usage window
async fn bills_from_range(
    State(state): State<AppState>,
    Json(body): Json<BillsFromRange>,
) -> Response {
    let start = match parse_date(&body.start_date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let end = match parse_date(&body.end_date) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let period = match BillingPeriod::new(start, end) {
        Ok(p) => p,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    };

    let conn = state.db.lock().unwrap();
    let result = list_units(&conn).and_then(|units| {
        let gallons = sum_gallons_by_unit(&conn, start, end)?;
        let engine = BillingEngine::new(RateTable::new(list_rates(&conn)?));
        Ok(engine.compute_bills(&units, &gallons, &period))
    });

    match result {
        Ok(bills) => Json(ApiResponse::ok(BillsResponse {
            bills,
            period_defaulted: false,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/bills/from-data - Re-price previously previewed bills against
/// the current rate table, keeping usage, period, and balances as supplied
async fn bills_from_data(
    State(state): State<AppState>,
    Json(body): Json<BillsFromData>,
) -> Response {
    let conn = state.db.lock().unwrap();
    let result = list_rates(&conn).map(|rates| {
        let engine = BillingEngine::new(RateTable::new(rates));
        body.bills
            .iter()
            .map(|bill| engine.reprice(bill))
            .collect::<Vec<_>>()
    });

    match result {
        Ok(bills) => Json(ApiResponse::ok(BillsResponse {
            bills,
            period_defaulted: false,
        }))
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/bills/commit-one - Apply one reviewed bill to its balance
async fn commit_one_bill(
    State(state): State<AppState>,
    Json(body): Json<CommitOneRequest>,
) -> Response {
    let conn = state.db.lock().unwrap();
    match commit_one(&conn, &body.bill) {
        Ok(()) => Json(ApiResponse::ok(())).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, format!("{:#}", e)),
    }
}

/// POST /api/bills/commit - Apply a reviewed batch.
/// Best-effort: applied bills stay applied; any failure makes the overall
/// status 500 with the per-bill failure list in the body.
async fn commit_bills(
    State(state): State<AppState>,
    Json(body): Json<CommitRequest>,
) -> Response {
    let conn = state.db.lock().unwrap();
    let outcome: CommitOutcome = commit_many(&conn, &body.bills);

    let status = if outcome.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    let success = outcome.is_success();

    (
        status,
        Json(ApiResponse {
            success,
            data: outcome,
            error: if success {
                None
            } else {
                Some("One or more updates failed".to_string())
            },
        }),
    )
        .into_response()
}

/// POST /api/ingest - Run the batch ingestion over the export directory
async fn run_ingest(State(state): State<AppState>) -> Response {
    let conn = state.db.lock().unwrap();
    let today = Local::now().date_naive();
    match ingest_directory(&conn, &state.export_dir, today) {
        Ok(summary) => Json(ApiResponse::ok(summary)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/usage-viewer - Dense unit x date matrix for the last 65 days
async fn usage_viewer(State(state): State<AppState>) -> Response {
    let conn = state.db.lock().unwrap();
    let today = Local::now().date_naive();
    match viewer_snapshot(&conn, RETENTION_DAYS, today) {
        Ok(matrix) => Json(ApiResponse::ok(matrix)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/usage/:start/:end - Stored usage grouped per unit
async fn usage_by_range(
    State(state): State<AppState>,
    Path((start, end)): Path<(String, String)>,
) -> Response {
    let start = match parse_date(&start) {
        Ok(d) => d,
        Err(resp) => return resp,
    };
    let end = match parse_date(&end) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let rows = match query_usage(&conn, start, end) {
        Ok(rows) => rows,
        Err(e) => return internal_error(e),
    };

    // Group by unit, keeping the store's property/unit/date ordering
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, UnitUsageResponse> = HashMap::new();
    for row in rows {
        let key = format!("{}-{}", row.property, row.unit_number);
        let entry = grouped.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            UnitUsageResponse {
                unit_number: row.unit_number.clone(),
                property: row.property.name().to_string(),
                address: row.address.clone(),
                tenant_name: row
                    .tenant_name
                    .clone()
                    .unwrap_or_else(|| "No Tenant".to_string()),
                total_gallons: 0.0,
                daily_usage: Vec::new(),
            }
        });
        entry.total_gallons += row.gallons;
        entry.daily_usage.push(DailyUsage {
            date: row.date,
            gallons: row.gallons,
        });
    }

    let units: Vec<UnitUsageResponse> = order
        .into_iter()
        .filter_map(|key| grouped.remove(&key))
        .collect();
    Json(ApiResponse::ok(units)).into_response()
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("💧 Water Billing System - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db_path = std::env::var("BILLS_DB").unwrap_or_else(|_| "bills.db".to_string());
    let export_dir =
        PathBuf::from(std::env::var("EXPORT_DIR").unwrap_or_else(|_| "sample_data".to_string()));

    let conn = Connection::open(&db_path).expect("Failed to open database");
    water_billing::setup_database(&conn).expect("Failed to initialize database");
    println!("✓ Database ready: {}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
        export_dir,
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/units", get(get_units))
        .route("/tenants/:unit_id", put(put_tenant))
        .route("/balances/:tenant_id", put(put_balance))
        .route("/usage-costs", get(get_rates))
        .route("/usage-costs/:id", put(put_rate))
        .route("/payments", get(get_payments).post(post_payment))
        .route("/bills/from-files", post(bills_from_files))
        .route("/bills/from-range", post(bills_from_range))
        .route("/bills/from-data", post(bills_from_data))
        .route("/bills/commit-one", post(commit_one_bill))
        .route("/bills/commit", post(commit_bills))
        .route("/ingest", post(run_ingest))
        .route("/usage-viewer", get(usage_viewer))
        .route("/usage/:start/:end", get(usage_by_range))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:5000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:5000");
    println!("   Roster: http://localhost:5000/api/units");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
