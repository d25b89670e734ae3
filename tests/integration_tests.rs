use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;

use servicebook::config::AppConfig;
use servicebook::db::SqliteStore;
use servicebook::handlers;
use servicebook::models::{Business, User};
use servicebook::services::booking::BookingManager;
use servicebook::services::catalog::Catalog;
use servicebook::services::clock::FixedClock;
use servicebook::services::payment::{ChargeOutcome, PaymentProvider};
use servicebook::services::scheduler::ExpiryScheduler;
use servicebook::state::AppState;

// ── Mock Providers ──

struct MockGateway;

#[async_trait]
impl PaymentProvider for MockGateway {
    async fn charge(
        &self,
        _method: &str,
        details: &Value,
        _amount: Decimal,
    ) -> anyhow::Result<ChargeOutcome> {
        if details["token"] == "tok_declined" {
            Ok(ChargeOutcome::Declined {
                reason: "insufficient funds".to_string(),
            })
        } else {
            Ok(ChargeOutcome::Approved {
                transaction_id: "txn_test".to_string(),
            })
        }
    }
}

#[derive(Default)]
struct RecordingScheduler {
    requests: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl RecordingScheduler {
    fn requests(&self) -> Vec<(String, DateTime<Utc>)> {
        self.requests.lock().unwrap().clone()
    }
}

impl ExpiryScheduler for RecordingScheduler {
    fn schedule_expiry(&self, booking_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.requests
            .lock()
            .unwrap()
            .push((booking_id.to_string(), at));
        Ok(())
    }
}

// ── Helpers ──

struct TestApp {
    state: Arc<AppState>,
    clock: Arc<FixedClock>,
    scheduler: Arc<RecordingScheduler>,
}

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        services_page_size: 6,
        bookings_page_size: 10,
        payment_gateway: "simulated".to_string(),
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
}

fn test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(SqliteStore::open(&config.database_url).unwrap());
    for id in ["owner", "alice", "bob"] {
        store
            .save_user(&User {
                id: id.to_string(),
                name: id.to_string(),
                email: None,
            })
            .unwrap();
    }
    store
        .save_business(&Business {
            id: "biz".to_string(),
            owner_id: "owner".to_string(),
            name: "Lakeside Yoga".to_string(),
        })
        .unwrap();

    let clock = Arc::new(FixedClock::new(start()));
    let scheduler = Arc::new(RecordingScheduler::default());
    let state = Arc::new(AppState {
        catalog: Catalog::new(store.clone(), clock.clone(), config.services_page_size),
        bookings: BookingManager::new(
            store,
            Arc::new(MockGateway),
            scheduler.clone(),
            clock.clone(),
            config.bookings_page_size,
        ),
    });
    TestApp {
        state,
        clock,
        scheduler,
    }
}

impl TestApp {
    fn router(&self) -> Router {
        handlers::router(self.state.clone())
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let res = self
            .router()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_service(&self, body: Value) -> String {
        let (status, json) = self
            .call("POST", "/api/services", Some("owner"), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["id"].as_str().unwrap().to_string()
    }

    async fn remaining_on(&self, service_id: &str, date: &str) -> i64 {
        let (_, json) = self
            .call(
                "GET",
                &format!("/api/services/{service_id}/availability?date={date}"),
                None,
                None,
            )
            .await;
        json["remaining_spots"].as_i64().unwrap()
    }
}

fn yoga_class() -> Value {
    json!({
        "business_id": "biz",
        "name": "Sunrise yoga",
        "category": "Fitness",
        "pricing": { "pricing_model": "perPerson", "base_price": "20" },
        "payment_settings": { "accept_online_payment": true, "tax_rate": "10" },
        "cancellation_policy": {
            "allow_cancellation": true,
            "free_cancellation_hours": 24,
            "cancellation_fee": "15"
        },
        "availability": {
            "mode": "dated",
            "dates": [
                { "date": "2025-06-18", "total_capacity": 4 },
                { "date": "2025-06-19", "total_capacity": 4 }
            ]
        }
    })
}

fn booking_request(service_id: &str, people: u32, token: &str) -> Value {
    json!({
        "service_id": service_id,
        "booking_date": "2025-06-18",
        "time_slot": { "start_time": "10:00", "end_time": "11:00" },
        "number_of_people": people,
        "payment_method": "card",
        "payment_details": { "token": token }
    })
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().unwrap(),
        other => other.to_string().parse().unwrap(),
    }
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let app = test_app();
    let (status, json) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

// ── Services ──

#[tokio::test]
async fn test_create_service_requires_identity_and_ownership() {
    let app = test_app();

    let (status, json) = app
        .call("POST", "/api/services", None, Some(yoga_class()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "unauthorized");

    let (status, _) = app
        .call("POST", "/api/services", Some("alice"), Some(yoga_class()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let id = app.create_service(yoga_class()).await;
    let (status, json) = app
        .call("GET", &format!("/api/services/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "Sunrise yoga");
    assert_eq!(json["category"], "Fitness");
}

#[tokio::test]
async fn test_create_service_validation_errors() {
    let app = test_app();

    let (status, json) = app
        .call(
            "POST",
            "/api/services",
            Some("owner"),
            Some(json!({ "business_id": "biz" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "missing_fields");

    let mut bad_tax = yoga_class();
    bad_tax["payment_settings"]["tax_rate"] = json!("140");
    let (status, json) = app
        .call("POST", "/api/services", Some("owner"), Some(bad_tax))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_payment_config");

    let mut empty = yoga_class();
    empty["availability"]["dates"] = json!([]);
    let (_, json) = app
        .call("POST", "/api/services", Some("owner"), Some(empty))
        .await;
    assert_eq!(json["error"], "invalid_availability_config");
}

#[tokio::test]
async fn test_owner_updates_pricing() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;

    let pricing = json!({ "pricing_model": "fixed", "base_price": "75" });
    let (status, _) = app
        .call(
            "POST",
            &format!("/api/services/{id}/pricing"),
            Some("alice"),
            Some(pricing.clone()),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/services/{id}/pricing"),
            Some("owner"),
            Some(pricing),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pricing"]["pricing_model"], "fixed");
    assert_eq!(decimal(&json["pricing"]["base_price"]), Decimal::from(75));
}

#[tokio::test]
async fn test_category_listing_pages() {
    let app = test_app();
    for i in 0..7 {
        let mut svc = yoga_class();
        svc["name"] = json!(format!("Class {i}"));
        app.create_service(svc).await;
    }

    let (status, json) = app
        .call("GET", "/api/categories/Fitness/services?page=2", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["items"].as_array().unwrap().len(), 1);
    assert_eq!(json["current_page"], 2);
    assert_eq!(json["total_pages"], 2);
    assert_eq!(json["total"], 7);

    let (status, json) = app
        .call("GET", "/api/categories/Spaceflight/services", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");

    let (_, json) = app
        .call("GET", "/api/businesses/biz/services", None, None)
        .await;
    assert_eq!(json["items"].as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn test_availability_report() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;

    let (status, json) = app
        .call(
            "GET",
            &format!("/api/services/{id}/availability?date=2025-06-18"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["is_available"], true);
    assert_eq!(json["remaining_spots"], 4);
    assert_eq!(json["upcoming_dates"].as_array().unwrap().len(), 2);

    let (_, json) = app
        .call(
            "GET",
            &format!("/api/services/{id}/availability?date=2025-06-17"),
            None,
            None,
        )
        .await;
    assert_eq!(json["is_available"], false);
    assert_eq!(json["next_available_date"], "2025-06-18");
}

// ── Bookings ──

#[tokio::test]
async fn test_booking_charges_in_full_and_consumes_capacity() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;

    let (status, json) = app
        .call(
            "POST",
            "/api/bookings",
            Some("alice"),
            Some(booking_request(&id, 3, "tok_ok")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{json}");
    assert_eq!(json["status"], "confirmed");
    assert_eq!(json["payment"]["status"], "fully_paid");
    assert_eq!(decimal(&json["pricing"]["subtotal"]), Decimal::from(60));
    assert_eq!(decimal(&json["pricing"]["tax_amount"]), Decimal::from(6));
    assert_eq!(decimal(&json["pricing"]["total_amount"]), Decimal::from(66));
    assert_eq!(app.remaining_on(&id, "2025-06-18").await, 1);

    let (status, json) = app
        .call(
            "POST",
            "/api/bookings",
            Some("bob"),
            Some(booking_request(&id, 3, "tok_ok")),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "insufficient_capacity");
}

#[tokio::test]
async fn test_declined_payment_leaves_capacity_untouched() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;

    let (status, json) = app
        .call(
            "POST",
            "/api/bookings",
            Some("alice"),
            Some(booking_request(&id, 2, "tok_declined")),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["error"], "payment_failed");
    assert_eq!(app.remaining_on(&id, "2025-06-18").await, 4);
}

#[tokio::test]
async fn test_missing_payment_details_for_instant_booking() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;

    let mut req = booking_request(&id, 1, "tok_ok");
    req.as_object_mut().unwrap().remove("payment_details");
    let (status, json) = app
        .call("POST", "/api/bookings", Some("alice"), Some(req))
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["error"], "payment_details_required");
}

#[tokio::test]
async fn test_cancel_inside_window_withholds_fee() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;
    let (_, booking) = app
        .call(
            "POST",
            "/api/bookings",
            Some("alice"),
            Some(booking_request(&id, 2, "tok_ok")),
        )
        .await;
    let booking_id = booking["id"].as_str().unwrap();

    // 23 hours before the 10:00 start.
    app.clock
        .set(Utc.with_ymd_and_hms(2025, 6, 17, 11, 0, 0).unwrap());

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{booking_id}/cancel"),
            Some("bob"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "unauthorized");

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{booking_id}/cancel"),
            Some("alice"),
            Some(json!({ "reason": "plans changed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["cancellation"]["reason"], "plans changed");
    assert_eq!(decimal(&json["cancellation"]["fee"]), Decimal::from(15));
    // 44 paid, 15 withheld.
    assert_eq!(
        decimal(&json["cancellation"]["refund_amount"]),
        Decimal::from(29)
    );
    assert_eq!(json["payment"]["status"], "refunded");
    assert_eq!(app.remaining_on(&id, "2025-06-18").await, 4);

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{booking_id}/cancel"),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "invalid_state_transition");
}

#[tokio::test]
async fn test_approval_flow_and_expiry() {
    let app = test_app();
    let mut svc = yoga_class();
    svc["booking_settings"] = json!({ "requires_approval": true, "booking_timeout": 30 });
    let id = app.create_service(svc).await;

    let mut req = booking_request(&id, 2, "tok_ok");
    req.as_object_mut().unwrap().remove("payment_details");
    let (status, first) = app
        .call("POST", "/api/bookings", Some("alice"), Some(req.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{first}");
    assert_eq!(first["status"], "pending");
    assert_eq!(first["payment"]["status"], "pending");
    let first_id = first["id"].as_str().unwrap();

    let (_, second) = app
        .call("POST", "/api/bookings", Some("bob"), Some(req))
        .await;
    let second_id = second["id"].as_str().unwrap();
    assert_eq!(app.scheduler.requests().len(), 2);

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{first_id}/approve"),
            Some("owner"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "confirmed");

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{second_id}/reject"),
            Some("owner"),
            Some(json!({ "reason": "class is private" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "rejected");
    assert_eq!(app.remaining_on(&id, "2025-06-18").await, 2);

    // The scheduler calls back once the payment window has closed.
    app.clock.set(start() + chrono::Duration::minutes(31));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/bookings/{first_id}/expire"))
        .header("x-actor", "system")
        .body(Body::empty())
        .unwrap();
    let res = app.router().oneshot(request).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "cancelled");
    assert_eq!(json["cancellation"]["cancelled_by"], "system");
    assert_eq!(app.remaining_on(&id, "2025-06-18").await, 4);
}

#[tokio::test]
async fn test_booking_visibility_and_listings() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;
    let (_, booking) = app
        .call(
            "POST",
            "/api/bookings",
            Some("alice"),
            Some(booking_request(&id, 1, "tok_ok")),
        )
        .await;
    let booking_id = booking["id"].as_str().unwrap();

    let uri = format!("/api/bookings/{booking_id}");
    assert_eq!(app.call("GET", &uri, Some("alice"), None).await.0, StatusCode::OK);
    assert_eq!(app.call("GET", &uri, Some("owner"), None).await.0, StatusCode::OK);
    assert_eq!(
        app.call("GET", &uri, Some("bob"), None).await.0,
        StatusCode::FORBIDDEN
    );
    assert_eq!(
        app.call("GET", "/api/bookings/nope", Some("alice"), None).await.0,
        StatusCode::NOT_FOUND
    );

    let (status, json) = app
        .call("GET", "/api/users/alice/bookings", Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);

    let (status, _) = app
        .call("GET", "/api/users/alice/bookings", Some("bob"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = app
        .call(
            "GET",
            &format!("/api/services/{id}/bookings"),
            Some("owner"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["items"][0]["id"], booking_id);
}

#[tokio::test]
async fn test_completion_no_show_and_refund() {
    let app = test_app();
    let mut svc = yoga_class();
    svc["payment_settings"]["charge_on_no_show"] = json!({ "enabled": true, "amount": "10" });
    let id = app.create_service(svc).await;

    let mut ids = vec![];
    for user in ["alice", "bob"] {
        let (_, booking) = app
            .call(
                "POST",
                "/api/bookings",
                Some(user),
                Some(booking_request(&id, 1, "tok_ok")),
            )
            .await;
        ids.push(booking["id"].as_str().unwrap().to_string());
    }

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{}/complete", ids[0]),
            Some("owner"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "completed");

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{}/refund", ids[0]),
            Some("owner"),
            Some(json!({ "amount": "5" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["payment"]["status"], "fully_paid");
    assert_eq!(json["status"], "completed");

    let (status, json) = app
        .call(
            "POST",
            &format!("/api/bookings/{}/no-show", ids[1]),
            Some("owner"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "no-show");
    let transactions = json["payment"]["transactions"].as_array().unwrap();
    assert_eq!(transactions.last().unwrap()["kind"], "no_show_charge");
    assert_eq!(transactions.last().unwrap()["status"], "pending");

    // Neither outcome hands the spots back.
    assert_eq!(app.remaining_on(&id, "2025-06-18").await, 2);
}

#[tokio::test]
async fn test_delete_service_with_active_bookings_is_refused() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;
    let (_, booking) = app
        .call(
            "POST",
            "/api/bookings",
            Some("alice"),
            Some(booking_request(&id, 1, "tok_ok")),
        )
        .await;
    let booking_id = booking["id"].as_str().unwrap();

    let uri = format!("/api/services/{id}");
    let (status, _) = app.call("DELETE", &uri, Some("owner"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.call(
        "POST",
        &format!("/api/bookings/{booking_id}/cancel"),
        Some("owner"),
        None,
    )
    .await;
    let (status, _) = app.call("DELETE", &uri, Some("owner"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(
        app.call("GET", &uri, None, None).await.0,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_repricing_leaves_existing_bookings_alone() {
    let app = test_app();
    let id = app.create_service(yoga_class()).await;
    let (status, booking) = app
        .call(
            "POST",
            "/api/bookings",
            Some("alice"),
            Some(booking_request(&id, 2, "tok_ok")),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{booking}");
    let booking_id = booking["id"].as_str().unwrap();
    assert_eq!(decimal(&booking["pricing"]["total_amount"]), Decimal::from(44));

    let (status, _) = app
        .call(
            "POST",
            &format!("/api/services/{id}/pricing"),
            Some("owner"),
            Some(json!({ "pricing_model": "fixed", "base_price": "999" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = app
        .call(
            "GET",
            &format!("/api/bookings/{booking_id}"),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["pricing"], booking["pricing"]);
    assert_eq!(
        decimal(&json["payment"]["transactions"][0]["amount"]),
        Decimal::from(44)
    );
}
