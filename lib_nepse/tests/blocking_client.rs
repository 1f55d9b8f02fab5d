#![cfg(feature = "blocking")]

mod common;

use common::*;
use lib_nepse::{BlockingNepseClient, NepseError, PayloadVariant, TransportKind, PROMOTER_SECTOR};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn client(transport: &Arc<ScriptedTransport>) -> BlockingNepseClient {
    BlockingNepseClient::builder(config())
        .transport(transport.clone())
        .clock(clock())
        .build()
        .unwrap()
}

#[test]
fn floor_sheet_is_fetched_page_by_page() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    transport.on(FLOOR_SHEET_PATH, |req, _| ok(floor_sheet_page(page_of(req), 3)));
    let client = client(&transport);

    let rows = client.get_floor_sheet().unwrap();
    let ids: Vec<u64> = rows.iter().map(|r| r["contractId"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 11, 12, 21, 22]);

    let pages: Vec<u32> = transport.requests_to(FLOOR_SHEET_PATH).iter().map(page_of).collect();
    assert_eq!(pages, vec![0, 1, 2]);
    for request in transport.requests_to(FLOOR_SHEET_PATH) {
        assert_eq!(body_of(&request), json!({"id": 5827}));
    }
}

#[test]
fn empty_first_page_ends_the_fetch() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    transport.on(FLOOR_SHEET_PATH, |_, _| ok(json!(null)));
    let client = client(&transport);

    assert!(client.get_floor_sheet_pages().unwrap().is_empty());
    assert_eq!(transport.count(FLOOR_SHEET_PATH), 1);
}

#[test]
fn threads_serialized_behind_a_lock_share_one_token_fetch() {
    let transport = ScriptedTransport::new();
    transport.on(AUTH_PATH, |_, n| ok(token_body(n + 1)).after(Duration::from_millis(20)));
    let client = Arc::new(Mutex::new(client(&transport)));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.lock().unwrap().get_access_token())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().unwrap(), "token-1");
    }
    assert_eq!(transport.count(AUTH_PATH), 1);
}

#[test]
fn failed_token_fetch_is_not_repeated_within_one_call() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    transport.on(AUTH_PATH, |_, _| status(503, "maintenance"));
    let client = client(&transport);

    let err = client.get_market_status().unwrap_err();
    assert!(matches!(err, NepseError::Authentication { status: 503, .. }));
    assert_eq!(transport.count(AUTH_PATH), 1);
    assert_eq!(transport.count(MARKET_OPEN_PATH), 0);
}

#[test]
fn unsigned_requests_never_refresh_the_token() {
    let transport = ScriptedTransport::new();
    transport.on("/api/nots/public", |_, _| status(401, "no"));
    let client = client(&transport);

    let err = client.request_get("/api/nots/public", false).unwrap_err();
    assert!(matches!(err, NepseError::RetriesExhausted { attempts: 4, .. }));
    assert_eq!(transport.count("/api/nots/public"), 4);
    assert_eq!(transport.count(AUTH_PATH), 0);
}

#[test]
fn unauthorized_refreshes_and_recomputes_the_payload() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    transport.on(AUTH_PATH, |_, n| {
        let mut body = token_body(n + 1);
        // The second grant rotates salt4, which the floor-sheet payload uses.
        if n > 0 {
            body["salt4"] = json!(401);
        }
        ok(body)
    });
    transport.on(FLOOR_SHEET_PATH, |_, n| match n {
        0 => status(401, "expired"),
        _ => ok(json!([{"contractId": 1}])),
    });
    let client = client(&transport);

    let page = client.get_floor_sheet_page(0).unwrap().unwrap();
    assert_eq!(page.content.len(), 1);
    assert_eq!(client.token_refreshes(), 2);

    let bodies: Vec<_> = transport.requests_to(FLOOR_SHEET_PATH).iter().map(body_of).collect();
    assert_eq!(bodies, vec![json!({"id": 5827}), json!({"id": 127 + 401 * 15 - 300})]);
}

#[test]
fn transport_failures_exhaust_the_budget() {
    let transport = ScriptedTransport::new();
    transport.on(MARKET_OPEN_PATH, |_, _| fail(TransportKind::Connect));
    let client = client(&transport);

    let err = client.get_market_status().unwrap_err();
    assert!(matches!(err, NepseError::RetriesExhausted { attempts: 4, .. }));
    assert_eq!(err.transport_kind(), Some(TransportKind::Connect));
    assert_eq!(transport.count(MARKET_OPEN_PATH), 4);
}

#[test]
fn client_errors_are_not_retried() {
    let transport = ScriptedTransport::new();
    transport.on(MARKET_OPEN_PATH, |_, _| status(400, r#"{"password":"hunter2"}"#));
    let client = client(&transport);

    let err = client.get_market_status().unwrap_err();
    assert!(matches!(err, NepseError::Client { status: 400, .. }));
    assert!(!err.body().unwrap_or_default().contains("hunter2"));
    assert_eq!(transport.count(MARKET_OPEN_PATH), 1);
}

#[test]
fn cancellation_stops_before_the_next_attempt() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    let client = client(&transport);

    client.cancellation_token().cancel();
    assert!(matches!(client.get_market_status(), Err(NepseError::Cancelled)));
    assert_eq!(transport.count(MARKET_OPEN_PATH), 0);
}

#[test]
fn identifiers_and_details_resolve_in_order() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    with_listings(&transport);
    for id in [131, 132] {
        transport.on(&format!("/api/nots/security/{id}"), move |_, _| ok(json!({"securityId": id})));
    }
    let client = client(&transport);

    let details = client.get_company_details_many(&["UPPER", "nabil"]).unwrap();
    let ids: Vec<i64> = details.iter().map(|d| d["securityId"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![132, 131]);
    assert_eq!(transport.count(SECURITY_LIST_PATH), 1);

    let sectors = client.get_sector_map().unwrap();
    assert_eq!(sectors[PROMOTER_SECTOR], vec!["NABILP"]);

    assert!(matches!(
        client.get_daily_scrip_price_graph("ZZZ"),
        Err(NepseError::UnknownSymbol(_))
    ));
    assert_eq!(client.get_payload_id(PayloadVariant::Scrip).unwrap(), 127);
}

#[test]
fn floor_sheet_of_a_business_date_salts_with_that_day() {
    let transport = ScriptedTransport::new();
    transport.with_market_status();
    with_listings(&transport);
    transport.on("/api/nots/security/floorsheet/131", |req, _| ok(floor_sheet_page(page_of(req), 2)));
    let client = client(&transport);

    let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
    assert_eq!(client.get_floor_sheet_of("NABIL", Some(date)).unwrap().len(), 4);
    assert_eq!(client.get_floor_sheet_of("nabil", None).unwrap().len(), 4);

    let bodies: Vec<_> = transport
        .requests_to("/api/nots/security/floorsheet/131")
        .iter()
        .map(body_of)
        .collect();
    // 127 + salt4 * day - salt3, with the business day first and today after.
    let dated = json!({"id": 127 + 400 * 10 - 300});
    let today = json!({"id": 5827});
    assert_eq!(bodies, vec![dated.clone(), dated, today.clone(), today]);
}
