#![allow(dead_code)]

use crux_core::testing::{AppTester, Update};
use freight_core::api::ApiCall;
use freight_core::api::ApiOutcome;
use freight_core::config::AppConfig;
use freight_core::model::{Role, TelegramId};
use freight_core::schedule::TimerOwner;
use freight_core::{App, Effect, Event, Model};
use serde_json::{json, Value};

pub type Tester = AppTester<App, Effect>;

pub const T0: u64 = 1_700_000_000_000;
pub const ME: i64 = 42;

pub fn http_count(update: &Update<Effect, Event>) -> usize {
    update
        .effects
        .iter()
        .filter(|e| matches!(e, Effect::Http(_)))
        .count()
}

/// Answers the pending call matching `pred` with `status` and a JSON body.
pub fn respond(
    app: &Tester,
    model: &mut Model,
    pred: impl Fn(&ApiCall) -> bool,
    status: u16,
    body: &Value,
) -> Update<Effect, Event> {
    let (request_id, attempt) = model
        .requests
        .find(pred)
        .expect("no matching request in flight");
    app.update(
        Event::ApiCompleted {
            request_id,
            attempt,
            outcome: ApiOutcome::Response {
                status,
                body: serde_json::to_vec(body).unwrap(),
            },
        },
        model,
    )
}

pub fn respond_ok(
    app: &Tester,
    model: &mut Model,
    pred: impl Fn(&ApiCall) -> bool,
    body: &Value,
) -> Update<Effect, Event> {
    respond(app, model, pred, 200, body)
}

pub fn fire(app: &Tester, model: &mut Model, owner: TimerOwner, now_ms: u64) -> Update<Effect, Event> {
    let id = model.timers.find(&owner).expect("timer not armed");
    app.update(Event::TimerFired { id, now_ms }, model)
}

pub fn is_listing(call: &ApiCall) -> bool {
    matches!(call, ApiCall::LoadOrders { .. })
}

pub fn order(id: i64, status: &str) -> Value {
    json!({
        "id": id,
        "customer_id": 7,
        "pickup_location": "Kazan",
        "delivery_location": "Moscow",
        "description": "Pallets",
        "truck_type_id": 3,
        "price": 150000,
        "status": status,
        "customer_telegram_id": ME,
        "customer_name": "Anna",
    })
}

pub fn in_progress(id: i64) -> Value {
    let mut o = order(id, "in_progress");
    o["winner_driver_id"] = json!(9);
    o["driver_telegram_id"] = json!(99);
    o["driver_name"] = json!("Ivan");
    o["loading_confirmed_at"] = json!("2024-05-01 10:00:00");
    o["unloading_confirmed_at"] = json!("2024-05-02 10:00:00");
    o
}

pub fn customer_listing(searching: Vec<Value>, active: Vec<Value>) -> Value {
    json!({ "searching": searching, "in_progress": active, "closed": [] })
}

/// Boots the core, signs in as `role` and loads `listing`.
pub fn signed_in(role: Role, listing: &Value) -> (Tester, Model) {
    let app = Tester::default();
    let mut model = Model::default();

    app.update(Event::Started(Box::new(AppConfig::default())), &mut model);
    app.update(Event::ClockSynced { now_ms: T0 }, &mut model);
    let update = app.update(
        Event::SessionStarted {
            telegram_id: TelegramId(ME),
        },
        &mut model,
    );
    assert_eq!(http_count(&update), 1);

    let user = json!({ "id": 7, "telegram_id": ME, "name": "Anna", "role": role.as_str() });
    respond_ok(&app, &mut model, |c| matches!(c, ApiCall::LoadProfile), &user);
    respond_ok(&app, &mut model, |c| matches!(c, ApiCall::LoadTruckTypes), &json!([]));
    respond_ok(&app, &mut model, |c| matches!(c, ApiCall::LoadBadges), &json!({ "badges": [] }));
    respond_ok(&app, &mut model, is_listing, listing);
    respond_ok(
        &app,
        &mut model,
        |c| matches!(c, ApiCall::LoadUnreadCounts),
        &json!({ "total_unread": 0, "unread_by_order": {} }),
    );
    assert!(model.requests.is_empty(), "startup left calls in flight");
    (app, model)
}
