mod common;

use common::*;
use freight_core::api::ApiCall;
use freight_core::confirmation::SlideState;
use freight_core::error::ErrorKind;
use freight_core::lifecycle::{self, DetailedStatus, Tab, Transition};
use freight_core::model::{Bid, BidId, OrderId, Role, UserId};
use freight_core::schedule::TimerOwner;
use freight_core::{Event, UnixTimeMs};
use serde_json::json;

fn is_confirm(call: &ApiCall) -> bool {
    matches!(call, ApiCall::ConfirmCompletion { .. })
}

fn slide(app: &Tester, model: &mut freight_core::Model, order: i64, distance: f64) {
    let order_id = OrderId(order);
    app.update(Event::SlideStarted { order_id, track: 1000.0 }, model);
    app.update(Event::SlideMoved { order_id, distance }, model);
    app.update(Event::SlideReleased { order_id }, model);
}

#[test]
fn slide_below_ninety_percent_sends_nothing() {
    let listing = customer_listing(vec![], vec![in_progress(2)]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    slide(&app, &mut model, 2, 899.0);
    assert!(!model.requests.has_pending(is_confirm));
    assert_eq!(model.slides[&OrderId(2)].state(), SlideState::Pending);

    slide(&app, &mut model, 2, 900.0);
    assert!(model.requests.has_pending(is_confirm));
    assert_eq!(
        model.slides[&OrderId(2)].state(),
        SlideState::Confirmed { acknowledged: false }
    );
}

#[test]
fn committed_slide_sends_exactly_one_request() {
    let listing = customer_listing(vec![], vec![in_progress(2)]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    slide(&app, &mut model, 2, 1000.0);
    let (first, _) = model.requests.find(is_confirm).unwrap();
    // The control is locked; a second gesture is ignored.
    slide(&app, &mut model, 2, 1000.0);
    assert_eq!(model.requests.find(is_confirm).unwrap().0, first);
    assert_eq!(model.requests.len(), 1);

    respond_ok(&app, &mut model, is_confirm, &json!({ "message": "ok" }));
    assert_eq!(
        model.slides[&OrderId(2)].state(),
        SlideState::Confirmed { acknowledged: true }
    );
    assert!(model.requests.has_pending(is_listing));
}

#[test]
fn rejected_confirmation_reopens_the_slide() {
    let listing = customer_listing(vec![], vec![in_progress(2)]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    slide(&app, &mut model, 2, 950.0);
    respond(&app, &mut model, is_confirm, 500, &json!({ "error": "boom" }));
    assert_eq!(model.slides[&OrderId(2)].state(), SlideState::Pending);
    assert_eq!(model.last_error.as_ref().unwrap().kind, ErrorKind::ServerRejection);
}

#[test]
fn second_award_is_rejected_while_first_is_in_flight() {
    let mut searching = order(1, "searching");
    searching["total_bids"] = json!(2);
    let listing = customer_listing(vec![searching], vec![]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    app.update(Event::ViewBids { order_id: OrderId(1) }, &mut model);
    respond_ok(
        &app,
        &mut model,
        |c| matches!(c, ApiCall::LoadBids { .. }),
        &json!([
            { "id": 11, "order_id": 1, "driver_id": 9, "bid_amount": 140000, "created_at": "2024-05-01 10:00:00", "driver_name": "Ivan" },
            { "id": 12, "order_id": 1, "driver_id": 10, "bid_amount": "135000", "created_at": "2024-05-01 11:00:00" }
        ]),
    );
    let bids = app.view(&model).bids.unwrap();
    assert_eq!(bids.rows.len(), 2);
    assert_eq!(bids.rows[0].id, BidId(11));
    assert!(bids.rows[1].is_min);

    app.update(
        Event::SelectWinner {
            order_id: OrderId(1),
            bid_id: BidId(11),
        },
        &mut model,
    );
    app.update(
        Event::SelectWinner {
            order_id: OrderId(1),
            bid_id: BidId(12),
        },
        &mut model,
    );
    assert_eq!(model.last_error.as_ref().unwrap().kind, ErrorKind::Conflict);
    assert_eq!(model.requests.len(), 1);
    assert!(model
        .requests
        .has_pending(|c| matches!(c, ApiCall::SelectWinner { bid_id: BidId(11), .. })));
}

#[test]
fn award_conflict_from_server_resyncs_listing() {
    let mut searching = order(1, "searching");
    searching["total_bids"] = json!(1);
    let listing = customer_listing(vec![searching], vec![]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    app.update(Event::ViewBids { order_id: OrderId(1) }, &mut model);
    respond_ok(
        &app,
        &mut model,
        |c| matches!(c, ApiCall::LoadBids { .. }),
        &json!([{ "id": 11, "order_id": 1, "driver_id": 9, "price": 140000 }]),
    );
    app.update(
        Event::SelectWinner {
            order_id: OrderId(1),
            bid_id: BidId(11),
        },
        &mut model,
    );
    respond(
        &app,
        &mut model,
        |c| matches!(c, ApiCall::SelectWinner { .. }),
        400,
        &json!({ "error": "Winner already selected" }),
    );
    let error = model.last_error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::Conflict);
    assert_eq!(error.message, "Winner already selected");
    assert!(model.awards.state(OrderId(1)).is_none());
    assert!(model.requests.has_pending(is_listing));
}

#[test]
fn cancel_requires_a_reason() {
    let listing = customer_listing(vec![order(1, "searching")], vec![]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    let update = app.update(
        Event::CancelOrder {
            order_id: OrderId(1),
            reason: "   ".into(),
        },
        &mut model,
    );
    assert_eq!(http_count(&update), 0);
    assert_eq!(model.last_error.as_ref().unwrap().kind, ErrorKind::Validation);

    app.update(
        Event::CancelOrder {
            order_id: OrderId(1),
            reason: "  Plans changed ".into(),
        },
        &mut model,
    );
    assert!(model.requests.has_pending(
        |c| matches!(c, ApiCall::CancelOrder { reason, .. } if reason == "Plans changed")
    ));
}

#[test]
fn closing_chat_drops_late_messages_and_stops_polling() {
    let listing = customer_listing(vec![], vec![in_progress(2)]);
    let (app, mut model) = signed_in(Role::Customer, &listing);

    app.update(Event::OpenChat { order_id: OrderId(2) }, &mut model);
    assert!(model.chat.as_ref().unwrap().writable);
    assert!(model.timers.find(&TimerOwner::ChatPoll(OrderId(2))).is_some());
    let (request_id, attempt) = model
        .requests
        .find(|c| matches!(c, ApiCall::LoadMessages { .. }))
        .unwrap();

    app.update(Event::CloseChat, &mut model);
    assert!(model.chat.is_none());
    assert!(model.timers.find(&TimerOwner::ChatPoll(OrderId(2))).is_none());

    app.update(
        Event::ApiCompleted {
            request_id,
            attempt,
            outcome: freight_core::api::ApiOutcome::Response {
                status: 200,
                body: serde_json::to_vec(&json!({ "messages": [
                    { "id": 1, "message_text": "hello", "is_mine": 0 }
                ]}))
                .unwrap(),
            },
        },
        &mut model,
    );
    assert!(model.chat.is_none());
    assert!(app.view(&model).chat.is_none());
}

#[test]
fn empty_chat_message_is_rejected_locally() {
    let listing = customer_listing(vec![], vec![in_progress(2)]);
    let (app, mut model) = signed_in(Role::Customer, &listing);
    app.update(Event::OpenChat { order_id: OrderId(2) }, &mut model);

    let update = app.update(Event::SendMessage { text: "  \n ".into() }, &mut model);
    assert_eq!(http_count(&update), 0);
    assert_eq!(model.last_error.as_ref().unwrap().kind, ErrorKind::Validation);
}

#[test]
fn review_marks_order_reviewed() {
    let mut done = in_progress(3);
    done["status"] = json!("closed");
    done["customer_confirmed"] = json!(1);
    done["driver_confirmed"] = json!(1);
    let listing = json!({ "searching": [], "in_progress": [], "closed": [done] });
    let (app, mut model) = signed_in(Role::Customer, &listing);
    app.update(Event::SwitchTab { tab: Tab::Closed }, &mut model);

    app.update(
        Event::SubmitReview(Box::new(freight_core::reputation::ReviewDraft {
            order_id: OrderId(3),
            rating: 5,
            comment: Some("Fast and careful".into()),
            badges: vec![],
        })),
        &mut model,
    );
    respond_ok(
        &app,
        &mut model,
        |c| matches!(c, ApiCall::CreateReview(p) if p.reviewee_telegram_id.0 == 99),
        &json!({ "message": "ok" }),
    );
    assert!(model.find_order(OrderId(3)).unwrap().customer_reviewed);
}

/// Walks one order through the whole lifecycle with the pure transitions.
#[test]
fn full_lifecycle_scenario() {
    let now = UnixTimeMs(1_700_000_000_000);
    let mut order: freight_core::model::Order =
        serde_json::from_value(order(1, "searching")).unwrap();
    order.bids_count = 1;

    let bid = Bid {
        id: BidId(11),
        order_id: Some(OrderId(1)),
        driver_id: Some(UserId(9)),
        price: Some(140_000),
        created_at: None,
        name: Some("Ivan".into()),
        phone_number: None,
    };
    let order = lifecycle::apply(&order, Transition::SelectWinner { bid: &bid }, now).unwrap();
    assert_eq!(order.winner_driver_id, Some(UserId(9)));
    assert_eq!(lifecycle::tab_for(&order, Role::Driver), Tab::InProgress);

    let other = Bid { id: BidId(12), ..bid.clone() };
    assert!(lifecycle::apply(&order, Transition::SelectWinner { bid: &other }, now).is_err());

    let order = lifecycle::apply(&order, Transition::RecordLoading, now).unwrap();
    let order = lifecycle::apply(&order, Transition::RecordUnloading, now).unwrap();
    let order = lifecycle::apply(&order, Transition::Confirm { role: Role::Driver }, now).unwrap();
    assert_eq!(DetailedStatus::of(&order).label(), "Awaiting customer confirmation");

    let order = lifecycle::apply(&order, Transition::Confirm { role: Role::Customer }, now).unwrap();
    assert!(order.both_confirmed());
    assert_eq!(DetailedStatus::of(&order), DetailedStatus::Completed);
    assert_eq!(lifecycle::tab_for(&order, Role::Customer), Tab::Closed);
}
