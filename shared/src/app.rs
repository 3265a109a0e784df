use std::collections::BTreeMap;

use url::Url;
use uuid::Uuid;

use crate::api::{ApiCall, ApiOutcome, RequestId, RequestLedger, TimeoutStep};
use crate::auction::{parse_bid_price, AwardLedger, BidBook};
use crate::cache::{OrderCache, OrderListing, SessionKey};
use crate::capabilities::{self, Capabilities, TimerOutput};
use crate::chat::{validate_message, ChatSession};
use crate::config::AppConfig;
use crate::confirmation::{can_slide, EvidenceStep, PhotoBatch, SlideConfirm, SlideOutcome};
use crate::error::{AppError, ErrorKind, ValidationError};
use crate::event::{Event, PhotoUpload};
use crate::lifecycle::{self, chat_access, tabs_for, Phase, Tab, Transition};
use crate::model::{
    BadgeCatalog, Bid, BidId, BidRequest, CreatedResponse, MessageHistory, Order, OrderDraft, OrderId,
    PhotoRefs, RegistrationForm, Rating, ReviewEntry, Role, SentMessage, TelegramId, TruckCatalog,
    TruckCategory, UnreadSummary, User, UserId, UserStats,
};
use crate::reputation::{Profile, ReviewDraft};
use crate::schedule::{TimerId, TimerOwner, TimerRegistry};
use crate::view::ViewModel;
use crate::{Clock, UnixTimeMs};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Starting,
    Loading,
    Registration,
    Main,
    SignedOut,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ListingState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsPanel {
    pub order_id: OrderId,
    pub book: Option<BidBook>,
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotosPanel {
    pub order_id: OrderId,
    pub photos: Option<PhotoRefs>,
}

pub struct Model {
    pub config: AppConfig,
    pub base_url: Option<Url>,
    pub clock: Clock,
    pub visible: bool,
    pub screen: Screen,

    pub telegram_id: Option<TelegramId>,
    pub user: Option<User>,
    pub active_tab: Option<Tab>,
    pub listing_state: ListingState,
    pub cache: OrderCache,
    pub unread: UnreadSummary,
    pub trucks: TruckCatalog,
    pub badges: BadgeCatalog,

    pub bids_panel: Option<BidsPanel>,
    pub photos_panel: Option<PhotosPanel>,
    pub chat: Option<ChatSession>,
    pub profile: Option<Profile>,
    pub slides: BTreeMap<OrderId, SlideConfirm>,

    pub awards: AwardLedger,
    pub requests: RequestLedger,
    pub timers: TimerRegistry,
    pub last_error: Option<AppError>,
}

impl Default for Model {
    fn default() -> Self {
        let config = AppConfig::default();
        Self {
            base_url: config.base_url().ok(),
            cache: OrderCache::new(config.cache_ttl_ms, config.bid_cache_capacity),
            config,
            clock: Clock::default(),
            visible: true,
            screen: Screen::default(),
            telegram_id: None,
            user: None,
            active_tab: None,
            listing_state: ListingState::default(),
            unread: UnreadSummary::default(),
            trucks: TruckCatalog::default(),
            badges: BadgeCatalog::default(),
            bids_panel: None,
            photos_panel: None,
            chat: None,
            profile: None,
            slides: BTreeMap::new(),
            awards: AwardLedger::default(),
            requests: RequestLedger::default(),
            timers: TimerRegistry::default(),
            last_error: None,
        }
    }
}

impl Model {
    #[must_use]
    pub fn now(&self) -> UnixTimeMs {
        self.clock.now()
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionKey> {
        Some(SessionKey {
            telegram_id: self.telegram_id?,
            role: self.role()?,
        })
    }

    /// The last known listing for this session, fresh or stale.
    #[must_use]
    pub fn listing(&self) -> Option<&OrderListing> {
        self.session().and_then(|s| self.cache.displayable(&s))
    }

    #[must_use]
    pub fn find_order(&self, id: OrderId) -> Option<&Order> {
        self.listing().and_then(|l| l.find(id))
    }

    pub fn set_error(&mut self, error: AppError) {
        self.last_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Drops everything tied to the signed-in user. Returns the timers the
    /// shell still has to cancel.
    fn reset_session(&mut self) -> Vec<TimerId> {
        let mut timers = self.timers.clear();
        timers.extend(self.requests.clear().into_iter().filter_map(|r| r.timer));
        timers.sort_unstable();
        timers.dedup();

        self.telegram_id = None;
        self.user = None;
        self.active_tab = None;
        self.listing_state = ListingState::Idle;
        self.cache.discard();
        self.unread = UnreadSummary::default();
        self.trucks = TruckCatalog::default();
        self.badges = BadgeCatalog::default();
        self.bids_panel = None;
        self.photos_panel = None;
        self.chat = None;
        self.profile = None;
        self.slides.clear();
        self.awards.clear();
        self.last_error = None;
        timers
    }
}

fn timer_event(output: TimerOutput) -> Event {
    match output {
        TimerOutput::Fired { id, now_ms } => Event::TimerFired { id, now_ms },
        TimerOutput::Cancelled { id } => Event::TimerCancelled { id },
    }
}

#[derive(Default)]
pub struct App;

impl App {
    // --- Timers ---

    fn arm_timer(model: &mut Model, caps: &Capabilities, owner: TimerOwner, millis: u64) -> TimerId {
        let (id, replaced) = model.timers.arm(owner);
        if let Some(old) = replaced {
            caps.timer.cancel(old);
        }
        tracing::trace!(timer = %id, ?owner, millis, "timer armed");
        caps.timer.start(id, millis, timer_event);
        id
    }

    fn dispose_timer(model: &mut Model, caps: &Capabilities, id: TimerId) {
        if model.timers.dispose(id).is_some() {
            caps.timer.cancel(id);
        }
    }

    fn arm_refresh(model: &mut Model, caps: &Capabilities) {
        let interval = model.config.refresh_interval_ms;
        Self::arm_timer(model, caps, TimerOwner::ListingRefresh, interval);
    }

    // --- Requests ---

    fn send(model: &mut Model, caps: &Capabilities, call: ApiCall) {
        if call.invalidates_listing() {
            model.cache.invalidate();
        }
        let name = call.name();
        let request_id = model.requests.start(call);
        tracing::debug!(call = name, %request_id, "request started");
        Self::dispatch_attempt(model, caps, request_id);
    }

    fn dispatch_attempt(model: &mut Model, caps: &Capabilities, request_id: RequestId) {
        let Some(entry) = model.requests.get(request_id) else {
            return;
        };
        let call = entry.call.clone();
        let attempt = entry.attempt;

        let prepared = match (&model.base_url, model.telegram_id) {
            (Some(base), Some(telegram_id)) => call
                .prepare(base, telegram_id, request_id)
                .map_err(AppError::from),
            _ => Err(AppError::new(ErrorKind::InvalidState, "No active session")),
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                model.requests.remove(request_id);
                Self::handle_failure(model, caps, call, error);
                return;
            }
        };

        tracing::debug!(call = call.name(), %request_id, attempt, url = %prepared.url, "dispatching");
        capabilities::dispatch(&caps.http, prepared, request_id, attempt);

        let timeout = call.timeout_ms(&model.config);
        let timer = Self::arm_timer(
            model,
            caps,
            TimerOwner::RequestTimeout {
                request: request_id,
                attempt,
            },
            timeout,
        );
        model.requests.set_timer(request_id, timer);
    }

    fn on_request_timeout(model: &mut Model, caps: &Capabilities, request_id: RequestId, attempt: u32) {
        match model.requests.on_timeout(request_id, attempt, &model.config) {
            TimeoutStep::Stale => {
                tracing::trace!(%request_id, attempt, "timeout for settled attempt ignored");
            }
            TimeoutStep::Retry {
                next_attempt,
                delay_ms,
            } => {
                tracing::warn!(%request_id, attempt, next_attempt, delay_ms, "request timed out, retrying");
                Self::arm_timer(
                    model,
                    caps,
                    TimerOwner::RetryBackoff {
                        request: request_id,
                    },
                    delay_ms,
                );
            }
            TimeoutStep::Exhausted => {
                if let Some(entry) = model.requests.remove(request_id) {
                    tracing::error!(call = entry.call.name(), %request_id, attempt, "request timed out after all retries");
                    let error = AppError::timeout()
                        .with_context("call", entry.call.name())
                        .with_context("attempts", attempt.to_string());
                    Self::handle_failure(model, caps, entry.call, error);
                }
            }
        }
    }

    fn on_retry_due(model: &mut Model, caps: &Capabilities, request_id: RequestId) {
        if model.requests.next_attempt(request_id).is_some() {
            Self::dispatch_attempt(model, caps, request_id);
        }
    }

    /// Drops in-flight calls matching `pred` and their timers.
    fn abandon_requests(model: &mut Model, caps: &Capabilities, pred: impl Fn(&ApiCall) -> bool) {
        for entry in model.requests.abandon_where(pred) {
            tracing::debug!(call = entry.call.name(), "request abandoned");
            if let Some(timer) = entry.timer {
                Self::dispose_timer(model, caps, timer);
            }
        }
        let requests = &model.requests;
        let orphaned = model.timers.dispose_where(|owner| match owner {
            TimerOwner::RetryBackoff { request } | TimerOwner::RequestTimeout { request, .. } => {
                requests.get(*request).is_none()
            }
            _ => false,
        });
        for id in orphaned {
            caps.timer.cancel(id);
        }
    }

    fn report(model: &mut Model, caps: &Capabilities, call: &ApiCall, error: AppError) {
        tracing::warn!(
            call = call.name(),
            code = error.code(),
            message = %error.message,
            internal = error.internal_message.as_deref().unwrap_or(""),
            "operation failed"
        );
        caps.alert.error(error.user_facing_message());
        let resync = error.kind.requires_resync();
        model.set_error(error);
        if resync {
            model.cache.invalidate();
            Self::load_listing(model, caps, false);
        }
    }

    fn reject(model: &mut Model, caps: &Capabilities, error: AppError) {
        tracing::info!(code = error.code(), message = %error.message, "action rejected locally");
        caps.alert.error(error.user_facing_message());
        model.set_error(error);
    }

    // --- Listing ---

    fn load_listing(model: &mut Model, caps: &Capabilities, force: bool) {
        let Some(session) = model.session() else {
            return;
        };
        let now = model.now();
        if !force {
            if let Ok(listing) = model.cache.lookup(&session, now) {
                tracing::debug!(orders = listing.len(), "listing served from cache");
                return;
            }
        }
        // A fetch issued before the last invalidation may predate a mutation.
        let generation = model.cache.generation();
        Self::abandon_requests(model, caps, |c| {
            matches!(c, ApiCall::LoadOrders { generation: g, .. } if *g != generation)
        });
        if model
            .requests
            .has_pending(|c| matches!(c, ApiCall::LoadOrders { generation: g, .. } if *g == generation))
        {
            tracing::debug!(generation, "listing fetch already in flight");
            return;
        }
        model.listing_state = ListingState::Loading;
        Self::send(
            model,
            caps,
            ApiCall::LoadOrders {
                role: session.role,
                generation,
            },
        );
        Self::send(model, caps, ApiCall::LoadUnreadCounts);
    }

    /// Server flags win over local slide state; slides for orders no
    /// longer listed are dropped.
    fn reconcile_slides(model: &mut Model) {
        let Some(role) = model.role() else {
            return;
        };
        let flags: Vec<(OrderId, Option<bool>)> = model
            .slides
            .keys()
            .map(|id| (*id, model.find_order(*id).map(|o| o.confirmed_by(role))))
            .collect();
        for (id, flag) in flags {
            match flag {
                Some(server_confirmed) => {
                    if let Some(slide) = model.slides.get_mut(&id) {
                        slide.reconcile(server_confirmed);
                    }
                }
                None => {
                    model.slides.remove(&id);
                }
            }
        }
    }

    fn enter_main(model: &mut Model, caps: &Capabilities) {
        model.screen = Screen::Main;
        if let Some(role) = model.role() {
            let tabs = tabs_for(role);
            if model.active_tab.map_or(true, |t| !tabs.contains(&t)) {
                model.active_tab = tabs.first().copied();
            }
        }
        if !model.trucks.is_loaded() {
            Self::send(model, caps, ApiCall::LoadTruckTypes);
        }
        if model.badges.badges.is_empty() {
            Self::send(model, caps, ApiCall::LoadBadges);
        }
        Self::load_listing(model, caps, false);
        Self::arm_refresh(model, caps);
    }

    fn close_chat(model: &mut Model, caps: &Capabilities) {
        let Some(chat) = model.chat.take() else {
            return;
        };
        if let Some(timer) = chat.poll_timer {
            Self::dispose_timer(model, caps, timer);
        }
        let order_id = chat.order_id;
        Self::abandon_requests(model, caps, |c| {
            matches!(c, ApiCall::LoadMessages { order_id: o } if *o == order_id)
        });
        tracing::debug!(%order_id, "chat closed");
    }

    fn poll_chat(model: &mut Model, caps: &Capabilities, order_id: OrderId) {
        let pending = model
            .requests
            .has_pending(|c| matches!(c, ApiCall::LoadMessages { order_id: o } if *o == order_id));
        if !pending {
            Self::send(model, caps, ApiCall::LoadMessages { order_id });
        }
        let interval = model.config.chat_poll_ms;
        let timer = Self::arm_timer(model, caps, TimerOwner::ChatPoll(order_id), interval);
        if let Some(chat) = model.chat.as_mut() {
            chat.poll_timer = Some(timer);
        }
    }

    // --- Validation helpers ---

    fn require_role(model: &Model, role: Role) -> Result<(), AppError> {
        match model.role() {
            Some(r) if r == role => Ok(()),
            _ => Err(AppError::new(ErrorKind::InvalidState, "This action is not available for your role")),
        }
    }

    fn require_order(model: &Model, order_id: OrderId) -> Result<Order, AppError> {
        model
            .find_order(order_id)
            .cloned()
            .ok_or_else(|| AppError::new(ErrorKind::NotFound, "Order not found").with_context("order_id", order_id.to_string()))
    }

    fn validate_draft(draft: &OrderDraft) -> Result<(), ValidationError> {
        let required = [
            ("Truck type", &draft.truck_type_id),
            ("Pickup location", &draft.pickup_location),
            ("Delivery location", &draft.delivery_location),
            ("Cargo description", &draft.description),
        ];
        if let Some(&(field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(ValidationError::Required { field });
        }
        if draft.price == Some(0) {
            return Err(ValidationError::InvalidPrice);
        }
        Ok(())
    }

    fn validate_registration(form: &RegistrationForm) -> Result<(), ValidationError> {
        if form.name.trim().is_empty() {
            return Err(ValidationError::Required { field: "Name" });
        }
        if form.phone_number.trim().is_empty() {
            return Err(ValidationError::Required { field: "Phone number" });
        }
        if form.role == Role::Driver && form.truck_type.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(ValidationError::Required { field: "Truck type" });
        }
        Ok(())
    }

    fn actor_id(model: &Model) -> Result<UserId, AppError> {
        model
            .user
            .as_ref()
            .and_then(|u| u.id)
            .ok_or_else(|| AppError::new(ErrorKind::InvalidState, "Your profile is not loaded yet"))
    }

    // --- Intents ---

    fn place_bid(model: &mut Model, caps: &Capabilities, order_id: OrderId, price: &str) -> Result<(), AppError> {
        Self::require_role(model, Role::Driver)?;
        let price = parse_bid_price(price)?;
        if let Some(order) = model.find_order(order_id) {
            let phase = order.status.phase();
            if phase != Phase::Bidding {
                return Err(AppError::conflict("Bidding on this order has ended")
                    .with_context("phase", phase.to_string()));
            }
        }
        tracing::info!(%order_id, price, "placing bid");
        Self::send(model, caps, ApiCall::PlaceBid(BidRequest { order_id, price }));
        Ok(())
    }

    fn view_bids(model: &mut Model, caps: &Capabilities, order_id: OrderId) -> Result<(), AppError> {
        Self::require_role(model, Role::Customer)?;
        let cached = model.cache.bids(order_id).map(|b| BidBook::new(b.to_vec()));
        let from_cache = cached.is_some();
        model.bids_panel = Some(BidsPanel {
            order_id,
            book: cached,
            failed: false,
        });
        if !from_cache {
            Self::send(model, caps, ApiCall::LoadBids { order_id });
        }
        Ok(())
    }

    fn select_winner(model: &mut Model, caps: &Capabilities, order_id: OrderId, bid_id: BidId) -> Result<(), AppError> {
        Self::require_role(model, Role::Customer)?;
        let order = Self::require_order(model, order_id)?;
        lifecycle::award_open(&order)?;
        model.awards.ensure_open(order_id)?;
        let bid: Bid = model
            .bids_panel
            .as_ref()
            .filter(|p| p.order_id == order_id)
            .and_then(|p| p.book.as_ref())
            .and_then(|b| b.find(bid_id).cloned())
            .or_else(|| {
                model
                    .cache
                    .peek_bids(order_id)
                    .and_then(|bids| bids.iter().find(|b| b.id == bid_id).cloned())
            })
            .ok_or_else(|| AppError::new(ErrorKind::NotFound, "Bid not found").with_context("bid_id", bid_id.to_string()))?;

        lifecycle::apply(&order, Transition::SelectWinner { bid: &bid }, model.now())?;
        model.awards.begin(order_id, bid_id)?;
        tracing::info!(%order_id, %bid_id, "selecting winner");
        Self::send(model, caps, ApiCall::SelectWinner { order_id, bid_id });
        Ok(())
    }

    fn cancel_order(model: &mut Model, caps: &Capabilities, order_id: OrderId, reason: &str) -> Result<(), AppError> {
        let order = Self::require_order(model, order_id)?;
        let by = Self::actor_id(model)?;
        let cancelled = lifecycle::apply(&order, Transition::Cancel { by, reason }, model.now())?;
        let reason = cancelled.cancellation_reason.unwrap_or_default();
        tracing::info!(%order_id, "cancelling order");
        Self::send(model, caps, ApiCall::CancelOrder { order_id, reason });
        Ok(())
    }

    fn release_slide(model: &mut Model, caps: &Capabilities, order_id: OrderId) -> Result<(), AppError> {
        let Some(outcome) = model.slides.get_mut(&order_id).map(SlideConfirm::release) else {
            return Ok(());
        };
        match outcome {
            SlideOutcome::Commit => {}
            SlideOutcome::Reset => {
                tracing::debug!(%order_id, "slide released below threshold");
                return Ok(());
            }
            SlideOutcome::Ignored | SlideOutcome::Moved => return Ok(()),
        }

        let checked = model
            .role()
            .ok_or_else(|| AppError::new(ErrorKind::InvalidState, "No active session"))
            .and_then(|role| {
                let order = Self::require_order(model, order_id)?;
                lifecycle::apply(&order, Transition::Confirm { role }, model.now())
                    .map_err(AppError::from)
            });
        if let Err(error) = checked {
            if let Some(slide) = model.slides.get_mut(&order_id) {
                slide.reject();
            }
            return Err(error);
        }

        tracing::info!(%order_id, "completion confirmed by slide");
        Self::send(model, caps, ApiCall::ConfirmCompletion { order_id });
        Ok(())
    }

    fn upload_photos(model: &mut Model, caps: &Capabilities, upload: PhotoUpload) -> Result<(), AppError> {
        Self::require_role(model, Role::Driver)?;
        let order = Self::require_order(model, upload.order_id)?;
        let expected = EvidenceStep::of(&order).and_then(EvidenceStep::photo_stage);
        if expected != Some(upload.stage) {
            return Err(AppError::conflict("Photos for this stage cannot be uploaded now")
                .with_context("stage", upload.stage.as_str()));
        }
        if model.requests.has_pending(
            |c| matches!(c, ApiCall::UploadPhotos { order_id, .. } if *order_id == upload.order_id),
        ) {
            return Err(AppError::new(ErrorKind::InvalidState, "An upload is already in progress"));
        }
        let telegram_id = model
            .telegram_id
            .ok_or_else(|| AppError::new(ErrorKind::InvalidState, "No active session"))?;

        let batch = PhotoBatch::new(upload.stage, upload.files, model.config.max_photos)?;
        let boundary = format!("----freight{}", Uuid::new_v4().simple());
        let (content_type, body) = batch.to_multipart(telegram_id.get(), &boundary);
        tracing::info!(order_id = %upload.order_id, stage = upload.stage.as_str(), files = batch.len(), bytes = body.len(), "uploading photos");
        Self::send(
            model,
            caps,
            ApiCall::UploadPhotos {
                order_id: upload.order_id,
                stage: upload.stage,
                content_type,
                body,
            },
        );
        Ok(())
    }

    fn open_chat(model: &mut Model, caps: &Capabilities, order_id: OrderId) -> Result<(), AppError> {
        let order = Self::require_order(model, order_id)?;
        let writable = chat_access(&order).ok_or_else(|| {
            AppError::new(ErrorKind::InvalidState, "Chat is available once a driver is selected")
        })?;
        Self::close_chat(model, caps);

        model.chat = Some(ChatSession::new(order_id, writable));
        Self::send(model, caps, ApiCall::MarkMessagesRead { order_id });
        if writable {
            Self::poll_chat(model, caps, order_id);
        } else {
            Self::send(model, caps, ApiCall::LoadMessages { order_id });
        }
        tracing::debug!(%order_id, writable, "chat opened");
        Ok(())
    }

    fn send_message(model: &mut Model, caps: &Capabilities, text: &str) -> Result<(), AppError> {
        let max = model.config.max_message_chars;
        let Some(chat) = model.chat.as_mut().filter(|c| c.writable) else {
            return Err(AppError::new(ErrorKind::InvalidState, "Chat is read-only"));
        };
        let text = validate_message(text, max)?;
        chat.sending = true;
        let order_id = chat.order_id;
        Self::send(model, caps, ApiCall::SendMessage { order_id, text });
        Ok(())
    }

    fn submit_review(model: &mut Model, caps: &Capabilities, draft: ReviewDraft) -> Result<(), AppError> {
        let order = Self::require_order(model, draft.order_id)?;
        let (Some(telegram_id), Some(role)) = (model.telegram_id, model.role()) else {
            return Err(AppError::new(ErrorKind::InvalidState, "No active session"));
        };
        let payload = draft.validate(&order, telegram_id, role, &model.badges)?;
        tracing::info!(order_id = %payload.order_id, rating = payload.rating, "submitting review");
        Self::send(model, caps, ApiCall::CreateReview(payload));
        Ok(())
    }

    // --- Responses ---

    fn handle_failure(model: &mut Model, caps: &Capabilities, call: ApiCall, error: AppError) {
        Self::handle_response(model, caps, call, Err(error));
    }

    fn handle_response(model: &mut Model, caps: &Capabilities, call: ApiCall, outcome: Result<ApiOutcome, AppError>) {
        if call.invalidates_listing() {
            model.cache.invalidate();
        }

        macro_rules! decode {
            ($ty:ty) => {
                outcome.and_then(|o| o.decode::<$ty>(&call))
            };
        }

        match &call {
            ApiCall::LoadProfile => match decode!(User) {
                Ok(user) => {
                    if model.user.as_ref().is_some_and(|u| u.role != user.role) {
                        tracing::info!("role changed, discarding cached listing");
                        model.cache.discard();
                        model.slides.clear();
                    }
                    tracing::info!(role = %user.role, "profile loaded");
                    model.user = Some(user);
                    Self::enter_main(model, caps);
                }
                Err(error) if error.kind == ErrorKind::NotFound => {
                    tracing::info!("no profile, registration required");
                    model.screen = Screen::Registration;
                }
                Err(error) => {
                    model.screen = Screen::Failed {
                        message: error.user_facing_message(),
                    };
                    Self::report(model, caps, &call, error);
                }
            },
            ApiCall::Register(_) => match outcome.and_then(|o| o.into_body(&call)) {
                Ok(_) => {
                    tracing::info!("registered");
                    model.screen = Screen::Loading;
                    Self::send(model, caps, ApiCall::LoadProfile);
                }
                Err(error) => Self::report(model, caps, &call, error),
            },
            ApiCall::LoadTruckTypes => match decode!(Vec<TruckCategory>) {
                Ok(categories) => model.trucks = TruckCatalog { categories },
                Err(error) => tracing::warn!(code = error.code(), "truck catalog unavailable"),
            },
            ApiCall::LoadBadges => match decode!(BadgeCatalog) {
                Ok(catalog) => model.badges = catalog,
                Err(error) => tracing::warn!(code = error.code(), "badge catalog unavailable"),
            },
            ApiCall::LoadOrders { role, generation } => {
                let session = model.session().filter(|s| s.role == *role);
                match (decode!(OrderListing), session) {
                    (Ok(listing), Some(session)) => {
                        let now = model.now();
                        tracing::info!(orders = listing.len(), role = %role, generation, "listing loaded");
                        model.cache.store(session, listing, now, *generation);
                        model.listing_state = ListingState::Loaded;
                        Self::reconcile_slides(model);
                    }
                    (Ok(_), None) => tracing::debug!(role = %role, "listing for a previous session dropped"),
                    (Err(error), _) => {
                        tracing::warn!(code = error.code(), message = %error.message, "listing load failed");
                        model.listing_state = ListingState::Failed {
                            message: error.user_facing_message(),
                        };
                        model.set_error(error);
                    }
                }
            }
            ApiCall::LoadUnreadCounts => match decode!(UnreadSummary) {
                Ok(summary) => model.unread = summary,
                Err(error) => {
                    tracing::warn!(code = error.code(), "unread counts unavailable");
                    model.unread = UnreadSummary::default();
                }
            },
            ApiCall::CreateOrder(_) => match decode!(CreatedResponse) {
                Ok(created) => {
                    tracing::info!(order_id = created.id, "order created");
                    caps.alert.info("Order created");
                    model.active_tab = Some(Tab::Searching);
                    Self::load_listing(model, caps, true);
                }
                Err(error) => Self::report(model, caps, &call, error),
            },
            ApiCall::PlaceBid(bid) => match outcome.and_then(|o| o.into_body(&call)) {
                Ok(_) => {
                    tracing::info!(order_id = %bid.order_id, price = bid.price, "bid placed");
                    caps.alert.info("Bid placed");
                    Self::load_listing(model, caps, true);
                }
                Err(error) => Self::report(model, caps, &call, error),
            },
            ApiCall::LoadBids { order_id } => {
                let order_id = *order_id;
                match decode!(Vec<Bid>) {
                    Ok(bids) => {
                        let book = BidBook::new(bids);
                        tracing::debug!(%order_id, bids = book.len(), "bids loaded");
                        model.cache.store_bids(order_id, book.bids().to_vec());
                        if let Some(panel) = model.bids_panel.as_mut().filter(|p| p.order_id == order_id) {
                            panel.book = Some(book);
                            panel.failed = false;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(%order_id, code = error.code(), "bids unavailable");
                        if let Some(panel) = model.bids_panel.as_mut().filter(|p| p.order_id == order_id) {
                            panel.book = Some(BidBook::default());
                            panel.failed = true;
                        }
                    }
                }
            }
            ApiCall::SelectWinner { order_id, bid_id } => {
                let order_id = *order_id;
                match outcome.and_then(|o| o.into_body(&call)) {
                    Ok(_) => {
                        tracing::info!(%order_id, %bid_id, "winner selected");
                        model.awards.confirm(order_id);
                        model.bids_panel = None;
                        caps.alert.info("Driver selected");
                        Self::load_listing(model, caps, true);
                    }
                    Err(error) => {
                        model.awards.abandon(order_id);
                        Self::report(model, caps, &call, error);
                    }
                }
            }
            ApiCall::ConfirmCompletion { order_id } => {
                let order_id = *order_id;
                match outcome.and_then(|o| o.into_body(&call)) {
                    Ok(_) => {
                        if let Some(slide) = model.slides.get_mut(&order_id) {
                            slide.acknowledge();
                        }
                        tracing::info!(%order_id, "completion acknowledged");
                        caps.alert.info("Completion confirmed");
                        Self::load_listing(model, caps, true);
                    }
                    Err(error) => {
                        if let Some(slide) = model.slides.get_mut(&order_id) {
                            slide.reject();
                        }
                        Self::report(model, caps, &call, error);
                    }
                }
            }
            ApiCall::CancelOrder { order_id, .. } => match outcome.and_then(|o| o.into_body(&call)) {
                Ok(_) => {
                    tracing::info!(%order_id, "order cancelled");
                    model.slides.remove(order_id);
                    caps.alert.info("Order cancelled");
                    Self::load_listing(model, caps, true);
                }
                Err(error) => Self::report(model, caps, &call, error),
            },
            ApiCall::UploadPhotos { order_id, stage, .. } => match outcome.and_then(|o| o.into_body(&call)) {
                Ok(_) => {
                    tracing::info!(%order_id, stage = stage.as_str(), "photos uploaded");
                    caps.alert.info("Photos uploaded");
                    Self::load_listing(model, caps, true);
                }
                Err(error) => Self::report(model, caps, &call, error),
            },
            ApiCall::LoadPhotos { order_id } => {
                let photos = decode!(PhotoRefs).unwrap_or_else(|error| {
                    tracing::warn!(%order_id, code = error.code(), "photos unavailable");
                    PhotoRefs::default()
                });
                if let Some(panel) = model.photos_panel.as_mut().filter(|p| p.order_id == *order_id) {
                    panel.photos = Some(photos);
                }
            }
            ApiCall::LoadMessages { order_id } => {
                let order_id = *order_id;
                match (decode!(MessageHistory), model.chat.as_mut()) {
                    (Ok(history), Some(chat)) if chat.accepts(order_id) => {
                        if chat.apply_history(history) {
                            tracing::debug!(%order_id, messages = chat.messages.len(), "chat updated");
                        }
                    }
                    (Ok(_), _) => tracing::debug!(%order_id, "messages for a closed chat dropped"),
                    (Err(error), _) => tracing::warn!(%order_id, code = error.code(), "messages unavailable"),
                }
            }
            ApiCall::SendMessage { order_id, .. } => {
                let order_id = *order_id;
                let result = decode!(SentMessage);
                if let Some(chat) = model.chat.as_mut().filter(|c| c.accepts(order_id)) {
                    chat.sending = false;
                    if let Ok(sent) = &result {
                        chat.push_sent(sent.message.clone());
                    }
                }
                match result {
                    Ok(_) => tracing::debug!(%order_id, "message sent"),
                    Err(error) => Self::report(model, caps, &call, error),
                }
            }
            ApiCall::MarkMessagesRead { order_id } => match outcome.and_then(|o| o.into_body(&call)) {
                Ok(_) => model.unread.mark_read(*order_id),
                Err(error) => tracing::warn!(%order_id, code = error.code(), "could not mark messages read"),
            },
            ApiCall::LoadRating { telegram_id } => {
                let rating = decode!(Rating).unwrap_or_else(|error| {
                    tracing::warn!(%telegram_id, code = error.code(), "rating unavailable");
                    Rating::default()
                });
                if let Some(profile) = model.profile.as_mut().filter(|p| p.is_for(*telegram_id)) {
                    profile.rating = rating;
                    profile.part_done();
                }
            }
            ApiCall::LoadStats { telegram_id } => {
                let stats = decode!(UserStats).unwrap_or_else(|error| {
                    tracing::warn!(%telegram_id, code = error.code(), "stats unavailable");
                    UserStats::default()
                });
                if let Some(profile) = model.profile.as_mut().filter(|p| p.is_for(*telegram_id)) {
                    profile.stats = stats;
                    profile.part_done();
                }
            }
            ApiCall::LoadReviews { telegram_id } => {
                let reviews = decode!(Vec<ReviewEntry>).unwrap_or_else(|error| {
                    tracing::warn!(%telegram_id, code = error.code(), "reviews unavailable");
                    Vec::new()
                });
                if let Some(profile) = model.profile.as_mut().filter(|p| p.is_for(*telegram_id)) {
                    profile.reviews = reviews;
                    profile.part_done();
                }
            }
            ApiCall::CreateReview(payload) => match outcome.and_then(|o| o.into_body(&call)) {
                Ok(_) => {
                    let order_id = payload.order_id;
                    tracing::info!(%order_id, "review submitted");
                    if let (Some(session), Some(role)) = (model.session(), model.role()) {
                        if let Some(order) = model
                            .cache
                            .displayable_mut(&session)
                            .and_then(|l| l.find_mut(order_id))
                        {
                            match role {
                                Role::Customer => order.customer_reviewed = true,
                                Role::Driver => order.driver_reviewed = true,
                            }
                        }
                    }
                    caps.alert.info("Thank you for your review");
                }
                Err(error) => Self::report(model, caps, &call, error),
            },
        }
    }

    fn on_timer(model: &mut Model, caps: &Capabilities, id: TimerId) {
        let Some(owner) = model.timers.fire(id) else {
            tracing::trace!(timer = %id, "late firing dropped");
            return;
        };
        match owner {
            TimerOwner::ListingRefresh => {
                if model.screen != Screen::Main {
                    return;
                }
                if let Some(session) = model.session() {
                    if model.cache.should_background_refresh(&session, model.now(), model.visible) {
                        tracing::debug!("background refresh");
                        Self::load_listing(model, caps, false);
                    }
                }
                Self::arm_refresh(model, caps);
            }
            TimerOwner::ChatPoll(order_id) => {
                if model.chat.as_ref().is_some_and(|c| c.accepts(order_id)) {
                    Self::poll_chat(model, caps, order_id);
                }
            }
            TimerOwner::RequestTimeout { request, attempt } => {
                Self::on_request_timeout(model, caps, request, attempt);
            }
            TimerOwner::RetryBackoff { request } => Self::on_retry_due(model, caps, request),
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        let event_name = event.name();
        if event.is_user_initiated() {
            tracing::debug!(event = event_name, "user action");
        }

        let result: Result<(), AppError> = match event {
            Event::Started(config) => {
                let config = config.normalized();
                match config.base_url() {
                    Ok(url) => {
                        model.base_url = Some(url);
                        model.cache = OrderCache::new(config.cache_ttl_ms, config.bid_cache_capacity);
                        model.config = config;
                        tracing::info!(api = %model.config.api_base_url, "core started");
                        Ok(())
                    }
                    Err(error) => {
                        model.base_url = None;
                        model.screen = Screen::Failed {
                            message: error.user_facing_message(),
                        };
                        Err(error)
                    }
                }
            }
            Event::ClockSynced { now_ms } => {
                model.clock.sync(UnixTimeMs(now_ms));
                return;
            }
            Event::VisibilityChanged { visible } => {
                model.visible = visible;
                tracing::debug!(visible, "visibility changed");
                if visible && model.screen == Screen::Main {
                    if let Some(session) = model.session() {
                        if model.cache.should_background_refresh(&session, model.now(), true) {
                            Self::load_listing(model, caps, false);
                        }
                    }
                }
                Ok(())
            }
            Event::SessionStarted { telegram_id } => {
                if model.telegram_id.is_some_and(|t| t != telegram_id) {
                    for timer in model.reset_session() {
                        caps.timer.cancel(timer);
                    }
                }
                model.telegram_id = Some(telegram_id);
                model.screen = Screen::Loading;
                tracing::info!(%telegram_id, "session started");
                Self::send(model, caps, ApiCall::LoadProfile);
                Ok(())
            }
            Event::Register(form) => {
                if model.screen != Screen::Registration {
                    Err(AppError::new(ErrorKind::InvalidState, "Already registered"))
                } else {
                    match Self::validate_registration(&form) {
                        Ok(()) => {
                            Self::send(model, caps, ApiCall::Register(*form));
                            Ok(())
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            }
            Event::Logout => {
                for timer in model.reset_session() {
                    caps.timer.cancel(timer);
                }
                model.screen = Screen::SignedOut;
                tracing::info!("signed out");
                Ok(())
            }
            Event::DismissError => {
                model.clear_error();
                Ok(())
            }
            Event::SwitchTab { tab } => match model.role() {
                Some(role) if tabs_for(role).contains(&tab) => {
                    model.active_tab = Some(tab);
                    Self::load_listing(model, caps, false);
                    Ok(())
                }
                _ => Err(AppError::new(ErrorKind::InvalidState, "Tab not available")
                    .with_context("tab", tab.as_str())),
            },
            Event::Refresh => {
                model.cache.invalidate();
                Self::load_listing(model, caps, true);
                Ok(())
            }
            Event::CreateOrder(draft) => Self::require_role(model, Role::Customer)
                .and_then(|()| Ok(Self::validate_draft(&draft)?))
                .map(|()| Self::send(model, caps, ApiCall::CreateOrder(*draft))),
            Event::PlaceBid { order_id, price } => Self::place_bid(model, caps, order_id, &price),
            Event::ViewBids { order_id } => Self::view_bids(model, caps, order_id),
            Event::CloseBids => {
                model.bids_panel = None;
                Ok(())
            }
            Event::SelectWinner { order_id, bid_id } => Self::select_winner(model, caps, order_id, bid_id),
            Event::CancelOrder { order_id, reason } => Self::cancel_order(model, caps, order_id, &reason),
            Event::SlideStarted { order_id, track } => {
                let allowed = match (model.find_order(order_id), model.role()) {
                    (Some(order), Some(role)) => can_slide(order, role),
                    _ => false,
                };
                if allowed {
                    model
                        .slides
                        .entry(order_id)
                        .or_insert_with(|| SlideConfirm::new(track))
                        .begin(track);
                } else {
                    tracing::debug!(%order_id, "slide not available");
                }
                Ok(())
            }
            Event::SlideMoved { order_id, distance } => {
                if let Some(slide) = model.slides.get_mut(&order_id) {
                    slide.drag_to(distance);
                }
                Ok(())
            }
            Event::SlideReleased { order_id } => Self::release_slide(model, caps, order_id),
            Event::UploadPhotos(upload) => Self::upload_photos(model, caps, *upload),
            Event::ViewPhotos { order_id } => {
                model.photos_panel = Some(PhotosPanel {
                    order_id,
                    photos: None,
                });
                Self::send(model, caps, ApiCall::LoadPhotos { order_id });
                Ok(())
            }
            Event::ClosePhotos => {
                model.photos_panel = None;
                Ok(())
            }
            Event::OpenChat { order_id } => Self::open_chat(model, caps, order_id),
            Event::CloseChat => {
                Self::close_chat(model, caps);
                Ok(())
            }
            Event::SendMessage { text } => Self::send_message(model, caps, &text),
            Event::OpenProfile { telegram_id } => {
                model.profile = Some(Profile::loading(telegram_id));
                Self::send(model, caps, ApiCall::LoadRating { telegram_id });
                Self::send(model, caps, ApiCall::LoadStats { telegram_id });
                Self::send(model, caps, ApiCall::LoadReviews { telegram_id });
                Ok(())
            }
            Event::CloseProfile => {
                model.profile = None;
                Ok(())
            }
            Event::SubmitReview(draft) => Self::submit_review(model, caps, *draft),
            Event::ApiCompleted {
                request_id,
                attempt,
                outcome: ApiOutcome::TimedOut,
            } => {
                if model.requests.is_current(request_id, attempt) {
                    if let Some(timer) = model.requests.get(request_id).and_then(|e| e.timer) {
                        Self::dispose_timer(model, caps, timer);
                    }
                    tracing::debug!(%request_id, attempt, "shell reported a timeout");
                }
                Self::on_request_timeout(model, caps, request_id, attempt);
                Ok(())
            }
            Event::ApiCompleted {
                request_id,
                attempt,
                outcome,
            } => {
                match model.requests.settle(request_id, attempt) {
                    Some(entry) => {
                        if let Some(timer) = entry.timer {
                            Self::dispose_timer(model, caps, timer);
                        }
                        tracing::debug!(
                            call = entry.call.name(),
                            %request_id,
                            attempt,
                            status = outcome.status().unwrap_or(0),
                            "request completed"
                        );
                        Self::handle_response(model, caps, entry.call, Ok(outcome));
                    }
                    None => {
                        tracing::debug!(%request_id, attempt, "stale response dropped");
                        return;
                    }
                }
                Ok(())
            }
            Event::TimerFired { id, now_ms } => {
                model.clock.sync(UnixTimeMs(now_ms));
                Self::on_timer(model, caps, id);
                Ok(())
            }
            Event::TimerCancelled { id } => {
                tracing::trace!(timer = %id, "timer cancelled by shell");
                return;
            }
        };

        if let Err(error) = result {
            Self::reject(model, caps, error);
        }
        caps.render.render();
    }

    fn view(&self, model: &Model) -> ViewModel {
        crate::view::build(model)
    }
}
