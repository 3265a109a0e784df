mod alert;
mod http;
mod timer;

pub use crux_core::render::Render;
pub use crux_http::Http;

pub use self::alert::{Alert, AlertKind, AlertOperation};
pub use self::http::{dispatch, MAX_RESPONSE_BODY_SIZE};
pub use self::timer::{Timer, TimerOperation, TimerOutput};

use crate::app::App;
use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
    pub timer: Timer<Event>,
    pub alert: Alert<Event>,
}
