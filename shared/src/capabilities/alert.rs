use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    Info,
    Error,
}

/// A host-native dialog (Telegram `showAlert` or the platform equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertOperation {
    pub kind: AlertKind,
    pub message: String,
}

impl Operation for AlertOperation {
    type Output = ();
}

#[derive(Clone)]
pub struct Alert<Ev> {
    context: CapabilityContext<AlertOperation, Ev>,
}

impl<Ev> Capability<Ev> for Alert<Ev> {
    type Operation = AlertOperation;
    type MappedSelf<MappedEv> = Alert<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Alert::new(self.context.map_event(f))
    }
}

impl<Ev> Alert<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<AlertOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.show(AlertKind::Info, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.show(AlertKind::Error, message.into());
    }

    fn show(&self, kind: AlertKind, message: String) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(AlertOperation { kind, message }).await;
        });
    }
}
