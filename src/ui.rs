//! Contract between the pipeline and whatever renders it.
//!
//! Devices and the recorder describe their controls as an ordered list of
//! [`ActionSpec`]s; the UI renders one control per entry and calls the handler
//! back with the value the user picked.

use std::fmt;
use std::sync::Arc;

use crate::display::pixels::DisplayImage;
use crate::pipeline::status::StatusMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Push button
    Action,
    /// Pick one entry of a list
    Choice,
    /// Free text entry
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    /// Icon name for a push button
    Icon(String),
    /// Entries of a choice list
    Options(Vec<String>),
    /// Placeholder of a text field
    Placeholder(String),
}

/// Value handed back to a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionValue {
    Trigger,
    Index(usize),
    Text(String),
}

pub type ActionHandler = Arc<dyn Fn(ActionValue) + Send + Sync>;

#[derive(Clone)]
pub struct ActionSpec {
    pub label: String,
    pub handler: ActionHandler,
    pub kind: ActionKind,
    pub payload: ActionPayload,
}

impl ActionSpec {
    pub fn action(
        label: impl Into<String>,
        icon: impl Into<String>,
        handler: impl Fn(ActionValue) + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            handler: Arc::new(handler),
            kind: ActionKind::Action,
            payload: ActionPayload::Icon(icon.into()),
        }
    }

    pub fn choice(
        label: impl Into<String>,
        options: Vec<String>,
        handler: impl Fn(ActionValue) + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            handler: Arc::new(handler),
            kind: ActionKind::Choice,
            payload: ActionPayload::Options(options),
        }
    }

    pub fn text(
        label: impl Into<String>,
        placeholder: impl Into<String>,
        handler: impl Fn(ActionValue) + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            handler: Arc::new(handler),
            kind: ActionKind::Text,
            payload: ActionPayload::Placeholder(placeholder.into()),
        }
    }

    pub fn invoke(&self, value: ActionValue) {
        (self.handler)(value)
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("label", &self.label)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Find an action by label
pub fn find<'a>(specs: &'a [ActionSpec], label: &str) -> Option<&'a ActionSpec> {
    specs.iter().find(|s| s.label == label)
}

/// Receives everything the display sink produces
pub trait UiSink: Send + Sync + 'static {
    fn show_image(&self, image: DisplayImage);
    fn show_status(&self, status: StatusMessage);
}

/// Build a handler that holds `target` weakly, so specs kept by the UI do not
/// keep a closed device or recorder alive
pub fn bind<T>(
    target: &Arc<T>,
    f: impl Fn(&T, ActionValue) + Send + Sync + 'static,
) -> impl Fn(ActionValue) + Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    let weak = Arc::downgrade(target);
    move |value| {
        if let Some(target) = weak.upgrade() {
            f(&target, value)
        }
    }
}
