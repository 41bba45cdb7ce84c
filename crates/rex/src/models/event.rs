/// The normalized output unit shared by every backend.
///
/// This is the only type that crosses from the provider layer to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    ContentDelta(String),
    Done,
}

impl CanonicalEvent {
    pub fn delta<S: Into<String>>(text: S) -> Self {
        CanonicalEvent::ContentDelta(text.into())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, CanonicalEvent::Done)
    }

    /// Text carried by a delta, `None` for the terminal marker.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CanonicalEvent::ContentDelta(text) => Some(text),
            CanonicalEvent::Done => None,
        }
    }
}
