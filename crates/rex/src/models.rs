//! These models represent the objects passed through the gateway
//!
//! There are several different related formats we need to interact with:
//! - chat widget messages, sent from the presentation front-end to the gateway
//! - openai chat completion messages and `data:` stream frames
//! - anthropic messages, with the system prompt split into its own field
//! - claude cli stream-json events, one JSON object per stdout line
//!
//! We always immediately convert incoming data into the internal structs and
//! every backend's output into a [`event::CanonicalEvent`], so nothing past the
//! provider layer knows which wire format was used.
pub mod event;
pub mod message;
pub mod role;
