// wg-protocol: shared wire types for the outbound messaging gateway.
//
// Covers tenant slug validation, deterministic event-id formatting, the
// upstream chat-API wire format, inbound webhook payloads, and the
// `HttpErrorEnvelope` contract used by every admin/business HTTP route.
// No I/O lives here -- this crate only describes shapes and pure
// validation, so it can be depended on by both the gateway service and
// its test harness without pulling in tokio or a database driver.

pub mod content;
pub mod envelope;
pub mod event_id;
pub mod slug;
pub mod upstream;
pub mod webhook;

pub use content::{MediaKind, MediaRef, MessageContent};
pub use envelope::HttpErrorEnvelope;
pub use slug::is_valid_slug;
pub use upstream::UpstreamErrorKind;
