pub mod admin_tokens;
pub mod broadcasts;
pub mod funnel_events;
pub mod media;
pub mod schedules;
pub mod tenants;
