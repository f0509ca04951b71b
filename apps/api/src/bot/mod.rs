// Inbound chat path: Telegram webhook -> session -> cancel reactivation -> classify -> guarded scoring.

pub mod classify;
pub mod handlers;
pub mod inbound;
