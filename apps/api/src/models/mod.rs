pub mod funnel;
pub mod session;
