/// Router Module Index
///
/// Splits the HTTP surface by concern. All three sit behind the Route
/// Authorization Gate, which classifies each path.

/// Operational endpoints (health). Classified as liveness routes by the gate.
pub mod public;

/// The application's path space, served alongside the SPA fallback.
pub mod app;

/// Operator console. Default-protected by the gate, then guarded by
/// server-issued admin tokens.
pub mod admin;
