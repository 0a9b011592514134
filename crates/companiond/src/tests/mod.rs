//! Test suites for the companion server.

mod dispatch;
mod lifecycle;
mod support;
