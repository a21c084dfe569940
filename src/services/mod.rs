//! Domain services used by HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own validation and persistence. They never publish: the
//! route that called them hands committed results to the broadcast notifier.

pub mod form;
pub mod poll;
