//! tempotap — an endless, seeded rhythm-tapping game for the terminal.

pub mod audio;
pub mod config;
pub mod judge;
pub mod observer;
pub mod random;
pub mod rhythm;
pub mod session;
pub mod transport;
pub mod tui;
