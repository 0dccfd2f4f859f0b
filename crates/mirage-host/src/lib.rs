//! Host streaming engine and control/data protocol for Mirage: a
//! low-latency, LAN-oriented remote-windowing system. This crate
//! implements the core described in §2 of the design — everything
//! from the wire codec up through session, stream, and app-stream
//! orchestration — while capture, encode, and input injection stay
//! behind the trait boundaries in `mirage-capture`, `mirage-encode`,
//! and `mirage-input`.

pub mod appstream;
pub mod config;
pub mod connection;
pub mod desktop;
pub mod display;
pub mod host;
pub mod login;
pub mod monitor;
pub mod persist;
pub mod protocol;
pub mod quality;
pub mod router;
pub mod session;
pub mod stream;
pub mod trust;
