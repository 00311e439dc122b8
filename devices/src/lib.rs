//! Observatory peripheral control
//!
//! One facade per peripheral (dome, camera, power box, flat panel cover,
//! weather station), each backed by up to two interchangeable transports:
//! an INDI client session or an ASCOM Alpaca REST poller. A facade owns a
//! property cache fed by whichever transport is live and an event bus that
//! announces connection state, property changes and command progress to
//! any number of subscribers.
//!
//! Consumers construct a facade with a shared [`WorkerPool`], select the
//! framework, point it at a server and call the typed operations; which
//! protocol answers underneath stays invisible.

mod alpaca_adapter;
mod cache;
mod camera;
mod cover;
mod dome;
mod event;
mod facade;
mod geometry;
mod indi_adapter;
mod power;
mod slew;
mod transport;
mod weather;
mod worker;

pub use alpaca_adapter::*;
pub use cache::*;
pub use camera::*;
pub use cover::*;
pub use dome::*;
pub use event::*;
pub use facade::*;
pub use geometry::*;
pub use indi_adapter::*;
pub use power::*;
pub use transport::*;
pub use weather::*;
pub use worker::*;
