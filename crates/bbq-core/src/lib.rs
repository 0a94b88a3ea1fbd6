//! Signal routing, decoding and fan-out for six-probe BLE BBQ thermometers.
//!
//! This crate talks to the thermometer through a BlueZ-style object bus and
//! turns its temperature notifications into [`Measurement`]s that any number
//! of observers can follow.
//!
//! # Features
//!
//! - **Resource graph**: typed devices, services, characteristics and
//!   descriptors built from a flat discovery snapshot ([`graph`])
//! - **Signal routing**: rule-matched subscriptions with ordered, per-route
//!   delivery ([`router`])
//! - **Decoding**: `PropertiesChanged` bodies to six probe readings
//!   ([`decode`])
//! - **Mailbox**: single-slot hand-off that drops the newest value when full
//!   ([`mailbox`])
//! - **Broadcast**: multi-observer fan-out where one stuck observer never
//!   blocks the others ([`broadcast`])
//! - **Session driver**: connect, resolve, subscribe, enable notifications and
//!   write the startup handshake ([`thermometer`])
//!
//! # Transports
//!
//! Everything above is written against the [`Bus`] trait. [`mock::MockBus`]
//! keeps the object tree in memory for tests; on Linux, `bluez::BluezBus`
//! talks to BlueZ over the D-Bus system bus.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bbq_core::{graph, mailbox, Bus, Thermometer, ThermometerOptions};
//!
//! # async fn example(bus: Arc<dyn Bus>) -> Result<(), Box<dyn std::error::Error>> {
//! let snapshot = bus.discover().await?;
//! let device = graph::build(&snapshot, "BBQ")?
//!     .into_iter()
//!     .next()
//!     .ok_or("no thermometer found")?;
//!
//! let (tx, mut rx) = mailbox();
//! let session = Thermometer::start(bus, device, tx, ThermometerOptions::default()).await?;
//!
//! while let Some(measurement) = rx.drain().await {
//!     println!("{:?}", measurement.temperatures);
//! }
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
#[cfg(target_os = "linux")]
pub mod bluez;
pub mod broadcast;
pub mod bus;
pub mod commands;
pub mod decode;
pub mod error;
pub mod graph;
pub mod mailbox;
pub mod metrics;
pub mod mock;
pub mod pipeline;
pub mod router;
pub mod signal;
pub mod thermometer;
pub mod value;

// Core exports
pub use attributes::{AttributeStore, Attributes, RawObject};
pub use broadcast::{Broadcaster, Observer, ObserverId};
pub use bus::{Bus, CallContext, SignalStream};
pub use decode::{MalformedPayload, decode, decode_at};
pub use error::{EntityKind, Error, Result};
pub use graph::{Characteristic, Descriptor, Device, Service};
pub use mailbox::{MailboxReceiver, MailboxSender, PushOutcome, mailbox};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use pipeline::{Pipeline, TemperatureSink};
pub use router::{SignalHandler, SignalRouter, Subscription};
pub use signal::{MatchRule, RawSignal};
pub use thermometer::{Thermometer, ThermometerOptions};
pub use value::{Value, ValueMap};

#[cfg(target_os = "linux")]
pub use bluez::BluezBus;

// Re-export from bbq-types
pub use bbq_types::uuid as uuids;
pub use bbq_types::{Measurement, PROBE_COUNT, PROBE_DISCONNECTED, ParseError};
