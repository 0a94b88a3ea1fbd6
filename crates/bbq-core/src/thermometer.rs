//! Thermometer session driver.
//!
//! [`Thermometer::start`] takes a device found in the resource graph and
//! brings it to the streaming state:
//!
//! 1. `Device1.Connect`
//! 2. re-discover until the vendor service `fff0` is resolved
//! 3. register the temperature subscription with the router and start
//!    pumping bus signals into it
//! 4. `StartNotify` on `fff1`, `fff3` and `fff5`
//! 5. write the [`HANDSHAKE`] frames to `fff4`
//!
//! Any failure aborts startup: the subscription is closed, the pump is
//! stopped and a best-effort disconnect is issued.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bbq_types::uuids::{COMMAND, NOTIFY_CHARACTERISTICS, TEMPERATURES, THERMOMETER_SERVICE};

use crate::attributes::{CHARACTERISTIC_INTERFACE, DEVICE_INTERFACE};
use crate::bus::{Bus, CallContext, DEFAULT_CALL_TIMEOUT};
use crate::commands::HANDSHAKE;
use crate::decode::decode;
use crate::error::{EntityKind, Error, Result};
use crate::graph::{self, Device, Service};
use crate::mailbox::MailboxSender;
use crate::metrics::PipelineMetrics;
use crate::router::{SignalHandler, SignalRouter, Subscription};
use crate::signal::{MatchRule, RawSignal};
use crate::value::{Value, ValueMap};

/// Default number of discovery attempts while waiting for services.
pub const DEFAULT_RESOLVE_ATTEMPTS: u32 = 10;

/// Default delay between discovery attempts.
pub const DEFAULT_RESOLVE_INTERVAL: Duration = Duration::from_millis(500);

/// Session settings.
#[derive(Debug, Clone)]
pub struct ThermometerOptions {
    /// Deadline for each remote call.
    pub call_timeout: Duration,
    /// Discovery attempts while waiting for the vendor service to appear.
    pub resolve_attempts: u32,
    /// Delay between discovery attempts.
    pub resolve_interval: Duration,
    /// Counters for decoded and skipped notifications.
    pub metrics: Option<Arc<PipelineMetrics>>,
}

impl Default for ThermometerOptions {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            resolve_attempts: DEFAULT_RESOLVE_ATTEMPTS,
            resolve_interval: DEFAULT_RESOLVE_INTERVAL,
            metrics: None,
        }
    }
}

impl ThermometerOptions {
    /// Set the per-call deadline.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set how often and how fast to re-discover while services resolve.
    #[must_use]
    pub fn resolve(mut self, attempts: u32, interval: Duration) -> Self {
        self.resolve_attempts = attempts;
        self.resolve_interval = interval;
        self
    }

    /// Count notifications in `metrics`.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout.is_zero() {
            return Err(Error::invalid_config("call_timeout must be > 0"));
        }
        if self.resolve_attempts == 0 {
            return Err(Error::invalid_config("resolve_attempts must be > 0"));
        }
        Ok(())
    }
}

/// Decodes temperature notifications into the mailbox.
///
/// Signals that are not temperature updates are skipped.
pub struct NotificationHandler {
    mailbox: MailboxSender,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl NotificationHandler {
    /// Create a handler feeding `mailbox`.
    pub fn new(mailbox: MailboxSender, metrics: Option<Arc<PipelineMetrics>>) -> Self {
        Self { mailbox, metrics }
    }
}

impl SignalHandler for NotificationHandler {
    fn handle(&mut self, signal: &RawSignal) {
        match decode(CHARACTERISTIC_INTERFACE, &signal.body) {
            Some(measurement) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_decoded();
                }
                self.mailbox.try_push(measurement);
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_malformed();
                }
            }
        }
    }
}

/// A connected, streaming thermometer.
pub struct Thermometer {
    bus: Arc<dyn Bus>,
    device: Device,
    calls: CallContext,
    router: SignalRouter,
    subscription: Option<Subscription>,
    pump: Option<JoinHandle<u64>>,
    pump_token: CancellationToken,
}

impl std::fmt::Debug for Thermometer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thermometer")
            .field("device", &self.device.path)
            .field("subscription", &self.subscription)
            .finish()
    }
}

impl Thermometer {
    /// Connect to `device` and start streaming temperatures into `mailbox`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Startup is all-or-nothing.
    pub async fn start(
        bus: Arc<dyn Bus>,
        device: Device,
        mailbox: MailboxSender,
        options: ThermometerOptions,
    ) -> Result<Self> {
        options.validate()?;

        let router = match &options.metrics {
            Some(metrics) => SignalRouter::with_metrics(Arc::clone(metrics)),
            None => SignalRouter::new(),
        };
        let mut session = Self {
            bus,
            device,
            calls: CallContext::new(options.call_timeout),
            router,
            subscription: None,
            pump: None,
            pump_token: CancellationToken::new(),
        };

        let path = session.device.path.clone();
        info!(device = %path, "Connecting to thermometer");
        session
            .call(&path, DEVICE_INTERFACE, "Connect", vec![])
            .await?;

        match session.arm(mailbox, &options).await {
            Ok(()) => {
                info!(device = %session.device.path, "Thermometer streaming");
                Ok(session)
            }
            Err(e) => {
                warn!(device = %session.device.path, error = %e, "Thermometer startup failed");
                if let Err(disconnect) = session.shutdown().await {
                    debug!(error = %disconnect, "Disconnect after failed startup also failed");
                }
                Err(e)
            }
        }
    }

    async fn arm(&mut self, mailbox: MailboxSender, options: &ThermometerOptions) -> Result<()> {
        self.device = self.resolve_services(options).await?;
        let service = self.vendor_service()?;
        let temperatures = service.characteristic(TEMPERATURES)?.path.clone();
        let command = service.characteristic(COMMAND)?.path.clone();
        let notify_paths = NOTIFY_CHARACTERISTICS
            .iter()
            .map(|uuid| service.characteristic(*uuid).map(|c| c.path.clone()))
            .collect::<Result<Vec<_>>>()?;

        let rule = MatchRule::properties_changed(&temperatures);
        let handler = NotificationHandler::new(mailbox, options.metrics.clone());
        self.subscription = Some(self.router.register(rule.clone(), handler).await);

        let stream = self.bus.subscribe(&rule).await?;
        let router = self.router.clone();
        let token = self.pump_token.clone();
        self.pump = Some(tokio::spawn(async move { router.pump(stream, token).await }));

        for path in &notify_paths {
            self.call(path, CHARACTERISTIC_INTERFACE, "StartNotify", vec![])
                .await?;
        }

        for (i, frame) in HANDSHAKE.iter().enumerate() {
            debug!(step = i + 1, frame = ?frame, "Writing handshake frame");
            self.call(
                &command,
                CHARACTERISTIC_INTERFACE,
                "WriteValue",
                vec![Value::from(frame.as_slice()), Value::Map(ValueMap::new())],
            )
            .await?;
        }
        Ok(())
    }

    /// Find the device again in fresh snapshots until its vendor service appears.
    async fn resolve_services(&self, options: &ThermometerOptions) -> Result<Device> {
        if self.device.service(THERMOMETER_SERVICE).is_ok() {
            return Ok(self.device.clone());
        }

        let mut last_error = Error::not_found(EntityKind::Service, THERMOMETER_SERVICE);
        for attempt in 1..=options.resolve_attempts {
            match self.rediscover().await {
                Ok(Some(device)) if device.service(THERMOMETER_SERVICE).is_ok() => {
                    debug!(attempt, "Services resolved");
                    return Ok(device);
                }
                Ok(_) => {
                    debug!(attempt, "Services not resolved yet");
                }
                Err(e) => {
                    // a snapshot taken while BlueZ is still populating can be inconsistent
                    debug!(attempt, error = %e, "Discovery snapshot rejected");
                    last_error = e;
                }
            }
            if attempt < options.resolve_attempts {
                tokio::time::sleep(options.resolve_interval).await;
            }
        }
        Err(last_error)
    }

    async fn rediscover(&self) -> Result<Option<Device>> {
        let store = self.bus.discover().await?;
        Ok(graph::build_all(&store)?
            .into_iter()
            .find(|d| d.path == self.device.path))
    }

    fn vendor_service(&self) -> Result<&Service> {
        self.device.service(THERMOMETER_SERVICE)
    }

    async fn call(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.calls
            .call(self.bus.as_ref(), path, interface, method, args)
            .await
    }

    /// The device as resolved at startup.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Object path of the temperature characteristic.
    pub fn temperature_path(&self) -> Result<&str> {
        Ok(self
            .vendor_service()?
            .characteristic(TEMPERATURES)?
            .path
            .as_str())
    }

    /// Whether signals are still being pumped.
    pub fn is_streaming(&self) -> bool {
        self.pump.as_ref().is_some_and(|h| !h.is_finished())
            && self.subscription.as_ref().is_some_and(|s| s.is_active())
    }

    /// Stop streaming and disconnect.
    pub async fn close(mut self) -> Result<()> {
        info!(device = %self.device.path, "Closing thermometer session");
        self.shutdown().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(subscription) = self.subscription.take() {
            subscription.close().await;
        }
        self.pump_token.cancel();
        if let Some(pump) = self.pump.take() {
            match pump.await {
                Ok(count) => debug!(count, "Signal pump stopped"),
                Err(e) => warn!(error = %e, "Signal pump ended abnormally"),
            }
        }
        let path = self.device.path.clone();
        self.call(&path, DEVICE_INTERFACE, "Disconnect", vec![])
            .await
            .map(|_| ())
    }
}

impl Drop for Thermometer {
    fn drop(&mut self) {
        self.pump_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::mailbox;
    use crate::mock::{
        MOCK_DEVICE_PATH, MockBus, temperature_path, temperature_signal, thermometer_store,
        unresolved_store,
    };

    fn device_in(store: &crate::attributes::AttributeStore) -> Device {
        graph::build(store, "BBQ").unwrap().remove(0)
    }

    fn fast() -> ThermometerOptions {
        ThermometerOptions::default().resolve(5, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_start_issues_calls_in_order() {
        let bus = Arc::new(MockBus::with_store(thermometer_store("BBQ")));
        let device = device_in(&thermometer_store("BBQ"));
        let (tx, _rx) = mailbox();

        let thermo = Thermometer::start(bus.clone(), device, tx, fast())
            .await
            .unwrap();

        let calls = bus.calls();
        let methods: Vec<&str> = calls.iter().map(|c| c.method.as_str()).collect();
        assert_eq!(methods[0], "Connect");
        assert_eq!(&methods[1..4], &["StartNotify"; 3]);
        assert_eq!(&methods[4..], &["WriteValue"; 8]);

        let svc = format!("{MOCK_DEVICE_PATH}/service0010");
        assert_eq!(calls[1].path, format!("{svc}/char0011"));
        assert_eq!(calls[2].path, format!("{svc}/char0014"));
        assert_eq!(calls[3].path, format!("{svc}/char0019"));

        for (call, frame) in calls[4..].iter().zip(HANDSHAKE) {
            assert_eq!(call.path, format!("{svc}/char0017"));
            assert_eq!(call.args[0], Value::Bytes(frame.to_vec()));
            assert_eq!(call.args[1], Value::Map(ValueMap::new()));
        }

        assert_eq!(
            bus.subscriptions(),
            vec![MatchRule::properties_changed(temperature_path(MOCK_DEVICE_PATH))]
        );
        assert!(thermo.is_streaming());

        thermo.close().await.unwrap();
        assert_eq!(bus.calls().last().unwrap().method, "Disconnect");
    }

    #[tokio::test]
    async fn test_rediscovers_until_service_resolves() {
        let bus = Arc::new(MockBus::with_store(thermometer_store("BBQ")));
        bus.push_snapshot(unresolved_store("BBQ"));
        bus.push_snapshot(unresolved_store("BBQ"));
        let device = device_in(&unresolved_store("BBQ"));
        let (tx, _rx) = mailbox();

        let thermo = Thermometer::start(bus.clone(), device, tx, fast())
            .await
            .unwrap();
        assert_eq!(bus.discover_count(), 3);
        assert!(thermo.device().service(THERMOMETER_SERVICE).is_ok());
        thermo.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_when_service_never_resolves() {
        let bus = Arc::new(MockBus::with_store(unresolved_store("BBQ")));
        let device = device_in(&unresolved_store("BBQ"));
        let (tx, _rx) = mailbox();

        let err = Thermometer::start(bus.clone(), device, tx, fast())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(bus.discover_count(), 5);
        assert_eq!(bus.calls().last().unwrap().method, "Disconnect");
    }

    #[tokio::test]
    async fn test_handshake_failure_aborts_startup() {
        let bus = Arc::new(MockBus::with_store(thermometer_store("BBQ")));
        bus.fail_method("WriteValue", "Operation failed with ATT error: 0x0e");
        let device = device_in(&thermometer_store("BBQ"));
        let (tx, _rx) = mailbox();

        let err = Thermometer::start(bus.clone(), device, tx, fast())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteCallFailed { ref method, .. } if method == "WriteValue"));

        // one write attempted, then disconnect
        assert_eq!(bus.calls_to("WriteValue").len(), 1);
        assert_eq!(bus.calls().last().unwrap().method, "Disconnect");
    }

    #[tokio::test]
    async fn test_connect_failure_skips_setup() {
        let bus = Arc::new(MockBus::with_store(thermometer_store("BBQ")));
        bus.fail_method("Connect", "Host is down");
        let device = device_in(&thermometer_store("BBQ"));
        let (tx, _rx) = mailbox();

        assert!(Thermometer::start(bus.clone(), device, tx, fast()).await.is_err());
        assert_eq!(bus.calls().len(), 1);
        assert!(bus.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_notifications_reach_mailbox() {
        let metrics = PipelineMetrics::shared();
        let bus = Arc::new(MockBus::with_store(thermometer_store("BBQ")));
        let device = device_in(&thermometer_store("BBQ"));
        let (tx, mut rx) = mailbox();
        let tx = tx.with_metrics(Arc::clone(&metrics));

        let thermo = Thermometer::start(
            bus.clone(),
            device,
            tx,
            fast().metrics(Arc::clone(&metrics)),
        )
        .await
        .unwrap();

        let path = temperature_path(MOCK_DEVICE_PATH);
        bus.emit(temperature_signal(
            &path,
            &[0x14, 0x00, 0x00, 0x01, 0x05, 0x00, 0, 0, 0, 0, 0, 0],
        ));
        let m = tokio::time::timeout(Duration::from_secs(1), rx.drain())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(m.temperatures, [20, i16::MIN, 5, 0, 0, 0]);

        thermo.close().await.unwrap();
        let snap = metrics.snapshot();
        assert_eq!(snap.measurements_decoded, 1);
        assert_eq!(snap.mailbox_delivered, 1);
    }

    #[test]
    fn test_handler_skips_other_signals() {
        let metrics = PipelineMetrics::shared();
        let (tx, mut rx) = mailbox();
        let mut handler = NotificationHandler::new(tx, Some(Arc::clone(&metrics)));

        handler.handle(&RawSignal::new("/p", "i", "m", vec![]));
        assert!(rx.try_drain().is_none());
        assert_eq!(metrics.snapshot().malformed_payloads, 1);

        handler.handle(&temperature_signal("/p", &[1, 0, 2, 0, 3, 0, 4, 0, 5, 0, 6, 0]));
        assert_eq!(rx.try_drain().unwrap().temperatures, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_options_validate() {
        assert!(ThermometerOptions::default().validate().is_ok());
        assert!(
            ThermometerOptions::default()
                .call_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ThermometerOptions::default()
                .resolve(0, Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
