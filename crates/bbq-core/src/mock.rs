//! In-memory bus for testing.
//!
//! [`MockBus`] implements [`Bus`] without a system bus or Bluetooth
//! hardware. Tests feed it discovery snapshots, inject signals and inspect
//! the remote calls the pipeline made.
//!
//! # Features
//!
//! - **Scripted discovery**: queue snapshots returned by successive `discover` calls
//! - **Signal injection**: [`MockBus::emit`] pushes a signal to every open stream
//! - **Failure injection**: make a given method fail
//! - **Latency simulation**: delay every remote call
//!
//! [`MemorySink`] is the matching in-memory [`TemperatureSink`].
//!
//! The fixture helpers build BlueZ-shaped objects for a thermometer.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use bbq_types::PROBE_COUNT;
use bbq_types::uuids::{
    CLIENT_CHARACTERISTIC_CONFIG, COMMAND, SETTINGS_NOTIFY, STATUS_NOTIFY, TEMPERATURES,
    THERMOMETER_SERVICE,
};

use crate::attributes::{
    AttributeStore, CHARACTERISTIC_INTERFACE, DESCRIPTOR_INTERFACE, DEVICE_INTERFACE, RawObject,
    SERVICE_INTERFACE,
};
use crate::bus::{Bus, SignalStream};
use crate::decode::VALUE_PROPERTY;
use crate::error::{Error, Result};
use crate::pipeline::TemperatureSink;
use crate::signal::{MatchRule, RawSignal};
use crate::value::{Value, ValueMap};

/// Object path used by [`thermometer_store`].
pub const MOCK_DEVICE_PATH: &str = "/org/bluez/hci0/dev_C4_7C_8D_6A_00_01";

const SIGNAL_CAPACITY: usize = 256;

/// A remote call recorded by [`MockBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// Target object path.
    pub path: String,
    /// Interface name.
    pub interface: String,
    /// Method name.
    pub method: String,
    /// Call arguments.
    pub args: Vec<Value>,
}

/// An in-memory [`Bus`].
///
/// # Example
///
/// ```
/// use bbq_core::mock::{MockBus, thermometer_store};
/// use bbq_core::Bus;
///
/// #[tokio::main]
/// async fn main() {
///     let bus = MockBus::with_store(thermometer_store("BBQ"));
///     let snapshot = bus.discover().await.unwrap();
///     assert!(!snapshot.is_empty());
/// }
/// ```
pub struct MockBus {
    store: Mutex<AttributeStore>,
    scripted: Mutex<VecDeque<AttributeStore>>,
    signals: Mutex<Option<broadcast::Sender<RawSignal>>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<HashMap<String, String>>,
    subscriptions: Mutex<Vec<MatchRule>>,
    call_delay_ms: AtomicU64,
    discover_count: AtomicU64,
}

impl std::fmt::Debug for MockBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBus")
            .field("calls", &self.calls().len())
            .field("discover_count", &self.discover_count())
            .finish()
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    /// Create a bus with an empty object tree.
    pub fn new() -> Self {
        Self::with_store(AttributeStore::new())
    }

    /// Create a bus whose `discover` returns `store`.
    pub fn with_store(store: AttributeStore) -> Self {
        let (tx, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            store: Mutex::new(store),
            scripted: Mutex::new(VecDeque::new()),
            signals: Mutex::new(Some(tx)),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            call_delay_ms: AtomicU64::new(0),
            discover_count: AtomicU64::new(0),
        }
    }

    /// Replace the snapshot returned once the script is exhausted.
    pub fn set_store(&self, store: AttributeStore) {
        *lock(&self.store) = store;
    }

    /// Queue a snapshot for the next `discover` call.
    ///
    /// Queued snapshots are returned in order before falling back to the
    /// store set with [`set_store`](Self::set_store).
    pub fn push_snapshot(&self, store: AttributeStore) {
        lock(&self.scripted).push_back(store);
    }

    /// Make every call to `method` fail with `reason`.
    pub fn fail_method(&self, method: &str, reason: &str) {
        lock(&self.failures).insert(method.to_string(), reason.to_string());
    }

    /// Stop failing calls to `method`.
    pub fn clear_failure(&self, method: &str) {
        lock(&self.failures).remove(method);
    }

    /// Delay every remote call by `delay`.
    pub fn set_call_delay(&self, delay: Duration) {
        self.call_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Send a signal to every open stream. Returns the number of streams.
    pub fn emit(&self, signal: RawSignal) -> usize {
        lock(&self.signals)
            .as_ref()
            .and_then(|tx| tx.send(signal).ok())
            .unwrap_or(0)
    }

    /// End every open stream and refuse new ones.
    pub fn close_signals(&self) {
        lock(&self.signals).take();
    }

    /// Remote calls made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Calls to `method`, in order.
    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Rules passed to `subscribe`.
    pub fn subscriptions(&self) -> Vec<MatchRule> {
        lock(&self.subscriptions).clone()
    }

    /// Number of `discover` calls.
    pub fn discover_count(&self) -> u64 {
        self.discover_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Bus for MockBus {
    async fn discover(&self) -> Result<AttributeStore> {
        self.discover_count.fetch_add(1, Ordering::Relaxed);
        if let Some(snapshot) = lock(&self.scripted).pop_front() {
            return Ok(snapshot);
        }
        Ok(lock(&self.store).clone())
    }

    async fn subscribe(&self, rule: &MatchRule) -> Result<SignalStream> {
        let rx = lock(&self.signals)
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| Error::Bus("signal source closed".to_string()))?;
        lock(&self.subscriptions).push(rule.clone());

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(signal) => return Some((signal, rx)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn invoke(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        lock(&self.calls).push(RecordedCall {
            path: path.to_string(),
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        });

        let delay = self.call_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if let Some(reason) = lock(&self.failures).get(method) {
            return Err(Error::remote_call_failed(path, interface, method, reason));
        }
        Ok(Vec::new())
    }
}

/// A [`TemperatureSink`] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<([i16; PROBE_COUNT], OffsetDateTime)>>,
    failing: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push fail (and not be recorded) while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Pushed readings, in order.
    pub fn records(&self) -> Vec<([i16; PROBE_COUNT], OffsetDateTime)> {
        lock(&self.records).clone()
    }
}

#[async_trait]
impl TemperatureSink for MemorySink {
    async fn push_temperatures(
        &self,
        readings: &[i16; PROBE_COUNT],
        at: OffsetDateTime,
    ) -> Result<()> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(Error::Persistence("mock sink failure".to_string()));
        }
        lock(&self.records).push((*readings, at));
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Objects for a device with no resolved GATT tree yet.
pub fn device_object(device_path: &str, name: &str) -> RawObject {
    RawObject::new(device_path).with_interface(
        DEVICE_INTERFACE,
        [
            ("Name", Value::from(name)),
            ("Alias", Value::from(name)),
            ("Address", Value::from(address_from_path(device_path))),
            ("Connected", Value::from(false)),
        ],
    )
}

/// A thermometer's full object tree under `device_path`.
///
/// The vendor service `fff0` is at `service0010` with characteristics
/// `fff1`, `fff3`, `fff4` and `fff5`; each notifying characteristic has a
/// client configuration descriptor.
pub fn thermometer_objects(device_path: &str, name: &str) -> Vec<RawObject> {
    let service_path = format!("{device_path}/service0010");
    let mut objects = vec![
        device_object(device_path, name),
        RawObject::new(&service_path).with_interface(
            SERVICE_INTERFACE,
            [
                ("UUID", Value::from(THERMOMETER_SERVICE.to_string())),
                ("Device", Value::object_path(device_path)),
                ("Primary", Value::from(true)),
            ],
        ),
    ];

    let characteristics = [
        ("char0011", SETTINGS_NOTIFY, &["read", "notify"][..]),
        ("char0014", STATUS_NOTIFY, &["read", "notify"][..]),
        ("char0017", COMMAND, &["write"][..]),
        ("char0019", TEMPERATURES, &["read", "notify"][..]),
    ];
    for (suffix, uuid, flags) in characteristics {
        let char_path = format!("{service_path}/{suffix}");
        objects.push(
            RawObject::new(&char_path).with_interface(
                CHARACTERISTIC_INTERFACE,
                [
                    ("UUID", Value::from(uuid.to_string())),
                    ("Service", Value::object_path(&service_path)),
                    (
                        "Flags",
                        Value::Array(flags.iter().map(|f| Value::from(*f)).collect()),
                    ),
                ],
            ),
        );
        if flags.contains(&"notify") {
            objects.push(
                RawObject::new(format!("{char_path}/desc0001")).with_interface(
                    DESCRIPTOR_INTERFACE,
                    [
                        ("UUID", Value::from(CLIENT_CHARACTERISTIC_CONFIG.to_string())),
                        ("Characteristic", Value::object_path(&char_path)),
                    ],
                ),
            );
        }
    }
    objects
}

/// A snapshot with an adapter and one fully resolved thermometer at
/// [`MOCK_DEVICE_PATH`].
pub fn thermometer_store(name: &str) -> AttributeStore {
    let mut store: AttributeStore = thermometer_objects(MOCK_DEVICE_PATH, name)
        .into_iter()
        .collect();
    store.insert(adapter_object());
    store
}

/// A snapshot in which the thermometer is known but its services are not
/// resolved yet.
pub fn unresolved_store(name: &str) -> AttributeStore {
    [adapter_object(), device_object(MOCK_DEVICE_PATH, name)]
        .into_iter()
        .collect()
}

/// Path of the temperature characteristic in [`thermometer_objects`].
pub fn temperature_path(device_path: &str) -> String {
    format!("{device_path}/service0010/char0019")
}

/// A property-change signal carrying `payload` as the new `Value`.
pub fn temperature_signal(char_path: &str, payload: &[u8]) -> RawSignal {
    let changed = ValueMap::from([(VALUE_PROPERTY.to_string(), Value::from(payload))]);
    RawSignal::new(
        char_path,
        crate::attributes::PROPERTIES_INTERFACE,
        crate::attributes::PROPERTIES_CHANGED,
        vec![
            Value::from(CHARACTERISTIC_INTERFACE),
            Value::Map(changed),
            Value::Array(Vec::new()),
        ],
    )
}

fn adapter_object() -> RawObject {
    RawObject::new("/org/bluez/hci0").with_interface(
        "org.bluez.Adapter1",
        [("Powered", Value::from(true)), ("Name", Value::from("hci0"))],
    )
}

fn address_from_path(path: &str) -> String {
    path.rsplit('/')
        .next()
        .and_then(|leaf| leaf.strip_prefix("dev_"))
        .map(|mac| mac.replace('_', ":"))
        .unwrap_or_default()
}
