//! BlueZ transport over the D-Bus system bus.
//!
//! Discovery is one `GetManagedObjects` call on the BlueZ object manager.
//! Signals arrive through bus match rules and remote calls are plain method
//! calls; every D-Bus argument is converted to a [`Value`] as soon as it is
//! read, so nothing D-Bus specific escapes this module.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dbus::arg::{
    AppendAll, ArgType, Iter, IterAppend, PropMap, ReadAll, RefArg, TypeMismatchError, Variant,
    cast,
};
use dbus::channel::Token;
use dbus::message::MatchRule as DbusMatchRule;
use dbus::nonblock::{Proxy, SyncConnection};
use dbus::strings::{Interface, Member};
use dbus::{Message, Path};
use futures::StreamExt;
use futures::stream::{BoxStream, Stream};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::attributes::{AttributeStore, RawObject};
use crate::bus::{Bus, SignalStream};
use crate::error::{Error, Result};
use crate::signal::{MatchRule, RawSignal};
use crate::value::{Value, ValueMap};

/// Well-known name of the BlueZ daemon.
pub const BLUEZ_SERVICE: &str = "org.bluez";

const OBJECT_MANAGER_INTERFACE: &str = "org.freedesktop.DBus.ObjectManager";

/// Transport-level timeout; per-call deadlines are applied by
/// [`crate::bus::CallContext`].
const DBUS_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to BlueZ on the system bus.
pub struct BluezBus {
    conn: Arc<SyncConnection>,
    io: JoinHandle<()>,
}

impl std::fmt::Debug for BluezBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BluezBus")
            .field("connected", &!self.io.is_finished())
            .finish_non_exhaustive()
    }
}

impl BluezBus {
    /// Connect to the system bus. Must be called from within a Tokio runtime.
    pub fn connect() -> Result<Self> {
        let (resource, conn) =
            dbus_tokio::connection::new_system_sync().map_err(|e| Error::Bus(e.to_string()))?;
        let io = tokio::spawn(async move {
            let err = resource.await;
            error!(error = %err, "Lost connection to the system bus");
        });
        debug!("Connected to the system bus");
        Ok(Self { conn, io })
    }

    fn proxy(&self, path: &str) -> Result<Proxy<'static, Arc<SyncConnection>>> {
        let path = Path::new(path.to_string()).map_err(Error::Bus)?;
        Ok(Proxy::new(BLUEZ_SERVICE, path, DBUS_TIMEOUT, Arc::clone(&self.conn)))
    }
}

impl BluezBus {
    /// Add a match rule on the bus and stream the signals it selects.
    async fn match_stream(&self, rule: &MatchRule) -> Result<MatchStream> {
        let interface = Interface::new(rule.interface.clone()).map_err(Error::Bus)?;
        let member = Member::new(rule.member.clone()).map_err(Error::Bus)?;
        let path = Path::new(rule.path.clone()).map_err(Error::Bus)?;
        let dbus_rule = DbusMatchRule::new_signal(interface, member).with_path(path);

        let (registration, messages) = self
            .conn
            .add_match(dbus_rule)
            .await
            .map_err(|e| Error::Bus(e.to_string()))?
            .msg_stream();
        let token = registration.token();
        debug!(rule = %rule, "Signal match added");

        let signals = messages
            .filter_map(move |msg| {
                let _registration = &registration;
                futures::future::ready(signal_from_message(&msg))
            })
            .boxed();
        Ok(MatchStream {
            signals,
            conn: Arc::clone(&self.conn),
            token,
        })
    }
}

/// Signals selected by one bus match rule.
///
/// Dropping the stream removes the rule from the bus daemon and the local
/// filter table.
struct MatchStream {
    signals: BoxStream<'static, RawSignal>,
    conn: Arc<SyncConnection>,
    token: Token,
}

impl Stream for MatchStream {
    type Item = RawSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<RawSignal>> {
        self.signals.poll_next_unpin(cx)
    }
}

impl Drop for MatchStream {
    fn drop(&mut self) {
        let conn = Arc::clone(&self.conn);
        let token = self.token;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match conn.remove_match(token).await {
                        Ok(()) => debug!("Signal match removed"),
                        Err(e) => warn!(error = %e, "Failed to remove signal match"),
                    }
                });
            }
            Err(_) => warn!("No runtime to remove signal match, it stays until disconnect"),
        }
    }
}

impl Drop for BluezBus {
    fn drop(&mut self) {
        self.io.abort();
    }
}

#[async_trait]
impl Bus for BluezBus {
    async fn discover(&self) -> Result<AttributeStore> {
        let proxy = self.proxy("/")?;
        let reply: Reply = proxy
            .method_call(OBJECT_MANAGER_INTERFACE, "GetManagedObjects", ())
            .await
            .map_err(|e| {
                Error::remote_call_failed("/", OBJECT_MANAGER_INTERFACE, "GetManagedObjects", e.to_string())
            })?;

        let Some(Value::Map(objects)) = reply.0.into_iter().next() else {
            return Err(Error::Bus("unexpected GetManagedObjects reply".to_string()));
        };

        let mut store = AttributeStore::new();
        for (path, interfaces) in objects {
            let mut object = RawObject::new(path);
            if let Value::Map(interfaces) = interfaces {
                for (name, attributes) in interfaces {
                    if let Value::Map(attributes) = attributes {
                        object.interfaces.insert(name, attributes);
                    }
                }
            }
            store.insert(object);
        }
        debug!(objects = store.len(), "Discovery snapshot taken");
        Ok(store)
    }

    async fn subscribe(&self, rule: &MatchRule) -> Result<SignalStream> {
        Ok(self.match_stream(rule).await?.boxed())
    }

    async fn invoke(
        &self,
        path: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let proxy = self.proxy(path)?;
        let iface = Interface::new(interface.to_string()).map_err(Error::Bus)?;
        let member = Member::new(method.to_string()).map_err(Error::Bus)?;

        let reply: Reply = proxy
            .method_call(iface, member, Args(args))
            .await
            .map_err(|e| Error::remote_call_failed(path, interface, method, e.to_string()))?;
        Ok(reply.0)
    }
}

/// Reply arguments, converted while reading.
struct Reply(Vec<Value>);

impl ReadAll for Reply {
    fn read(iter: &mut Iter) -> std::result::Result<Self, TypeMismatchError> {
        Ok(Reply(read_values(iter)))
    }
}

/// Call arguments.
struct Args(Vec<Value>);

impl AppendAll for Args {
    fn append(&self, ia: &mut IterAppend) {
        for value in &self.0 {
            RefArg::append(&*to_refarg(value), ia);
        }
    }
}

fn read_values(iter: &mut Iter) -> Vec<Value> {
    let mut values = Vec::new();
    while let Some(arg) = iter.get_refarg() {
        values.push(from_refarg(arg.as_ref()));
        iter.next();
    }
    values
}

fn signal_from_message(msg: &Message) -> Option<RawSignal> {
    let path = msg.path()?.to_string();
    let interface = msg.interface()?.to_string();
    let member = msg.member()?.to_string();
    let body = read_values(&mut msg.iter_init());
    Some(RawSignal {
        path,
        interface,
        member,
        body,
    })
}

/// Convert any D-Bus argument into a [`Value`].
fn from_refarg(arg: &dyn RefArg) -> Value {
    match arg.arg_type() {
        ArgType::String | ArgType::Signature => {
            Value::String(arg.as_str().unwrap_or_default().to_string())
        }
        ArgType::ObjectPath => Value::ObjectPath(arg.as_str().unwrap_or_default().to_string()),
        ArgType::Boolean => Value::Bool(
            cast::<bool>(arg)
                .copied()
                .unwrap_or_else(|| arg.as_u64().is_some_and(|b| b != 0)),
        ),
        ArgType::Byte | ArgType::UInt16 | ArgType::UInt32 | ArgType::UInt64 | ArgType::UnixFd => {
            Value::Uint(arg.as_u64().unwrap_or_default())
        }
        ArgType::Int16 | ArgType::Int32 | ArgType::Int64 => {
            Value::Int(arg.as_i64().unwrap_or_default())
        }
        ArgType::Double => Value::Float(arg.as_f64().unwrap_or_default()),
        ArgType::Variant => arg
            .as_iter()
            .and_then(|mut inner| inner.next().map(from_refarg))
            .unwrap_or(Value::Array(Vec::new())),
        ArgType::Array => {
            let signature = arg.signature();
            let signature: &str = &signature;
            let items = arg.as_iter();
            if signature == "ay" {
                Value::Bytes(
                    items
                        .map(|it| it.filter_map(|b| b.as_u64()).map(|b| b as u8).collect())
                        .unwrap_or_default(),
                )
            } else if signature.starts_with("a{") {
                let mut map = ValueMap::new();
                if let Some(mut items) = items {
                    while let (Some(key), Some(value)) = (items.next(), items.next()) {
                        let key = key
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| from_refarg(key).to_string());
                        map.insert(key, from_refarg(value));
                    }
                }
                Value::Map(map)
            } else {
                Value::Array(
                    items
                        .map(|it| it.map(from_refarg).collect())
                        .unwrap_or_default(),
                )
            }
        }
        ArgType::Struct | ArgType::DictEntry => Value::Array(
            arg.as_iter()
                .map(|it| it.map(from_refarg).collect())
                .unwrap_or_default(),
        ),
        ArgType::Invalid => Value::Array(Vec::new()),
    }
}

/// Convert a [`Value`] into an owned D-Bus argument. Nested values are
/// wrapped in variants, so arrays become `av` and maps become `a{sv}`.
fn to_refarg(value: &Value) -> Box<dyn RefArg> {
    match value {
        Value::String(s) => Box::new(s.clone()),
        Value::Bool(b) => Box::new(*b),
        Value::Int(i) => Box::new(*i),
        Value::Uint(u) => Box::new(*u),
        Value::Float(f) => Box::new(*f),
        Value::Bytes(b) => Box::new(b.clone()),
        Value::ObjectPath(p) => match Path::new(p.clone()) {
            Ok(path) => Box::new(path),
            Err(_) => Box::new(p.clone()),
        },
        Value::Array(items) => Box::new(
            items
                .iter()
                .map(|v| Variant(to_refarg(v)))
                .collect::<Vec<_>>(),
        ),
        Value::Map(map) => Box::new(
            map.iter()
                .map(|(k, v)| (k.clone(), Variant(to_refarg(v))))
                .collect::<PropMap>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_and_variants() {
        let value = Variant(Box::new(vec![0x14u8, 0x00, 0x05]) as Box<dyn RefArg>);
        assert_eq!(from_refarg(&value), Value::Bytes(vec![0x14, 0x00, 0x05]));
    }

    #[test]
    fn test_property_map() {
        let mut props = PropMap::new();
        props.insert("Name".to_string(), Variant(Box::new("BBQ".to_string())));
        props.insert("Connected".to_string(), Variant(Box::new(true)));

        let Value::Map(map) = from_refarg(&props) else {
            panic!("expected a map");
        };
        assert_eq!(map.get("Name"), Some(&Value::from("BBQ")));
        assert_eq!(map.get("Connected"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_write_value_arguments_keep_their_types() {
        let bytes = to_refarg(&Value::Bytes(vec![0x23, 0x00]));
        assert_eq!(&*bytes.signature(), "ay");

        let options = to_refarg(&Value::Map(ValueMap::new()));
        assert_eq!(&*options.signature(), "a{sv}");
    }

    #[tokio::test]
    #[ignore = "requires the D-Bus system bus"]
    async fn test_dropping_stream_removes_match() {
        let bus = BluezBus::connect().unwrap();
        let stream = bus
            .match_stream(&MatchRule::properties_changed("/org/bluez"))
            .await
            .unwrap();
        let token = stream.token;

        drop(stream);
        tokio::time::sleep(Duration::from_millis(200)).await;

        // already removed by the drop
        assert!(bus.conn.remove_match(token).await.is_err());
    }
}
