//! In-memory transport for tests and simulation.
//!
//! Simulates a small process-variable server:
//! - Seeded process variables with a native kind and current value
//! - Automatic (optionally delayed) or manual connection
//! - Setpoint → readback links so writes show up on readback channels
//! - Delayed put-callbacks
//! - Monitors fired synchronously on every write
//! - Per-channel fault injection
//!
//! All delays use `tokio::time::sleep`, never `std::thread::sleep`.
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = SimulatedTransport::new()
//!     .with_pv("ID:GAP:SP", ValueKind::Double, 20.0.into())
//!     .with_pv("ID:GAP:RBV", ValueKind::Double, 20.0.into())
//!     .with_link("ID:GAP:SP", "ID:GAP:RBV");
//! ```

use super::{
    ChannelAccess, ChannelHandle, ChannelValue, ConnectionSink, MonitorListener, PutCallback,
    PutStatus, ValueKind,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Fault that can be injected for one channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `create_channel` fails
    Create,
    /// `get` fails
    Get,
    /// `put` and `put_with_callback` fail to issue
    Put,
    /// `set_monitor` fails
    Monitor,
    /// `destroy` fails
    Destroy,
    /// `put_with_callback` issues but completes with failure
    CallbackFailure,
}

/// How channels become connected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectPolicy {
    /// Connect known process variables after the given delay
    Auto(Duration),
    /// Only connect when [`SimulatedTransport::connect`] is called
    Manual,
}

struct ProcessVariable {
    kind: ValueKind,
    value: ChannelValue,
    monitors: Vec<(ValueKind, MonitorListener)>,
}

struct ChannelRecord {
    handle: ChannelHandle,
    sink: ConnectionSink,
    connected: bool,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    pvs: HashMap<String, ProcessVariable>,
    channels: HashMap<u64, ChannelRecord>,
    links: HashMap<String, Vec<String>>,
    faults: HashMap<String, HashSet<Fault>>,
    writes: Vec<(String, ChannelValue)>,
    destroyed: Vec<String>,
}

impl Inner {
    fn has_fault(&self, name: &str, fault: Fault) -> bool {
        self.faults
            .get(name)
            .is_some_and(|faults| faults.contains(&fault))
    }

    fn live_record(&self, handle: &ChannelHandle) -> Result<&ChannelRecord> {
        let record = self
            .channels
            .get(&handle.id())
            .ok_or_else(|| anyhow!("unknown channel {handle}"))?;
        if !record.connected {
            bail!("channel {handle} is not connected");
        }
        Ok(record)
    }

    /// Store `value` under `name` and every linked name, returning the
    /// monitors to notify once the lock is released.
    fn write(&mut self, name: &str, value: ChannelValue) -> Vec<(MonitorListener, ChannelValue)> {
        self.writes.push((name.to_string(), value.clone()));
        let mut targets = vec![name.to_string()];
        if let Some(linked) = self.links.get(name) {
            targets.extend(linked.iter().cloned());
        }

        let mut notify = Vec::new();
        for target in targets {
            if let Some(pv) = self.pvs.get_mut(&target) {
                pv.value = value.clone();
                for (kind, listener) in &pv.monitors {
                    notify.push((listener.clone(), kind.coerce(&value)));
                }
            }
        }
        notify
    }
}

/// In-memory [`ChannelAccess`] implementation.
///
/// Cloning shares the underlying state, so a test can keep a clone to drive
/// connections and inspect writes while the registry owns another.
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<Mutex<Inner>>,
    policy: ConnectPolicy,
    put_callback_delay: Duration,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedTransport {
    /// Transport that connects known process variables immediately
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            policy: ConnectPolicy::Auto(Duration::ZERO),
            put_callback_delay: Duration::from_millis(10),
        }
    }

    /// Transport whose channels only connect on demand
    pub fn manual() -> Self {
        Self {
            policy: ConnectPolicy::Manual,
            ..Self::new()
        }
    }

    /// Set the connection policy
    pub fn with_policy(mut self, policy: ConnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Delay between a callback put and its completion
    pub fn with_put_callback_delay(mut self, delay: Duration) -> Self {
        self.put_callback_delay = delay;
        self
    }

    /// Seed a process variable
    pub fn with_pv(self, name: &str, kind: ValueKind, value: ChannelValue) -> Self {
        self.add_pv(name, kind, value);
        self
    }

    /// Mirror every write of `from` into `to`
    pub fn with_link(self, from: &str, to: &str) -> Self {
        self.inner
            .lock()
            .links
            .entry(from.to_string())
            .or_default()
            .push(to.to_string());
        self
    }

    /// Seed or replace a process variable
    pub fn add_pv(&self, name: &str, kind: ValueKind, value: ChannelValue) {
        self.inner.lock().pvs.insert(
            name.to_string(),
            ProcessVariable {
                kind,
                value,
                monitors: Vec::new(),
            },
        );
    }

    /// Inject a fault for `name`
    pub fn inject(&self, name: &str, fault: Fault) {
        self.inner
            .lock()
            .faults
            .entry(name.to_string())
            .or_default()
            .insert(fault);
    }

    /// Remove every fault injected for `name`
    pub fn clear_faults(&self, name: &str) {
        self.inner.lock().faults.remove(name);
    }

    /// Connect every channel created for `name`; returns how many connected.
    ///
    /// Connecting a name that has no seeded process variable is allowed and
    /// reports it as a double.
    pub fn connect(&self, name: &str) -> usize {
        let events = {
            let mut inner = self.inner.lock();
            let kind = inner
                .pvs
                .get(name)
                .map(|pv| pv.kind)
                .unwrap_or(ValueKind::Double);
            inner
                .channels
                .values_mut()
                .filter(|record| record.handle.name() == name && !record.connected)
                .map(|record| {
                    record.connected = true;
                    (record.sink.clone(), record.handle.clone(), kind)
                })
                .collect::<Vec<_>>()
        };
        for (sink, handle, kind) in &events {
            sink.connected(handle.clone(), *kind);
        }
        events.len()
    }

    /// Drop the connection of every channel created for `name`
    pub fn disconnect(&self, name: &str) -> usize {
        let events = {
            let mut inner = self.inner.lock();
            inner
                .channels
                .values_mut()
                .filter(|record| record.handle.name() == name && record.connected)
                .map(|record| {
                    record.connected = false;
                    (record.sink.clone(), record.handle.clone())
                })
                .collect::<Vec<_>>()
        };
        for (sink, handle) in &events {
            sink.disconnected(handle.clone());
        }
        events.len()
    }

    /// Write a value as if it came from the remote side
    pub fn set_remote(&self, name: &str, value: ChannelValue) {
        let notify = self.inner.lock().write(name, value);
        for (listener, value) in notify {
            listener(value);
        }
    }

    /// Current value of a process variable
    pub fn value(&self, name: &str) -> Option<ChannelValue> {
        self.inner.lock().pvs.get(name).map(|pv| pv.value.clone())
    }

    /// Every value written to `name` through the transport, oldest first
    pub fn writes_to(&self, name: &str) -> Vec<ChannelValue> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|(target, _)| target == name)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Number of monitors installed on `name`
    pub fn monitor_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .pvs
            .get(name)
            .map_or(0, |pv| pv.monitors.len())
    }

    /// Names released through `destroy`, in order
    pub fn destroyed(&self) -> Vec<String> {
        self.inner.lock().destroyed.clone()
    }

    /// Number of channels currently held open
    pub fn open_channels(&self) -> usize {
        self.inner.lock().channels.len()
    }
}

#[async_trait]
impl ChannelAccess for SimulatedTransport {
    async fn create_channel(&self, name: &str, sink: ConnectionSink) -> Result<ChannelHandle> {
        let (handle, known) = {
            let mut inner = self.inner.lock();
            if inner.has_fault(name, Fault::Create) {
                bail!("simulated create failure for {name}");
            }
            inner.next_id += 1;
            let handle = ChannelHandle::new(inner.next_id, name);
            inner.channels.insert(
                handle.id(),
                ChannelRecord {
                    handle: handle.clone(),
                    sink,
                    connected: false,
                },
            );
            (handle, inner.pvs.contains_key(name))
        };

        if let ConnectPolicy::Auto(delay) = self.policy {
            if known {
                let transport = self.clone();
                let name = name.to_string();
                tokio::spawn(async move {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    transport.connect(&name);
                });
            }
        }

        Ok(handle)
    }

    async fn get(&self, handle: &ChannelHandle) -> Result<ChannelValue> {
        let inner = self.inner.lock();
        inner.live_record(handle)?;
        if inner.has_fault(handle.name(), Fault::Get) {
            bail!("simulated read failure for {handle}");
        }
        inner
            .pvs
            .get(handle.name())
            .map(|pv| pv.value.clone())
            .ok_or_else(|| anyhow!("no value for {handle}"))
    }

    async fn put(&self, handle: &ChannelHandle, value: ChannelValue) -> Result<()> {
        let notify = {
            let mut inner = self.inner.lock();
            inner.live_record(handle)?;
            if inner.has_fault(handle.name(), Fault::Put) {
                bail!("simulated write failure for {handle}");
            }
            inner.write(handle.name(), value)
        };
        for (listener, value) in notify {
            listener(value);
        }
        Ok(())
    }

    async fn put_with_callback(
        &self,
        handle: &ChannelHandle,
        value: ChannelValue,
        callback: PutCallback,
    ) -> Result<()> {
        self.put(handle, value).await?;

        let status = if self
            .inner
            .lock()
            .has_fault(handle.name(), Fault::CallbackFailure)
        {
            PutStatus::Failure(format!("simulated completion failure for {handle}"))
        } else {
            PutStatus::Success
        };
        let delay = self.put_callback_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            callback(status);
        });
        Ok(())
    }

    async fn set_monitor(
        &self,
        handle: &ChannelHandle,
        kind: ValueKind,
        listener: MonitorListener,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.live_record(handle)?;
        if inner.has_fault(handle.name(), Fault::Monitor) {
            bail!("simulated monitor failure for {handle}");
        }
        let pv = inner
            .pvs
            .get_mut(handle.name())
            .ok_or_else(|| anyhow!("no process variable behind {handle}"))?;
        pv.monitors.push((kind, listener));
        Ok(())
    }

    async fn destroy(&self, handle: &ChannelHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.has_fault(handle.name(), Fault::Destroy) {
            bail!("simulated destroy failure for {handle}");
        }
        inner.channels.remove(&handle.id());
        inner.destroyed.push(handle.name().to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ConnectionEvent;
    use tokio::sync::mpsc;

    fn sink() -> (ConnectionSink, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionSink::new(tx), rx)
    }

    #[tokio::test]
    async fn auto_policy_connects_known_pvs() {
        let transport = SimulatedTransport::new().with_pv("A", ValueKind::Double, 1.0.into());
        let (sink, mut rx) = sink();
        let handle = transport.create_channel("A", sink).await.unwrap();

        match rx.recv().await.unwrap() {
            ConnectionEvent::Connected {
                handle: h,
                native_kind,
            } => {
                assert_eq!(h, handle);
                assert_eq!(native_kind, ValueKind::Double);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert_eq!(transport.get(&handle).await.unwrap(), ChannelValue::Double(1.0));
    }

    #[tokio::test]
    async fn manual_policy_waits_for_connect() {
        let transport = SimulatedTransport::manual().with_pv("A", ValueKind::Int, 0i64.into());
        let (sink, mut rx) = sink();
        let handle = transport.create_channel("A", sink).await.unwrap();

        assert!(transport.get(&handle).await.is_err());
        assert!(rx.try_recv().is_err());

        assert_eq!(transport.connect("A"), 1);
        assert!(rx.recv().await.is_some());
        assert!(transport.get(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn links_mirror_writes_and_fire_monitors() {
        let transport = SimulatedTransport::new()
            .with_pv("SP", ValueKind::Double, 0.0.into())
            .with_pv("RBV", ValueKind::Double, 0.0.into())
            .with_link("SP", "RBV");
        let (sink_a, _rx_a) = sink();
        let (sink_b, _rx_b) = sink();
        let sp = transport.create_channel("SP", sink_a).await.unwrap();
        let rbv = transport.create_channel("RBV", sink_b).await.unwrap();
        transport.connect("SP");
        transport.connect("RBV");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        transport
            .set_monitor(
                &rbv,
                ValueKind::Int,
                Arc::new(move |value| seen_clone.lock().push(value)),
            )
            .await
            .unwrap();

        transport.put(&sp, 4.0.into()).await.unwrap();
        assert_eq!(transport.value("RBV"), Some(ChannelValue::Double(4.0)));
        assert_eq!(*seen.lock(), vec![ChannelValue::Int(4)]);
    }

    #[tokio::test]
    async fn injected_faults_surface_as_errors() {
        let transport = SimulatedTransport::new().with_pv("A", ValueKind::Double, 0.0.into());
        transport.inject("A", Fault::Create);
        let (sink, _rx) = sink();
        assert!(transport.create_channel("A", sink.clone()).await.is_err());

        transport.clear_faults("A");
        let handle = transport.create_channel("A", sink).await.unwrap();
        transport.connect("A");
        transport.inject("A", Fault::Put);
        assert!(transport.put(&handle, 1.0.into()).await.is_err());
    }

    #[tokio::test]
    async fn callback_reports_injected_failure() {
        let transport = SimulatedTransport::new()
            .with_pv("GO", ValueKind::Int, 0i64.into())
            .with_put_callback_delay(Duration::from_millis(1));
        let (sink, _rx) = sink();
        let handle = transport.create_channel("GO", sink).await.unwrap();
        transport.connect("GO");
        transport.inject("GO", Fault::CallbackFailure);

        let (tx, rx) = tokio::sync::oneshot::channel();
        transport
            .put_with_callback(
                &handle,
                1i64.into(),
                Box::new(move |status| {
                    let _ = tx.send(status);
                }),
            )
            .await
            .unwrap();
        assert!(!rx.await.unwrap().is_success());
    }
}
