//! Insertion device driven through registry channels.
//!
//! Each axis has a setpoint and a readback channel. A move writes the five
//! setpoints together, then writes the start channel with a put-callback; the callback
//! firing is the step's completion. All channels are critical, so the
//! device is usable once the registry reports ready.

use super::capability::{IdControlMode, InsertionDevice, StepCompletion};
use super::position::{Axis, AxisPosition};
use crate::error::{AppResult, IdError};
use crate::registry::{Channel, ChannelRegistry, ChannelSpec};
use crate::transport::{ChannelValue, SimulatedTransport, ValueKind};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Setpoint and readback channel names for one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisChannels {
    /// Written to request a position
    pub setpoint: String,
    /// Monitored for the actual position
    pub readback: String,
}

impl AxisChannels {
    fn with_prefix(prefix: &str, stem: &str) -> Self {
        Self {
            setpoint: format!("{prefix}{stem}:SP"),
            readback: format!("{prefix}{stem}:RBV"),
        }
    }
}

/// Channel names of a channel-backed device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdChannelNames {
    /// Gap channels
    pub gap: AxisChannels,
    /// Top outer motor channels
    pub top_outer: AxisChannels,
    /// Top inner motor channels
    pub top_inner: AxisChannels,
    /// Bottom outer motor channels
    pub bottom_outer: AxisChannels,
    /// Bottom inner motor channels
    pub bottom_inner: AxisChannels,
    /// Nonzero / "ENABLED" when the device accepts moves
    pub enabled: String,
    /// Gap/phase control mode, enumerated or text
    pub control_mode: String,
    /// Written with a put-callback to start a move
    pub start: String,
}

impl IdChannelNames {
    /// Conventional names under a common prefix
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            gap: AxisChannels::with_prefix(prefix, "GAP"),
            top_outer: AxisChannels::with_prefix(prefix, "TOP_OUTER"),
            top_inner: AxisChannels::with_prefix(prefix, "TOP_INNER"),
            bottom_outer: AxisChannels::with_prefix(prefix, "BOTTOM_OUTER"),
            bottom_inner: AxisChannels::with_prefix(prefix, "BOTTOM_INNER"),
            enabled: format!("{prefix}ENABLED"),
            control_mode: format!("{prefix}CONTROL_MODE"),
            start: format!("{prefix}START"),
        }
    }

    /// Names for one axis
    pub fn axis(&self, axis: Axis) -> &AxisChannels {
        match axis {
            Axis::Gap => &self.gap,
            Axis::TopOuter => &self.top_outer,
            Axis::TopInner => &self.top_inner,
            Axis::BottomOuter => &self.bottom_outer,
            Axis::BottomInner => &self.bottom_inner,
        }
    }

    /// Every channel name, setpoints and readbacks first
    pub fn all(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Axis::ALL
            .iter()
            .flat_map(|axis| {
                let channels = self.axis(*axis);
                [channels.setpoint.as_str(), channels.readback.as_str()]
            })
            .collect();
        names.extend([
            self.enabled.as_str(),
            self.control_mode.as_str(),
            self.start.as_str(),
        ]);
        names
    }
}

impl IdChannelNames {
    /// In-memory transport serving these channels.
    ///
    /// Readbacks start at `position` and follow their setpoints; the device
    /// reports enabled and in gap-and-phase control.
    pub fn simulated_transport(&self, position: AxisPosition) -> SimulatedTransport {
        let mut transport = SimulatedTransport::new();
        for axis in Axis::ALL {
            let channels = self.axis(axis);
            let value = ChannelValue::Double(position.get(axis));
            transport = transport
                .with_pv(&channels.setpoint, ValueKind::Double, value.clone())
                .with_pv(&channels.readback, ValueKind::Double, value)
                .with_link(&channels.setpoint, &channels.readback);
        }
        transport
            .with_pv(&self.enabled, ValueKind::Enum, ChannelValue::Int(1))
            .with_pv(
                &self.control_mode,
                ValueKind::String,
                ChannelValue::Text(IdControlMode::GapAndPhase.to_string()),
            )
            .with_pv(&self.start, ValueKind::Int, ChannelValue::Int(0))
    }
}

impl Default for IdChannelNames {
    fn default() -> Self {
        Self::with_prefix("SR10I-MO-SERVC-01:")
    }
}

struct AxisPair {
    setpoint: Channel,
    readback: Channel,
}

/// Insertion device reached through a [`ChannelRegistry`].
pub struct ChannelBackedId {
    axes: HashMap<Axis, AxisPair>,
    enabled: Channel,
    control_mode: Channel,
    start: Channel,
    latest: Arc<RwLock<HashMap<Axis, f64>>>,
}

impl ChannelBackedId {
    /// Create every channel the device needs as critical.
    ///
    /// Readbacks are monitored so [`latest_readbacks`](Self::latest_readbacks)
    /// follows the hardware. The caller still marks the creation phase
    /// completed and waits for readiness.
    pub async fn create(registry: &ChannelRegistry, names: &IdChannelNames) -> AppResult<Self> {
        let latest: Arc<RwLock<HashMap<Axis, f64>>> = Arc::new(RwLock::new(HashMap::new()));
        let mut axes = HashMap::new();

        for axis in Axis::ALL {
            let channels = names.axis(axis);
            let setpoint = registry
                .create_channel(ChannelSpec::new(&channels.setpoint).critical())
                .await?;

            let cache = latest.clone();
            let readback = registry
                .create_channel(
                    ChannelSpec::new(&channels.readback)
                        .critical()
                        .with_monitor(move |value: ChannelValue| {
                            if let Some(v) = value.as_f64() {
                                cache.write().insert(axis, v);
                            }
                        }),
                )
                .await?;
            axes.insert(axis, AxisPair { setpoint, readback });
        }

        let enabled = registry
            .create_channel(ChannelSpec::new(&names.enabled).critical())
            .await?;
        let control_mode = registry
            .create_channel(ChannelSpec::new(&names.control_mode).critical())
            .await?;
        let start = registry
            .create_channel(ChannelSpec::new(&names.start).critical())
            .await?;

        debug!(channels = names.all().len(), "insertion device channels created");
        Ok(Self {
            axes,
            enabled,
            control_mode,
            start,
            latest,
        })
    }

    fn pair(&self, axis: Axis) -> Result<&AxisPair> {
        self.axes
            .get(&axis)
            .ok_or_else(|| anyhow!("no channels for {axis}"))
    }

    /// Last monitored readback of each axis seen so far
    pub fn latest_readbacks(&self) -> HashMap<Axis, f64> {
        self.latest.read().clone()
    }
}

fn truthy(value: &ChannelValue) -> Option<bool> {
    match value {
        ChannelValue::Int(v) => Some(*v != 0),
        ChannelValue::Double(v) => Some(*v != 0.0),
        ChannelValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
            "enabled" | "enable" | "on" | "yes" | "true" | "1" => Some(true),
            "disabled" | "disable" | "off" | "no" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[async_trait]
impl InsertionDevice for ChannelBackedId {
    async fn start_move(&self, target: AxisPosition, completion: StepCompletion) -> Result<()> {
        let setpoints = Axis::ALL
            .into_iter()
            .map(|axis| Ok((self.pair(axis)?, target.get(axis))))
            .collect::<Result<Vec<_>>>()?;
        try_join_all(
            setpoints
                .into_iter()
                .map(|(pair, value)| pair.setpoint.put(value)),
        )
        .await?;
        self.start
            .put_with_callback(1i64, completion.into_put_callback())
            .await?;
        debug!(%target, "move started");
        Ok(())
    }

    async fn read_axis(&self, axis: Axis) -> Result<f64> {
        Ok(self.pair(axis)?.readback.get_f64().await?)
    }

    async fn is_enabled(&self) -> Result<bool> {
        let value = self.enabled.get().await?;
        truthy(&value).ok_or_else(|| {
            IdError::TypeMismatch {
                name: self.enabled.name().to_string(),
                expected: "boolean",
                found: value.to_string(),
            }
            .into()
        })
    }

    async fn control_mode(&self) -> Result<IdControlMode> {
        let value = self.control_mode.get().await?;
        let mode = match &value {
            ChannelValue::Text(text) => text.parse::<IdControlMode>().ok(),
            other => other.as_i64().and_then(IdControlMode::from_index),
        };
        mode.ok_or_else(|| {
            IdError::ModeMismatch(format!(
                "{} reports unrecognised control mode {}",
                self.control_mode.name(),
                value
            ))
            .into()
        })
    }
}
