//! Session scheduler: owns the attached devices, the trigger, the datafeed
//! bus, and the event-source table; drives the start/run/stop lifecycle
//! (spec §3 "Session", §4.H).

pub mod source;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigKey;
use crate::device::{ChannelType, DeviceInstance};
use crate::error::{Error, ErrorKind, Result};
use crate::feed::{Bus, DatafeedCallback, Packet, Transform};

pub use source::{DispatchCallback, Readiness, SourceKey, SourceTable};

/// How a trigger match is evaluated against a channel's samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Logic channel reads exactly 0.
    Zero,
    /// Logic channel reads exactly 1.
    One,
    /// Logic channel transitions low-to-high.
    Rising,
    /// Logic channel transitions high-to-low.
    Falling,
    /// Logic channel transitions in either direction.
    Edge,
    /// Analog channel crosses above `value`.
    Over,
    /// Analog channel crosses below `value`.
    Under,
}

impl MatchKind {
    fn applies_to(&self, channel_type: ChannelType) -> bool {
        match (self, channel_type) {
            (MatchKind::Zero | MatchKind::One | MatchKind::Rising | MatchKind::Falling | MatchKind::Edge, ChannelType::Logic) => true,
            (MatchKind::Rising | MatchKind::Falling | MatchKind::Over | MatchKind::Under, ChannelType::Analog) => true,
            _ => false,
        }
    }

    fn is_level_value(&self) -> bool {
        matches!(self, MatchKind::Over | MatchKind::Under)
    }
}

/// One channel condition within a [`TriggerStage`].
#[derive(Debug, Clone, Copy)]
pub struct TriggerMatch {
    /// Index into the owning device's channel list.
    pub channel: usize,
    /// The condition kind.
    pub kind: MatchKind,
    /// Threshold value for `Over`/`Under` matches; ignored otherwise.
    pub value: Option<f64>,
}

/// One stage of a multi-stage trigger: all of its matches must hold
/// simultaneously to advance to the next stage.
#[derive(Debug, Clone)]
pub struct TriggerStage {
    /// 1-based stage number, for diagnostics.
    pub stage: u32,
    /// Conditions that must all hold for this stage to fire.
    pub matches: Vec<TriggerMatch>,
}

/// A named, ordered list of trigger stages (spec §3, "Trigger").
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    /// Stages, evaluated in order.
    pub stages: Vec<TriggerStage>,
}

/// Clamp an `Over`/`Under` match's threshold into an encoding's
/// representable range, rather than rejecting it outright.
///
/// The original only says verification accepts any value for these kinds
/// without specifying what happens to an out-of-range one; this crate
/// resolves that by clamping so an overly ambitious threshold degrades to
/// "always/never satisfied" instead of failing trigger setup.
pub fn clamp_trigger_value(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}

fn verify_trigger(trigger: &Trigger, device: &DeviceInstance) -> Result<()> {
    if trigger.stages.is_empty() {
        return Err(Error::new(ErrorKind::Arg, "trigger has no stages defined"));
    }
    for stage in &trigger.stages {
        if stage.matches.is_empty() {
            return Err(Error::new(ErrorKind::Arg, format!("trigger stage {} has no matches defined", stage.stage)));
        }
        for m in &stage.matches {
            let channel = device
                .channels
                .get(m.channel)
                .ok_or_else(|| Error::new(ErrorKind::Arg, format!("trigger stage {} match has no such channel", stage.stage)))?;
            if !m.kind.applies_to(channel.channel_type) {
                return Err(Error::new(
                    ErrorKind::Arg,
                    format!("trigger stage {} match kind {:?} does not apply to a {:?} channel", stage.stage, m.kind, channel.channel_type),
                ));
            }
            if m.kind.is_level_value() && m.value.is_none() {
                return Err(Error::new(ErrorKind::Arg, format!("trigger stage {} Over/Under match has no value", stage.stage)));
            }
        }
    }
    Ok(())
}

/// The cooperative event loop and datafeed bus for a set of attached
/// devices. Devices are moved into the session on `attach_device` and
/// handed back out on `remove_device`/`remove_all_devices` -- the Rust
/// expression of "owned, but not freed on session destruction".
pub struct Session {
    devices: Vec<DeviceInstance>,
    trigger: Option<Trigger>,
    bus: Bus,
    sources: SourceTable,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    stopped_callback: Option<Box<dyn FnMut() + Send>>,
}

impl Session {
    /// An empty, not-running session.
    pub fn new() -> Result<Self> {
        Ok(Session {
            devices: Vec::new(),
            trigger: None,
            bus: Bus::new(),
            sources: SourceTable::new()?,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stopped_callback: None,
        })
    }

    /// Attach a device to this session, taking ownership of it. If the
    /// session is already running, commits its settings and starts
    /// acquisition immediately.
    pub fn attach_device(&mut self, mut device: DeviceInstance) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            let driver = device.driver().clone();
            driver.config_commit(&mut device)?;
            driver.dev_acquisition_start(&mut device)?;
        }
        self.devices.push(device);
        Ok(())
    }

    /// Detach and return the device at `index`, removing it from the
    /// session without freeing it.
    pub fn remove_device(&mut self, index: usize) -> Result<DeviceInstance> {
        if index >= self.devices.len() {
            return Err(Error::new(ErrorKind::Arg, "no such device index in session"));
        }
        Ok(self.devices.remove(index))
    }

    /// Detach every device, returning them to the caller in attachment
    /// order. The session itself is left empty, not destroyed.
    pub fn remove_all_devices(&mut self) -> Vec<DeviceInstance> {
        self.devices.drain(..).collect()
    }

    /// The devices currently attached, in attachment order.
    pub fn devices(&self) -> &[DeviceInstance] {
        &self.devices
    }

    /// Mutable access to an attached device, e.g. for a driver's event
    /// source callback to read/decode from its transport.
    pub fn device_mut(&mut self, index: usize) -> Option<&mut DeviceInstance> {
        self.devices.get_mut(index)
    }

    /// Assign (or clear, with `None`) this session's trigger.
    pub fn set_trigger(&mut self, trigger: Option<Trigger>) {
        self.trigger = trigger;
    }

    /// The currently assigned trigger, if any.
    pub fn trigger(&self) -> Option<&Trigger> {
        self.trigger.as_ref()
    }

    /// Register a datafeed callback, appended to the fan-out list.
    pub fn add_datafeed_callback(&mut self, callback: DatafeedCallback) {
        self.bus.add_callback(callback);
    }

    /// Remove every registered datafeed callback.
    pub fn remove_all_datafeed_callbacks(&mut self) {
        self.bus.remove_all_callbacks();
    }

    /// Append a transform to the end of the chain.
    pub fn add_transform(&mut self, transform: Box<dyn Transform>) {
        self.bus.add_transform(transform);
    }

    /// Send `packet` from `device_index` through the transform chain to
    /// every registered callback.
    pub fn send(&mut self, device_index: usize, packet: Packet) -> Result<()> {
        self.bus.send(device_index, packet)
    }

    /// Send a single-entry `META` packet.
    pub fn send_meta(&mut self, device_index: usize, key: ConfigKey, value: crate::config::Variant) -> Result<()> {
        self.bus.send_meta(device_index, key, value)
    }

    /// Install the callback invoked once the session has fully stopped.
    pub fn set_stopped_callback(&mut self, callback: Option<Box<dyn FnMut() + Send>>) {
        self.stopped_callback = callback;
    }

    /// Register an event source; drivers call this (rather than taking a
    /// `&mut Session` directly, see [`crate::driver::DriverOps`]) from
    /// their `dev_acquisition_start`.
    pub fn attach_source(
        &mut self,
        key: SourceKey,
        fd: Option<std::os::unix::io::RawFd>,
        interest: mio::Interest,
        timeout: Option<Duration>,
        callback: DispatchCallback,
    ) -> Result<()> {
        self.sources.add(key, fd, interest, timeout, callback)
    }

    /// Unregister an event source by key.
    pub fn remove_source(&mut self, key: SourceKey) -> Result<()> {
        let result = self.sources.remove(key);
        if result.is_ok() && self.sources.is_empty() && self.running.load(Ordering::SeqCst) {
            self.check_idle_stop();
        }
        result
    }

    /// Whether the session is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// A cheaply cloneable stop handle: calling [`StopHandle::stop`] is
    /// equivalent to `Session::stop` and may be done from another thread
    /// (spec: "This function is reentrant... may be called from a
    /// different thread").
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop_requested: self.stop_requested.clone(),
        }
    }

    /// Verify the trigger (if any), ensure every device has at least one
    /// enabled channel, commit settings, and start acquisition on every
    /// attached device. On any failure, devices already started are
    /// stopped in reverse order.
    pub fn start(&mut self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::new(ErrorKind::Arg, "a session cannot be started without devices"));
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Generic, "cannot (re-)start session while it is still running"));
        }
        if let Some(trigger) = &self.trigger {
            for device in &self.devices {
                verify_trigger(trigger, device)?;
            }
        }
        for device in &self.devices {
            if !device.channels.iter().any(|c| c.enabled) {
                return Err(Error::new(ErrorKind::Arg, format!("device {} has no enabled channels", device.display_id())));
            }
        }

        self.running.store(true, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);

        let mut started = 0;
        let mut failure = None;
        for device in self.devices.iter_mut() {
            let driver = device.driver().clone();
            if let Err(e) = driver.config_commit(device) {
                failure = Some(e);
                break;
            }
            if let Err(e) = driver.dev_acquisition_start(device) {
                failure = Some(e);
                break;
            }
            started += 1;
        }

        if let Some(e) = failure {
            for device in self.devices[..started].iter_mut().rev() {
                let driver = device.driver().clone();
                let _ = driver.dev_acquisition_stop(device);
            }
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if self.sources.is_empty() {
            self.check_idle_stop();
        }

        Ok(())
    }

    fn check_idle_stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) || !self.sources.is_empty() {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        if let Some(cb) = self.stopped_callback.as_mut() {
            cb();
        }
    }

    /// Run one scheduler tick: wait for the next due source (or forever if
    /// none have a timeout and at least one fd-backed source is pending),
    /// dispatch it, and retire any empty session. Returns `false` once the
    /// session has stopped and there is nothing left to drive.
    pub fn poll_once(&mut self) -> Result<bool> {
        if !self.running.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if self.stop_requested.swap(false, Ordering::SeqCst) {
            for device in self.devices.iter_mut() {
                let driver = device.driver().clone();
                let _ = driver.dev_acquisition_stop(device);
            }
        }
        if self.sources.is_empty() {
            self.check_idle_stop();
            return Ok(self.running.load(Ordering::SeqCst));
        }
        self.sources.poll_once()?;
        if self.sources.is_empty() {
            self.check_idle_stop();
        }
        Ok(self.running.load(Ordering::SeqCst))
    }

    /// Block, repeatedly calling [`Session::poll_once`], until the session
    /// stops.
    pub fn run(&mut self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Generic, "no session running"));
        }
        while self.poll_once()? {}
        Ok(())
    }

    /// Request acquisition stop on every attached device. Does not block
    /// on completion; event processing continues until the last source is
    /// removed. A no-op if the session is not running.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

/// A cross-thread handle that can request a session stop without holding
/// `&mut Session` (see `Session::stop_handle`).
#[derive(Clone)]
pub struct StopHandle {
    stop_requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Request a stop. The owning session observes this on its next
    /// `poll_once`/`run` iteration.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelType, InstanceType};
    use crate::driver::tests::test_driver;

    fn device_with_channel() -> DeviceInstance {
        let mut dev = DeviceInstance::new("A", "B", "1", "S", "c", InstanceType::User, test_driver());
        dev.add_channel(ChannelType::Analog, "CH1");
        dev.open().unwrap();
        dev
    }

    #[test]
    fn start_without_devices_fails() {
        let mut session = Session::new().unwrap();
        let err = session.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg);
    }

    #[test]
    fn start_with_no_enabled_channels_fails() {
        let mut session = Session::new().unwrap();
        let mut dev = device_with_channel();
        dev.set_channel_enabled(0, false).unwrap();
        session.attach_device(dev).unwrap();
        let err = session.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg);
    }

    #[test]
    fn start_with_no_sources_idles_immediately() {
        let mut session = Session::new().unwrap();
        session.attach_device(device_with_channel()).unwrap();
        session.start().unwrap();
        assert!(!session.is_running());
    }

    #[test]
    fn verify_trigger_rejects_mismatched_channel_kind() {
        let dev = device_with_channel();
        let trigger = Trigger {
            stages: vec![TriggerStage {
                stage: 1,
                matches: vec![TriggerMatch { channel: 0, kind: MatchKind::Zero, value: None }],
            }],
        };
        let err = verify_trigger(&trigger, &dev).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Arg);
    }

    #[test]
    fn verify_trigger_accepts_over_on_analog_channel() {
        let dev = device_with_channel();
        let trigger = Trigger {
            stages: vec![TriggerStage {
                stage: 1,
                matches: vec![TriggerMatch { channel: 0, kind: MatchKind::Over, value: Some(2.5) }],
            }],
        };
        assert!(verify_trigger(&trigger, &dev).is_ok());
    }

    #[test]
    fn clamp_keeps_value_in_range() {
        assert_eq!(clamp_trigger_value(15.0, 0.0, 10.0), 10.0);
        assert_eq!(clamp_trigger_value(-5.0, 0.0, 10.0), 0.0);
        assert_eq!(clamp_trigger_value(5.0, 0.0, 10.0), 5.0);
    }

    #[test]
    fn stop_handle_requests_stop_from_another_thread() {
        let mut session = Session::new().unwrap();
        session.attach_device(device_with_channel()).unwrap();
        // Keep one source registered so `start()` doesn't idle-stop
        // immediately; simulates a driver that registered real I/O.
        session.attach_source(1, None, mio::Interest::READABLE, Some(Duration::from_secs(3600)), Box::new(|_, _| Ok(true))).unwrap();
        session.start().unwrap();
        assert!(session.is_running());
        let handle = session.stop_handle();
        let joined = std::thread::spawn(move || handle.stop()).join();
        assert!(joined.is_ok());
        assert!(session.stop_requested.load(Ordering::SeqCst));
    }
}
