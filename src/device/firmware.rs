//! The firmware loop.
//!
//! [`Firmware`] owns every piece of device state: the sensor banks with their
//! snapshot buffers, the status LED, the transmission scheduler and the
//! transport handles. [`Firmware::setup`] runs once; [`Firmware::tick`] is
//! one pass of the control loop.

use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::ble::transport::{ChannelId, WirelessTransport};
use crate::data::{SensorClass, SensorSnapshot};
use crate::device::clock::Clock;
use crate::device::config::{
    validate_unique_ids, DeviceConfig, OxygenSampling, SensorBinding, SensorSlot,
};
use crate::device::gate::{ConnectionGate, GateState};
use crate::device::led::StatusIndicator;
use crate::device::scheduler::TransmissionScheduler;
use crate::error::{Error, Result};
use crate::sensors::hal::Board;
use crate::sensors::{CompositeSensor, ForceSensor, PulseOximeter, ScalarSensor, Thermistor};
use crate::utils::hex_dump;

/// Scalar sensors of one class and their snapshot buffer.
pub struct ScalarBank {
    sensors: Vec<Box<dyn ScalarSensor>>,
    snapshot: SensorSnapshot,
}

impl ScalarBank {
    /// Create a bank; the snapshot is sized once here.
    pub fn new(class: SensorClass, sensors: Vec<Box<dyn ScalarSensor>>) -> Result<Self> {
        validate_unique_ids(class, sensors.iter().map(|s| s.id()))?;
        let snapshot = SensorSnapshot::new(class, sensors.len());
        Ok(Self { sensors, snapshot })
    }

    /// Read every sensor and re-encode the snapshot in slot order.
    pub fn sample(&mut self) -> Result<()> {
        for (slot, sensor) in self.sensors.iter_mut().enumerate() {
            let value = sensor.read_value();
            self.snapshot.write_scalar(slot, sensor.id(), value)?;
        }
        trace!("Sampled {} {} sensors", self.sensors.len(), self.snapshot.class());
        Ok(())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }
}

/// Composite sensors of one class and their snapshot buffer.
pub struct CompositeBank {
    sensors: Vec<Box<dyn CompositeSensor>>,
    snapshot: SensorSnapshot,
}

impl CompositeBank {
    /// Create a bank; the snapshot is sized once here.
    pub fn new(class: SensorClass, sensors: Vec<Box<dyn CompositeSensor>>) -> Result<Self> {
        validate_unique_ids(class, sensors.iter().map(|s| s.id()))?;
        let snapshot = SensorSnapshot::new(class, sensors.len());
        Ok(Self { sensors, snapshot })
    }

    /// Read every sensor and re-encode the snapshot in slot order.
    pub fn sample(&mut self) -> Result<()> {
        for (slot, sensor) in self.sensors.iter_mut().enumerate() {
            let reading = sensor.read_reading();
            self.snapshot.write_composite(slot, sensor.id(), &reading)?;
        }
        Ok(())
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.snapshot
    }
}

/// Already-constructed sensors, in transmission order per class.
#[derive(Default)]
pub struct SensorSet {
    /// Thermistors.
    pub thermistors: Vec<Box<dyn ScalarSensor>>,
    /// Force sensors.
    pub forces: Vec<Box<dyn ScalarSensor>>,
    /// Pulse oximeters.
    pub oximeters: Vec<Box<dyn CompositeSensor>>,
}

impl SensorSet {
    /// Build every sensor in `config`'s slot table from the board.
    ///
    /// Pulse oximeters are initialised here, so a hub that does not come up
    /// fails startup.
    pub fn from_board(config: &DeviceConfig, board: &mut dyn Board) -> Result<Self> {
        let mut set = Self::default();

        for slot in &config.slots {
            match (slot.class, slot.binding) {
                (SensorClass::Thermistor, SensorBinding::Analog { pin }) => {
                    let pin = board.analog_pin(pin)?;
                    set.thermistors.push(Box::new(Thermistor::with_params(
                        pin,
                        slot.id,
                        config.thermistor_params,
                    )));
                }
                (SensorClass::Force, SensorBinding::Analog { pin }) => {
                    let pin = board.analog_pin(pin)?;
                    set.forces.push(Box::new(ForceSensor::with_params(
                        pin,
                        slot.id,
                        config.force_params,
                    )));
                }
                (
                    SensorClass::Oxygen,
                    SensorBinding::BioHub {
                        address,
                        reset_pin,
                        mfio_pin,
                    },
                ) => {
                    let hub = board.bio_hub(address, reset_pin, mfio_pin)?;
                    let mut oximeter = PulseOximeter::new(hub, slot.id);
                    oximeter.init()?;
                    set.oximeters.push(Box::new(oximeter));
                }
                _ => return Err(unsupported_binding(slot)),
            }
        }

        Ok(set)
    }
}

fn unsupported_binding(slot: &SensorSlot) -> Error {
    Error::InvalidConfig {
        reason: format!(
            "{} slot {} cannot use binding {:?}",
            slot.class, slot.id, slot.binding
        ),
    }
}

/// Channel handles returned by the transport at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channels {
    /// Thermistor snapshots.
    pub thermistor: ChannelId,
    /// Force snapshots.
    pub force: ChannelId,
    /// Oxygen snapshots.
    pub oxygen: ChannelId,
    /// Acknowledgment writes.
    pub acknowledgment: ChannelId,
}

/// Counters kept across ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirmwareStats {
    /// Loop passes.
    pub ticks: u64,
    /// Scheduler fires.
    pub transmissions: u64,
    /// Notifications the transport rejected.
    pub failed_notifications: u64,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// A peer was connected at the gate check.
    pub connected: bool,
    /// The oxygen snapshot was refreshed.
    pub sampled_oxygen: bool,
    /// The scheduler fired and snapshots were pushed.
    pub transmitted: bool,
}

/// The device: sensors, LED, scheduler and transport in one context.
pub struct Firmware<T, C> {
    config: DeviceConfig,
    transport: T,
    clock: C,
    gate: ConnectionGate,
    scheduler: TransmissionScheduler,
    thermistors: ScalarBank,
    forces: ScalarBank,
    oximeters: CompositeBank,
    channels: Channels,
    stats: FirmwareStats,
}

impl<T: WirelessTransport, C: Clock> Firmware<T, C> {
    /// Validate `config`, claim the hardware from `board`, then bring up the
    /// transport.
    pub async fn setup(
        config: DeviceConfig,
        board: &mut dyn Board,
        transport: T,
        clock: C,
    ) -> Result<Self> {
        config.validate()?;
        info!("{} starting", config.device_name);

        let sensors = SensorSet::from_board(&config, board)?;
        let led = StatusIndicator::new(board.digital_output(config.led_pin)?);

        Self::from_parts(config, sensors, led, transport, clock).await
    }

    /// Assemble the firmware from already-built sensors and LED.
    ///
    /// Creates the three notify channels and the acknowledgment channel,
    /// starts the service and advertising, and opens the first transmission
    /// window at the current time.
    pub async fn from_parts(
        config: DeviceConfig,
        sensors: SensorSet,
        led: StatusIndicator,
        mut transport: T,
        clock: C,
    ) -> Result<Self> {
        let thermistors = ScalarBank::new(SensorClass::Thermistor, sensors.thermistors)?;
        let forces = ScalarBank::new(SensorClass::Force, sensors.forces)?;
        let oximeters = CompositeBank::new(SensorClass::Oxygen, sensors.oximeters)?;

        let uuids = config.uuids;
        let channels = Channels {
            thermistor: transport.create_notify_channel(uuids.for_class(SensorClass::Thermistor))?,
            force: transport.create_notify_channel(uuids.for_class(SensorClass::Force))?,
            oxygen: transport.create_notify_channel(uuids.for_class(SensorClass::Oxygen))?,
            acknowledgment: transport.create_write_channel(uuids.acknowledgment)?,
        };

        transport.start_service().await?;
        transport.start_advertising().await?;
        info!(
            "Advertising as {} ({} thermistors, {} force sensors, {} oximeters)",
            config.device_name,
            thermistors.snapshot().record_count(),
            forces.snapshot().record_count(),
            oximeters.snapshot().record_count()
        );

        let scheduler = TransmissionScheduler::new(config.transmission_interval, clock.millis());
        let gate = ConnectionGate::new(led, config.blink);

        Ok(Self {
            config,
            transport,
            clock,
            gate,
            scheduler,
            thermistors,
            forces,
            oximeters,
            channels,
            stats: FirmwareStats::default(),
        })
    }

    /// One pass of the control loop.
    ///
    /// Oxygen is sampled first when the policy is [`OxygenSampling::Always`].
    /// With a peer connected, the LED is held on, thermistors and force
    /// sensors are sampled, the snapshots are pushed if the interval has
    /// elapsed, and the loop pauses. Without a peer the LED blinks once.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.stats.ticks += 1;
        let mut outcome = TickOutcome::default();

        if self.config.oxygen_sampling == OxygenSampling::Always {
            self.oximeters.sample()?;
            outcome.sampled_oxygen = true;
        }

        match self.gate.evaluate(&self.transport) {
            GateState::Open => {
                outcome.connected = true;
                let now = self.clock.millis();

                self.thermistors.sample()?;
                self.forces.sample()?;
                if self.config.oxygen_sampling == OxygenSampling::WhenConnected {
                    self.oximeters.sample()?;
                    outcome.sampled_oxygen = true;
                }

                trace!("{}ms since last send", self.scheduler.elapsed(now));
                if self.scheduler.poll(now) {
                    self.transmit().await;
                    outcome.transmitted = true;
                }

                self.clock.delay(self.config.post_transmission_pause).await;
            }
            GateState::Closed => {
                self.gate.blink(&self.clock).await;
            }
        }

        Ok(outcome)
    }

    /// Tick until `shutdown` turns true. The flag is checked between ticks.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Entering main loop");
        while !*shutdown.borrow() {
            self.tick().await?;
        }
        info!(
            "Main loop stopped after {} ticks, {} transmissions",
            self.stats.ticks, self.stats.transmissions
        );
        Ok(())
    }

    /// Push all three snapshots. Failures are logged and dropped.
    async fn transmit(&mut self) {
        self.stats.transmissions += 1;
        debug!("Sending snapshots (#{})", self.stats.transmissions);

        let outgoing = [
            (self.channels.thermistor, self.thermistors.snapshot()),
            (self.channels.force, self.forces.snapshot()),
            (self.channels.oxygen, self.oximeters.snapshot()),
        ];

        for (channel, snapshot) in outgoing {
            trace!("{} -> [{}]", snapshot.class(), hex_dump(snapshot.as_bytes()));
            let result = match self.transport.set_value(channel, snapshot.as_bytes()) {
                Ok(()) => self.transport.notify(channel).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                self.stats.failed_notifications += 1;
                warn!("Failed to notify {} snapshot: {}", snapshot.class(), e);
            }
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// The snapshot last encoded for `class`.
    pub fn snapshot(&self, class: SensorClass) -> &SensorSnapshot {
        match class {
            SensorClass::Thermistor => self.thermistors.snapshot(),
            SensorClass::Force => self.forces.snapshot(),
            SensorClass::Oxygen => self.oximeters.snapshot(),
        }
    }

    /// The transmission scheduler.
    pub fn scheduler(&self) -> &TransmissionScheduler {
        &self.scheduler
    }

    /// Channel handles.
    pub fn channels(&self) -> Channels {
        self.channels
    }

    /// Counters.
    pub fn stats(&self) -> FirmwareStats {
        self.stats
    }

    /// Whether the status LED is lit.
    pub fn led_is_on(&self) -> bool {
        self.gate.led_is_on()
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The reserved housekeeping period. Nothing in the loop uses it.
    pub fn housekeeping_interval(&self) -> Duration {
        self.config.housekeeping_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockWirelessTransport;
    use crate::data::{decode_snapshot, BioReading, FingerStatus, SensorRecord};
    use crate::device::clock::ManualClock;
    use crate::sensors::hal::MockDigitalOutput;
    use crate::sensors::{MockCompositeSensor, MockScalarSensor};
    use pretty_assertions::assert_eq;

    fn scalar(id: u8, value: f32) -> Box<dyn ScalarSensor> {
        let mut sensor = MockScalarSensor::new();
        sensor.expect_id().return_const(id);
        sensor.expect_read_value().return_const(value);
        Box::new(sensor)
    }

    fn oximeter(id: u8, oxygen: u16) -> Box<dyn CompositeSensor> {
        let mut sensor = MockCompositeSensor::new();
        sensor.expect_id().return_const(id);
        sensor.expect_read_reading().return_const(BioReading {
            heart_rate: 64,
            confidence: 90,
            oxygen,
            status: FingerStatus::FingerDetected,
        });
        Box::new(sensor)
    }

    fn led() -> StatusIndicator {
        let mut output = MockDigitalOutput::new();
        output.expect_set_low().return_const(());
        output.expect_set_high().return_const(());
        StatusIndicator::new(Box::new(output))
    }

    fn sensors() -> SensorSet {
        SensorSet {
            thermistors: vec![
                scalar(1, 20.5),
                scalar(2, 21.0),
                scalar(3, 19.75),
                scalar(4, 22.25),
            ],
            forces: vec![scalar(1, 0.0), scalar(2, 1.5), scalar(3, 3.0), scalar(4, 4.5)],
            oximeters: vec![oximeter(1, 98)],
        }
    }

    fn transport(connected: bool) -> MockWirelessTransport {
        let mut transport = MockWirelessTransport::new();
        let mut next = 0;
        transport.expect_create_notify_channel().returning(move |_| {
            next += 1;
            Ok(ChannelId(next - 1))
        });
        transport
            .expect_create_write_channel()
            .returning(|_| Ok(ChannelId(3)));
        transport.expect_start_service().returning(|| Ok(()));
        transport.expect_start_advertising().returning(|| Ok(()));
        transport
            .expect_is_device_connected()
            .return_const(connected);
        transport
    }

    #[tokio::test]
    async fn test_setup_creates_channels_in_order() {
        let clock = ManualClock::new(0);
        let firmware = Firmware::from_parts(
            DeviceConfig::default(),
            sensors(),
            led(),
            transport(false),
            clock,
        )
        .await
        .unwrap();

        assert_eq!(
            firmware.channels(),
            Channels {
                thermistor: ChannelId(0),
                force: ChannelId(1),
                oxygen: ChannelId(2),
                acknowledgment: ChannelId(3),
            }
        );
        assert_eq!(firmware.snapshot(SensorClass::Thermistor).len(), 20);
        assert_eq!(firmware.snapshot(SensorClass::Force).len(), 20);
        assert_eq!(firmware.snapshot(SensorClass::Oxygen).len(), 5);
        assert_eq!(firmware.housekeeping_interval(), Duration::from_millis(2000));
    }

    #[tokio::test]
    async fn test_duplicate_ids_fail_setup() {
        let mut set = sensors();
        set.forces[3] = scalar(2, 0.0);
        let result = Firmware::from_parts(
            DeviceConfig::default(),
            set,
            led(),
            MockWirelessTransport::new(),
            ManualClock::new(0),
        )
        .await;
        assert!(matches!(
            result,
            Err(Error::DuplicateSensorId {
                class: SensorClass::Force,
                id: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_disconnected_tick_blinks_and_never_notifies() {
        let mut transport = transport(false);
        transport.expect_set_value().never();
        transport.expect_notify().never();

        let clock = ManualClock::new(0);
        let mut firmware = Firmware::from_parts(
            DeviceConfig::default(),
            sensors(),
            led(),
            transport,
            clock.clone(),
        )
        .await
        .unwrap();

        clock.advance(Duration::from_secs(60));
        let outcome = firmware.tick().await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome {
                connected: false,
                sampled_oxygen: true,
                transmitted: false,
            }
        );
        assert_eq!(clock.millis(), 60_800);
        assert!(firmware.led_is_on());

        // Oxygen is refreshed while waiting; thermistors are not.
        let oxygen = decode_snapshot(firmware.snapshot(SensorClass::Oxygen).as_bytes()).unwrap();
        assert_eq!(oxygen, vec![SensorRecord::new(1, 98.0)]);
        let thermistors =
            decode_snapshot(firmware.snapshot(SensorClass::Thermistor).as_bytes()).unwrap();
        assert!(thermistors.iter().all(|r| r.id == 0 && r.value == 0.0));
    }

    #[tokio::test]
    async fn test_oxygen_gated_when_configured() {
        let config = DeviceConfig::default().with_oxygen_sampling(OxygenSampling::WhenConnected);
        let mut firmware = Firmware::from_parts(
            config,
            sensors(),
            led(),
            transport(false),
            ManualClock::new(0),
        )
        .await
        .unwrap();

        let outcome = firmware.tick().await.unwrap();
        assert!(!outcome.sampled_oxygen);
        assert_eq!(firmware.snapshot(SensorClass::Oxygen).as_bytes(), &[0u8; 5]);
    }

    #[tokio::test]
    async fn test_oxygen_sampled_on_connected_tick_when_configured() {
        let pushed = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut transport = transport(true);
        {
            let pushed = pushed.clone();
            transport
                .expect_set_value()
                .returning(move |channel, value| {
                    pushed.lock().push((channel, value.to_vec()));
                    Ok(())
                });
        }
        transport.expect_notify().times(3).returning(|_| Ok(()));

        let clock = ManualClock::new(0);
        let config = DeviceConfig::default().with_oxygen_sampling(OxygenSampling::WhenConnected);
        let mut firmware = Firmware::from_parts(config, sensors(), led(), transport, clock.clone())
            .await
            .unwrap();

        clock.set(5000);
        let outcome = firmware.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome {
                connected: true,
                sampled_oxygen: true,
                transmitted: true,
            }
        );

        let pushed = pushed.lock();
        let (channel, payload) = &pushed[2];
        assert_eq!(*channel, firmware.channels().oxygen);
        assert_eq!(payload.len(), 5);
        assert_eq!(
            decode_snapshot(payload).unwrap(),
            vec![SensorRecord::new(1, 98.0)]
        );
    }

    #[tokio::test]
    async fn test_notify_failure_is_absorbed() {
        let mut transport = transport(true);
        transport.expect_set_value().returning(|_, _| Ok(()));
        transport.expect_notify().times(3).returning(|channel| {
            if channel == ChannelId(1) {
                Err(Error::Transport {
                    reason: "no subscriber".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let clock = ManualClock::new(0);
        let mut firmware = Firmware::from_parts(
            DeviceConfig::default(),
            sensors(),
            led(),
            transport,
            clock.clone(),
        )
        .await
        .unwrap();

        clock.set(5000);
        let outcome = firmware.tick().await.unwrap();
        assert!(outcome.transmitted);
        assert_eq!(firmware.stats().transmissions, 1);
        assert_eq!(firmware.stats().failed_notifications, 1);
        assert_eq!(firmware.scheduler().last_sent_ms(), 5000);
        // The post-transmission pause ran.
        assert_eq!(clock.millis(), 5200);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (tx, rx) = watch::channel(true);
        let mut firmware = Firmware::from_parts(
            DeviceConfig::default(),
            sensors(),
            led(),
            transport(false),
            ManualClock::new(0),
        )
        .await
        .unwrap();

        firmware.run(rx).await.unwrap();
        assert_eq!(firmware.stats().ticks, 0);
        drop(tx);
    }
}
