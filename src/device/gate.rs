//! Connection gate.
//!
//! Reads the transport's connection state each tick, keeps the status LED in
//! step with it, and tells the loop whether sampling and transmission may run.

use tracing::info;

use crate::ble::transport::WirelessTransport;
use crate::device::clock::Clock;
use crate::device::config::BlinkPattern;
use crate::device::led::StatusIndicator;

/// Outcome of one gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateState {
    /// A peer is connected: sample everything and let the scheduler run.
    Open,
    /// No peer: blink and skip the gated work.
    Closed,
}

impl GateState {
    /// Check if the gate is open.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Connection-driven LED and work gate.
pub struct ConnectionGate {
    indicator: StatusIndicator,
    blink: BlinkPattern,
    last: Option<GateState>,
}

impl ConnectionGate {
    /// Create a gate driving `indicator`.
    pub fn new(indicator: StatusIndicator, blink: BlinkPattern) -> Self {
        Self {
            indicator,
            blink,
            last: None,
        }
    }

    /// Ask the transport whether a peer is connected.
    pub fn is_connected<T: WirelessTransport + ?Sized>(&self, transport: &T) -> bool {
        transport.is_device_connected()
    }

    /// Check the connection and set the LED steady on when connected.
    ///
    /// The disconnected pattern is not run here; see [`blink`](Self::blink).
    pub fn evaluate<T: WirelessTransport + ?Sized>(&mut self, transport: &T) -> GateState {
        let state = if self.is_connected(transport) {
            GateState::Open
        } else {
            GateState::Closed
        };

        if self.last != Some(state) {
            match state {
                GateState::Open => info!("Peer connected"),
                GateState::Closed => info!("No peer connected, waiting"),
            }
            self.last = Some(state);
        }

        if state.is_open() {
            self.indicator.turn_on();
        }
        state
    }

    /// Run the disconnected LED pattern once: off, pause, on, pause.
    pub async fn blink<C: Clock + ?Sized>(&mut self, clock: &C) {
        self.indicator.turn_off();
        clock.delay(self.blink.off).await;
        self.indicator.turn_on();
        clock.delay(self.blink.on).await;
    }

    /// Whether the LED is lit.
    pub fn led_is_on(&self) -> bool {
        self.indicator.is_on()
    }

    /// The last observed state.
    pub fn last_state(&self) -> Option<GateState> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::transport::MockWirelessTransport;
    use crate::device::clock::ManualClock;
    use crate::sensors::hal::MockDigitalOutput;

    fn gate() -> ConnectionGate {
        let mut output = MockDigitalOutput::new();
        output.expect_set_low().return_const(());
        output.expect_set_high().return_const(());
        ConnectionGate::new(
            StatusIndicator::new(Box::new(output)),
            BlinkPattern::default(),
        )
    }

    #[test]
    fn test_connected_opens_and_lights() {
        let mut transport = MockWirelessTransport::new();
        transport.expect_is_device_connected().return_const(true);

        let mut gate = gate();
        assert_eq!(gate.evaluate(&transport), GateState::Open);
        assert!(gate.led_is_on());
        assert_eq!(gate.last_state(), Some(GateState::Open));
    }

    #[test]
    fn test_disconnected_closes() {
        let mut transport = MockWirelessTransport::new();
        transport.expect_is_device_connected().return_const(false);

        let mut gate = gate();
        assert_eq!(gate.evaluate(&transport), GateState::Closed);
        assert!(!gate.led_is_on());
    }

    #[tokio::test]
    async fn test_blink_pattern_timing() {
        let clock = ManualClock::new(0);
        let mut gate = gate();

        gate.blink(&clock).await;
        assert_eq!(clock.millis(), 800);
        assert!(gate.led_is_on());
    }
}
