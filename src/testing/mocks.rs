//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the WebSocket connection so the device
//! runtime can be driven end to end without a broker. Tests keep a
//! [`MockTransportHandle`] to inspect what was sent and to inject traffic.

use crate::protocol::{PacketType, SensorReading, PINGREQ_PACKET};
use crate::scheduler::SensorReader;
use crate::transport::{FrameTransport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct MockState {
    sent: Vec<Vec<u8>>,
    open_calls: u32,
    close_calls: u32,
    fail_opens: u32,
    fail_sends: bool,
}

/// Scripted in-memory transport
#[derive(Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    /// Return code answered to CONNECT; `None` leaves CONNACK to the test
    connack_code: Option<u8>,
    answer_pings: bool,
    open: bool,
}

/// Test-side view of a [`MockTransport`]
#[derive(Debug, Clone)]
pub struct MockTransportHandle {
    state: Arc<Mutex<MockState>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// A transport that accepts every open and never answers
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            events_tx,
            events_rx,
            connack_code: None,
            answer_pings: false,
            open: false,
        }
    }

    /// Behave like a healthy broker: accept CONNECT and answer PINGREQ
    pub fn with_auto_ack() -> Self {
        Self::new().with_connack_code(0).with_ping_responses()
    }

    pub fn with_connack_code(mut self, code: u8) -> Self {
        self.connack_code = Some(code);
        self
    }

    pub fn with_ping_responses(mut self) -> Self {
        self.answer_pings = true;
        self
    }

    /// The next `count` calls to `open` fail
    pub fn failing_opens(self, count: u32) -> Self {
        lock(&self.state).fail_opens = count;
        self
    }

    pub fn handle(&self) -> MockTransportHandle {
        MockTransportHandle {
            state: Arc::clone(&self.state),
            events_tx: self.events_tx.clone(),
        }
    }

    fn respond_to(&self, frame: &[u8]) {
        let Some(&first) = frame.first() else {
            return;
        };
        if first == PacketType::Connect.header_byte() {
            if let Some(code) = self.connack_code {
                let _ = self
                    .events_tx
                    .send(TransportEvent::Data(vec![0x20, 0x02, 0x00, code]));
            }
        } else if self.answer_pings && frame == PINGREQ_PACKET {
            let _ = self.events_tx.send(TransportEvent::Data(vec![0xD0, 0x00]));
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameTransport for MockTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.open_calls += 1;
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            return Err(TransportError::ConnectFailed("Mock connection failure".to_string()));
        }
        drop(state);

        // A fresh connection starts with an empty stream
        while self.events_rx.try_recv().is_ok() {}
        self.open = true;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut state = lock(&self.state);
        if state.fail_sends {
            drop(state);
            self.open = false;
            return Err(TransportError::SendFailed("Mock send failure".to_string()));
        }
        state.sent.push(frame.to_vec());
        drop(state);

        self.respond_to(frame);
        Ok(())
    }

    async fn next_event(&mut self) -> TransportEvent {
        if !self.open {
            return std::future::pending().await;
        }
        match self.events_rx.recv().await {
            Some(event) => {
                if matches!(event, TransportEvent::Closed(_) | TransportEvent::Error(_)) {
                    self.open = false;
                }
                event
            }
            None => {
                self.open = false;
                TransportEvent::Closed(None)
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            lock(&self.state).close_calls += 1;
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl MockTransportHandle {
    /// Every frame sent so far, in order
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.state).sent.clone()
    }

    /// Sent frames whose first byte matches `packet_type`
    pub fn sent_of_type(&self, packet_type: PacketType) -> Vec<Vec<u8>> {
        let header = packet_type.header_byte();
        lock(&self.state)
            .sent
            .iter()
            .filter(|frame| frame.first() == Some(&header))
            .cloned()
            .collect()
    }

    pub fn clear_sent(&self) {
        lock(&self.state).sent.clear();
    }

    pub fn open_count(&self) -> u32 {
        lock(&self.state).open_calls
    }

    pub fn close_count(&self) -> u32 {
        lock(&self.state).close_calls
    }

    pub fn fail_next_opens(&self, count: u32) {
        lock(&self.state).fail_opens = count;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.state).fail_sends = fail;
    }

    /// Deliver raw bytes as if the broker had sent them
    pub fn inject(&self, bytes: Vec<u8>) {
        let _ = self.events_tx.send(TransportEvent::Data(bytes));
    }

    /// Simulate the broker closing the connection
    pub fn close_from_broker(&self, reason: Option<&str>) {
        let _ = self
            .events_tx
            .send(TransportEvent::Closed(reason.map(str::to_string)));
    }

    pub fn inject_error(&self, error: &str) {
        let _ = self.events_tx.send(TransportEvent::Error(error.to_string()));
    }
}

/// Sensor returning the same reading every time
#[derive(Debug, Clone)]
pub struct StaticSensor {
    pub reading: SensorReading,
}

impl StaticSensor {
    pub fn new(reading: SensorReading) -> Self {
        Self { reading }
    }
}

impl Default for StaticSensor {
    fn default() -> Self {
        Self::new(SensorReading {
            fill_level: 42.5,
            weight_kg: 25.5,
            temperature_c: 24.0,
            battery_level: 95.0,
            signal_strength_dbm: -55,
        })
    }
}

impl SensorReader for StaticSensor {
    fn read(&mut self) -> SensorReading {
        self.reading
    }
}
