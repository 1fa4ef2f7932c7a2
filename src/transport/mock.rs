//! Scripted links for tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::TransportError;
use crate::framing::{Command, FRAMING_SOF};
use crate::transport::{FrameLink, GattLink, LinkHandlers};
use crate::types::{Input, InputMode};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Get-inputs record block with every input in `mode`.
pub fn records(values: [u16; 4], mode: InputMode) -> [u8; 16] {
    let mut out = [0_u8; 16];
    for (input, record) in Input::ALL.into_iter().zip(out.chunks_exact_mut(4)) {
        let value = values[input.index()].to_le_bytes();
        record.copy_from_slice(&[u8::from(input), mode.to_byte(), value[0], value[1]]);
    }
    out
}

#[derive(Default)]
struct UsbState {
    requests: Vec<Vec<u8>>,
    snapshots: VecDeque<[u8; 16]>,
    last: Option<[u8; 16]>,
    status: u8,
    broken: bool,
}

/// Device side of a fake USB link: answers every command and records requests.
#[derive(Clone, Default)]
pub struct FakeFrameLink {
    state: Arc<Mutex<UsbState>>,
}

impl FakeFrameLink {
    /// Queues the record block for a later get-inputs reply; the last one repeats.
    pub fn push_inputs(&self, block: [u8; 16]) {
        lock(&self.state).snapshots.push_back(block);
    }

    pub fn set_status(&self, status: u8) {
        lock(&self.state).status = status;
    }

    pub fn break_link(&self) {
        lock(&self.state).broken = true;
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        lock(&self.state).requests.clone()
    }

    pub fn requests_for(&self, command: Command) -> Vec<Vec<u8>> {
        self.requests()
            .into_iter()
            .filter(|r| r.get(2..6) == Some(&command.opcode()[..]))
            .collect()
    }

    pub fn clear_requests(&self) {
        lock(&self.state).requests.clear();
    }
}

#[async_trait]
impl FrameLink for FakeFrameLink {
    async fn exchange(
        &mut self,
        request: &[u8],
        response_len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = lock(&self.state);
        if state.broken {
            return Err(TransportError::LinkClosed);
        }
        state.requests.push(request.to_vec());

        let opcode = request.get(2..6).unwrap_or_default();
        let mut reply = vec![0_u8; response_len];
        reply[..2].copy_from_slice(&FRAMING_SOF);
        if opcode == Command::GetInputs.opcode() {
            let block = match state.snapshots.pop_front() {
                Some(block) => block,
                None => state
                    .last
                    .unwrap_or_else(|| records([0; 4], InputMode::Resistance)),
            };
            state.last = Some(block);
            reply[8..24].copy_from_slice(&block);
        }
        if let Some(last) = reply.last_mut() {
            *last = state.status;
        }
        Ok(reply)
    }
}

#[derive(Default)]
struct GattState {
    values: HashMap<Uuid, Vec<u8>>,
    writes: Vec<(Uuid, Vec<u8>)>,
    subscriptions: Vec<Uuid>,
    failing_subscriptions: HashSet<Uuid>,
    unreadable: HashSet<Uuid>,
    handlers: Option<LinkHandlers>,
    connects: usize,
}

/// Fake BLE peripheral keyed by characteristic UUID.
#[derive(Clone, Default)]
pub struct FakeGattLink {
    state: Arc<Mutex<GattState>>,
    connected: Arc<AtomicBool>,
}

impl FakeGattLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&self, characteristic: Uuid, value: &[u8]) {
        lock(&self.state).values.insert(characteristic, value.to_vec());
    }

    pub fn fail_subscription(&self, characteristic: Uuid) {
        lock(&self.state).failing_subscriptions.insert(characteristic);
    }

    pub fn make_unreadable(&self, characteristic: Uuid) {
        lock(&self.state).unreadable.insert(characteristic);
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        lock(&self.state).writes.clone()
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        lock(&self.state).subscriptions.clone()
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    /// Pushes a value as the peripheral would on a notifying characteristic.
    pub async fn notify(&self, characteristic: Uuid, value: &[u8]) {
        let handlers = lock(&self.state).handlers.clone();
        if let Some(handlers) = handlers {
            (handlers.notify)(characteristic, value.to_vec()).await;
        }
    }

    /// Simulates the peripheral going away.
    pub async fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let handlers = lock(&self.state).handlers.clone();
        if let Some(handlers) = handlers {
            (handlers.lost)().await;
        }
    }
}

#[async_trait]
impl GattLink for FakeGattLink {
    async fn connect(&self, handlers: LinkHandlers) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.handlers = Some(handlers);
        state.connects += 1;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, TransportError> {
        let state = lock(&self.state);
        if state.unreadable.contains(&characteristic) {
            return Err(TransportError::MissingCharacteristic(characteristic));
        }
        state
            .values
            .get(&characteristic)
            .cloned()
            .ok_or(TransportError::MissingCharacteristic(characteristic))
    }

    async fn write(&self, characteristic: Uuid, value: &[u8]) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.writes.push((characteristic, value.to_vec()));
        state.values.insert(characteristic, value.to_vec());
        Ok(())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.failing_subscriptions.contains(&characteristic) {
            return Err(TransportError::MissingCharacteristic(characteristic));
        }
        state.subscriptions.push(characteristic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{decode_frame, encode_frame};
    use crate::protocol::InputSnapshot;

    async fn read_inputs(link: &mut FakeFrameLink) -> InputSnapshot {
        let request = encode_frame(Command::GetInputs, &[]).expect("encode");
        let reply = link
            .exchange(&request, Command::GetInputs.response_len())
            .await
            .expect("exchange");
        let payload = decode_frame(Command::GetInputs, &reply).expect("decode");
        InputSnapshot::parse(payload).expect("parse")
    }

    #[tokio::test]
    async fn unscripted_link_reports_idle_inputs() {
        let mut link = FakeFrameLink::default();
        let snapshot = read_inputs(&mut link).await;
        for input in Input::ALL {
            assert_eq!(snapshot.value(input), 0);
            assert_eq!(snapshot.mode(input), Some(InputMode::Resistance));
        }
    }

    #[tokio::test]
    async fn last_scripted_block_repeats() {
        let mut link = FakeFrameLink::default();
        link.push_inputs(records([1, 2, 3, 4], InputMode::Voltage));
        read_inputs(&mut link).await;
        let snapshot = read_inputs(&mut link).await;
        assert_eq!(snapshot.value(Input::I4), 4);
        assert_eq!(snapshot.mode(Input::I1), Some(InputMode::Voltage));
    }
}
