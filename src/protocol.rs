//! Request payloads and reply parsing for the USB serial protocol.

use thiserror::Error;

use crate::framing::{Command, FramingError};
use crate::types::{Input, InputMode, LedMode, Output};

/// Output value type tag: signed 8-bit.
const OUTPUT_TYPE_INT8: u8 = 0x03;

const INPUT_RECORD_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("input record names unknown input index {0}")]
    UnknownInputIndex(u8),
    #[error("input {0} is missing from the reply")]
    MissingInput(Input),
    #[error("{what} expects {expected} bytes, got {actual}")]
    ValueWidth {
        what: &'static str,
        expected: &'static str,
        actual: usize,
    },
}

/// A request ready to be framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Request {
    fn new(command: Command, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    pub fn get_info() -> Self {
        Self::new(Command::GetInfo, Vec::new())
    }

    pub fn get_inputs() -> Self {
        Self::new(Command::GetInputs, Vec::new())
    }

    pub fn config_input(input: Input, mode: InputMode) -> Self {
        Self::new(Command::ConfigInput, vec![u8::from(input), mode.to_byte()])
    }

    /// `value` must already be validated to -100..=100.
    pub fn set_output(output: Output, value: i8) -> Self {
        Self::new(
            Command::SetOutput,
            vec![
                u8::from(output),
                OUTPUT_TYPE_INT8,
                0x00,
                value.to_le_bytes()[0],
            ],
        )
    }

    pub fn set_test_mode(on: bool) -> Self {
        Self::new(Command::SetTestMode, vec![u8::from(on)])
    }

    /// One `(index, 0, on)` triple per LED, exactly one of them lit.
    pub fn set_led(led: LedMode) -> Self {
        let mut payload = vec![0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00];
        let lit = usize::from(led.to_byte()) * 3 + 2;
        payload[lit] = 0x01;
        Self::new(Command::SetLed, payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        crate::framing::encode_frame(self.command, &self.payload)
    }
}

/// Last reported configuration byte and value of one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputReading {
    pub config: u8,
    pub value: u16,
}

impl InputReading {
    pub fn mode(&self) -> Option<InputMode> {
        InputMode::from_byte(self.config)
    }
}

/// All four inputs as reported by one get-inputs reply, in I1..I4 order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSnapshot {
    readings: [InputReading; 4],
}

impl InputSnapshot {
    pub fn new(readings: [InputReading; 4]) -> Self {
        Self { readings }
    }

    /// Parses the record block of a get-inputs payload.
    ///
    /// Records carry their own input index and may arrive in any order.
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let block = payload
            .get(..INPUT_RECORD_LEN * Input::ALL.len())
            .ok_or(ProtocolError::ValueWidth {
                what: "input record block",
                expected: "16",
                actual: payload.len(),
            })?;

        let mut slots: [Option<InputReading>; 4] = [None; 4];
        for record in block.chunks_exact(INPUT_RECORD_LEN) {
            let index = record[0];
            let input =
                Input::try_from(index).map_err(|_| ProtocolError::UnknownInputIndex(index))?;
            slots[input.index()] = Some(InputReading {
                config: record[1],
                value: u16::from_le_bytes([record[2], record[3]]),
            });
        }

        let mut readings = [InputReading::default(); 4];
        for input in Input::ALL {
            readings[input.index()] =
                slots[input.index()].ok_or(ProtocolError::MissingInput(input))?;
        }
        Ok(Self { readings })
    }

    pub fn reading(&self, input: Input) -> InputReading {
        self.readings[input.index()]
    }

    pub fn value(&self, input: Input) -> u16 {
        self.reading(input).value
    }

    pub fn mode(&self, input: Input) -> Option<InputMode> {
        self.reading(input).mode()
    }

    /// Inputs whose raw value differs from `previous`, with their new value.
    pub fn changes_since(&self, previous: &InputSnapshot) -> Vec<(Input, u16)> {
        Input::ALL
            .into_iter()
            .filter(|&input| self.value(input) != previous.value(input))
            .map(|input| (input, self.value(input)))
            .collect()
    }
}
