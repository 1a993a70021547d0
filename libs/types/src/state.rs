//! Stream/data state carried by refresh and status messages

use std::fmt;

use crate::rdm::{DataState, StateCode, StreamState};

/// Provider-reported state of an item stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: StateCode,
    pub text: String,
}

impl State {
    pub fn new(
        stream_state: StreamState,
        data_state: DataState,
        code: StateCode,
        text: impl Into<String>,
    ) -> Self {
        Self {
            stream_state,
            data_state,
            code,
            text: text.into(),
        }
    }

    /// Open / Ok / None
    pub fn open_ok() -> Self {
        Self::new(StreamState::Open, DataState::Ok, StateCode::None, "")
    }

    /// Open / Suspect with the given text
    pub fn open_suspect(text: impl Into<String>) -> Self {
        Self::new(StreamState::Open, DataState::Suspect, StateCode::None, text)
    }

    /// Closed with the given code and text
    pub fn closed(code: StateCode, text: impl Into<String>) -> Self {
        Self::new(StreamState::Closed, DataState::Suspect, code, text)
    }

    pub fn is_ok(&self) -> bool {
        self.data_state == DataState::Ok
    }

    pub fn is_suspect(&self) -> bool {
        self.data_state == DataState::Suspect
    }

    pub fn is_closed(&self) -> bool {
        self.stream_state.is_closed()
    }

    /// Packed wire byte: stream state in the high bits, data state in the low three
    pub fn packed(&self) -> u8 {
        (u8::from(self.stream_state) << 3) | (u8::from(self.data_state) & 0x07)
    }
}

impl Default for State {
    fn default() -> Self {
        Self::open_ok()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}/{:?}",
            self.stream_state, self.data_state, self.code
        )?;
        if !self.text.is_empty() {
            write!(f, " \"{}\"", self.text)?;
        }
        Ok(())
    }
}
