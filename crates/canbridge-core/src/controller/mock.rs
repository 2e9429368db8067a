//! Mock CAN controller for testing
//!
//! Clones share state, so a test can keep one handle while the bridge owns
//! another. In loopback mode every sent frame is queued for reading, the way
//! a real controller echoes frames back.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CanController, ControllerClock};
use crate::error::ControllerError;
use crate::frame::CanFrame;
use crate::settings::{Bitrate, CanMode};

/// One call made against the mock controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Reset,
    SetBitrate(Bitrate, ControllerClock),
    SetMode(CanMode),
    Send(CanFrame),
    Read,
}

#[derive(Default)]
struct MockState {
    calls: Vec<ControllerCall>,
    rx_queue: VecDeque<CanFrame>,
    bitrate: Option<Bitrate>,
    mode: Option<CanMode>,
    fail_reset: bool,
    fail_bitrate: bool,
    send_error_code: Option<i32>,
    read_errors: VecDeque<ControllerError>,
}

/// Mock CAN controller
#[derive(Clone, Default)]
pub struct MockCanController {
    state: Arc<Mutex<MockState>>,
}

impl MockCanController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame to be returned by the next `read_message`
    pub fn inject_frame(&self, frame: CanFrame) {
        self.state.lock().rx_queue.push_back(frame);
    }

    /// Make the next `read_message` fail once
    pub fn fail_next_read(&self, error: ControllerError) {
        self.state.lock().read_errors.push_back(error);
    }

    pub fn set_fail_reset(&self, fail: bool) {
        self.state.lock().fail_reset = fail;
    }

    pub fn set_fail_bitrate(&self, fail: bool) {
        self.state.lock().fail_bitrate = fail;
    }

    /// Make every send fail with the given controller error code
    pub fn set_send_error(&self, code: Option<i32>) {
        self.state.lock().send_error_code = code;
    }

    /// All calls made so far, oldest first
    pub fn calls(&self) -> Vec<ControllerCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Frames successfully sent
    pub fn sent_frames(&self) -> Vec<CanFrame> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ControllerCall::Send(frame) => Some(*frame),
                _ => None,
            })
            .collect()
    }

    pub fn bitrate(&self) -> Option<Bitrate> {
        self.state.lock().bitrate
    }

    pub fn mode(&self) -> Option<CanMode> {
        self.state.lock().mode
    }
}

#[async_trait]
impl CanController for MockCanController {
    async fn reset(&mut self) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        state.calls.push(ControllerCall::Reset);
        if state.fail_reset {
            return Err(ControllerError::Reset("mock reset failure".to_string()));
        }
        state.mode = None;
        state.rx_queue.clear();
        Ok(())
    }

    async fn set_bitrate(
        &mut self,
        bitrate: Bitrate,
        clock: ControllerClock,
    ) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        state.calls.push(ControllerCall::SetBitrate(bitrate, clock));
        if state.fail_bitrate {
            return Err(ControllerError::Bitrate {
                kbps: bitrate.kbps(),
                message: "mock bitrate failure".to_string(),
            });
        }
        state.bitrate = Some(bitrate);
        Ok(())
    }

    async fn set_mode(&mut self, mode: CanMode) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        state.calls.push(ControllerCall::SetMode(mode));
        state.mode = Some(mode);
        Ok(())
    }

    async fn send_message(&mut self, frame: &CanFrame) -> Result<(), ControllerError> {
        let mut state = self.state.lock();
        if let Some(code) = state.send_error_code {
            return Err(ControllerError::Send {
                code,
                message: "mock send failure".to_string(),
            });
        }
        state.calls.push(ControllerCall::Send(*frame));
        if state.mode == Some(CanMode::Loopback) {
            state.rx_queue.push_back(*frame);
        }
        tracing::debug!(%frame, "Mock controller: sent frame");
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Option<CanFrame>, ControllerError> {
        let mut state = self.state.lock();
        state.calls.push(ControllerCall::Read);
        if let Some(err) = state.read_errors.pop_front() {
            return Err(err);
        }
        Ok(state.rx_queue.pop_front())
    }
}
