//! Uploads that take one message per list element
//!
//! The controller's receive buffer holds a single element, so each message
//! is awaited before the next is encoded and sent.

use tracing::debug;

use crate::core::{Error, Result};
use crate::messages::DeviceState;
use crate::protocol::message::{self as codes, describe};
use super::EngineHandle;

impl EngineHandle {
    /// Sends element 0..count of a list message, in order; returns count
    async fn send_each(&self, code: u16, state: &DeviceState, count: usize) -> Result<usize> {
        for index in 0..count {
            self.send_indexed(code, state, index).await?;
        }
        debug!(code, count, "Uploaded {}", describe(code));
        Ok(count)
    }

    pub async fn send_mode_ranges(&self, state: &DeviceState) -> Result<usize> {
        self.send_each(codes::SET_MODE_RANGE, state, state.mode_ranges.len()).await
    }

    pub async fn send_adjustment_ranges(&self, state: &DeviceState) -> Result<usize> {
        self.send_each(codes::SET_ADJUSTMENT_RANGE, state, state.adjustment_ranges.len()).await
    }

    /// Needs API 1.12 or newer
    pub async fn send_servo_configurations(&self, state: &DeviceState) -> Result<usize> {
        let version = self.api_version();
        if !version.at_least(1, 12) {
            return Err(Error::invalid_argument(format!(
                "servo upload needs API 1.12, controller speaks {}",
                version
            )));
        }
        self.send_each(codes::SET_SERVO_CONFIGURATION, state, state.servo_configs.len()).await
    }

    pub async fn send_led_strip_config(&self, state: &DeviceState) -> Result<usize> {
        self.send_each(codes::SET_LED_STRIP_CONFIG, state, state.led_strip.len()).await
    }

    pub async fn send_led_strip_mode_colors(&self, state: &DeviceState) -> Result<usize> {
        self.send_each(codes::SET_LED_STRIP_MODECOLOR, state, state.led_mode_colors.len()).await
    }

    pub async fn send_rxfail_config(&self, state: &DeviceState) -> Result<usize> {
        self.send_each(codes::SET_RXFAIL_CONFIG, state, state.rxfail.len()).await
    }

    /// One message per meter from API 1.36, a single legacy block before
    pub async fn send_voltage_meter_configs(&self, state: &DeviceState) -> Result<usize> {
        let count = if self.api_version().at_least(1, 36) {
            state.voltage_meter_configs.len()
        } else {
            1
        };
        self.send_each(codes::SET_VOLTAGE_METER_CONFIG, state, count).await
    }

    /// One message per meter from API 1.36, a single legacy block before
    pub async fn send_current_meter_configs(&self, state: &DeviceState) -> Result<usize> {
        let count = if self.api_version().at_least(1, 36) {
            state.current_meter_configs.len()
        } else {
            1
        };
        self.send_each(codes::SET_CURRENT_METER_CONFIG, state, count).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::core::EngineConfig;
    use crate::messages::motor::ServoConfig;
    use crate::messages::rx::ModeRange;
    use super::*;

    #[tokio::test]
    async fn test_mode_ranges_one_at_a_time() {
        let (handle, mut device, _task) = connect(EngineConfig::default());
        handshake(&handle, &mut device, 1, 40).await;

        let mut state = DeviceState::default();
        state.mode_ranges = vec![ModeRange::default(); 3];
        let upload = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.send_mode_ranges(&state).await })
        };

        for index in 0..3u8 {
            let request = expect_request(&mut device).await;
            assert_eq!(request.code, codes::SET_MODE_RANGE);
            assert_eq!(request.payload[0], index);
            // nothing else may be written before this one is answered
            assert_eq!(handle.pending().await.unwrap().len(), 1);
            respond(&mut device, codes::SET_MODE_RANGE, &[]).await;
        }
        assert_eq!(upload.await.unwrap().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_servo_upload_needs_1_12() {
        let (handle, mut device, _task) = connect(EngineConfig::default());
        handshake(&handle, &mut device, 1, 11).await;

        let mut state = DeviceState::default();
        state.servo_configs = vec![ServoConfig::default(); 2];
        let err = handle.send_servo_configurations(&state).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(handle.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_legacy_meter_upload_is_single_block() {
        let (handle, mut device, _task) = connect(EngineConfig::default());
        handshake(&handle, &mut device, 1, 35).await;

        let state = DeviceState::default();
        let upload = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.send_current_meter_configs(&state).await })
        };
        let request = expect_request(&mut device).await;
        assert_eq!(request.code, codes::SET_CURRENT_METER_CONFIG);
        assert_eq!(request.payload.len(), 7);
        respond(&mut device, codes::SET_CURRENT_METER_CONFIG, &[]).await;
        assert_eq!(upload.await.unwrap().unwrap(), 1);
    }
}
