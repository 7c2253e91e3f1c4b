//! Line configuration of a freshly claimed adapter

use crate::usb::access::DeviceIo;
use protocol::{ACTIVATE_REQUEST, ControlRequest, LineConfig, SET_LINE_CODING_REQUEST, UsbError};
use std::time::Duration;
use tracing::{debug, warn};

/// Issues the activation and line-coding control transfers
#[derive(Debug, Clone, Copy)]
pub struct LineConfigurator {
    line: LineConfig,
    timeout: Duration,
}

impl LineConfigurator {
    pub fn new(line: LineConfig, timeout: Duration) -> Self {
        Self { line, timeout }
    }

    /// Activate the serial interface, then set the line coding
    ///
    /// Both transfers are single attempts. A failure is logged and does not
    /// prevent the other transfer from being issued; the returned error is
    /// the first one seen.
    pub fn configure(&self, io: &dyn DeviceIo) -> Result<(), UsbError> {
        let activated = self.send(io, ACTIVATE_REQUEST, &[], "activate interface");
        let coded = self.send(
            io,
            SET_LINE_CODING_REQUEST,
            &self.line.encode(),
            "set line coding",
        );

        if coded.is_ok() {
            debug!("Line configured: {} baud, 8N1", self.line.baud_rate);
        }
        activated.and(coded)
    }

    fn send(
        &self,
        io: &dyn DeviceIo,
        req: ControlRequest,
        data: &[u8],
        what: &str,
    ) -> Result<(), UsbError> {
        match io.write_control(
            req.request_type,
            req.request,
            req.value,
            req.index,
            data,
            self.timeout,
        ) {
            Ok(len) => {
                debug!(
                    "Control transfer '{}' ok: request_type={:#x}, request={}, {} bytes",
                    what, req.request_type, req.request, len
                );
                Ok(())
            }
            Err(e) => {
                warn!("Control transfer '{}' failed: {}", what, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use protocol::Endpoint;

    #[derive(Default)]
    struct RecordingIo {
        controls: Mutex<Vec<(u8, u8, u16, u16, Vec<u8>)>>,
        fail_request: Option<u8>,
    }

    impl DeviceIo for RecordingIo {
        fn claim_interface(&mut self, _interface: u8) -> Result<(), UsbError> {
            Ok(())
        }

        fn release_interface(&mut self, _interface: u8) -> Result<(), UsbError> {
            Ok(())
        }

        fn interface_endpoints(&self, _interface: u8) -> Result<Vec<Endpoint>, UsbError> {
            Ok(Vec::new())
        }

        fn write_control(
            &self,
            request_type: u8,
            request: u8,
            value: u16,
            index: u16,
            data: &[u8],
            _timeout: Duration,
        ) -> Result<usize, UsbError> {
            self.controls
                .lock()
                .push((request_type, request, value, index, data.to_vec()));
            if self.fail_request == Some(request) {
                return Err(UsbError::Pipe);
            }
            Ok(data.len())
        }

        fn read_bulk(&self, _: u8, _: &mut [u8], _: Duration) -> Result<usize, UsbError> {
            Err(UsbError::Timeout)
        }

        fn write_bulk(&self, _: u8, data: &[u8], _: Duration) -> Result<usize, UsbError> {
            Ok(data.len())
        }
    }

    #[test]
    fn test_activation_precedes_line_coding() {
        let io = RecordingIo::default();
        let configurator = LineConfigurator::new(LineConfig::default(), Duration::from_secs(1));
        configurator.configure(&io).unwrap();

        let controls = io.controls.lock();
        assert_eq!(controls.len(), 2);
        assert_eq!(controls[0], (0x21, 34, 0, 0, vec![]));
        assert_eq!(
            controls[1],
            (0x21, 32, 0, 0, vec![0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08])
        );
    }

    #[test]
    fn test_failed_activation_still_sets_line_coding() {
        let io = RecordingIo {
            fail_request: Some(34),
            ..Default::default()
        };
        let configurator = LineConfigurator::new(LineConfig::new(9600), Duration::from_secs(1));

        assert_eq!(configurator.configure(&io), Err(UsbError::Pipe));
        assert_eq!(io.controls.lock().len(), 2);
    }
}
