//! ActuationChannel - Microcontroller Serial Link
//!
//! ## Responsibilities
//!
//! - Send bin commands (material label) to the microcontroller
//! - Wait for the "OK" acknowledgement line
//! - Reconnect transparently after link loss
//!
//! Protocol: uppercase material + `\n` out, `OK\n` back. The channel owns
//! its reconnect policy; callers only see acknowledged yes/no.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use std::io::Read;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Actuation seam. Implemented over a serial port in production and by
/// recording doubles in tests.
pub trait ActuationChannel: Send + Sync {
    /// Send a command for `material`; `Ok(true)` means acknowledged.
    fn send<'a>(&'a self, material: &'a str) -> BoxFuture<'a, Result<bool>>;
}

/// Serial link configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Max wait for the acknowledgement line
    pub read_timeout: Duration,
    /// Wait after opening the port; the controller resets on connect
    pub settle_delay: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
        }
    }
}

type SharedLink = Arc<Mutex<Option<Box<dyn serialport::SerialPort>>>>;

/// Serial actuator for the sorting mechanism's microcontroller.
pub struct SerialActuator {
    config: SerialConfig,
    link: SharedLink,
}

impl SerialActuator {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            link: Arc::new(Mutex::new(None)),
        }
    }
}

impl ActuationChannel for SerialActuator {
    fn send<'a>(&'a self, material: &'a str) -> BoxFuture<'a, Result<bool>> {
        let link = self.link.clone();
        let config = self.config.clone();
        let command = material.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || send_blocking(&link, &config, &command))
                .await
                .map_err(|e| Error::Internal(format!("actuation task failed: {}", e)))?
        })
    }
}

/// Frame a material label as the wire command.
fn frame_command(material: &str) -> Vec<u8> {
    let mut out = material.trim().to_uppercase().into_bytes();
    out.push(b'\n');
    out
}

fn is_ack(line: &str) -> bool {
    line.trim() == "OK"
}

fn send_blocking(link: &SharedLink, config: &SerialConfig, material: &str) -> Result<bool> {
    let mut guard = link
        .lock()
        .map_err(|_| Error::Internal("serial link lock poisoned".to_string()))?;

    if guard.is_none() {
        tracing::info!(port = %config.port, baud = config.baud_rate, "Opening serial link");
        match serialport::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
        {
            Ok(port) => {
                // The controller reboots when the port opens
                std::thread::sleep(config.settle_delay);
                *guard = Some(port);
            }
            Err(e) => {
                return Err(Error::Actuation(format!(
                    "could not open serial port {}: {}",
                    config.port, e
                )));
            }
        }
    }

    let port = match guard.as_mut() {
        Some(p) => p,
        None => return Err(Error::Actuation("serial link unavailable".to_string())),
    };

    let outcome = (|| -> std::io::Result<bool> {
        // Drop stale bytes before the exchange
        let _ = port.clear(serialport::ClearBuffer::Input);

        let framed = frame_command(material);
        tracing::info!(command = %String::from_utf8_lossy(&framed).trim(), "Sending actuation command");
        port.write_all(&framed)?;
        port.flush()?;

        // Read the acknowledgement line (bounded; read_timeout caps the wait)
        let mut line = Vec::with_capacity(8);
        let mut byte = [0u8; 1];
        while line.len() < 64 {
            match port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    line.push(byte[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }

        let response = String::from_utf8_lossy(&line);
        let acked = is_ack(&response);
        if acked {
            tracing::info!("Actuation acknowledged");
        } else {
            tracing::warn!(response = %response.trim(), "Unexpected actuation response");
        }
        Ok(acked)
    })();

    match outcome {
        Ok(acked) => Ok(acked),
        Err(e) => {
            // Hard link error: drop the port so the next call reconnects
            *guard = None;
            Err(Error::Actuation(format!("serial communication failed: {}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_command_uppercases_and_terminates() {
        assert_eq!(frame_command("plastic"), b"PLASTIC\n");
        assert_eq!(frame_command("  metal "), b"METAL\n");
    }

    #[test]
    fn test_is_ack() {
        assert!(is_ack("OK"));
        assert!(is_ack("OK\r"));
        assert!(!is_ack("ERR"));
        assert!(!is_ack(""));
    }

    #[tokio::test]
    async fn test_missing_port_reports_actuation_error() {
        let actuator = SerialActuator::new(SerialConfig {
            port: "/dev/does-not-exist-sortstation".to_string(),
            settle_delay: Duration::from_millis(0),
            ..SerialConfig::default()
        });
        let err = actuator.send("plastic").await.unwrap_err();
        assert!(matches!(err, Error::Actuation(_)));
    }
}
