//! Emulated MCU peripherals and the host device seam.
use std::collections::VecDeque;
use std::io::{self, Write};

/// Hooks to bind the simulated UART to the host.
pub trait Devices {
    /// Transmit one byte out of the simulated UART.
    fn uart_tx(&mut self, byte: u8);

    /// Pop the next byte from the simulated UART receive line, if any.
    fn uart_rx(&mut self) -> Option<u8>;

    /// Whether a byte is waiting on the receive line.
    fn uart_rx_ready(&self) -> bool {
        false
    }
}

/// Default host: transmit to stdout, receive line always empty.
pub struct StdioDevices;

impl Devices for StdioDevices {
    fn uart_tx(&mut self, byte: u8) {
        let _ = io::stdout().write_all(&[byte]);
    }

    fn uart_rx(&mut self) -> Option<u8> {
        None
    }
}

/// In-memory host: captures transmitted bytes and feeds queued input.
/// Used by tests and embedding hosts.
#[derive(Debug, Default)]
pub struct BufferDevices {
    pub tx: Vec<u8>,
    pub rx: VecDeque<u8>,
}

impl Devices for BufferDevices {
    fn uart_tx(&mut self, byte: u8) {
        self.tx.push(byte);
    }

    fn uart_rx(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn uart_rx_ready(&self) -> bool {
        !self.rx.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GpioPin {
    pub configured: bool,
    pub direction: u32,
    pub mode: u32,
    pub value: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct UartState {
    pub baud: u32,
    pub tx_ready: bool,
}

impl Default for UartState {
    fn default() -> Self {
        Self {
            baud: 115_200,
            tx_ready: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TimerState {
    pub mode: u32,
    pub period: u32,
    pub value: u32,
    pub running: bool,
}

/// State of every emulated peripheral.
#[derive(Debug, Default)]
pub struct Peripherals {
    pub uart: UartState,
    pub gpio: [GpioPin; 32],
    pub timer: TimerState,
    pub interrupts_enabled: bool,
}

impl Peripherals {
    pub fn new() -> Self {
        Self::default()
    }
}
