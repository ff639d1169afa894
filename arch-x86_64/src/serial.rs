//! 16550 UART driver. Entirely independent of interrupts or the scheduler
//! so it stays usable as the panic-path console contract even when both of
//! those have stopped working.
use crate::port::Port;
use bitflags::bitflags;
use core::fmt;

macro_rules! wait_for {
    ($cond:expr) => {
        while !$cond {
            core::hint::spin_loop()
        }
    };
}

bitflags! {
    struct LineStatusFlags: u8 {
        const DATA_READY = 1 << 0;
        const TRANSMITTER_HOLDING_REGISTER_EMPTY = 1 << 5;
    }
}

pub struct SerialPort {
    data: Port<u8>,
    int_en: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_stat: Port<u8>,
}

impl SerialPort {
    pub const fn new(base: u16) -> Self {
        SerialPort {
            data: Port::new(base),
            int_en: Port::new(base + 1),
            fifo_ctrl: Port::new(base + 2),
            line_ctrl: Port::new(base + 3),
            modem_ctrl: Port::new(base + 4),
            line_stat: Port::new(base + 5),
        }
    }

    /// 8N1, 38400 baud init routine.
    pub fn init(&self) {
        self.int_en.write(0x00);
        self.line_ctrl.write(0x80);
        self.data.write(0x03);
        self.int_en.write(0x00);
        self.line_ctrl.write(0x03);
        self.fifo_ctrl.write(0xC7);
        self.modem_ctrl.write(0x0B);
        self.int_en.write(0x01);
    }

    fn line_status(&self) -> LineStatusFlags {
        LineStatusFlags::from_bits_truncate(self.line_stat.read())
    }

    pub fn send(&self, byte: u8) {
        wait_for!(self
            .line_status()
            .contains(LineStatusFlags::TRANSMITTER_HOLDING_REGISTER_EMPTY));
        self.data.write(byte);
    }

    /// Writes raw bytes without going through `fmt::Write`'s UTF-8
    /// assumptions. Used by the panic path, which dumps raw register bytes.
    pub fn send_bytes(&self, bytes: &[u8]) {
        for &b in bytes {
            self.send(b);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            match byte {
                0x20..=0x7e | b'\n' => self.send(byte),
                _ => self.send(0xfe),
            }
        }
        Ok(())
    }
}
