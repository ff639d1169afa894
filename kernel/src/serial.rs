//! Serial console: the one external-interfaces contract this crate owns
//! directly (`send`/`send_bytes`, see §6) plus the `print!`/`println!`
//! convenience macros built on top of it.
use core::fmt;

use arch_x86_64::interrupts::without_interrupts;
use arch_x86_64::serial::SerialPort;
use lazy_static::lazy_static;
use util::Mutex;

lazy_static! {
    pub static ref SERIAL: Mutex<SerialPort> = {
        let serial_port = SerialPort::new(0x3F8);
        serial_port.init();
        Mutex::new(serial_port)
    };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    without_interrupts(|| {
        SERIAL.lock().write_fmt(args).expect("printing to serial failed");
    })
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => ($crate::serial::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}
