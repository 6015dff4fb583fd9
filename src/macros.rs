/*
 * SPDX-License-Identifier: BlueOak-1.0.0
 * Copyright (c) Berkus Decker <berkus+vesper@metta.systems>
 */

/// Like `std::print!`, but writes into the registered console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::macros::_print(format_args!($($arg)*)));
}

/// Like `std::println!`, but writes into the registered console.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ({
        $crate::macros::_print(format_args!($($arg)*));
        $crate::print!("\n");
    })
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use crate::console::{console, interface::Write};

    // Nowhere to report a failing console to.
    let _ = console().write_fmt(args);
}

/// One log line, stamped with the uptime of the registered time manager.
#[doc(hidden)]
#[macro_export]
macro_rules! __log {
    ($level:literal, $format_string:expr $(, $arg:expr)* $(,)?) => ({
        let timestamp = $crate::time::time_manager().uptime();

        $crate::println!(
            concat!("[", $level, " {:>3}.{:06}] ", $format_string),
            timestamp.as_secs(),
            timestamp.subsec_micros()
            $(, $arg)*
        );
    });
}

/// Prints info text, with a newline.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::__log!(" ", $($arg)*));
}

/// Prints warning text, with a newline.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => ($crate::__log!("W", $($arg)*));
}
