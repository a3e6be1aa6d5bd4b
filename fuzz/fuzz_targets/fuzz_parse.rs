//! Fuzz target for the shell parsers.
//!
//! Looks for panics, out-of-range spans and runaway recursion in the POSIX
//! and Windows parsers.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shellguard::ShellDialect;
use shellguard::parser::parse;

fuzz_target!(|data: &[u8]| {
    let Ok(command) = std::str::from_utf8(data) else {
        return;
    };
    if command.len() > 10_000 {
        return;
    }

    for dialect in ShellDialect::ALL {
        match parse(command, dialect) {
            Ok(parsed) => {
                for simple in parsed.root.simple_commands() {
                    assert!(simple.span.fits(command.len()));
                }
            }
            Err(incomplete) => assert!(incomplete.offset <= command.len()),
        }
    }
});
