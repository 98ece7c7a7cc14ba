mod binary;
mod cursor;
mod pipe;
mod simple;
#[cfg(not(feature = "disable-streaming"))]
mod streaming;
#[cfg(not(feature = "disable-transactions"))]
mod transactions;

use crate::{
    binary::binary,
    cursor::cursor,
    pipe::pipe,
    simple::{simple, simple_repeated},
};
use bindery::{Connection, Driver};
use log::LevelFilter;
use std::env;
#[cfg(not(feature = "disable-streaming"))]
use streaming::{streaming, streaming_channels, streaming_failures};
#[cfg(not(feature = "disable-transactions"))]
use transactions::transactions;
#[cfg(all(
    not(feature = "disable-transactions"),
    not(feature = "disable-procedures")
))]
use transactions::procedures;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// Runs the whole suite against an open connection.
pub fn execute_tests<D: Driver>(connection: &mut Connection<D>) {
    simple(connection);
    simple_repeated(connection);
    binary(connection);
    cursor(connection);
    pipe(connection);
    #[cfg(not(feature = "disable-streaming"))]
    {
        streaming(connection);
        streaming_failures(connection);
        streaming_channels(connection);
    }
    #[cfg(not(feature = "disable-transactions"))]
    transactions(connection);
    #[cfg(all(
        not(feature = "disable-transactions"),
        not(feature = "disable-procedures")
    ))]
    procedures(connection);
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}
