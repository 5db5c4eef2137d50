#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
use std::process::exit;

use clonopipe_lib::opts::setup;
use clonopipe_lib::run::run;
use log::error;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(not(tarpaulin_include))]
fn main() {
    let opts = setup();

    match run(opts) {
        Ok(status) => {
            println!("{}", status.summary());
            exit(status.exit_code());
        }
        Err(err) => {
            error!("{:#}", err.error);
            println!("{}", err.summary());
            exit(1);
        }
    }
}
