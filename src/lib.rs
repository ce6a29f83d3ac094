pub mod action;
pub mod build_system;
pub mod compilation;
mod densemap;
pub mod driver;
pub mod error;
pub mod file;
pub mod fs;
pub mod job;
pub mod model;
pub mod options;
pub mod output_file_map;
pub mod process;
#[cfg(unix)]
mod process_posix;
#[cfg(windows)]
mod process_win;
pub mod progress;
pub mod run;
mod scanner;
mod smallmap;
pub mod task;
pub mod toolchain;
pub mod trace;
pub mod triple;

#[cfg(not(any(windows, target_arch = "wasm32")))]
use jemallocator::Jemalloc;

#[cfg(not(any(windows, target_arch = "wasm32")))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;
