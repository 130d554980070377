//! haystack binary: the daemon and its CLI client.
//!
//! All command logic lives in the `cli` module.

// mimalloc returns freed pages to the OS, which keeps a long-running
// daemon's resident size close to its live set.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod cli;

fn main() {
    cli::run();
}
