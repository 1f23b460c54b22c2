// Modified from cortex-m-quickstart

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-env-changed=SPM_VENEERS");

    let memory_x = "memory.x";

    // Put memory configuration in our output directory and ensure it's
    // on the linker search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    std::fs::copy(memory_x, out.join("memory.x")).expect("failed to copy memory.x");
    println!("cargo:rustc-link-search={}", out.display());

    // Import library written by the secure image's link step.
    if let Some(veneers) = env::var_os("SPM_VENEERS") {
        println!("cargo:rustc-link-arg-bins={}", PathBuf::from(veneers).display());
    }
}
