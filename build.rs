use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Only the RP2040 firmware needs a linker script; host builds and tests
    // link normally.
    let target = env::var("TARGET").unwrap();
    if target.starts_with("thumbv6m-none-eabi") {
        let out = PathBuf::from(env::var_os("OUT_DIR").unwrap());
        fs::write(out.join("memory.x"), include_bytes!("memory.x")).unwrap();
        println!("cargo:rustc-link-search={}", out.display());
        println!("cargo:rustc-link-arg-bins=-Tlink.x");
        println!("cargo:rerun-if-changed=memory.x");
    }
    println!("cargo:rerun-if-changed=build.rs");
}
