//! Compile time configurations for the util crate
fn main() {
    // the PNPLINK_PKG_NAME variable is used to create local folders under
    // `~/.config` and other directories. Do not change the name unless you
    // know what you are doing as this means any previously stored device
    // documents and certificates will no longer be found by the agent.
    println!("cargo::rustc-env=PNPLINK_PKG_NAME=pnplink");
}
