fn main() {
    let rustc = rustc_version::version().expect("rustc version is discoverable");
    println!("cargo:rustc-env=VALET_RUSTC_VERSION={rustc}");
}
