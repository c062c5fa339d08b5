//! Locates the system `wcslib` install via `pkg-config` and links against it.
//!
//! Unlike the teacher crate this is descended from, we don't vendor and
//! build `cfitsio`/`wcslib` from source: on-disk FITS I/O is out of scope
//! for `astrocore` (see SPEC_FULL.md §A), so the only symbols we need are
//! wcslib's pixel<->world transform entry points, and those are happy to
//! link against whatever `wcslib` the host already has installed.

fn main() {
    if pkg_config::Config::new().probe("wcslib").is_ok() {
        return;
    }

    // Fall back to a bare link-lib directive for hosts where wcslib is
    // installed but has no .pc file (common on older distros).
    println!("cargo:rustc-link-lib=wcs");
}
