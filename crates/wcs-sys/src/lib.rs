//! Minimal bindings to [wcslib], covering only the pixel<->world transform
//! entry points `astrocore`'s column driver and celestial-mode cropper need.
//!
//! [wcslib]: https://www.atnf.csiro.au/people/mcalabre/WCS/

pub mod wcslib;
