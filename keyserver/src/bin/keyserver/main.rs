//! Main entry point for the keyserver

#![deny(warnings, missing_docs, trivial_casts, unused_qualifications)]
#![forbid(unsafe_code)]

/// Boot the keyserver
fn main() {
    keyserver::application::boot();
}
