//! Keyserver
//!
//! The transactional persistence core of an exposure notification diagnosis key server,
//! packaged as an application based on the [Abscissa] framework.
//!
//! The [`components`] module holds the stores that a transport layer builds on:
//! [`KeyStore`] pairs devices with server encryption keys through one-time codes, and
//! [`DiagnosisKeyStore`] stores and serves the diagnosis keys those devices upload.
//!
//! [Abscissa]: https://github.com/iqlusioninc/abscissa
//! [`KeyStore`]: components::keystore::KeyStore
//! [`DiagnosisKeyStore`]: components::diagnosis_keys::DiagnosisKeyStore

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unused_lifetimes,
    unused_qualifications
)]

pub mod application;
mod cli;
pub mod clock;
mod commands;
pub mod components;
pub mod config;
pub mod error;
mod prelude;
mod task;
pub mod timemath;
