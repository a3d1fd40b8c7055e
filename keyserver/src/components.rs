//! Components of the keyserver.
//!
//! These are not [`abscissa_core::Component`]s; each is constructed from the loaded
//! [`KeyServerConfig`] by the command that needs it.
//!
//! [`KeyServerConfig`]: crate::config::KeyServerConfig

use tokio::task::JoinHandle;

use crate::error::Error;

pub mod database;
pub mod diagnosis_keys;
pub mod keystore;
pub(crate) mod maintenance;

/// A handle to a background task spawned by a component.
///
/// Background tasks are ongoing; the keyserver shuts down if one finishes. They are
/// monitored by the `start` command.
pub(crate) type TaskHandle = JoinHandle<Result<(), Error>>;
