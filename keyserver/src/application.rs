//! Keyserver Abscissa Application

use std::sync::atomic::{AtomicUsize, Ordering};

use abscissa_core::{
    Application, FrameworkError, StandardPaths,
    application::{self, AppCell},
    config::{self, CfgCell},
    trace,
};
use abscissa_tokio::TokioComponent;

use crate::{cli::EntryPoint, config::KeyServerConfig};

/// Application state
pub static APP: AppCell<KeyServerApp> = AppCell::new();

/// Keyserver Application
#[derive(Debug, Default)]
pub struct KeyServerApp {
    /// Application configuration.
    config: CfgCell<KeyServerConfig>,

    /// Application state.
    state: application::State<Self>,
}

impl Application for KeyServerApp {
    type Cmd = EntryPoint;
    type Cfg = KeyServerConfig;
    type Paths = StandardPaths;

    fn config(&self) -> config::Reader<KeyServerConfig> {
        self.config.read()
    }

    fn state(&self) -> &application::State<Self> {
        &self.state
    }

    fn register_components(&mut self, command: &Self::Cmd) -> Result<(), FrameworkError> {
        let mut components = self.framework_components(command)?;
        components.push(Box::new(TokioComponent::from(
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name_fn(|| {
                    static ATOMIC_ID: AtomicUsize = AtomicUsize::new(0);
                    let id = ATOMIC_ID.fetch_add(1, Ordering::SeqCst);
                    format!("tokio-worker-{id}")
                })
                .build()
                .expect("failed to build Tokio runtime"),
        )));
        self.state.components_mut().register(components)
    }

    fn after_config(&mut self, config: Self::Cfg) -> Result<(), FrameworkError> {
        let mut components = self.state.components_mut();
        components.after_config(&config)?;
        self.config.set_once(config);
        Ok(())
    }

    fn tracing_config(&self, command: &EntryPoint) -> trace::Config {
        if command.verbose {
            trace::Config::verbose()
        } else {
            trace::Config::default()
        }
    }
}

/// Boots the keyserver, parsing subcommand and options from command-line arguments, and
/// terminating when complete.
pub fn boot() {
    abscissa_core::boot(&APP);
}
