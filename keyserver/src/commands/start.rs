//! `start` subcommand

use abscissa_core::{Application, Runnable};

use crate::{
    cli::StartCmd,
    commands::AsyncRunnable,
    components::{database::Database, maintenance::Maintenance},
    error::{Error, ErrorKind},
    prelude::*,
};

impl AsyncRunnable for StartCmd {
    async fn run(&self) -> Result<(), Error> {
        let config = APP.config();

        let db = Database::open(&config).await?;

        // Start the retention sweeps.
        let maintenance_task_handle = Maintenance::new(&config, db).spawn();

        info!("Spawned keyserver tasks");

        // The maintenance task only exits if it is cancelled or panics.
        let maintenance_result = maintenance_task_handle
            .await
            .map_err(|e| ErrorKind::Generic.context(e))?;
        info!(?maintenance_result, "Maintenance task exited");

        maintenance_result
    }
}

impl Runnable for StartCmd {
    fn run(&self) {
        self.run_on_runtime();
    }
}
