//! `purge` subcommand

use abscissa_core::{Application, Runnable};

use crate::{
    cli::PurgeCmd,
    commands::AsyncRunnable,
    components::{database::Database, maintenance::Maintenance},
    error::Error,
    prelude::*,
};

impl AsyncRunnable for PurgeCmd {
    async fn run(&self) -> Result<(), Error> {
        let config = APP.config();

        let db = Database::open(&config).await?;
        let swept = Maintenance::new(&config, db).sweep().await?;

        println!(
            "Deleted {} expired encryption keys and {} expired diagnosis keys",
            swept.encryption_keys, swept.diagnosis_keys,
        );

        Ok(())
    }
}

impl Runnable for PurgeCmd {
    fn run(&self) {
        self.run_on_runtime();
    }
}
