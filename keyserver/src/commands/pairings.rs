//! `pairings` subcommand

use abscissa_core::{Application, Runnable};

use crate::{
    cli::PairingsCmd,
    commands::AsyncRunnable,
    components::{database::Database, keystore::KeyStore},
    error::Error,
    prelude::*,
};

impl AsyncRunnable for PairingsCmd {
    async fn run(&self) -> Result<(), Error> {
        let config = APP.config();

        let db = Database::open(&config).await?;
        let keystore = KeyStore::new(&config, db);

        let pairings = keystore.pairings_for_hash_id(&self.hash_id).await?;
        if pairings.is_empty() {
            println!("No pairings for device hash {:?}", self.hash_id);
        }
        for pairing in pairings {
            println!(
                "{:?} region={} originator={} issued_at={} valid_from={} remaining_keys={} server_public_key={}",
                pairing.state(),
                pairing.region,
                pairing.originator,
                pairing.issued_at,
                pairing
                    .valid_from
                    .map_or_else(|| "-".to_owned(), |t| t.to_string()),
                pairing.remaining_keys,
                hex::encode(&pairing.server_public_key),
            );
        }

        Ok(())
    }
}

impl Runnable for PairingsCmd {
    fn run(&self) {
        self.run_on_runtime();
    }
}
