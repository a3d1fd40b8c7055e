//! `example-config` subcommand

use abscissa_core::Runnable;
use tokio::{fs::File, io::AsyncWriteExt};

use crate::{
    cli::ExampleConfigCmd,
    commands::AsyncRunnable,
    config::KeyServerConfig,
    error::{Error, ErrorKind},
};

impl AsyncRunnable for ExampleConfigCmd {
    async fn run(&self) -> Result<(), Error> {
        let output = KeyServerConfig::generate_example();

        if self.output == "-" {
            println!("{output}");
            return Ok(());
        }

        let mut f = if self.force {
            File::create(&self.output).await
        } else {
            File::create_new(&self.output).await
        }
        .map_err(|e| ErrorKind::Generic.context(e))?;
        f.write_all(output.as_bytes())
            .await
            .map_err(|e| ErrorKind::Generic.context(e))?;
        println!("Example config written to {}", self.output);

        Ok(())
    }
}

impl Runnable for ExampleConfigCmd {
    fn run(&self) {
        self.run_on_runtime();
    }
}
