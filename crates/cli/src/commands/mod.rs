// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};

mod config;
mod count;
mod database;
mod prune;

#[derive(Parser, Debug)]
enum Subcommand {
    /// Configuration-related commands
    Config(self::config::Options),

    /// Manage the database
    Database(self::database::Options),

    /// Delete the records matching the retention settings
    Prune(self::prune::Options),

    /// Count the records matching the retention settings
    Count(self::count::Options),
}

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Options {
    /// Path to the configuration file. Can be repeated, later files override
    /// earlier ones.
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Append,
        env = "SWEEPER_CONFIG",
        value_delimiter = ':'
    )]
    config: Vec<Utf8PathBuf>,

    #[command(subcommand)]
    subcommand: Subcommand,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as S;
        match self.subcommand {
            S::Config(c) => Box::pin(c.run(figment)).await,
            S::Database(c) => Box::pin(c.run(figment)).await,
            S::Prune(c) => Box::pin(c.run(figment)).await,
            S::Count(c) => Box::pin(c.run(figment)).await,
        }
    }

    /// Get a [`Figment`] instance with the configuration loaded
    ///
    /// Files are read in order, and `SWEEPER_`-prefixed environment variables
    /// override them. Nested keys are separated with a double underscore, for
    /// example `SWEEPER_RETENTION__BATCH_SIZE`.
    pub fn figment(&self) -> Figment {
        let configs = if self.config.is_empty() {
            vec![Utf8PathBuf::from("config.yaml")]
        } else {
            self.config.clone()
        };

        configs
            .iter()
            .fold(Figment::new(), |f, path| f.admerge(Yaml::file(path)))
            .merge(Env::prefixed("SWEEPER_").ignore(&["config"]).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Options::command().debug_assert();
    }
}
