//! Command line interface.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use postbox_common::logging::{self, LogTarget};

use crate::config::{ConfigLookup, Postbox};

/// Deliver queued mail through SMTP relays
#[derive(Parser, Debug)]
#[command(name = "postbox")]
#[command(about = "Deliver queued mail through SMTP relays", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Environment name, selects ./postbox.<ENV>.ron
    #[arg(short, long, env = "POSTBOX_ENV")]
    pub environment: Option<String>,

    /// Change to PATH before looking for configuration
    #[arg(long, value_name = "PATH")]
    pub chdir: Option<PathBuf>,

    /// Log to "stdout", "stderr" or a file
    #[arg(short, long, value_name = "PATH")]
    pub log_file: Option<LogTarget>,

    /// One of trace, debug, info, warn, error, fatal
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one delivery pass (default)
    Deliver(RunArgs),

    /// Run delivery passes on an interval until interrupted
    Serve {
        /// Seconds between the start of two runs
        #[arg(long, default_value_t = 60)]
        interval: u64,

        #[command(flatten)]
        run: RunArgs,
    },

    /// List queued messages
    Mailq,

    /// Queue a raw RFC 5322 message
    Enqueue {
        /// Do not send before this time (RFC 3339)
        #[arg(long, value_name = "TIME")]
        not_before: Option<DateTime<Utc>>,

        /// Message file, stdin when absent
        file: Option<PathBuf>,
    },
}

/// Overrides for the delivery section of the configuration.
#[derive(Args, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunArgs {
    /// Maximum number of messages per run
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Messages older than SECS are removed from the queue, 0 disables
    #[arg(long, value_name = "SECS")]
    pub max_age: Option<u64>,
}

impl RunArgs {
    pub fn apply(self, config: &mut Postbox) {
        if let Some(batch_size) = self.batch_size {
            config.delivery.batch_size = Some(batch_size);
        }

        if let Some(max_age) = self.max_age {
            config.delivery.max_age_secs = max_age;
        }
    }
}

impl Cli {
    /// Rejects option values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Fails for an unknown log level, a log file in a missing directory or a
    /// log file path that is a directory.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(level) = &self.log_level {
            logging::parse_level(level)?;
        }

        if let Some(LogTarget::File(path)) = &self.log_file {
            if path.is_dir() {
                anyhow::bail!("{} is a directory", path.display());
            }

            let parent = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            if !parent.is_dir() {
                anyhow::bail!("{} is not an existing directory", parent.display());
            }
        }

        if let Some(dir) = &self.chdir
            && !dir.is_dir()
        {
            anyhow::bail!("{} is not a directory", dir.display());
        }

        Ok(())
    }

    #[must_use]
    pub fn lookup(&self) -> ConfigLookup {
        ConfigLookup::from_env(self.config.clone(), self.environment.clone())
    }

    /// Applies the logging options on top of the file configuration.
    pub fn apply(&self, config: &mut Postbox) {
        if let Some(target) = &self.log_file {
            config.logging.target = target.clone();
        }

        if let Some(level) = &self.log_level {
            config.logging.level = Some(level.clone());
        }

        match &self.command {
            Some(Command::Deliver(run) | Command::Serve { run, .. }) => run.apply(config),
            Some(Command::Mailq | Command::Enqueue { .. }) | None => {}
        }
    }

    /// The command to run; a bare `postbox` delivers once.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Deliver(RunArgs::default()))
    }
}
