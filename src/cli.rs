//! Command line interface for mergebot.
//!
//! ```text
//! mergebot --source_package wit --bug 831331
//! ```
//!
//! Merges the patch attached to the bug into the package's packaging
//! repository and builds it. The temporary directory with the results is
//! printed on stdout, the commands to push and upload them are logged.
//!
//! `--filter_changelog <path>` is not for interactive use: it is the editor
//! `gbp dch` runs while releasing the changelog.
//!
//! Long flags take two dashes only: `-source_package` and `-bug` are
//! rejected, not read as long flags.

use std::env;
use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use crate::changelog;
use crate::config::Config;
use crate::exec::{CommandFactory, passthrough_env};
use crate::patch::{DEFAULT_SOAP_URL, DebbugsClient, normalize_bug};
use crate::pipeline::{self, DEFAULT_BUILDER, Settings};

/// Mergebot: merge a patch from the Debian BTS and build the package.
#[derive(Debug, Parser)]
#[command(name = "mergebot", version)]
pub struct Cli {
    /// Debian source package against which the bug specified in --bug was filed.
    #[arg(
        long = "source_package",
        value_name = "PACKAGE",
        required_unless_present = "filter_changelog"
    )]
    source_package: Option<String>,

    /// Debian bug number containing the patch to merge (e.g. 831331 or #831331).
    #[arg(long, required_unless_present = "filter_changelog")]
    bug: Option<String>,

    /// Filter the changelog at PATH in place and exit.
    #[arg(
        long = "filter_changelog",
        value_name = "PATH",
        hide = true,
        conflicts_with_all = ["source_package", "bug"]
    )]
    filter_changelog: Option<PathBuf>,

    /// Debbugs SOAP endpoint, overriding the config file.
    #[arg(long = "soap_url", value_name = "URL", hide = true)]
    soap_url: Option<String>,

    /// Log debug detail as well.
    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(cli: Cli) -> Result<(), String> {
    if let Some(path) = &cli.filter_changelog {
        return changelog::filter_file(path)
            .map_err(|e| format!("filtering {}: {e}", path.display()));
    }

    let (Some(source_package), Some(bug)) = (cli.source_package, cli.bug) else {
        return Err("--source_package and --bug are required".into());
    };
    let config = Config::load().map_err(|e| e.to_string())?;

    let soap_url = cli
        .soap_url
        .or(config.soap_url)
        .unwrap_or_else(|| DEFAULT_SOAP_URL.to_string());
    let self_path =
        env::current_exe().map_err(|e| format!("could not locate own executable: {e}"))?;
    let settings = Settings {
        bug: normalize_bug(&bug).to_string(),
        source_package,
        passthrough: passthrough_env(),
        filter_command: format!("{} --filter_changelog", self_path.display()),
        builder: config
            .builder
            .unwrap_or_else(|| DEFAULT_BUILDER.to_string()),
    };
    info!(
        "will work on package {:?}, bug {:?}",
        settings.source_package, settings.bug
    );

    let patches = DebbugsClient::new(soap_url).map_err(|e| e.to_string())?;
    // Nothing is logged here: the run rebinds the factory to its own directory.
    let mut commands = CommandFactory::new(env::temp_dir());
    if let Some(width) = config.log_index_width {
        commands = commands.with_index_width(width);
    }

    match pipeline::run(&commands, &settings, &patches) {
        Ok(work_dir) => {
            println!("{}", work_dir.display());
            info!("Merge and build successful!");
            info!(
                "Please introspect the resulting Debian package and git repository, then push and upload:"
            );
            info!("cd {:?}", work_dir.display().to_string());
            info!("(cd repo && git push)");
            info!("(cd export && debsign *.changes && dput *.changes)");
            Ok(())
        }
        Err(failure) => {
            let mut message = failure.to_string();
            if let Some(work_dir) = &failure.work_dir {
                message.push_str(&format!(
                    "\nInspect {:?} for logs and partial results.",
                    work_dir.display().to_string()
                ));
            }
            Err(message)
        }
    }
}
