use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sitecrawl", version, about = "Resumable compliance crawler")]
pub struct Cli {
    /// Configuration file.
    #[arg(
        long,
        short,
        global = true,
        env = "SITECRAWL_CONFIG",
        default_value = "sitecrawl.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run (or continue) a crawl until every due site has been tested.
    Run(RunArgs),

    /// List sites of a crawl that still have non-success tests.
    Incomplete {
        #[arg(long)]
        crawl_id: String,
    },

    /// Register a site, or update the URL of an existing one.
    AddSite {
        #[arg(long)]
        id: String,
        #[arg(long)]
        url: String,
    },
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Identifier shared by every invocation of the same logical crawl.
    #[arg(long)]
    pub crawl_id: String,

    /// Write Prometheus text-format metrics here when the run ends.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "sitecrawl",
            "--config",
            "/etc/sitecrawl.toml",
            "run",
            "--crawl-id",
            "2024-06",
            "--metrics-file",
            "/var/lib/node_exporter/sitecrawl.prom",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/sitecrawl.toml"));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.crawl_id, "2024-06");
                assert_eq!(
                    args.metrics_file,
                    Some(PathBuf::from("/var/lib/node_exporter/sitecrawl.prom"))
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_add_site_with_trailing_config() {
        let cli = Cli::try_parse_from([
            "sitecrawl",
            "add-site",
            "--id",
            "c_a001",
            "--url",
            "comune.example.it",
            "-c",
            "local.toml",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("local.toml"));
        assert!(matches!(
            cli.command,
            Command::AddSite { ref id, ref url } if id == "c_a001" && url == "comune.example.it"
        ));
    }

    #[test]
    fn test_run_requires_crawl_id() {
        assert!(Cli::try_parse_from(["sitecrawl", "run"]).is_err());
    }
}
