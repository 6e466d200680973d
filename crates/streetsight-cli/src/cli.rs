use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "streetsight")]
#[command(author, version, about = "Classify civic issue photos")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify an image and print the result as JSON
    Classify {
        /// Image file (JPEG, PNG, WebP, ...)
        image: PathBuf,

        /// Service config file
        #[arg(short, long, env = "STREETSIGHT_CONFIG", default_value = "./config/streetsight.yaml")]
        config: PathBuf,

        /// Pretty-print the JSON output
        #[arg(short, long)]
        pretty: bool,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Initialize the service and print its status
    Status {
        /// Service config file
        #[arg(short, long, env = "STREETSIGHT_CONFIG", default_value = "./config/streetsight.yaml")]
        config: PathBuf,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classify() {
        let cli = Cli::parse_from(["streetsight", "classify", "photo.jpg", "--pretty"]);
        match cli.command {
            Commands::Classify {
                image,
                pretty,
                verbose,
                ..
            } => {
                assert_eq!(image, PathBuf::from("photo.jpg"));
                assert!(pretty);
                assert!(!verbose);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_status_with_config() {
        let cli = Cli::parse_from(["streetsight", "status", "-c", "/etc/streetsight.yaml"]);
        match cli.command {
            Commands::Status { config, .. } => {
                assert_eq!(config, PathBuf::from("/etc/streetsight.yaml"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
