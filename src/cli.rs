use clap::{Parser, Subcommand};
use pressbox::{DatabaseEngine, ServerEngine};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pressbox")]
#[command(about = "pressbox - Local WordPress sites without containers")]
pub struct Cli {
    /// Data directory (defaults to $PRESSBOX_HOME, then ~/.pressbox)
    #[arg(long, global = true, env = "PRESSBOX_HOME")]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new site (does not start it)
    Create {
        /// Site name: letters, digits, '-' and '_'
        name: String,

        /// Database engine: mysql, mariadb or sqlite (defaults to database.default_engine)
        #[arg(long)]
        engine: Option<DatabaseEngine>,

        /// Local hostname (defaults to <name>.local)
        #[arg(long)]
        domain: Option<String>,

        /// WordPress version to install (defaults to wordpress.version)
        #[arg(long = "wp-version")]
        wordpress_version: Option<String>,

        /// PHP version to record (defaults to the detected `php` version)
        #[arg(long)]
        php_version: Option<String>,

        /// WordPress admin user name
        #[arg(long)]
        admin_user: Option<String>,

        /// WordPress admin email
        #[arg(long)]
        admin_email: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List sites
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start sites and serve them until Ctrl-C
    Up {
        /// Site names or ids
        #[arg(required = true)]
        sites: Vec<String>,
    },
    /// Delete a site and its files
    Delete {
        /// Site name or id
        site: String,

        /// Stop the site first if it is running
        #[arg(short, long)]
        force: bool,
    },
    /// Manage database servers
    #[command(subcommand)]
    Db(DbCommands),
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Show discovered database servers
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start an installed database server
    Start {
        /// mysql or mariadb
        engine: ServerEngine,
    },
    /// Stop running database servers of an engine
    Stop {
        /// mysql or mariadb
        engine: ServerEngine,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_create_with_engine() {
        let cli = Cli::try_parse_from(["pressbox", "create", "demo", "--engine", "sqlite"]).unwrap();
        match cli.command {
            Commands::Create { name, engine, .. } => {
                assert_eq!(name, "demo");
                assert_eq!(engine, Some(DatabaseEngine::Sqlite));
            }
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn rejects_unknown_engine() {
        assert!(Cli::try_parse_from(["pressbox", "create", "demo", "--engine", "oracle"]).is_err());
        assert!(Cli::try_parse_from(["pressbox", "db", "start", "sqlite"]).is_err());
    }

    #[test]
    fn up_requires_a_site() {
        assert!(Cli::try_parse_from(["pressbox", "up"]).is_err());
    }
}
