use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use rvstore_dualwrite::Mode;

#[derive(Parser, Debug)]
#[command(
    name = "rvstore",
    about = "Inspect and edit an rvstore directory",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store directory (overrides the config file).
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Legacy store directory; routes every call through a dual writer.
    #[arg(long, global = true)]
    pub legacy_root: Option<PathBuf>,

    /// Migration mode when --legacy-root is given (1-4 or a mode name).
    #[arg(long, global = true)]
    pub mode: Option<Mode>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an object
    Create(CreateArgs),
    /// Show one object
    Get(ObjectArgs),
    /// List objects of a kind
    List(ListArgs),
    /// Replace the body and/or labels of an object
    Update(UpdateArgs),
    /// Delete an object
    Delete(DeleteArgs),
    /// Stream changes of a kind
    Watch(WatchArgs),
    /// Print the current resource version watermark
    Rv,
}

#[derive(Args, Debug)]
pub struct ObjectArgs {
    /// `group/version/resource`, or `version/resource` for the core group
    pub kind: String,
    pub name: String,
    #[arg(short, long)]
    pub namespace: Option<String>,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub object: ObjectArgs,
    /// JSON body
    #[arg(long, default_value = "{}")]
    pub body: String,
    /// `key=value`, repeatable
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub object: ObjectArgs,
    /// Replacement JSON body
    #[arg(long)]
    pub body: Option<String>,
    /// `key=value` to set, or `key-` to remove; repeatable
    #[arg(short, long = "label")]
    pub labels: Vec<String>,
    /// Fail unless the object is still at this version
    #[arg(long)]
    pub if_version: Option<String>,
    /// Create the object if it does not exist
    #[arg(long)]
    pub upsert: bool,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub object: ObjectArgs,
    #[arg(long)]
    pub if_version: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub kind: String,
    #[arg(short, long)]
    pub namespace: Option<String>,
    /// Label selector, e.g. `env=prod,tier in (web,api)`
    #[arg(short = 'l', long)]
    pub selector: Option<String>,
    /// Field selector over metadata.name / metadata.namespace
    #[arg(long)]
    pub field_selector: Option<String>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    #[command(flatten)]
    pub list: ListArgs,
    /// Resume after this version; omitted or 0 starts with a full snapshot
    #[arg(long)]
    pub from: Option<String>,
    /// Ask for periodic bookmarks
    #[arg(long)]
    pub bookmarks: bool,
    /// Exit after this many events
    #[arg(long)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_anywhere() {
        let cli = Cli::try_parse_from([
            "rvstore",
            "get",
            "dashboard.grafana.app/v1/dashboards",
            "a",
            "-n",
            "default",
            "--root",
            "/data",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/data")));
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Command::Get(args) => {
                assert_eq!(args.name, "a");
                assert_eq!(args.namespace.as_deref(), Some("default"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_create_labels() {
        let cli = Cli::try_parse_from([
            "rvstore", "create", "v1/configmaps", "cfg", "-l", "a=1", "--label", "b=2", "--body",
            r#"{"k":"v"}"#,
        ])
        .unwrap();
        match cli.command {
            Command::Create(args) => {
                assert_eq!(args.labels, vec!["a=1", "b=2"]);
                assert_eq!(args.body, r#"{"k":"v"}"#);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_mode() {
        let cli = Cli::try_parse_from(["rvstore", "rv", "--legacy-root", "/old", "--mode", "dual-legacy"]).unwrap();
        assert_eq!(cli.mode, Some(Mode::DualLegacy));
        assert!(Cli::try_parse_from(["rvstore", "rv", "--mode", "7"]).is_err());
    }

    #[test]
    fn watch_flags() {
        let cli = Cli::try_parse_from([
            "rvstore", "watch", "g/v1/things", "--from", "42", "--bookmarks", "--limit", "3", "-l", "env=prod",
        ])
        .unwrap();
        match cli.command {
            Command::Watch(args) => {
                assert_eq!(args.from.as_deref(), Some("42"));
                assert!(args.bookmarks);
                assert_eq!(args.limit, Some(3));
                assert_eq!(args.list.selector.as_deref(), Some("env=prod"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
