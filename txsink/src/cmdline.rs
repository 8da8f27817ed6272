use clap::{Arg, Command};

pub(super) const CONFIG_ARG: &str = "config";
pub(super) const STATE_PATH_ARG: &str = "state-path";

pub(super) fn root_cli() -> Command {
    Command::new("txsink")
        .about("Streams rows from stdin into a partitioned log, optionally exactly once")
        .arg(
            Arg::new(CONFIG_ARG)
                .long("config")
                .value_name("FILE")
                .help("JSON settings file. Defaults to the base64 encoded TXSINK_SETTINGS_OBJECT"),
        )
        .arg(
            Arg::new(STATE_PATH_ARG)
                .long("state-path")
                .value_name("FILE")
                .help("Overrides where checkpoint records are kept"),
        )
}
