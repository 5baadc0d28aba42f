pub mod handlers;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("lockpid")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Cross-process lock files stamped with the owner's pid and command line")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("More logging (-v info, -vv debug, -vvv trace)"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(std::path::PathBuf))
                .global(true)
                .help("Read configuration from FILE instead of the global/project files"),
        )
        .subcommand(cmd_hold())
        .subcommand(cmd_run())
        .subcommand(cmd_status())
}

fn arg_path() -> Arg {
    Arg::new("path")
        .value_name("PATH")
        .required(true)
        .value_parser(value_parser!(std::path::PathBuf))
        .help("Lock file, or a directory to lock through its child lock file")
}

fn arg_wait() -> Arg {
    Arg::new("wait")
        .long("wait")
        .value_name("MS")
        .value_parser(value_parser!(u64))
        .help("Give up after waiting this long for a contended lock (default: forever)")
}

fn arg_stale() -> Arg {
    Arg::new("stale")
        .long("stale")
        .value_name("MS")
        .value_parser(value_parser!(u64))
        .help("Take over a live owner's lock once the file is older than this")
}

fn cmd_hold() -> Command {
    Command::new("hold")
        .about("Acquire a lock, hold it, then release it")
        .arg(arg_path())
        .arg(arg_wait())
        .arg(arg_stale())
        .arg(
            Arg::new("hold-ms")
                .long("hold-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64))
                .help("Release after this long (default: hold until interrupted)"),
        )
}

fn cmd_run() -> Command {
    Command::new("run")
        .about("Run a command while holding a lock")
        .arg(arg_path())
        .arg(arg_wait())
        .arg(arg_stale())
        .arg(
            Arg::new("command")
                .value_name("CMD")
                .required(true)
                .num_args(1..)
                .last(true)
                .help("Command and arguments, after --"),
        )
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("Show who holds a lock without touching it")
        .arg(arg_path())
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        build_cli().debug_assert();
    }

    #[test]
    fn test_hold_parses_durations() {
        let matches = build_cli()
            .try_get_matches_from(["lockpid", "-vv", "hold", "/tmp/x", "--wait", "4000", "--hold-ms", "10"])
            .unwrap();
        assert_eq!(matches.get_count("verbose"), 2);
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "hold");
        assert_eq!(sub.get_one::<u64>("wait"), Some(&4000));
        assert_eq!(sub.get_one::<u64>("stale"), None);
        assert_eq!(sub.get_one::<u64>("hold-ms"), Some(&10));
    }

    #[test]
    fn test_run_takes_trailing_command() {
        let matches = build_cli()
            .try_get_matches_from(["lockpid", "run", "/tmp/x", "--", "sh", "-c", "exit 3"])
            .unwrap();
        let sub = matches.subcommand_matches("run").unwrap();
        let command: Vec<&String> = sub.get_many::<String>("command").unwrap().collect();
        assert_eq!(command, ["sh", "-c", "exit 3"]);
    }

    #[test]
    fn test_run_requires_command() {
        assert!(build_cli()
            .try_get_matches_from(["lockpid", "run", "/tmp/x"])
            .is_err());
    }

    #[test]
    fn test_rejects_non_numeric_wait() {
        assert!(build_cli()
            .try_get_matches_from(["lockpid", "hold", "/tmp/x", "--wait", "soon"])
            .is_err());
    }
}
