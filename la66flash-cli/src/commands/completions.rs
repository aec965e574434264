//! Shell completion generation.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io;

use crate::Cli;

/// Generate shell completions to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completions_mention_subcommands() {
        let mut cmd = Cli::command();
        let mut buf = Vec::new();
        generate(Shell::Bash, &mut cmd, "la66flash", &mut buf);
        let script = String::from_utf8(buf).unwrap();
        for sub in ["flash", "p2p", "bridge", "list-ports"] {
            assert!(script.contains(sub), "missing {sub}");
        }
    }
}
