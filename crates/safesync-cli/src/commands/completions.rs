//! Completions command
//!
//! `safesync completions zsh > ~/.zfunc/_safesync`

use std::io::{self, Write};

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::Shell;

const BIN_NAME: &str = "safesync";

#[derive(Debug, clap::Args)]
pub struct CompletionsCommand {
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsCommand {
    pub fn execute(&self) -> Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        write_completions(self.shell, &mut out);
        out.flush()?;
        Ok(())
    }
}

fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = crate::Cli::command();
    clap_complete::generate(shell, &mut cmd, BIN_NAME, out);
}
