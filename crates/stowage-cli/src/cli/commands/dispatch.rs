use super::super::args::{Cli, Command};

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Usage(args) => super::usage::run(args).await,
        Command::Trim(args) => super::trim::run(args).await,
        Command::Clear(args) => super::clear::run(args).await,
    }
}
