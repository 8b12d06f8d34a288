use std::io::Write;

use anyhow::Result;

use crate::cli::{DestroyArgs, InitArgs};
use crate::error::CliError;
use crate::workspace::{self, WorkspaceSelector};

use super::CommandIo;

pub fn init(io: &mut CommandIo<'_>, args: InitArgs) -> Result<()> {
    let selector = WorkspaceSelector::from_args(&args.workspace)?;
    let (workspace, created) = workspace::init(&selector)?;

    if created {
        writeln!(io.out, "Initialized workspace at {}", workspace.root.display())?;
    } else {
        writeln!(
            io.out,
            "Workspace already initialized at {}",
            workspace.root.display()
        )?;
    }
    Ok(())
}

pub fn destroy(io: &mut CommandIo<'_>, args: DestroyArgs) -> Result<()> {
    if !args.confirm {
        return Err(
            CliError::invalid_input("destroy is irreversible; pass --confirm to proceed").into(),
        );
    }

    let selector = WorkspaceSelector::from_args(&args.workspace)?;
    let root = workspace::destroy(&selector)?;
    writeln!(io.out, "Destroyed workspace at {}", root.display())?;
    Ok(())
}
