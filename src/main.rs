use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use anyhow::{Context, Result, bail};
use tracing::info;

fn main() {
  tracing_subscriber::fmt().with_target(false).init();

  let args: Vec<String> = env::args().collect();
  if args.len() < 2 {
    let program = args.first().map(String::as_str).unwrap_or("penguin");
    eprintln!("usage: {program} <source-file>");
    process::exit(1);
  }

  // The source path is the last argument; everything before it is
  // reserved for future flags.
  let source = PathBuf::from(&args[args.len() - 1]);
  if let Err(err) = build(&source) {
    eprintln!("{err:#}");
    process::exit(1);
  }
}

/// Compile, assemble, and link `<base>.pn` into `<base>` next to it.
fn build(source: &Path) -> Result<()> {
  let asm_path = source.with_extension("asm");
  let obj_path = source.with_extension("o");
  let exe_path = source.with_extension("");

  let asm = penguin::compile_file(source)?;
  fs::write(&asm_path, asm).with_context(|| format!("writing {}", asm_path.display()))?;
  info!(asm = %asm_path.display(), "assembly written");

  assemble(&asm_path)?;
  link(&obj_path, &exe_path)?;
  info!(exe = %exe_path.display(), "build complete");
  Ok(())
}

fn assemble(asm_path: &Path) -> Result<()> {
  let status = Command::new("nasm")
    .arg("-felf64")
    .arg(asm_path)
    .status()
    .context("running nasm")?;
  if !status.success() {
    bail!("nasm failed on {}", asm_path.display());
  }
  Ok(())
}

fn link(obj_path: &Path, exe_path: &Path) -> Result<()> {
  let status = Command::new("ld")
    .arg(obj_path)
    .arg("-o")
    .arg(exe_path)
    .status()
    .context("running ld")?;
  if !status.success() {
    bail!("ld failed on {}", obj_path.display());
  }
  Ok(())
}
