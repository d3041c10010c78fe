use conduit::cfg::clap::{self, Parser};
use conduit::cfg::{ConduitCfg, ConduitOpt};
use conduit::ctx::compile;
use conduit::ir::Program;
use std::error::Error;
use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Debug, Parser)]
#[command(
    name = "select",
    about = "Infer labels and select protocols for a JSON-encoded program"
)]
struct Options {
    /// Program to compile
    #[arg(name = "PATH")]
    path: PathBuf,

    #[command(flatten)]
    conduit: ConduitOpt,
}

fn main() {
    env_logger::Builder::from_default_env()
        .format_level(false)
        .format_timestamp(None)
        .init();
    let options = Options::parse();
    let program: Program = match read_program(&options.path) {
        Ok(p) => p,
        Err(e) => fail(format!("{}: {e}", options.path.display())),
    };
    let cfg = ConduitCfg::from(options.conduit);
    match compile(program, &cfg, None) {
        Ok(out) => println!("{:#}", out.to_json()),
        Err(e) => fail(e),
    }
}

fn read_program(path: &Path) -> Result<Program, Box<dyn Error>> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn fail(e: impl Display) -> ! {
    eprintln!("error: {e}");
    exit(1)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn unreadable_programs_are_errors() {
        let dir = std::env::temp_dir().join(format!("conduit-select-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        assert!(read_program(&dir.join("missing.json")).is_err());
        let bad = dir.join("bad.json");
        fs::write(&bad, "{ \"hosts\": [").unwrap();
        assert!(read_program(&bad).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
