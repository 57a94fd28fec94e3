//! Host-side helper for building and flashing tegraboot.
//!
//!   cargo xtask build t186     release build plus a raw image for MB2
//!   cargo xtask clean
//!   cargo xtask flash t186     print the L4T flashing steps
//!   cargo xtask objdump t186   disassemble the firmware ELF

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, exit};

/// A board the firmware can be built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Board {
    name: &'static str,
    rust_target: &'static str,
    package: &'static str,
    bin: &'static str,
    /// Name MB2 expects for the cpu-bootloader image in `bootloader/`.
    l4t_image: &'static str,
    l4t_board: &'static str,
}

const T186: Board = Board {
    name: "t186",
    rust_target: "aarch64-unknown-none",
    package: "tegraboot-t186",
    bin: "tegraboot",
    l4t_image: "cboot_t186.bin",
    l4t_board: "jetson-tx2",
};

#[derive(Debug, PartialEq, Eq)]
enum Task {
    Build(Board),
    Clean,
    Flash(Board),
    Objdump(Board),
}

fn board(name: Option<&str>) -> Result<Board, String> {
    match name {
        Some("t186") => Ok(T186),
        Some(other) => Err(format!("unknown board '{}' (only t186 is supported)", other)),
        None => Err("missing board name".into()),
    }
}

fn parse(args: &[String]) -> Result<Task, String> {
    let board_arg = args.get(1).map(String::as_str);
    match args.first().map(String::as_str) {
        Some("build") => Ok(Task::Build(board(board_arg)?)),
        Some("clean") => Ok(Task::Clean),
        Some("flash") => Ok(Task::Flash(board(board_arg)?)),
        Some("objdump") => Ok(Task::Objdump(board(board_arg)?)),
        Some(cmd) => Err(format!("unknown command '{}'", cmd)),
        None => Err("missing command".into()),
    }
}

/// Build outputs of one board under `target/`.
struct Artifacts {
    elf: PathBuf,
    image: PathBuf,
}

impl Artifacts {
    fn new(root: &Path, board: &Board) -> Self {
        let dir = root.join("target").join(board.rust_target).join("release");
        Self {
            elf: dir.join(board.bin),
            image: dir.join(format!("{}.bin", board.bin)),
        }
    }
}

fn workspace_root() -> PathBuf {
    let xtask_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    xtask_dir.parent().unwrap_or(xtask_dir).to_path_buf()
}

/// First of `candidates` that answers `--version`.
fn find_tool(candidates: &[&'static str]) -> Option<&'static str> {
    candidates.iter().copied().find(|tool| {
        Command::new(tool)
            .arg("--version")
            .output()
            .is_ok_and(|out| out.status.success())
    })
}

fn run(cmd: &mut Command) -> Result<(), String> {
    let status = cmd
        .status()
        .map_err(|e| format!("failed to start {:?}: {}", cmd.get_program(), e))?;
    if !status.success() {
        return Err(format!("{:?} exited with {}", cmd.get_program(), status));
    }
    Ok(())
}

fn build(root: &Path, board: &Board) -> Result<(), String> {
    let linker_script = root.join("platform").join(board.name).join("linker.ld");
    println!("Building {} ({})", board.package, board.rust_target);
    run(Command::new("cargo")
        .current_dir(root)
        .args(["build", "--release", "-p", board.package, "--target", board.rust_target])
        .env("RUSTFLAGS", format!("-C link-arg=-T{}", linker_script.display())))?;

    let out = Artifacts::new(root, board);
    let objcopy = find_tool(&["rust-objcopy", "aarch64-linux-gnu-objcopy", "aarch64-none-elf-objcopy", "llvm-objcopy"])
        .ok_or("no objcopy found; install cargo-binutils and the llvm-tools component")?;
    run(Command::new(objcopy)
        .args(["-O", "binary"])
        .arg(&out.elf)
        .arg(&out.image))?;

    let size = std::fs::metadata(&out.image)
        .map_err(|e| format!("{}: {}", out.image.display(), e))?
        .len();
    println!("  elf   {}", out.elf.display());
    println!("  image {} ({} bytes)", out.image.display(), size);
    println!("  flash as Linux_for_Tegra/bootloader/{}", board.l4t_image);
    Ok(())
}

fn clean(root: &Path) -> Result<(), String> {
    run(Command::new("cargo").current_dir(root).arg("clean"))
}

fn flash(root: &Path, board: &Board) -> Result<(), String> {
    let out = Artifacts::new(root, board);
    if !out.image.exists() {
        return Err(format!("{} missing; run `cargo xtask build {}`", out.image.display(), board.name));
    }
    println!("From a Linux_for_Tegra tree, with the board in recovery mode (hold REC, tap RST):");
    println!("  cp {} bootloader/{}", out.image.display(), board.l4t_image);
    println!("  sudo ./flash.sh -k cpu-bootloader {} mmcblk0p1", board.l4t_board);
    Ok(())
}

fn objdump(root: &Path, board: &Board) -> Result<(), String> {
    let out = Artifacts::new(root, board);
    if !out.elf.exists() {
        return Err(format!("{} missing; run `cargo xtask build {}`", out.elf.display(), board.name));
    }
    let tool = find_tool(&["rust-objdump", "aarch64-linux-gnu-objdump", "llvm-objdump"])
        .ok_or("no objdump found")?;
    run(Command::new(tool).args(["-d", "--no-show-raw-insn"]).arg(&out.elf))
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    let task = match parse(&args) {
        Ok(task) => task,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("usage: cargo xtask <build|flash|objdump> t186 | cargo xtask clean");
            exit(2);
        }
    };

    let root = workspace_root();
    let res = match task {
        Task::Build(b) => build(&root, &b),
        Task::Clean => clean(&root),
        Task::Flash(b) => flash(&root, &b),
        Task::Objdump(b) => objdump(&root, &b),
    };
    if let Err(e) = res {
        eprintln!("error: {}", e);
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse(&args(&["build", "t186"])), Ok(Task::Build(T186)));
        assert_eq!(parse(&args(&["clean"])), Ok(Task::Clean));
        assert_eq!(parse(&args(&["objdump", "t186"])), Ok(Task::Objdump(T186)));
        assert!(parse(&args(&["flash"])).is_err());
        assert!(parse(&args(&["build", "rpi"])).is_err());
        assert!(parse(&args(&[])).is_err());
    }

    #[test]
    fn artifacts_live_under_the_release_dir() {
        let out = Artifacts::new(Path::new("/ws"), &T186);
        assert_eq!(out.elf, Path::new("/ws/target/aarch64-unknown-none/release/tegraboot"));
        assert_eq!(out.image, Path::new("/ws/target/aarch64-unknown-none/release/tegraboot.bin"));
    }
}
