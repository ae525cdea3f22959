use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::os::DiskPath;

/// One `guestfish` command.
///
/// Rendered into script lines; a leading `!` runs the line on the host, a
/// leading `-` lets guestfish continue when the line fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestfishCommand {
    /// Copies a host file or directory into `remote_dir`, creating it first.
    CopyIn { local: PathBuf, remote_dir: DiskPath },
    /// Copies `remote` into the host directory `local_dir`, creating it first.
    CopyOut { remote: DiskPath, local_dir: PathBuf },
    Mkdir(DiskPath),
    Touch(DiskPath),
    Rm {
        path: DiskPath,
        force: bool,
        recursive: bool,
    },
    RmDir(DiskPath),
    WriteAppend { file: DiskPath, content: Vec<u8> },
    TarIn { archive: PathBuf, directory: DiskPath },
    TarOut { directory: DiskPath, archive: PathBuf },
    UmountAll,
    Exit,
}

fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:=,@".contains(c))
    {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn escape_bytes(content: &[u8]) -> String {
    let mut escaped = String::with_capacity(content.len() * 4 + 2);
    escaped.push('"');
    for byte in content {
        let _ = write!(escaped, "\\x{:02x}", byte);
    }
    escaped.push('"');
    escaped
}

impl GuestfishCommand {
    /// Script lines for this command. `host` maps host paths for the tool,
    /// which may run in a container.
    pub fn to_script(&self, host: &dyn Fn(&Path) -> String) -> Vec<String> {
        let disk = |path: &DiskPath| quote(&path.to_string());
        match self {
            Self::CopyIn { local, remote_dir } => vec![
                format!("-mkdir-p {}", disk(remote_dir)),
                format!("copy-in {} {}", quote(&host(local)), disk(remote_dir)),
            ],
            Self::CopyOut { remote, local_dir } => vec![
                format!("!mkdir -p {}", quote(&host(local_dir))),
                format!("-copy-out {} {}", disk(remote), quote(&host(local_dir))),
            ],
            Self::Mkdir(dir) => vec![format!("mkdir-p {}", disk(dir))],
            Self::Touch(file) => vec![format!("touch {}", disk(file))],
            Self::Rm {
                path,
                force,
                recursive,
            } => {
                let command = if *recursive {
                    "rm-rf"
                } else if *force {
                    "rm-f"
                } else {
                    "rm"
                };
                vec![format!("{} {}", command, disk(path))]
            }
            Self::RmDir(dir) => vec![format!("rmdir {}", disk(dir))],
            Self::WriteAppend { file, content } => {
                vec![format!("write-append {} {}", disk(file), escape_bytes(content))]
            }
            Self::TarIn { archive, directory } => {
                vec![format!("tar-in {} {}", quote(&host(archive)), disk(directory))]
            }
            Self::TarOut { directory, archive } => {
                vec![format!("tar-out {} {}", disk(directory), quote(&host(archive)))]
            }
            Self::UmountAll => vec!["umount-all".to_string()],
            Self::Exit => vec!["exit".to_string()],
        }
    }
}
