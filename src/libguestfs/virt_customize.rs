use std::path::{Path, PathBuf};

use crate::os::DiskPath;

/// How `--password`/`--root-password` obtain the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSelector {
    Plain(String),
    File(PathBuf),
    Random,
    Disabled,
    /// Set the password but lock the account.
    Locked(Box<PasswordSelector>),
}

impl PasswordSelector {
    fn render(&self, host: &dyn Fn(&Path) -> String) -> String {
        match self {
            PasswordSelector::Plain(password) => format!("password:{}", password),
            PasswordSelector::File(path) => format!("file:{}", host(path)),
            PasswordSelector::Random => "random".to_string(),
            PasswordSelector::Disabled => "disabled".to_string(),
            PasswordSelector::Locked(inner) => format!("locked:{}", inner.render(host)),
        }
    }
}

/// One `virt-customize` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtCustomization {
    AppendLine { file: DiskPath, line: String },
    Chmod { mode: String, file: DiskPath },
    CommandsFromFile(PathBuf),
    Copy { source: DiskPath, dest: DiskPath },
    CopyIn { local: PathBuf, remote_dir: DiskPath },
    Delete(DiskPath),
    /// Edit `file` with a Perl expression such as `s/^#Port 22$/Port 1234/`.
    Edit { file: DiskPath, expression: String },
    FirstBoot(PathBuf),
    FirstBootCommand(String),
    FirstBootInstall(Vec<String>),
    Hostname(String),
    Link { target: DiskPath, link: DiskPath },
    Mkdir(DiskPath),
    Move { source: DiskPath, dest: DiskPath },
    Password { user: String, password: PasswordSelector },
    RootPassword(PasswordSelector),
    SshInject { user: String, key: String },
    Timezone(String),
    Touch(DiskPath),
    Write { file: DiskPath, content: String },
}

impl VirtCustomization {
    /// Option name and argument. `host` maps host paths for the tool, which
    /// may run in a container.
    pub fn to_args(&self, host: &dyn Fn(&Path) -> String) -> [String; 2] {
        let (option, value) = match self {
            Self::AppendLine { file, line } => ("--append-line", format!("{}:{}", file, line)),
            Self::Chmod { mode, file } => ("--chmod", format!("{}:{}", mode, file)),
            Self::CommandsFromFile(path) => ("--commands-from-file", host(path)),
            Self::Copy { source, dest } => ("--copy", format!("{}:{}", source, dest)),
            Self::CopyIn { local, remote_dir } => {
                ("--copy-in", format!("{}:{}", host(local), remote_dir))
            }
            Self::Delete(path) => ("--delete", path.to_string()),
            Self::Edit { file, expression } => ("--edit", format!("{}:{}", file, expression)),
            Self::FirstBoot(script) => ("--firstboot", host(script)),
            Self::FirstBootCommand(command) => ("--firstboot-command", command.clone()),
            Self::FirstBootInstall(packages) => ("--firstboot-install", packages.join(",")),
            Self::Hostname(name) => ("--hostname", name.clone()),
            Self::Link { target, link } => ("--link", format!("{}:{}", target, link)),
            Self::Mkdir(dir) => ("--mkdir", dir.to_string()),
            Self::Move { source, dest } => ("--move", format!("{}:{}", source, dest)),
            Self::Password { user, password } => {
                ("--password", format!("{}:{}", user, password.render(host)))
            }
            Self::RootPassword(password) => ("--root-password", password.render(host)),
            Self::SshInject { user, key } => ("--ssh-inject", format!("{}:string:{}", user, key)),
            Self::Timezone(zone) => ("--timezone", zone.clone()),
            Self::Touch(file) => ("--touch", file.to_string()),
            Self::Write { file, content } => ("--write", format!("{}:{}", file, content)),
        };
        [option.to_string(), value]
    }
}
