use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::error::{Result, SshError};

/// Argument that stops a re-invoked child from opening yet another surface.
pub const NO_NEW_TAB_FLAG: &str = "--no-new-tab";

const DESKTOP_VARS: [&str; 3] = ["DISPLAY", "WAYLAND_DISPLAY", "XDG_CURRENT_DESKTOP"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TerminalKind {
    WindowsTerminal,
    Tabby,
    PowerShell,
    Cmd,
    ITerm2,
    TerminalApp,
    GnomeTerminal,
    Konsole,
    XfceTerminal,
    Alacritty,
    Generic,
    Unknown,
}

impl fmt::Display for TerminalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WindowsTerminal => "Windows Terminal",
            Self::Tabby => "Tabby",
            Self::PowerShell => "PowerShell",
            Self::Cmd => "CMD",
            Self::ITerm2 => "iTerm2",
            Self::TerminalApp => "Terminal.app",
            Self::GnomeTerminal => "GNOME Terminal",
            Self::Konsole => "Konsole",
            Self::XfceTerminal => "XFCE Terminal",
            Self::Alacritty => "Alacritty",
            Self::Generic => "Generic",
            Self::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Other
        }
    }
}

/// What the launcher is allowed to know about the host.
pub trait Environment {
    fn os(&self) -> OsFamily;
    fn var(&self, key: &str) -> Option<String>;
    fn has_program(&self, program: &str) -> bool;
}

pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn os(&self) -> OsFamily {
        OsFamily::current()
    }

    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn has_program(&self, program: &str) -> bool {
        let Some(path) = std::env::var_os("PATH") else {
            return false;
        };
        std::env::split_paths(&path).any(|dir| {
            dir.join(program).is_file()
                || (cfg!(windows) && dir.join(format!("{program}.exe")).is_file())
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnTarget {
    pub executable: String,
    pub args: Vec<String>,
}

impl SpawnTarget {
    pub fn new(executable: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }

    /// `<exe> connect <server> --no-new-tab`
    pub fn reconnect(executable: impl Into<String>, server_name: &str) -> Self {
        Self::new(
            executable,
            vec![
                "connect".to_string(),
                server_name.to_string(),
                NO_NEW_TAB_FLAG.to_string(),
            ],
        )
    }

    fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.executable.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Shell command line; words with whitespace or quotes are single-quoted.
    pub fn command_line(&self) -> String {
        self.argv()
            .iter()
            .map(|word| shell_quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(word: &str) -> String {
    if !word.is_empty() && !word.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn applescript_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchMode {
    Detached,
    /// Run to completion and require a zero exit; used for launchers that
    /// only hand the request to an already running app.
    WaitForStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub mode: LaunchMode,
}

impl LaunchCommand {
    fn detached(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            mode: LaunchMode::Detached,
        }
    }

    fn with_argv(program: &str, prefix: &[&str], target: &SpawnTarget) -> Self {
        let mut args: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
        args.extend(target.argv());
        Self::detached(program, args)
    }

    fn osascript(script: String) -> Self {
        Self::detached("osascript", vec!["-e".to_string(), script])
    }
}

pub trait Spawner {
    fn launch(&self, command: &LaunchCommand) -> io::Result<()>;
}

pub struct ProcessSpawner;

impl Spawner for ProcessSpawner {
    fn launch(&self, command: &LaunchCommand) -> io::Result<()> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match command.mode {
            LaunchMode::Detached => {
                // The child handle is dropped on purpose; it is never waited on.
                process.spawn()?;
                Ok(())
            }
            LaunchMode::WaitForStatus => {
                let status = process.status()?;
                if status.success() {
                    Ok(())
                } else {
                    Err(io::Error::other(format!(
                        "{} exited with {status}",
                        command.program
                    )))
                }
            }
        }
    }
}

pub type LaunchBuilder = fn(&SpawnTarget) -> LaunchCommand;

/// Per-terminal launch builders. `None` means the terminal has no known way
/// to be driven from outside for that surface.
#[derive(Clone, Copy, Default)]
pub struct Strategies {
    pub new_tab: Option<LaunchBuilder>,
    pub new_window: Option<LaunchBuilder>,
}

pub fn strategies(kind: TerminalKind) -> Strategies {
    match kind {
        TerminalKind::WindowsTerminal => Strategies {
            new_tab: Some(|t| LaunchCommand::with_argv("wt.exe", &["-w", "0", "new-tab"], t)),
            new_window: Some(|t| LaunchCommand::with_argv("wt.exe", &["new-window"], t)),
        },
        TerminalKind::ITerm2 => Strategies {
            new_tab: Some(|t| {
                LaunchCommand::osascript(format!(
                    "tell application \"iTerm2\"\n\ttell current window\n\t\tcreate tab with default profile command \"{}\"\n\tend tell\nend tell",
                    applescript_string(&t.command_line())
                ))
            }),
            new_window: Some(|t| {
                LaunchCommand::osascript(format!(
                    "tell application \"iTerm2\"\n\tcreate window with default profile command \"{}\"\nend tell",
                    applescript_string(&t.command_line())
                ))
            }),
        },
        TerminalKind::TerminalApp => Strategies {
            new_tab: Some(|t| {
                let cmd = applescript_string(&t.command_line());
                LaunchCommand::osascript(format!(
                    "tell application \"Terminal\"\n\tif (count of windows) = 0 then\n\t\tdo script \"{cmd}\"\n\telse\n\t\ttell application \"System Events\" to keystroke \"t\" using command down\n\t\tdo script \"{cmd}\" in front window\n\tend if\nend tell"
                ))
            }),
            new_window: Some(terminal_app_window),
        },
        TerminalKind::GnomeTerminal => Strategies {
            new_tab: Some(|t| LaunchCommand::with_argv("gnome-terminal", &["--tab", "--"], t)),
            new_window: Some(|t| LaunchCommand::with_argv("gnome-terminal", &["--"], t)),
        },
        TerminalKind::Konsole => Strategies {
            new_tab: Some(|t| LaunchCommand::with_argv("konsole", &["--new-tab", "-e"], t)),
            new_window: Some(|t| LaunchCommand::with_argv("konsole", &["-e"], t)),
        },
        TerminalKind::XfceTerminal => Strategies {
            new_tab: Some(|t| LaunchCommand::with_argv("xfce4-terminal", &["--tab", "-x"], t)),
            new_window: Some(|t| LaunchCommand::with_argv("xfce4-terminal", &["--window", "-x"], t)),
        },
        TerminalKind::Alacritty => Strategies {
            new_tab: None,
            new_window: Some(|t| LaunchCommand::with_argv("alacritty", &["-e"], t)),
        },
        TerminalKind::Tabby => Strategies {
            new_tab: None,
            new_window: Some(|t| {
                let mut cmd = LaunchCommand::with_argv("open", &["-a", "Tabby", "--args"], t);
                cmd.mode = LaunchMode::WaitForStatus;
                cmd
            }),
        },
        TerminalKind::PowerShell
        | TerminalKind::Cmd
        | TerminalKind::Generic
        | TerminalKind::Unknown => Strategies::default(),
    }
}

fn terminal_app_window(target: &SpawnTarget) -> LaunchCommand {
    LaunchCommand::osascript(format!(
        "tell application \"Terminal\"\n\tdo script \"{}\"\n\tactivate\nend tell",
        applescript_string(&target.command_line())
    ))
}

/// Ordered fallback launchers for an OS. On Linux only those found on
/// `PATH` are kept.
pub fn generic_launchers(env: &dyn Environment, target: &SpawnTarget) -> Vec<LaunchCommand> {
    match env.os() {
        OsFamily::Windows => vec![LaunchCommand::with_argv(
            "cmd",
            &["/c", "start", "", "cmd", "/k"],
            target,
        )],
        OsFamily::MacOs => vec![terminal_app_window(target)],
        OsFamily::Linux | OsFamily::Other => [
            ("gnome-terminal", "--"),
            ("x-terminal-emulator", "-e"),
            ("konsole", "-e"),
            ("xterm", "-e"),
        ]
        .into_iter()
        .filter(|(program, _)| env.has_program(program))
        .map(|(program, flag)| LaunchCommand::with_argv(program, &[flag], target))
        .collect(),
    }
}

pub struct Launcher<E = SystemEnvironment, S = ProcessSpawner> {
    env: E,
    spawner: S,
}

impl Launcher {
    pub fn system() -> Self {
        Self::new(SystemEnvironment, ProcessSpawner)
    }
}

impl<E: Environment, S: Spawner> Launcher<E, S> {
    pub fn new(env: E, spawner: S) -> Self {
        Self { env, spawner }
    }

    pub fn detect_terminal(&self) -> TerminalKind {
        detect_terminal(&self.env)
    }

    pub fn has_desktop_environment(&self) -> bool {
        has_desktop_environment(&self.env)
    }

    /// Without a desktop this is exactly [`Self::open_in_new_window`].
    pub fn open_in_new_tab(&self, target: &SpawnTarget) -> Result<()> {
        if !self.has_desktop_environment() {
            debug!("no desktop environment; opening a window instead of a tab");
            return self.open_in_new_window(target);
        }
        let kind = self.detect_terminal();
        match strategies(kind).new_tab {
            Some(build) => self.launch(&build(target)).or_else(|err| {
                warn!("{kind} tab launch failed ({err}); trying generic launchers");
                self.open_generic(target)
            }),
            None => {
                debug!("{kind} has no tab control; opening a window");
                self.open_in_new_window(target)
            }
        }
    }

    pub fn open_in_new_window(&self, target: &SpawnTarget) -> Result<()> {
        if !self.has_desktop_environment() {
            return Err(SshError::Spawn(
                "no desktop environment, cannot open a new window".to_string(),
            ));
        }
        let kind = self.detect_terminal();
        match strategies(kind).new_window {
            Some(build) => self.launch(&build(target)).or_else(|err| {
                warn!("{kind} window launch failed ({err}); trying generic launchers");
                self.open_generic(target)
            }),
            None => self.open_generic(target),
        }
    }

    fn open_generic(&self, target: &SpawnTarget) -> Result<()> {
        let candidates = generic_launchers(&self.env, target);
        if candidates.is_empty() {
            return Err(SshError::Spawn("no terminal emulator found".to_string()));
        }
        let mut last_error = None;
        for command in &candidates {
            match self.launch(command) {
                Ok(()) => return Ok(()),
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error
            .unwrap_or_else(|| SshError::Spawn("no terminal emulator found".to_string())))
    }

    fn launch(&self, command: &LaunchCommand) -> Result<()> {
        self.spawner.launch(command).map_err(|err| {
            SshError::Spawn(format!("failed to start {}: {err}", command.program))
        })?;
        info!("launched {} for a new terminal surface", command.program);
        Ok(())
    }
}

pub fn detect_terminal(env: &dyn Environment) -> TerminalKind {
    match env.os() {
        OsFamily::Windows => detect_windows(env),
        OsFamily::MacOs => detect_macos(env),
        OsFamily::Linux => detect_linux(env),
        OsFamily::Other => TerminalKind::Unknown,
    }
}

fn detect_windows(env: &dyn Environment) -> TerminalKind {
    if env.var("WT_SESSION").is_some() {
        return TerminalKind::WindowsTerminal;
    }
    if env
        .var("TERM_PROGRAM")
        .is_some_and(|p| p.eq_ignore_ascii_case("tabby"))
    {
        return TerminalKind::Tabby;
    }
    if env.var("WT_PROFILE_ID").is_some() {
        return TerminalKind::WindowsTerminal;
    }
    if env.var("PSModulePath").is_some() {
        return TerminalKind::PowerShell;
    }
    TerminalKind::Cmd
}

fn detect_macos(env: &dyn Environment) -> TerminalKind {
    match env.var("TERM_PROGRAM").as_deref() {
        Some("iTerm.app") => TerminalKind::ITerm2,
        Some("Tabby") => TerminalKind::Tabby,
        _ => TerminalKind::TerminalApp,
    }
}

fn detect_linux(env: &dyn Environment) -> TerminalKind {
    match env.var("TERM_PROGRAM").as_deref() {
        Some("gnome-terminal") => return TerminalKind::GnomeTerminal,
        Some("konsole") => return TerminalKind::Konsole,
        _ => {}
    }

    // Variables the emulators export into their child shells.
    const SESSION_MARKERS: [(&str, TerminalKind); 3] = [
        ("GNOME_TERMINAL_SCREEN", TerminalKind::GnomeTerminal),
        ("KONSOLE_VERSION", TerminalKind::Konsole),
        ("ALACRITTY_WINDOW_ID", TerminalKind::Alacritty),
    ];
    if let Some((_, kind)) = SESSION_MARKERS
        .into_iter()
        .find(|(var, _)| env.var(var).is_some())
    {
        return kind;
    }

    let term = env.var("TERM").unwrap_or_default();
    if term.contains("gnome") {
        TerminalKind::GnomeTerminal
    } else if term.contains("konsole") {
        TerminalKind::Konsole
    } else if term.contains("xfce") {
        TerminalKind::XfceTerminal
    } else if term.contains("alacritty") {
        TerminalKind::Alacritty
    } else {
        TerminalKind::Generic
    }
}

/// Windows and macOS always have one; elsewhere an X11/Wayland session
/// variable must be set.
pub fn has_desktop_environment(env: &dyn Environment) -> bool {
    match env.os() {
        OsFamily::Windows | OsFamily::MacOs => true,
        OsFamily::Linux | OsFamily::Other => DESKTOP_VARS.iter().any(|v| env.var(v).is_some()),
    }
}

pub fn current_executable() -> Result<String> {
    let path = std::env::current_exe()
        .map_err(|err| SshError::Spawn(format!("cannot locate executable: {err}")))?;
    let path: PathBuf = path.canonicalize().unwrap_or(path);
    Ok(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    struct FakeEnv {
        os: OsFamily,
        vars: HashMap<String, String>,
        programs: HashSet<String>,
    }

    impl FakeEnv {
        fn new(os: OsFamily) -> Self {
            Self {
                os,
                vars: HashMap::new(),
                programs: HashSet::new(),
            }
        }

        fn var(mut self, key: &str, value: &str) -> Self {
            self.vars.insert(key.to_string(), value.to_string());
            self
        }

        fn program(mut self, name: &str) -> Self {
            self.programs.insert(name.to_string());
            self
        }
    }

    impl Environment for FakeEnv {
        fn os(&self) -> OsFamily {
            self.os
        }

        fn var(&self, key: &str) -> Option<String> {
            self.vars.get(key).filter(|v| !v.is_empty()).cloned()
        }

        fn has_program(&self, program: &str) -> bool {
            self.programs.contains(program)
        }
    }

    #[derive(Default)]
    struct RecordingSpawner {
        launched: RefCell<Vec<LaunchCommand>>,
        failing: HashSet<String>,
    }

    impl RecordingSpawner {
        fn failing(programs: &[&str]) -> Self {
            Self {
                launched: RefCell::default(),
                failing: programs.iter().map(|p| p.to_string()).collect(),
            }
        }

        fn programs(&self) -> Vec<String> {
            self.launched
                .borrow()
                .iter()
                .map(|c| c.program.clone())
                .collect()
        }
    }

    impl Spawner for RecordingSpawner {
        fn launch(&self, command: &LaunchCommand) -> io::Result<()> {
            self.launched.borrow_mut().push(command.clone());
            if self.failing.contains(&command.program) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "not installed"));
            }
            Ok(())
        }
    }

    fn target() -> SpawnTarget {
        SpawnTarget::reconnect("/usr/bin/sshmate", "db1")
    }

    #[test]
    fn reconnect_target_carries_no_new_tab_flag() {
        assert_eq!(
            target().args,
            vec!["connect", "db1", "--no-new-tab"]
        );
        assert_eq!(
            target().command_line(),
            "/usr/bin/sshmate connect db1 --no-new-tab"
        );
    }

    #[test]
    fn command_line_quotes_words_with_spaces() {
        let t = SpawnTarget::reconnect("/Applications/My Tools/sshmate", "it's");
        assert_eq!(
            t.command_line(),
            r"'/Applications/My Tools/sshmate' connect 'it'\''s' --no-new-tab"
        );
    }

    #[test]
    fn detects_windows_terminals() {
        let wt = FakeEnv::new(OsFamily::Windows).var("WT_SESSION", "abc");
        assert_eq!(detect_terminal(&wt), TerminalKind::WindowsTerminal);

        let tabby = FakeEnv::new(OsFamily::Windows).var("TERM_PROGRAM", "tabby");
        assert_eq!(detect_terminal(&tabby), TerminalKind::Tabby);

        let profile_only = FakeEnv::new(OsFamily::Windows).var("WT_PROFILE_ID", "{x}");
        assert_eq!(detect_terminal(&profile_only), TerminalKind::WindowsTerminal);

        let ps = FakeEnv::new(OsFamily::Windows).var("PSModulePath", "C:\\ps");
        assert_eq!(detect_terminal(&ps), TerminalKind::PowerShell);

        assert_eq!(
            detect_terminal(&FakeEnv::new(OsFamily::Windows)),
            TerminalKind::Cmd
        );
    }

    #[test]
    fn detects_macos_terminals() {
        let iterm = FakeEnv::new(OsFamily::MacOs).var("TERM_PROGRAM", "iTerm.app");
        assert_eq!(detect_terminal(&iterm), TerminalKind::ITerm2);
        let apple = FakeEnv::new(OsFamily::MacOs).var("TERM_PROGRAM", "Apple_Terminal");
        assert_eq!(detect_terminal(&apple), TerminalKind::TerminalApp);
        assert_eq!(
            detect_terminal(&FakeEnv::new(OsFamily::MacOs)),
            TerminalKind::TerminalApp
        );
    }

    #[test]
    fn detects_linux_terminals() {
        let cases = [
            ("TERM_PROGRAM", "gnome-terminal", TerminalKind::GnomeTerminal),
            ("TERM_PROGRAM", "konsole", TerminalKind::Konsole),
            ("KONSOLE_VERSION", "230804", TerminalKind::Konsole),
            ("TERM", "xterm-gnome", TerminalKind::GnomeTerminal),
            ("TERM", "xfce", TerminalKind::XfceTerminal),
            ("TERM", "alacritty", TerminalKind::Alacritty),
            ("TERM", "xterm-256color", TerminalKind::Generic),
        ];
        for (key, value, expected) in cases {
            let env = FakeEnv::new(OsFamily::Linux).var(key, value);
            assert_eq!(detect_terminal(&env), expected, "{key}={value}");
        }
        assert_eq!(
            detect_terminal(&FakeEnv::new(OsFamily::Other)),
            TerminalKind::Unknown
        );
    }

    #[test]
    fn desktop_is_assumed_on_windows_and_macos_only() {
        assert!(has_desktop_environment(&FakeEnv::new(OsFamily::Windows)));
        assert!(has_desktop_environment(&FakeEnv::new(OsFamily::MacOs)));
        assert!(!has_desktop_environment(&FakeEnv::new(OsFamily::Linux)));
        for var in DESKTOP_VARS {
            let env = FakeEnv::new(OsFamily::Linux).var(var, "1");
            assert!(has_desktop_environment(&env), "{var}");
        }
    }

    #[test]
    fn gnome_tab_uses_tab_flag() {
        let env = FakeEnv::new(OsFamily::Linux)
            .var("DISPLAY", ":0")
            .var("TERM_PROGRAM", "gnome-terminal");
        let launcher = Launcher::new(env, RecordingSpawner::default());
        launcher.open_in_new_tab(&target()).unwrap();

        let launched = launcher.spawner.launched.borrow();
        assert_eq!(
            launched[0],
            LaunchCommand::detached(
                "gnome-terminal",
                vec![
                    "--tab".into(),
                    "--".into(),
                    "/usr/bin/sshmate".into(),
                    "connect".into(),
                    "db1".into(),
                    "--no-new-tab".into(),
                ]
            )
        );
    }

    #[test]
    fn windows_terminal_tab_and_window() {
        let env = FakeEnv::new(OsFamily::Windows).var("WT_SESSION", "1");
        let launcher = Launcher::new(env, RecordingSpawner::default());
        launcher.open_in_new_tab(&target()).unwrap();
        launcher.open_in_new_window(&target()).unwrap();

        let launched = launcher.spawner.launched.borrow();
        assert_eq!(launched[0].args[..3].to_vec(), vec!["-w", "0", "new-tab"]);
        assert_eq!(launched[1].args[0], "new-window");
        assert!(launched.iter().all(|c| c.program == "wt.exe"));
    }

    #[test]
    fn iterm_script_escapes_quotes() {
        let env = FakeEnv::new(OsFamily::MacOs).var("TERM_PROGRAM", "iTerm.app");
        let launcher = Launcher::new(env, RecordingSpawner::default());
        let t = SpawnTarget::new("/bin/sshmate", vec!["connect".into(), "a\"b".into()]);
        launcher.open_in_new_tab(&t).unwrap();

        let launched = launcher.spawner.launched.borrow();
        assert_eq!(launched[0].program, "osascript");
        assert!(launched[0].args[1].contains("create tab with default profile"));
        assert!(launched[0].args[1].contains(r#"'a\"b'"#));
    }

    #[test]
    fn tab_without_desktop_matches_window_outcome() {
        let tab = Launcher::new(FakeEnv::new(OsFamily::Linux), RecordingSpawner::default());
        let window = Launcher::new(FakeEnv::new(OsFamily::Linux), RecordingSpawner::default());

        let tab_err = tab.open_in_new_tab(&target()).unwrap_err();
        let window_err = window.open_in_new_window(&target()).unwrap_err();
        assert_eq!(tab_err.to_string(), window_err.to_string());
        assert!(tab.spawner.launched.borrow().is_empty());
    }

    #[test]
    fn terminal_without_tab_control_opens_a_window() {
        let env = FakeEnv::new(OsFamily::Linux)
            .var("WAYLAND_DISPLAY", "wayland-0")
            .var("TERM", "alacritty");
        let launcher = Launcher::new(env, RecordingSpawner::default());
        launcher.open_in_new_tab(&target()).unwrap();
        assert_eq!(launcher.spawner.programs(), vec!["alacritty"]);
        assert_eq!(launcher.spawner.launched.borrow()[0].args[0], "-e");
    }

    #[test]
    fn failed_strategy_falls_back_to_generic_launchers() {
        let env = FakeEnv::new(OsFamily::Linux)
            .var("DISPLAY", ":0")
            .var("TERM_PROGRAM", "konsole")
            .program("x-terminal-emulator")
            .program("xterm");
        let launcher = Launcher::new(
            env,
            RecordingSpawner::failing(&["konsole", "x-terminal-emulator"]),
        );
        launcher.open_in_new_tab(&target()).unwrap();
        assert_eq!(
            launcher.spawner.programs(),
            vec!["konsole", "x-terminal-emulator", "xterm"]
        );
    }

    #[test]
    fn generic_without_any_terminal_is_a_spawn_error() {
        let env = FakeEnv::new(OsFamily::Linux).var("DISPLAY", ":0");
        let launcher = Launcher::new(env, RecordingSpawner::default());
        let err = launcher.open_in_new_window(&target()).unwrap_err();
        assert!(matches!(err, SshError::Spawn(_)));
    }

    #[test]
    fn tabby_window_waits_and_falls_back() {
        let env = FakeEnv::new(OsFamily::MacOs).var("TERM_PROGRAM", "Tabby");
        let launcher = Launcher::new(env, RecordingSpawner::failing(&["open"]));
        launcher.open_in_new_tab(&target()).unwrap();

        let launched = launcher.spawner.launched.borrow();
        assert_eq!(launched[0].mode, LaunchMode::WaitForStatus);
        assert_eq!(launched[0].args[..3].to_vec(), vec!["-a", "Tabby", "--args"]);
        assert_eq!(launched[1].program, "osascript");
        assert!(launched[1].args[1].contains("tell application \"Terminal\""));
    }

    #[test]
    fn windows_generic_passes_empty_title_to_start() {
        let env = FakeEnv::new(OsFamily::Windows);
        let launchers = generic_launchers(&env, &target());
        assert_eq!(launchers.len(), 1);
        assert_eq!(launchers[0].program, "cmd");
        assert_eq!(launchers[0].args[..5].to_vec(), vec!["/c", "start", "", "cmd", "/k"]);
    }
}
