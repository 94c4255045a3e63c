use std::io::{self, Read};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub const FALLBACK: TerminalSize = TerminalSize { cols: 80, rows: 24 };
}

pub trait ConsolePlatform: Send + Sync {
    /// Reads one chunk of local input with platform noise removed. Returns
    /// `Ok(0)` only at end of input.
    fn read_filtered_input(&self, reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize>;

    fn query_terminal_size(&self) -> Option<TerminalSize>;
}

/// Size to request for a PTY. Each unknown or zero dimension falls back to
/// 80x24 independently.
pub fn pty_size(console: &dyn ConsolePlatform) -> TerminalSize {
    let (cols, rows) = console
        .query_terminal_size()
        .map(|s| (s.cols, s.rows))
        .unwrap_or((0, 0));
    TerminalSize {
        cols: if cols == 0 { TerminalSize::FALLBACK.cols } else { cols },
        rows: if rows == 0 { TerminalSize::FALLBACK.rows } else { rows },
    }
}

pub fn strip_carriage_returns(buf: &mut [u8], len: usize) -> usize {
    let mut kept = 0;
    for i in 0..len {
        if buf[i] != b'\r' {
            buf[kept] = buf[i];
            kept += 1;
        }
    }
    kept
}

/// Windows consoles send CRLF for Enter; the remote PTY would see two line
/// breaks, so carriage returns are dropped.
pub struct WindowsConsole;

impl ConsolePlatform for WindowsConsole {
    fn read_filtered_input(&self, reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = reader.read(buf)?;
            if n == 0 {
                return Ok(0);
            }
            let kept = strip_carriage_returns(buf, n);
            if kept > 0 {
                return Ok(kept);
            }
        }
    }

    fn query_terminal_size(&self) -> Option<TerminalSize> {
        windows_console_size()
    }
}

#[cfg(windows)]
fn windows_console_size() -> Option<TerminalSize> {
    use windows_sys::Win32::System::Console::{
        GetConsoleScreenBufferInfo, GetStdHandle, CONSOLE_SCREEN_BUFFER_INFO, STD_OUTPUT_HANDLE,
    };

    // SAFETY: GetStdHandle has no preconditions and the info struct is plain
    // data that the call fully initialises on success.
    let info = unsafe {
        let handle = GetStdHandle(STD_OUTPUT_HANDLE);
        let mut info: CONSOLE_SCREEN_BUFFER_INFO = std::mem::zeroed();
        if GetConsoleScreenBufferInfo(handle, &mut info) == 0 {
            return None;
        }
        info
    };
    let cols = info.srWindow.Right - info.srWindow.Left + 1;
    let rows = info.srWindow.Bottom - info.srWindow.Top + 1;
    Some(TerminalSize {
        cols: u16::try_from(cols).ok()?,
        rows: u16::try_from(rows).ok()?,
    })
}

#[cfg(not(windows))]
fn windows_console_size() -> Option<TerminalSize> {
    tty_size()
}

pub struct UnixTty;

impl ConsolePlatform for UnixTty {
    fn read_filtered_input(&self, reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
        reader.read(buf)
    }

    fn query_terminal_size(&self) -> Option<TerminalSize> {
        tty_size()
    }
}

fn tty_size() -> Option<TerminalSize> {
    crossterm::terminal::size()
        .ok()
        .map(|(cols, rows)| TerminalSize { cols, rows })
}

#[cfg(windows)]
static CURRENT: WindowsConsole = WindowsConsole;
#[cfg(not(windows))]
static CURRENT: UnixTty = UnixTty;

pub fn current() -> &'static dyn ConsolePlatform {
    &CURRENT
}
