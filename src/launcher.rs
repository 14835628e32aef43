use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::Context;
use log::{info, warn};

use crate::error::LaunchError;

/// Process and privilege primitives the launcher relies on.
pub trait Platform {
    fn is_elevated(&self) -> bool;

    /// Starts `path` without keeping a handle to it. Returns the child's pid.
    fn spawn_detached(&self, path: &Path) -> io::Result<u32>;

    /// Asks the OS to start `path` with elevated rights. Success only means
    /// the request was issued, not that the user approved it.
    fn request_elevation(&self, path: &Path) -> Result<(), String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started { pid: u32 },
    ElevationRequested,
}

pub struct Launcher<P = SystemPlatform> {
    platform: P,
}

impl Launcher<SystemPlatform> {
    pub fn new() -> Self {
        Self::with_platform(SystemPlatform)
    }
}

impl Default for Launcher<SystemPlatform> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Platform> Launcher<P> {
    pub fn with_platform(platform: P) -> Self {
        Self { platform }
    }

    /// Starts the game at `path`, going through an elevation request when the
    /// launcher itself is not elevated. Nothing is retried.
    pub fn launch(&self, path: impl AsRef<Path>) -> Result<LaunchOutcome, LaunchError> {
        let path = path.as_ref();
        ensure_runnable(path)?;

        if self.platform.is_elevated() {
            let pid = self
                .platform
                .spawn_detached(path)
                .map_err(|source| LaunchError::Spawn {
                    path: path.to_path_buf(),
                    source,
                })?;
            info!("started {} (pid {pid})", path.display());
            return Ok(LaunchOutcome::Started { pid });
        }

        self.platform
            .request_elevation(path)
            .map_err(|reason| LaunchError::Elevation {
                path: path.to_path_buf(),
                reason,
            })?;
        info!("requested elevated launch of {}", path.display());
        Ok(LaunchOutcome::ElevationRequested)
    }
}

fn ensure_runnable(path: &Path) -> Result<(), LaunchError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) => {
            warn!("cannot stat {}: {err}", path.display());
            return Err(LaunchError::NotFound(path.to_path_buf()));
        }
    };
    if !meta.is_file() || !is_executable(path, &meta) {
        return Err(LaunchError::NotExecutable(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(_path: &Path, meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(windows)]
fn is_executable(path: &Path, _meta: &fs::Metadata) -> bool {
    path.extension()
        .map(|ext| {
            ["exe", "com", "bat", "cmd"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

#[cfg(not(any(unix, windows)))]
fn is_executable(_path: &Path, _meta: &fs::Metadata) -> bool {
    true
}

/// The real OS.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPlatform;

impl Platform for SystemPlatform {
    #[cfg(windows)]
    fn is_elevated(&self) -> bool {
        win_shell::is_user_an_admin()
    }

    // Elevation is only wired up on Windows; elsewhere launch directly.
    #[cfg(not(windows))]
    fn is_elevated(&self) -> bool {
        true
    }

    fn spawn_detached(&self, path: &Path) -> io::Result<u32> {
        let mut command = Command::new(path);
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            use windows_sys::Win32::System::Threading::{
                CREATE_NEW_PROCESS_GROUP, DETACHED_PROCESS,
            };
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        // The child is intentionally not waited on.
        let child = command.spawn()?;
        Ok(child.id())
    }

    #[cfg(windows)]
    fn request_elevation(&self, path: &Path) -> Result<(), String> {
        win_shell::shell_execute_runas(path)
    }

    #[cfg(not(windows))]
    fn request_elevation(&self, _path: &Path) -> Result<(), String> {
        Err("elevated launch is only supported on Windows".to_string())
    }
}

#[cfg(windows)]
mod win_shell {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use windows_sys::Win32::UI::Shell::{IsUserAnAdmin, ShellExecuteW};
    use windows_sys::Win32::UI::WindowsAndMessaging::SW_SHOWNORMAL;

    fn to_wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    pub fn is_user_an_admin() -> bool {
        unsafe { IsUserAnAdmin() != 0 }
    }

    /// `ShellExecuteW` with the `runas` verb. Values of 32 or below are errors.
    pub fn shell_execute_runas(path: &Path) -> Result<(), String> {
        let verb = to_wide(OsStr::new("runas"));
        let file = to_wide(path.as_os_str());
        let dir = path.parent().map(|dir| to_wide(dir.as_os_str()));
        let dir_ptr = dir.as_ref().map_or(std::ptr::null(), |dir| dir.as_ptr());

        let result = unsafe {
            ShellExecuteW(
                std::ptr::null_mut(),
                verb.as_ptr(),
                file.as_ptr(),
                std::ptr::null(),
                dir_ptr,
                SW_SHOWNORMAL,
            )
        } as isize;

        if result <= 32 {
            Err(format!("ShellExecuteW(runas) failed with code {result}"))
        } else {
            Ok(())
        }
    }
}

/// Opens the community help page in the default browser.
pub fn open_help_page(url: &str) -> anyhow::Result<()> {
    open::that(url).with_context(|| format!("failed to open {url}"))?;
    info!("opened help page {url}");
    Ok(())
}
