use std::path::PathBuf;

pub const CONTROL_TCP_PORT: u16 = 9877;

/// One mpv process per channel, so every channel gets its own IPC endpoint.
#[cfg(unix)]
pub fn mpv_socket_name(channel: usize) -> String {
    format!(
        "{}/radio-mixer-ch{}.sock",
        std::env::temp_dir().display(),
        channel
    )
}

#[cfg(windows)]
pub fn mpv_socket_name(channel: usize) -> String {
    format!("radio-mixer-ch{}", channel)
}

#[cfg(unix)]
pub fn mpv_socket_arg(channel: usize) -> String {
    format!("--input-ipc-server={}", mpv_socket_name(channel))
}

#[cfg(windows)]
pub fn mpv_socket_arg(channel: usize) -> String {
    format!("--input-ipc-server=\\\\.\\pipe\\{}", mpv_socket_name(channel))
}

pub fn data_dir() -> PathBuf {
    // XDG layout on macOS too, not Application Support
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("radio-mixer")
    }
    #[cfg(windows)]
    {
        if let Some(dir) = portable_dir("data") {
            return dir;
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-mixer")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(exe_dir) = exe_path.parent() {
                if exe_dir.join("config.toml").exists() {
                    return exe_dir.to_path_buf();
                }
            }
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-mixer")
    }

    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("radio-mixer")
    }
}

/// A directory named `name` beside the running executable, if present.
pub fn portable_dir(name: &str) -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let dir = exe_path.parent()?.join(name);
    dir.exists().then_some(dir)
}

#[cfg(unix)]
pub fn mpv_binary_name() -> &'static str {
    "mpv"
}

#[cfg(windows)]
pub fn mpv_binary_name() -> &'static str {
    "mpv.exe"
}

/// Find the mpv binary.
///
/// Order: `MPV_PATH`, beside the current executable, then `PATH`.
pub fn find_mpv_binary() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("MPV_PATH") {
        let path = PathBuf::from(p);
        if path.exists() {
            return Some(path);
        }
    }

    let exe_name = mpv_binary_name();

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            let local_mpv = dir.join(exe_name);
            if local_mpv.exists() {
                return Some(local_mpv);
            }
        }
    }

    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let separator = ":";
    #[cfg(windows)]
    let separator = ";";

    path.split(separator)
        .map(|dir| PathBuf::from(dir).join(exe_name))
        .find(|p| p.exists())
}
