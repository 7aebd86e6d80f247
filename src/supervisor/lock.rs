//! 실행 락: 두 런처가 동시에 서버를 띄우는 경쟁을 막습니다.
//!
//! 락 파일은 지우지 않고 재사용합니다. 배타성은 파일 내용이 아니라
//! OS advisory lock(`flock`)이 보장하며, 프로세스가 죽으면 커널이 풀어줍니다.
//! 파일에 적힌 PID 는 진단(status, 에러 메시지)용입니다.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::supervisor::error::{LauncherError, Result};

#[derive(Debug)]
pub struct LaunchLock {
    path: PathBuf,
    // 파일이 열려 있는 동안 락이 유지됨
    file: File,
}

impl LaunchLock {
    /// 락 획득. 다른 런처가 쥐고 있으면 `LaunchInProgress`.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = open_lock_file(path)?;
        if !try_lock_exclusive(&file)? {
            let owner = read_owner(path).unwrap_or(0);
            return Err(LauncherError::LaunchInProgress(owner));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        tracing::debug!("Acquired launch lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LaunchLock {
    fn drop(&mut self) {
        // 아직 락을 쥔 상태에서 PID 만 비움. 락 자체는 파일이 닫힐 때 해제
        if let Err(e) = self.file.set_len(0) {
            tracing::warn!("Failed to clear launch lock {}: {}", self.path.display(), e);
        }
    }
}

fn open_lock_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

/// `LOCK_EX | LOCK_NB`. 이미 다른 fd 가 쥐고 있으면 `Ok(false)`.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool> {
    use nix::errno::Errno;
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(LauncherError::Io(std::io::Error::from(e))),
    }
}

// advisory lock 이 없는 플랫폼에서는 락 없이 진행
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

/// 락 파일에 기록된 PID
pub fn read_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// 지금 락을 쥐고 있는 런처 (status 출력용).
/// 잠시 락을 시도해 보고, 잡히면 아무도 쥐고 있지 않은 것입니다.
pub fn live_owner(path: &Path) -> Option<u32> {
    let file = OpenOptions::new().read(true).write(true).open(path).ok()?;
    match try_lock_exclusive(&file) {
        Ok(true) | Err(_) => None,
        Ok(false) => read_owner(path),
    }
}
