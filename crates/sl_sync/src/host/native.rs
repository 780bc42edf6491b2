//! 本地文件系统宿主
//!
//! "选择器" 取用预先选定的路径 (命令行参数或交互命令)。本地文件系统无法向用户申请权限，
//! 所以 `request_permission` 与 `query_permission` 结果相同。
//! 写入先落到同目录的临时文件并刷盘，再整体替换目标，中途失败不会留下半截工作簿。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{CapabilityToken, FileHost, FileStamp, HostCapabilities, HostError, PermissionMode, PermissionState};

const HOST_NAME: &str = "native";

/// 本地文件系统宿主
#[derive(Debug, Default)]
pub struct NativeFileHost {
    /// 等待被选择器取走的路径
    pending: Mutex<Option<PathBuf>>,
}

impl NativeFileHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预先选定下一次 `pick_file` 返回的路径
    pub fn select(&self, path: impl Into<PathBuf>) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = Some(path.into());
    }

    fn path_of(token: &CapabilityToken) -> Result<PathBuf, HostError> {
        if token.host != HOST_NAME {
            return Err(HostError::Unsupported(format!("token issued by host '{}'", token.host)));
        }
        Ok(PathBuf::from(&token.locator))
    }
}

#[async_trait]
impl FileHost for NativeFileHost {
    fn name(&self) -> &'static str {
        HOST_NAME
    }

    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities::FULL
    }

    async fn pick_file(&self, extensions: &[String]) -> Result<CapabilityToken, HostError> {
        let path = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.take().ok_or(HostError::Cancelled)?
        };

        let accepted = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if !accepted {
            return Err(HostError::Unsupported(format!("{} is not a spreadsheet file", path.display())));
        }

        let path = tokio::fs::canonicalize(&path).await.map_err(|e| classify(&path, e))?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(CapabilityToken::new(HOST_NAME, path.to_string_lossy(), display_name))
    }

    async fn query_permission(&self, token: &CapabilityToken, mode: PermissionMode) -> Result<PermissionState, HostError> {
        let path = Self::path_of(token)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => return Ok(PermissionState::Denied),
            Err(e) => return Err(classify(&path, e)),
        };
        if mode == PermissionMode::ReadWrite && meta.permissions().readonly() {
            return Ok(PermissionState::Denied);
        }
        Ok(PermissionState::Granted)
    }

    async fn request_permission(&self, token: &CapabilityToken, mode: PermissionMode) -> Result<PermissionState, HostError> {
        self.query_permission(token, mode).await
    }

    async fn read_metadata(&self, token: &CapabilityToken) -> Result<FileStamp, HostError> {
        let path = Self::path_of(token)?;
        let meta = tokio::fs::metadata(&path).await.map_err(|e| classify(&path, e))?;
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(FileStamp { modified_ms, len: meta.len() })
    }

    async fn read(&self, token: &CapabilityToken) -> Result<Vec<u8>, HostError> {
        let path = Self::path_of(token)?;
        tokio::fs::read(&path).await.map_err(|e| classify(&path, e))
    }

    async fn write(&self, token: &CapabilityToken, bytes: &[u8]) -> Result<(), HostError> {
        let path = Self::path_of(token)?;
        // 以写方式打开目标但不截断，目标不可写时在这里报错且内容保持不动
        let permissions = {
            let target = tokio::fs::OpenOptions::new()
                .write(true)
                .open(&path)
                .await
                .map_err(|e| classify(&path, e))?;
            target.metadata().await.map_err(|e| classify(&path, e))?.permissions()
        };

        let tmp = sibling_tmp(&path);
        let result = replace_with(&tmp, &path, bytes, permissions).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        result
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4().simple()))
}

async fn replace_with(tmp: &Path, path: &Path, bytes: &[u8], permissions: std::fs::Permissions) -> Result<(), HostError> {
    let mut file = tokio::fs::File::create(tmp).await.map_err(|e| classify(path, e))?;
    file.write_all(bytes).await.map_err(|e| classify(path, e))?;
    file.sync_all().await.map_err(|e| classify(path, e))?;
    drop(file);
    tokio::fs::set_permissions(tmp, permissions).await.map_err(|e| classify(path, e))?;
    tokio::fs::rename(tmp, path).await.map_err(|e| classify(path, e))
}

/// 把 I/O 错误归类；被其他程序占用的文件归为 `Locked`
fn classify(path: &Path, err: std::io::Error) -> HostError {
    if is_lock_error(&err) {
        return HostError::Locked;
    }
    match err.kind() {
        ErrorKind::NotFound => HostError::NotFound(path.display().to_string()),
        ErrorKind::PermissionDenied => HostError::PermissionDenied(path.display().to_string()),
        _ => HostError::Io(format!("{}: {err}", path.display())),
    }
}

#[cfg(windows)]
fn is_lock_error(err: &std::io::Error) -> bool {
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
    matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(not(windows))]
fn is_lock_error(err: &std::io::Error) -> bool {
    // EBUSY / ETXTBSY
    err.kind() == ErrorKind::WouldBlock || matches!(err.raw_os_error(), Some(16) | Some(26))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("sl_native_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[tokio::test]
    async fn test_pick_requires_selection_and_extension() {
        let host = NativeFileHost::new();
        let exts = vec!["xlsx".to_string()];
        assert_eq!(host.pick_file(&exts).await.unwrap_err(), HostError::Cancelled);

        let txt = scratch("notes.txt");
        std::fs::write(&txt, b"x").unwrap();
        host.select(&txt);
        assert!(matches!(host.pick_file(&exts).await, Err(HostError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_write_then_metadata_changes() {
        let path = scratch("plan.xlsx");
        std::fs::write(&path, b"one").unwrap();
        let host = NativeFileHost::new();
        host.select(&path);
        let token = host.pick_file(&["xlsx".to_string()]).await.unwrap();
        assert_eq!(token.display_name, "plan.xlsx");

        assert_eq!(
            host.query_permission(&token, PermissionMode::ReadWrite).await.unwrap(),
            PermissionState::Granted
        );
        host.write(&token, b"three").await.unwrap();
        assert_eq!(host.read(&token).await.unwrap(), b"three".to_vec());
        assert_eq!(host.read_metadata(&token).await.unwrap().len, 5);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let path = scratch("gone.xlsx");
        let token = CapabilityToken::new(HOST_NAME, path.to_string_lossy(), "gone.xlsx");
        let host = NativeFileHost::new();
        assert!(matches!(host.read_metadata(&token).await, Err(HostError::NotFound(_))));

        let foreign = CapabilityToken::new("browser", "x", "x");
        assert!(matches!(host.read(&foreign).await, Err(HostError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_write_replaces_whole_file_without_leftovers() {
        let path = scratch("cuadrante.xlsx");
        std::fs::write(&path, b"a much longer original payload").unwrap();
        let token = CapabilityToken::new(HOST_NAME, path.to_string_lossy(), "cuadrante.xlsx");
        let host = NativeFileHost::new();

        host.write(&token, b"short").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short".to_vec());

        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["cuadrante.xlsx".to_string()]);
    }

    #[tokio::test]
    async fn test_write_to_missing_file_does_not_create_it() {
        let path = scratch("borrado.xlsx");
        let token = CapabilityToken::new(HOST_NAME, path.to_string_lossy(), "borrado.xlsx");
        let host = NativeFileHost::new();

        assert!(matches!(host.write(&token, b"data").await, Err(HostError::NotFound(_))));
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 0);
    }
}
