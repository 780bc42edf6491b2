//! 内存宿主
//!
//! 文件保存在内存中，支持注入锁冲突、权限拒绝、读取失败与写入延迟，并记录每一次写入尝试。
//! 用于测试与无外部文件的演示运行。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CapabilityToken, FileHost, FileStamp, HostCapabilities, HostError, PermissionMode, PermissionState};

const HOST_NAME: &str = "memory";

#[derive(Debug)]
struct MemoryState {
    files: HashMap<String, (Vec<u8>, FileStamp)>,
    /// 单调递增的 "修改时间"
    clock: i64,
    next_pick: Option<String>,
    query_result: PermissionState,
    request_result: PermissionState,
    permission_requests: u32,
    locked_writes: u32,
    metadata_failures: u32,
    read_failures: u32,
    read_error: Option<HostError>,
    write_latency: Duration,
    write_attempts: u64,
    writes_in_flight: u32,
    max_writes_in_flight: u32,
}

/// 内存宿主
#[derive(Debug)]
pub struct MemoryFileHost {
    state: Mutex<MemoryState>,
    capabilities: HostCapabilities,
}

impl Default for MemoryFileHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileHost {
    pub fn new() -> Self {
        Self::with_capabilities(HostCapabilities::FULL)
    }

    pub fn with_capabilities(capabilities: HostCapabilities) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                files: HashMap::new(),
                clock: 0,
                next_pick: None,
                query_result: PermissionState::Granted,
                request_result: PermissionState::Granted,
                permission_requests: 0,
                locked_writes: 0,
                metadata_failures: 0,
                read_failures: 0,
                read_error: None,
                write_latency: Duration::ZERO,
                write_attempts: 0,
                writes_in_flight: 0,
                max_writes_in_flight: 0,
            }),
            capabilities,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 模拟外部程序写入文件
    pub fn put_file(&self, name: &str, bytes: Vec<u8>) {
        let mut state = self.lock();
        state.clock += 1;
        let stamp = FileStamp { modified_ms: state.clock, len: bytes.len() as u64 };
        state.files.insert(name.to_string(), (bytes, stamp));
    }

    /// 模拟外部程序删除文件
    pub fn remove_file(&self, name: &str) {
        self.lock().files.remove(name);
    }

    pub fn file_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.lock().files.get(name).map(|(b, _)| b.clone())
    }

    /// 下一次 `pick_file` 返回的文件；为空表示用户取消
    pub fn select(&self, name: Option<&str>) {
        self.lock().next_pick = name.map(str::to_string);
    }

    /// 设置权限查询与申请的结果
    pub fn set_permission(&self, query: PermissionState, request: PermissionState) {
        let mut state = self.lock();
        state.query_result = query;
        state.request_result = request;
    }

    /// 接下来 `n` 次写入报告文件被锁 (`u32::MAX` 表示一直被锁)
    pub fn lock_writes(&self, n: u32) {
        self.lock().locked_writes = n;
    }

    /// 接下来 `n` 次元数据读取失败
    pub fn fail_metadata(&self, n: u32) {
        self.lock().metadata_failures = n;
    }

    /// 接下来 `n` 次内容读取以 `err` 失败
    pub fn fail_reads(&self, n: u32, err: HostError) {
        let mut state = self.lock();
        state.read_failures = n;
        state.read_error = Some(err);
    }

    pub fn set_write_latency(&self, latency: Duration) {
        self.lock().write_latency = latency;
    }

    pub fn write_attempts(&self) -> u64 {
        self.lock().write_attempts
    }

    pub fn max_concurrent_writes(&self) -> u32 {
        self.lock().max_writes_in_flight
    }

    pub fn permission_requests(&self) -> u32 {
        self.lock().permission_requests
    }

    fn check_token(token: &CapabilityToken) -> Result<(), HostError> {
        if token.host == HOST_NAME {
            Ok(())
        } else {
            Err(HostError::Unsupported(format!("token issued by host '{}'", token.host)))
        }
    }
}

#[async_trait]
impl FileHost for MemoryFileHost {
    fn name(&self) -> &'static str {
        HOST_NAME
    }

    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    async fn pick_file(&self, extensions: &[String]) -> Result<CapabilityToken, HostError> {
        let name = self.lock().next_pick.take().ok_or(HostError::Cancelled)?;
        let accepted = name
            .rsplit_once('.')
            .map(|(_, ext)| extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
            .unwrap_or(false);
        if !accepted {
            return Err(HostError::Unsupported(format!("{name} is not a spreadsheet file")));
        }
        if !self.lock().files.contains_key(&name) {
            return Err(HostError::NotFound(name));
        }
        Ok(CapabilityToken::new(HOST_NAME, name.clone(), name))
    }

    async fn query_permission(&self, token: &CapabilityToken, _mode: PermissionMode) -> Result<PermissionState, HostError> {
        Self::check_token(token)?;
        Ok(self.lock().query_result)
    }

    async fn request_permission(&self, token: &CapabilityToken, _mode: PermissionMode) -> Result<PermissionState, HostError> {
        Self::check_token(token)?;
        let mut state = self.lock();
        state.permission_requests += 1;
        let result = state.request_result;
        if result == PermissionState::Granted {
            state.query_result = PermissionState::Granted;
        }
        Ok(result)
    }

    async fn read_metadata(&self, token: &CapabilityToken) -> Result<FileStamp, HostError> {
        Self::check_token(token)?;
        let mut state = self.lock();
        if state.metadata_failures > 0 {
            state.metadata_failures -= 1;
            return Err(HostError::PermissionDenied(token.locator.clone()));
        }
        state
            .files
            .get(&token.locator)
            .map(|(_, stamp)| *stamp)
            .ok_or_else(|| HostError::NotFound(token.locator.clone()))
    }

    async fn read(&self, token: &CapabilityToken) -> Result<Vec<u8>, HostError> {
        Self::check_token(token)?;
        let mut state = self.lock();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            if let Some(err) = state.read_error.clone() {
                return Err(err);
            }
        }
        state
            .files
            .get(&token.locator)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| HostError::NotFound(token.locator.clone()))
    }

    async fn write(&self, token: &CapabilityToken, bytes: &[u8]) -> Result<(), HostError> {
        Self::check_token(token)?;
        let latency = {
            let mut state = self.lock();
            state.write_attempts += 1;
            state.writes_in_flight += 1;
            state.max_writes_in_flight = state.max_writes_in_flight.max(state.writes_in_flight);
            state.write_latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        state.writes_in_flight -= 1;
        if state.locked_writes > 0 {
            if state.locked_writes != u32::MAX {
                state.locked_writes -= 1;
            }
            return Err(HostError::Locked);
        }
        if !state.files.contains_key(&token.locator) {
            return Err(HostError::NotFound(token.locator.clone()));
        }
        state.clock += 1;
        let stamp = FileStamp { modified_ms: state.clock, len: bytes.len() as u64 };
        state.files.insert(token.locator.clone(), (bytes.to_vec(), stamp));
        Ok(())
    }
}
