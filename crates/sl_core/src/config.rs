//! 引擎配置
//!
//! 先取默认值，再叠加可选的 JSON 配置文件，最后由 `SHEETLINK_*` 环境变量覆盖。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SheetLinkError};

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 看门狗轮询间隔
    pub poll_interval_ms: u64,
    /// 自写抑制窗口
    pub suppress_window_ms: u64,
    /// 写入成功后保持 "写入中" 标志的宽限时间
    pub write_grace_ms: u64,
    /// 文件被锁时的最大尝试次数
    pub write_max_attempts: u32,
    /// 两次尝试之间的固定间隔
    pub write_retry_delay_ms: u64,
    /// 周期性自动保存间隔
    pub autosave_interval_ms: u64,
    /// FastKV 目录
    pub fast_kv_dir: PathBuf,
    /// FastKV 容量上限 (字节)
    pub fast_kv_quota_bytes: usize,
    /// DurableKV 数据库 URL
    pub durable_kv_url: String,
    /// 读取时优先使用的工作表
    pub preferred_sheet: String,
    /// 本地层都为空时用于播种的工作簿
    pub default_dataset: Option<PathBuf>,
    /// 文件选择器允许的扩展名
    pub allowed_extensions: Vec<String>,
    /// 合同到期视图的观察窗口 (天)
    pub contract_horizon_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            suppress_window_ms: 3_000,
            write_grace_ms: 1_250,
            write_max_attempts: 3,
            write_retry_delay_ms: 1_000,
            autosave_interval_ms: 30_000,
            fast_kv_dir: PathBuf::from(".sheetlink"),
            fast_kv_quota_bytes: 5 * 1024 * 1024,
            durable_kv_url: "sqlite://sheetlink.db".to_string(),
            preferred_sheet: "Datos".to_string(),
            default_dataset: None,
            allowed_extensions: ["xlsx", "xlsm", "xls", "ods"].iter().map(|s| s.to_string()).collect(),
            contract_horizon_days: 30,
        }
    }
}

impl EngineConfig {
    /// 加载配置: 默认值 <- JSON 文件 <- 环境变量
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 应用环境变量覆盖
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T> {
            raw.trim()
                .parse()
                .map_err(|_| SheetLinkError::Config(format!("{key}: cannot parse '{raw}'")))
        }

        if let Some(v) = lookup("SHEETLINK_POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse("SHEETLINK_POLL_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_SUPPRESS_WINDOW_MS") {
            self.suppress_window_ms = parse("SHEETLINK_SUPPRESS_WINDOW_MS", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_WRITE_GRACE_MS") {
            self.write_grace_ms = parse("SHEETLINK_WRITE_GRACE_MS", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_WRITE_MAX_ATTEMPTS") {
            self.write_max_attempts = parse("SHEETLINK_WRITE_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_WRITE_RETRY_DELAY_MS") {
            self.write_retry_delay_ms = parse("SHEETLINK_WRITE_RETRY_DELAY_MS", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_AUTOSAVE_INTERVAL_MS") {
            self.autosave_interval_ms = parse("SHEETLINK_AUTOSAVE_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_FAST_KV_DIR") {
            self.fast_kv_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHEETLINK_FAST_KV_QUOTA_BYTES") {
            self.fast_kv_quota_bytes = parse("SHEETLINK_FAST_KV_QUOTA_BYTES", v)?;
        }
        if let Some(v) = lookup("SHEETLINK_DURABLE_KV_URL") {
            self.durable_kv_url = v;
        }
        if let Some(v) = lookup("SHEETLINK_PREFERRED_SHEET") {
            self.preferred_sheet = v;
        }
        if let Some(v) = lookup("SHEETLINK_DEFAULT_DATASET") {
            self.default_dataset = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("SHEETLINK_CONTRACT_HORIZON_DAYS") {
            self.contract_horizon_days = parse("SHEETLINK_CONTRACT_HORIZON_DAYS", v)?;
        }
        Ok(())
    }

    /// 校验时序约束
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("suppress_window_ms", self.suppress_window_ms),
            ("write_grace_ms", self.write_grace_ms),
            ("write_retry_delay_ms", self.write_retry_delay_ms),
            ("autosave_interval_ms", self.autosave_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(SheetLinkError::Config(format!("{name} must be greater than zero")));
        }
        if self.write_max_attempts == 0 {
            return Err(SheetLinkError::Config("write_max_attempts must be at least 1".to_string()));
        }
        // 宽限期必须覆盖下一次看门狗轮询
        if self.write_grace_ms <= self.poll_interval_ms {
            return Err(SheetLinkError::Config(format!(
                "write_grace_ms ({}) must exceed poll_interval_ms ({})",
                self.write_grace_ms, self.poll_interval_ms
            )));
        }
        if self.suppress_window_ms < self.write_grace_ms {
            return Err(SheetLinkError::Config(format!(
                "suppress_window_ms ({}) must be at least write_grace_ms ({})",
                self.suppress_window_ms, self.write_grace_ms
            )));
        }
        validate_sheet_name(&self.preferred_sheet)?;
        if self.allowed_extensions.is_empty() {
            return Err(SheetLinkError::Config("allowed_extensions must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn suppress_window(&self) -> Duration {
        Duration::from_millis(self.suppress_window_ms)
    }

    pub fn write_grace(&self) -> Duration {
        Duration::from_millis(self.write_grace_ms)
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }

    pub fn autosave_interval(&self) -> Duration {
        Duration::from_millis(self.autosave_interval_ms)
    }

    /// 扩展名是否在允许列表中 (大小写不敏感)
    pub fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// 工作表名规则: 1 到 31 个字符，不含 `[]:*?/\`，不以单引号开头或结尾
fn validate_sheet_name(name: &str) -> Result<()> {
    const FORBIDDEN: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

    let len = name.chars().count();
    if name.trim().is_empty() || len > 31 {
        return Err(SheetLinkError::Config(format!(
            "preferred_sheet '{name}' must be 1 to 31 characters"
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(SheetLinkError::Config(format!("preferred_sheet '{name}' contains '{c}'")));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(SheetLinkError::Config(format!(
            "preferred_sheet '{name}' must not start or end with an apostrophe"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_default_config_is_valid() {
        assert_ok!(EngineConfig::default().validate());
    }

    #[test]
    fn test_grace_must_exceed_poll_interval() {
        let config = EngineConfig { write_grace_ms: 1_000, poll_interval_ms: 1_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(SheetLinkError::Config(_))));
    }

    #[test]
    fn test_suppress_window_covers_grace() {
        let config = EngineConfig { suppress_window_ms: 1_100, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sheet_name_rules() {
        for bad in ["", "   ", "Datos[1]", "a/b", "'Datos", "Datos'", "Hoja de servicios y suplencias 2026"] {
            let config = EngineConfig { preferred_sheet: bad.to_string(), ..Default::default() };
            assert!(matches!(config.validate(), Err(SheetLinkError::Config(_))), "{bad:?}");
        }
        let config = EngineConfig { preferred_sheet: "Turnos 2026".to_string(), ..Default::default() };
        assert_ok!(config.validate());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        assert_ok!(config.apply_env(|key| match key {
            "SHEETLINK_POLL_INTERVAL_MS" => Some("250".to_string()),
            "SHEETLINK_PREFERRED_SHEET" => Some("Servicios".to_string()),
            _ => None,
        }));
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.preferred_sheet, "Servicios");

        assert_ok!(config.apply_env(|key| match key {
            "SHEETLINK_WRITE_RETRY_DELAY_MS" => Some("400".to_string()),
            "SHEETLINK_FAST_KV_QUOTA_BYTES" => Some("1048576".to_string()),
            "SHEETLINK_CONTRACT_HORIZON_DAYS" => Some(" 45 ".to_string()),
            _ => None,
        }));
        assert_eq!(config.write_retry_delay_ms, 400);
        assert_eq!(config.fast_kv_quota_bytes, 1 << 20);
        assert_eq!(config.contract_horizon_days, 45);

        let bad = config.apply_env(|key| (key == "SHEETLINK_WRITE_MAX_ATTEMPTS").then(|| "many".to_string()));
        assert!(bad.is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"poll_interval_ms": 500}"#).unwrap();
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.write_max_attempts, 3);
        assert!(config.accepts_extension(Path::new("plan.XLSX")));
        assert!(!config.accepts_extension(Path::new("plan.csv")));
    }
}
