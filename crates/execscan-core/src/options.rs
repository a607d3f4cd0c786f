//! 扫描配置（模块）
//!
//! 时间类字段在 TOML 中以秒表示（整数或小数），内部统一为 `Duration`。
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScanError;

/// 扫描配置
///
/// 各阶段预算彼此独立可调；文件阶段默认不设上限，使用全局剩余时间。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// 全局截止时间（秒）
    #[serde(with = "secs")]
    pub global_timeout_secs: Duration,
    /// 文件阶段上限；None 表示使用全局剩余时间
    #[serde(with = "secs::option")]
    pub file_timeout_secs: Option<Duration>,
    /// 进程阶段上限
    #[serde(with = "secs")]
    pub process_timeout_secs: Duration,
    /// 注册表阶段上限
    #[serde(with = "secs")]
    pub registry_timeout_secs: Duration,
    /// 单次进程列表调用的硬等待上限
    #[serde(with = "secs")]
    pub process_list_wait_secs: Duration,
    /// 自启动子扫描所需的最少剩余时间，不足则整体跳过
    #[serde(with = "secs")]
    pub autorun_min_remaining_secs: Duration,
    /// 每个自启动键最多枚举的值数量
    pub max_registry_enum_values: usize,
    /// 自启动子扫描参与匹配的条目数（按签名库顺序取前 N 个）
    pub common_entry_limit: usize,
    /// 每处理多少个条目检查一次截止时间并上报进度
    pub batch_size: usize,
    /// 三个阶段并发执行（默认串行）
    pub concurrent: bool,
    /// 额外的候选目录（文件探测只在候选目录及其直接子目录内进行）
    pub search_dirs: Vec<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            global_timeout_secs: Duration::from_secs(120),
            file_timeout_secs: None,
            process_timeout_secs: Duration::from_secs(20),
            registry_timeout_secs: Duration::from_secs(20),
            process_list_wait_secs: Duration::from_secs(10),
            autorun_min_remaining_secs: Duration::from_secs(5),
            max_registry_enum_values: 50,
            common_entry_limit: 15,
            batch_size: 10,
            concurrent: false,
            search_dirs: Vec::new(),
        }
    }
}

impl ScanConfig {
    /// 从 TOML 文本解析（缺省字段取默认值）
    pub fn from_toml_str(text: &str) -> Result<Self, ScanError> {
        let cfg: ScanConfig =
            toml::from_str(text).map_err(|e| ScanError::ConfigParse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 从 TOML 文件加载
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let text = std::fs::read_to_string(path).map_err(|source| ScanError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.global_timeout_secs.is_zero() {
            return Err(ScanError::ConfigInvalid {
                field: "global_timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.batch_size == 0 {
            return Err(ScanError::ConfigInvalid {
                field: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// `Duration` <-> 秒（f64）的 serde 适配
mod secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        to_duration(v).map_err(D::Error::custom)
    }

    pub(super) fn to_duration(v: f64) -> Result<Duration, String> {
        if !v.is_finite() || v < 0.0 {
            return Err(format!("expected a non-negative number of seconds, got {v}"));
        }
        Duration::try_from_secs_f64(v).map_err(|e| e.to_string())
    }

    pub(super) mod option {
        use super::to_duration;
        use serde::{de::Error, Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub(crate) fn serialize<S: Serializer>(
            d: &Option<Duration>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => s.serialize_some(&d.as_secs_f64()),
                None => s.serialize_none(),
            }
        }

        pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<Duration>, D::Error> {
            match Option::<f64>::deserialize(d)? {
                Some(v) => to_duration(v).map(Some).map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}
