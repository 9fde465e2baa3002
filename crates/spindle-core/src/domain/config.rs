//! LoopConfig - ループの設定
//!
//! JSON などから読み込める設定値。`LoopBuilder::from_config` で適用します。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::SpindleError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// ワーカー名（空白なら自動採番）
    pub name: Option<String>,

    /// iteration 間の sleep（ミリ秒、0 なら無し）
    pub interval_ms: u64,

    /// log-and-continue の error handler を登録
    pub continue_on_error: bool,
}

impl LoopConfig {
    pub fn from_json_str(json: &str) -> Result<Self, SpindleError> {
        serde_json::from_str(json)
            .map_err(|e| SpindleError::InvalidArgument(format!("loop config: {e}")))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
