use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 命令模板，均通过 `sh -c` 执行
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Commands {
    pub gpu_temp: String,
    pub cpu_temp: String,
    pub core_voltage: String,
    pub bat_voltage: String,
    pub throttled: String,
    pub cpu_count: String,
    pub load_average: String,
    pub cpu_util: String,
    pub mem_util: String,
    pub sd_util: String,
}

impl Default for Commands {
    fn default() -> Self {
        Self {
            gpu_temp: "/opt/vc/bin/vcgencmd measure_temp".to_string(),
            cpu_temp: "cat /sys/class/thermal/thermal_zone0/temp".to_string(),
            core_voltage: "/opt/vc/bin/vcgencmd measure_volts core".to_string(),
            bat_voltage: "/usr/sbin/mopicli -v|awk '{print $4}'".to_string(),
            throttled: "/opt/vc/bin/vcgencmd get_throttled".to_string(),
            cpu_count: "grep 'model name' /proc/cpuinfo | wc -l".to_string(),
            load_average:
                "uptime|grep \"load average\"|awk -F: '{print $5}'|awk -F, '{print $1}'"
                    .to_string(),
            cpu_util: "S_TIME_FORMAT='ISO' mpstat -P ALL|grep \\:|grep -v \\%".to_string(),
            mem_util: "free".to_string(),
            sd_util: "df /|grep -v Used|awk '{print $5}'|awk 'gsub(\"%\",\"\")'".to_string(),
        }
    }
}

/// 运行配置
///
/// 启动时加载一次，运行期间不再变化。
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub path_throttled: String,
    pub path_load_average: String,
    pub path_core_voltage: String,
    pub path_bat_voltage: String,
    pub path_cpu_temp: String,
    pub path_gpu_temp: String,
    pub path_cpu_util: String,
    pub path_mem_util: String,
    pub path_sd_util: String,
    /// 采样间隔（秒）
    pub rate: f64,
    /// 是否采集热区 CPU 温度
    pub cpu_temp_enabled: bool,
    /// 是否发布各核心使用率
    pub per_core_cpu_util: bool,
    /// 同时运行的采集任务上限，`None` 表示不限制
    pub max_concurrent_commands: Option<usize>,
    pub commands: Commands,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path_throttled: "environment.rpi.throttled".to_string(),
            path_load_average: "environment.rpi.load_average".to_string(),
            path_core_voltage: "environment.rpi.core.voltage".to_string(),
            path_bat_voltage: "environment.rpi.bat.voltage".to_string(),
            path_cpu_temp: "environment.rpi.cpu.temperature".to_string(),
            path_gpu_temp: "environment.rpi.gpu.temperature".to_string(),
            path_cpu_util: "environment.rpi.cpu.utilisation".to_string(),
            path_mem_util: "environment.rpi.memory.utilisation".to_string(),
            path_sd_util: "environment.rpi.sd.utilisation".to_string(),
            rate: 30.0,
            cpu_temp_enabled: false,
            per_core_cpu_util: false,
            max_concurrent_commands: None,
            commands: Commands::default(),
        }
    }
}

impl Config {
    /// 从 JSON 文本解析配置，缺省字段使用默认值
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).context("配置文件格式错误")?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件 {}", path.display()))?;
        Self::from_json(&text)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            bail!("采样间隔必须为正数，当前值: {}", self.rate);
        }
        if self.max_concurrent_commands == Some(0) {
            bail!("并发上限不能为 0");
        }
        Ok(())
    }

    /// 采样间隔
    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis((self.rate * 1000.0).round().max(1.0) as u64)
    }
}
