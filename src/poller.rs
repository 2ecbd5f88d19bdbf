use crate::command::{CollectError, Result, run_command};
use crate::config::Config;
use crate::parse;
use crate::publish::{Host, Publisher, SampleValue};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 采集的指标种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    GpuTemp,
    CpuTemp,
    CoreVoltage,
    BatVoltage,
    Throttled,
    LoadAverage,
    CpuUtil,
    MemUtil,
    SdUtil,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::GpuTemp,
        Metric::CpuTemp,
        Metric::CoreVoltage,
        Metric::BatVoltage,
        Metric::Throttled,
        Metric::LoadAverage,
        Metric::CpuUtil,
        Metric::MemUtil,
        Metric::SdUtil,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::GpuTemp => "gpu_temp",
            Metric::CpuTemp => "cpu_temp",
            Metric::CoreVoltage => "core_voltage",
            Metric::BatVoltage => "bat_voltage",
            Metric::Throttled => "throttled",
            Metric::LoadAverage => "load_average",
            Metric::CpuUtil => "cpu_util",
            Metric::MemUtil => "mem_util",
            Metric::SdUtil => "sd_util",
        }
    }

    /// 该指标的发布路径
    pub fn path(self, config: &Config) -> &str {
        match self {
            Metric::GpuTemp => &config.path_gpu_temp,
            Metric::CpuTemp => &config.path_cpu_temp,
            Metric::CoreVoltage => &config.path_core_voltage,
            Metric::BatVoltage => &config.path_bat_voltage,
            Metric::Throttled => &config.path_throttled,
            Metric::LoadAverage => &config.path_load_average,
            Metric::CpuUtil => &config.path_cpu_util,
            Metric::MemUtil => &config.path_mem_util,
            Metric::SdUtil => &config.path_sd_util,
        }
    }

    /// 该指标的命令（负载另有核心数命令）
    pub fn command(self, config: &Config) -> &str {
        let commands = &config.commands;
        match self {
            Metric::GpuTemp => &commands.gpu_temp,
            Metric::CpuTemp => &commands.cpu_temp,
            Metric::CoreVoltage => &commands.core_voltage,
            Metric::BatVoltage => &commands.bat_voltage,
            Metric::Throttled => &commands.throttled,
            Metric::LoadAverage => &commands.load_average,
            Metric::CpuUtil => &commands.cpu_util,
            Metric::MemUtil => &commands.mem_util,
            Metric::SdUtil => &commands.sd_util,
        }
    }

    /// 按配置启用的指标，CPU 温度默认关闭
    pub fn enabled(config: &Config) -> Vec<Metric> {
        Self::ALL
            .into_iter()
            .filter(|m| *m != Metric::CpuTemp || config.cpu_temp_enabled)
            .collect()
    }
}

#[inline]
fn unparsable(metric: Metric, output: &str) -> CollectError {
    CollectError::Parse(format!("{} 输出无法识别: {:?}", metric.name(), output))
}

/// 采集并发布单个指标
pub async fn collect(metric: Metric, config: &Config, publisher: &Publisher) -> Result<()> {
    match metric {
        Metric::GpuTemp => collect_scalar(metric, config, publisher, parse::parse_gpu_temp).await,
        Metric::CpuTemp => collect_scalar(metric, config, publisher, parse::parse_cpu_temp).await,
        Metric::CoreVoltage => {
            collect_scalar(metric, config, publisher, parse::parse_core_voltage).await
        }
        Metric::BatVoltage => {
            collect_scalar(metric, config, publisher, parse::parse_bat_voltage).await
        }
        Metric::Throttled => {
            collect_scalar(metric, config, publisher, parse::parse_throttled).await
        }
        Metric::MemUtil => collect_scalar(metric, config, publisher, parse::parse_mem_util).await,
        Metric::SdUtil => collect_scalar(metric, config, publisher, parse::parse_sd_util).await,
        Metric::LoadAverage => collect_load_average(config, publisher).await,
        Metric::CpuUtil => collect_cpu_util(config, publisher).await,
    }
}

/// 单条命令、单个值的指标
async fn collect_scalar<T: Into<SampleValue>>(
    metric: Metric,
    config: &Config,
    publisher: &Publisher,
    parser: fn(&str) -> Option<T>,
) -> Result<()> {
    let output = run_command(metric.command(config)).await?;
    let value = parser(&output).ok_or_else(|| unparsable(metric, &output))?;
    publisher.publish(metric.path(config), value);
    Ok(())
}

async fn collect_cpu_util(config: &Config, publisher: &Publisher) -> Result<()> {
    let output = run_command(&config.commands.cpu_util).await?;
    let util =
        parse::parse_cpu_util(&output).ok_or_else(|| unparsable(Metric::CpuUtil, &output))?;

    match util.all {
        Some(value) => publisher.publish(&config.path_cpu_util, value),
        None => debug!("mpstat 输出中没有汇总行"),
    }

    // 单核使用率默认只计算不发布
    if config.per_core_cpu_util {
        for (core, value) in util.cores {
            publisher.publish(&parse::per_core_path(&config.path_cpu_util, core), value);
        }
    }
    Ok(())
}

/// 负载需要两条独立命令：核心数与一分钟负载
async fn collect_load_average(config: &Config, publisher: &Publisher) -> Result<()> {
    let (cpus, load) = tokio::join!(
        run_command(&config.commands.cpu_count),
        run_command(&config.commands.load_average)
    );

    let cpu_count = match cpus {
        Ok(output) => parse::parse_cpu_count(&output),
        Err(e) => {
            warn!("获取 CPU 核心数失败，按 1 计算: {e}");
            1.0
        }
    };
    debug!("CPU 核心数: {cpu_count}");

    let output = load?;
    let load = parse::parse_load_average(&output)
        .ok_or_else(|| unparsable(Metric::LoadAverage, &output))?;

    publisher.publish(
        &config.path_load_average,
        parse::load_per_core(load, cpu_count),
    );
    Ok(())
}

/// 执行一轮采集：每个指标一个独立任务
///
/// 返回任务句柄，调用方可以不等待。
pub fn sweep(
    config: &Arc<Config>,
    publisher: &Publisher,
    limiter: Option<&Arc<Semaphore>>,
) -> Vec<JoinHandle<()>> {
    Metric::enabled(config)
        .into_iter()
        .map(|metric| {
            let config = config.clone();
            let publisher = publisher.clone();
            let limiter = limiter.cloned();
            tokio::spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                if let Err(e) = collect(metric, &config, &publisher).await {
                    warn!("{} 本轮跳过: {e}", metric.name());
                }
            })
        })
        .collect()
}

/// 指标轮询器
///
/// 启动时立即采集一次，之后按固定间隔重复。上一轮命令未结束时下一轮照常开始，
/// 只有设置了并发上限才会排队。停止只取消定时器，已启动的命令不受影响。
pub struct Poller {
    config: Arc<Config>,
    publisher: Publisher,
    limiter: Option<Arc<Semaphore>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(config: Config, host: Arc<dyn Host>) -> Self {
        let limiter = config
            .max_concurrent_commands
            .map(|limit| Arc::new(Semaphore::new(limit)));
        Self {
            config: Arc::new(config),
            publisher: Publisher::new(host),
            limiter,
            timer: Mutex::new(None),
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 启动定时采集，已在运行时返回 `false`
    ///
    /// 必须在 tokio 运行时内调用。
    pub fn start(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("轮询器已在运行");
            return false;
        }

        let config = self.config.clone();
        let publisher = self.publisher.clone();
        let limiter = self.limiter.clone();
        let period = config.interval();

        info!(
            "开始采集，间隔 {:?}，指标: {:?}",
            period,
            Metric::enabled(&config)
                .iter()
                .map(|m| m.name())
                .collect::<Vec<_>>()
        );

        *timer = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // 第一次 tick 立即完成
                interval.tick().await;
                sweep(&config, &publisher, limiter.as_ref());
            }
        }));
        true
    }

    /// 停止定时采集，未运行时返回 `false`
    pub fn stop(&self) -> bool {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        match timer.take() {
            Some(handle) => {
                handle.abort();
                info!("采集已停止");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 立即执行一轮采集
    pub fn sweep(&self) -> Vec<JoinHandle<()>> {
        sweep(&self.config, &self.publisher, self.limiter.as_ref())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(handle) = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
