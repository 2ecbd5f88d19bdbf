use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::info;
use rpi_health_bridge::{Config, Host, HttpHost, Poller, StdoutHost};
use std::path::PathBuf;
use std::sync::Arc;

/// 消息投递方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Sink {
    /// 每条消息一行 JSON，写入标准输出
    Stdout,
    /// POST 到 --url 指定的地址
    Http,
}

/// 单板计算机健康指标采集程序
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON 配置文件路径，缺省时全部使用默认值
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 采样间隔秒数，覆盖配置文件
    #[arg(short, long)]
    rate: Option<f64>,

    /// 消息投递方式
    #[arg(short, long, value_enum, default_value_t = Sink::Stdout)]
    sink: Sink,

    /// 宿主接收地址（http 投递时必填）
    #[arg(short, long)]
    url: Option<String>,

    /// 同时运行的采集任务上限，覆盖配置文件
    #[arg(short = 'm', long)]
    max_concurrent: Option<usize>,

    /// 采集热区 CPU 温度
    #[arg(long)]
    cpu_temp: bool,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志系统
    init_logger(&args.log_level);

    info!("健康指标采集程序启动中...");

    let config = build_config(&args)?;
    info!(
        "配置信息 - 采样间隔: {} 秒, CPU 温度: {}, 单核使用率: {}, 并发上限: {:?}",
        config.rate, config.cpu_temp_enabled, config.per_core_cpu_util, config.max_concurrent_commands
    );

    let host: Arc<dyn Host> = match args.sink {
        Sink::Stdout => Arc::new(StdoutHost),
        Sink::Http => {
            let Some(url) = args.url.as_deref() else {
                bail!("http 投递方式需要 --url");
            };
            let host = HttpHost::new(url)?;
            info!("消息将投递到 {}", host.uri());
            Arc::new(host)
        }
    };

    let poller = Poller::new(config, host);
    poller.start();

    tokio::signal::ctrl_c()
        .await
        .context("无法监听退出信号")?;

    poller.stop();
    info!("程序正常退出");

    Ok(())
}

/// 合并配置文件与命令行参数
fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(rate) = args.rate {
        config.rate = rate;
    }
    if let Some(limit) = args.max_concurrent {
        config.max_concurrent_commands = Some(limit);
    }
    if args.cpu_temp {
        config.cpu_temp_enabled = true;
    }

    config.validate()?;
    Ok(config)
}

/// 初始化日志系统，日志输出到标准错误
fn init_logger(level: &str) {
    match env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .try_init()
    {
        Ok(_) => info!("日志系统初始化成功，级别: {level}"),
        Err(e) => {
            eprintln!("日志系统初始化失败: {e}，使用默认设置");
            env_logger::init();
        }
    }
}
