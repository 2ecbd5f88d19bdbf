//! 单板计算机健康指标采集库
//!
//! 定时调用外部系统工具，解析其文本输出，换算单位后以增量消息的形式
//! 逐条转发给宿主消息总线。

pub mod command;
pub mod config;
pub mod parse;
pub mod poller;
pub mod publish;

// 重新导出主要的公共类型
pub use command::{CollectError, run_command};
pub use config::{Commands, Config};
pub use poller::{Metric, Poller};
pub use publish::{
    ChannelHost, Delta, Host, HttpHost, Publisher, SOURCE_ID, SampleValue, StdoutHost,
};
