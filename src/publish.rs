use anyhow::{Context, Result};
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request, Uri};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;

/// 消息来源标识
pub const SOURCE_ID: &str = "signalk-raspberry-pi-monitoring2";

/// 采样值：数值或字符串
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl From<f64> for SampleValue {
    #[inline]
    fn from(value: f64) -> Self {
        SampleValue::Number(value)
    }
}

impl From<String> for SampleValue {
    #[inline]
    fn from(value: String) -> Self {
        SampleValue::Text(value)
    }
}

impl From<&str> for SampleValue {
    #[inline]
    fn from(value: &str) -> Self {
        SampleValue::Text(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathValue {
    pub path: String,
    pub value: SampleValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub values: Vec<PathValue>,
}

/// 增量消息：`{ updates: [ { values: [ { path, value } ] } ] }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub updates: Vec<Update>,
}

impl Delta {
    /// 只含一个值的增量消息
    pub fn single(path: impl Into<String>, value: impl Into<SampleValue>) -> Self {
        Self {
            updates: vec![Update {
                values: vec![PathValue {
                    path: path.into(),
                    value: value.into(),
                }],
            }],
        }
    }
}

/// 带来源标识的线上格式
#[derive(Debug, Serialize)]
struct HostMessage<'a> {
    source: &'a str,
    #[serde(flatten)]
    delta: &'a Delta,
}

/// 宿主消息入口
pub trait Host: Send + Sync {
    fn handle_message(&self, source_id: &str, delta: Delta);
}

/// 以 JSON 行写入标准输出
#[derive(Debug, Default)]
pub struct StdoutHost;

impl Host for StdoutHost {
    fn handle_message(&self, source_id: &str, delta: Delta) {
        let message = HostMessage {
            source: source_id,
            delta: &delta,
        };
        let mut stdout = std::io::stdout().lock();
        let written = serde_json::to_writer(&mut stdout, &message)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(stdout))
            .and_then(|_| stdout.flush());
        if let Err(e) = written {
            error!("写入标准输出失败: {e}");
        }
    }
}

/// 通过 HTTP POST 投递到宿主
///
/// 每条消息单独发送，不等待结果。
pub struct HttpHost {
    client: Client<HttpConnector>,
    uri: Uri,
}

impl HttpHost {
    pub fn new(url: &str) -> Result<Self> {
        let uri: Uri = url
            .parse()
            .with_context(|| format!("无效的宿主地址: {url}"))?;
        Ok(Self {
            client: Client::new(),
            uri,
        })
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    fn build_request(&self, body: Vec<u8>) -> hyper::http::Result<Request<Body>> {
        Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
    }
}

impl Host for HttpHost {
    fn handle_message(&self, source_id: &str, delta: Delta) {
        let body = match serde_json::to_vec(&HostMessage {
            source: source_id,
            delta: &delta,
        }) {
            Ok(body) => body,
            Err(e) => {
                error!("消息序列化失败: {e}");
                return;
            }
        };

        let request = match self.build_request(body) {
            Ok(request) => request,
            Err(e) => {
                error!("构建请求失败: {e}");
                return;
            }
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.request(request).await {
                Ok(response) if response.status().is_success() => {
                    debug!("宿主已接收消息: {}", response.status());
                }
                Ok(response) => warn!("宿主拒绝消息: {}", response.status()),
                Err(e) => error!("投递消息失败: {e}"),
            }
        });
    }
}

/// 进程内宿主，把消息转发到通道
#[derive(Debug, Clone)]
pub struct ChannelHost {
    tx: mpsc::UnboundedSender<(String, Delta)>,
}

impl ChannelHost {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, Delta)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Host for ChannelHost {
    fn handle_message(&self, source_id: &str, delta: Delta) {
        if self.tx.send((source_id.to_string(), delta)).is_err() {
            debug!("接收端已关闭，丢弃消息");
        }
    }
}

/// 发布器：每个值单独封装为一条增量消息
#[derive(Clone)]
pub struct Publisher {
    host: Arc<dyn Host>,
    source_id: String,
}

impl Publisher {
    #[inline]
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self::with_source(host, SOURCE_ID)
    }

    pub fn with_source(host: Arc<dyn Host>, source_id: impl Into<String>) -> Self {
        Self {
            host,
            source_id: source_id.into(),
        }
    }

    #[inline]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn publish(&self, path: &str, value: impl Into<SampleValue>) {
        let value = value.into();
        debug!("发布 {path} = {value:?}");
        self.host
            .handle_message(&self.source_id, Delta::single(path, value));
    }
}
