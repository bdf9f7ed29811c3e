//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::observability::ObservabilityConfig;

/// Kafka 配置
///
/// 消费端固定关闭自动提交，偏移量只在处理器显式确认后提交。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    pub brokers: String,
    pub consumer_group: String,
    pub auto_offset_reset: String,
    /// broker 在返回 fetch 响应前的最长等待时间
    pub fetch_max_wait_ms: u64,
    pub session_timeout_ms: u64,
    /// 同一消费组内并行运行的消费者数量
    pub concurrency: usize,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "ack-mode-consumer".to_string(),
            auto_offset_reset: "latest".to_string(),
            fetch_max_wait_ms: 1000,
            session_timeout_ms: 30000,
            concurrency: 1,
        }
    }
}

/// Topic 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// 商品心愿单数据的入站 topic
    pub product_wishlist: String,
    /// 接口失败记录的投递 topic
    pub failure: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            product_wishlist: "message-process-topic".to_string(),
            failure: "interface-failure-topic".to_string(),
        }
    }
}

/// 营销平台 API 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketingApiConfig {
    /// 为空时只记录日志而不发起网络请求
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for MarketingApiConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 3000,
        }
    }
}

/// 失败捕获标注配置
///
/// 对应各个被失败拦截器包装的调用点，写入失败负载的 interfaceName / resource 字段。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryableConfig {
    pub consumer_interface_name: String,
    pub api_interface_name: String,
    pub api_resource: String,
    /// 保留字段，当前不做重试次数控制
    pub max_retries: u32,
}

impl Default for RetryableConfig {
    fn default() -> Self {
        Self {
            consumer_interface_name: "product-wishlist-consumer".to_string(),
            api_interface_name: "marketing-send-data".to_string(),
            api_resource: "/marketing/data".to_string(),
            max_retries: 3,
        }
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    pub topics: TopicsConfig,
    pub marketing_api: MarketingApiConfig,
    pub retryable: RetryableConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（WISHLIST_ 前缀，双下划线分隔层级，如 WISHLIST_KAFKA__BROKERS -> kafka.brokers）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("WISHLIST_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            // 字段名本身含下划线，层级分隔符必须与之区分
            .add_source(
                Environment::with_prefix("WISHLIST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 获取服务地址
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
