use crate::config::SinkEnvConfig;
use crate::domain::errors::RoutingError;
use crate::domain::message::NormalizedMessage;
use crate::domain::ports::OutputManager;
use crate::domain::records::SchemaRecord;
use crate::domain::series::{InstrumentSeries, RedisMode};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// What one message becomes in Redis
#[derive(Debug, Clone, PartialEq)]
pub enum RedisWrite {
    /// `XADD <key> MAXLEN ~ <n> * field value ...`
    Stream {
        key: String,
        fields: Vec<(&'static str, String)>,
    },
    /// `SET <key> <value>`
    Kv { key: String, value: String },
}

impl RedisWrite {
    /// Stream mode unless the series asks for `kv`
    pub fn plan(
        message: &NormalizedMessage,
        series: &InstrumentSeries,
    ) -> Result<Self, RoutingError> {
        let record = SchemaRecord::from_message(series.data_schema(), message)?;
        match series.redis_mode().unwrap_or(RedisMode::Stream) {
            RedisMode::Stream => Ok(RedisWrite::Stream {
                key: record.stream_name(),
                fields: record
                    .columns()
                    .into_iter()
                    .filter_map(|(name, value)| value.map(|v| (name, v)))
                    .collect(),
            }),
            RedisMode::Kv { field } => {
                let value = record
                    .columns()
                    .into_iter()
                    .find(|(name, _)| *name == field)
                    .and_then(|(_, value)| value)
                    .or_else(|| message.scalar(&field))
                    .ok_or_else(|| RoutingError::Conversion {
                        schema: series.data_schema().to_string(),
                        reason: format!("field '{}' not present for kv write", field),
                    })?;
                Ok(RedisWrite::Kv {
                    key: format!("{}:{}", record.stream_name(), field),
                    value,
                })
            }
        }
    }
}

/// Key-value/stream sink. One multiplexed connection per destination.
pub struct RedisOutputManager {
    config: SinkEnvConfig,
    connections: Mutex<HashMap<String, MultiplexedConnection>>,
}

impl RedisOutputManager {
    pub fn new(config: SinkEnvConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    async fn connection(&self, destination: &str) -> redis::RedisResult<MultiplexedConnection> {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(destination) {
            return Ok(conn.clone());
        }
        let url = self.config.redis_url_for(destination);
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("RedisOutputManager: Connected {} -> {}", destination, url);
        connections.insert(destination.to_string(), conn.clone());
        Ok(conn)
    }

    async fn execute(&self, destination: &str, write: RedisWrite) -> redis::RedisResult<()> {
        let mut conn = self.connection(destination).await?;
        match write {
            RedisWrite::Stream { key, fields } => {
                let mut cmd = redis::cmd("XADD");
                cmd.arg(&key)
                    .arg("MAXLEN")
                    .arg("~")
                    .arg(self.config.redis_stream_maxlen)
                    .arg("*");
                for (name, value) in fields {
                    cmd.arg(name).arg(value);
                }
                let id: String = cmd.query_async(&mut conn).await?;
                debug!("RedisOutputManager: XADD {} -> {}", key, id);
            }
            RedisWrite::Kv { key, value } => {
                let _: () = redis::cmd("SET")
                    .arg(&key)
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
                debug!("RedisOutputManager: SET {}", key);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OutputManager for RedisOutputManager {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn save(
        &self,
        destination: &str,
        message: &NormalizedMessage,
        series: &InstrumentSeries,
    ) -> Result<(), RoutingError> {
        let write = RedisWrite::plan(message, series)?;
        self.execute(destination, write)
            .await
            .map_err(|e| RoutingError::sink(destination, e))
    }
}
