//! gRPC plugin client
//!
//! Provider binaries are go-plugin servers speaking tfplugin5. The plugin is
//! started with the magic cookie in its environment and announces itself on
//! the first stdout line as `CORE|APP|NETWORK|ADDRESS|PROTOCOL`, for example
//! `1|5|unix|/tmp/plugin4242|grpc`. Every call after that is a unary RPC on the
//! announced socket, with configuration and state encoded as msgpack.

use super::error::{ProviderError, Result};
use super::msgpack;
use super::plugin::{
    Diagnostic, Diagnostics, ProviderClient, ReadResourceRequest, ReadResourceResponse, Severity,
};
use super::schema::{
    AttrType, Attribute, Block, NestedBlock, NestingMode, ProviderSchema, Schema,
};
use super::tfplugin5 as proto;
use super::value::TypedValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};

pub const MAGIC_COOKIE_KEY: &str = "TF_PLUGIN_MAGIC_COOKIE";
pub const MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

const CORE_PROTOCOL_VERSION: &str = "1";
const PLUGIN_PROTOCOL_VERSION: &str = "5";
/// Reported to the plugin in `Configure`
const TERRAFORM_VERSION: &str = "0.15.5";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

const GET_SCHEMA: &str = "/tfplugin5.Provider/GetSchema";
const CONFIGURE: &str = "/tfplugin5.Provider/Configure";
const READ_RESOURCE: &str = "/tfplugin5.Provider/ReadResource";
const SHUTDOWN: &str = "/plugin.GRPCController/Shutdown";

/// Where the plugin listens, as announced by its handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginAddress {
    Unix(PathBuf),
    Tcp(String),
}

pub fn parse_handshake(line: &str) -> Result<PluginAddress> {
    let line = line.trim();
    let parts: Vec<&str> = line.split('|').collect();
    // A sixth field carries the server certificate when mTLS is negotiated
    let [core, app, network, address, protocol, ..] = parts.as_slice() else {
        return Err(ProviderError::Handshake(format!(
            "unexpected handshake line {line:?}"
        )));
    };

    if *core != CORE_PROTOCOL_VERSION {
        return Err(ProviderError::Handshake(format!(
            "unsupported core protocol {core}, expected {CORE_PROTOCOL_VERSION}"
        )));
    }
    if *app != PLUGIN_PROTOCOL_VERSION {
        return Err(ProviderError::Handshake(format!(
            "plugin speaks protocol version {app}, expected {PLUGIN_PROTOCOL_VERSION}"
        )));
    }
    if *protocol != "grpc" {
        return Err(ProviderError::Handshake(format!(
            "unsupported plugin transport {protocol}, expected grpc"
        )));
    }

    match *network {
        "unix" => Ok(PluginAddress::Unix(PathBuf::from(address))),
        "tcp" => Ok(PluginAddress::Tcp(address.to_string())),
        other => Err(ProviderError::Handshake(format!(
            "unsupported network {other}"
        ))),
    }
}

async fn connect(address: &PluginAddress) -> Result<Channel> {
    let channel = match address {
        #[cfg(unix)]
        PluginAddress::Unix(path) => {
            let path = path.clone();
            // The URI is ignored, every connection goes to the socket
            Endpoint::from_static("http://[::]:50051")
                .connect_with_connector(tower::service_fn(move |_: tonic::transport::Uri| {
                    let path = path.clone();
                    async move {
                        let stream = tokio::net::UnixStream::connect(path).await?;
                        Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
                    }
                }))
                .await?
        }
        #[cfg(not(unix))]
        PluginAddress::Unix(path) => {
            return Err(ProviderError::Handshake(format!(
                "unix socket {} is not supported on this platform",
                path.display()
            )));
        }
        PluginAddress::Tcp(addr) => Endpoint::from_shared(format!("http://{addr}"))?
            .connect()
            .await?,
    };
    Ok(channel)
}

async fn log_lines<R: AsyncRead + Unpin>(mut lines: Lines<BufReader<R>>, stream: &'static str) {
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!("plugin {}: {}", stream, line);
    }
}

async fn call<Req, Resp>(
    grpc: &mut Grpc<Channel>,
    path: &'static str,
    request: Req,
) -> Result<Resp>
where
    Req: prost::Message + Send + Sync + 'static,
    Resp: prost::Message + Default + Send + Sync + 'static,
{
    grpc.ready().await?;
    let response = grpc
        .unary(
            tonic::Request::new(request),
            PathAndQuery::from_static(path),
            ProstCodec::<Req, Resp>::default(),
        )
        .await?;
    Ok(response.into_inner())
}

/// [`ProviderClient`] over a go-plugin gRPC connection
pub struct GrpcPluginClient {
    grpc: Mutex<Option<Grpc<Channel>>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl GrpcPluginClient {
    /// Spawn the plugin, read its handshake and connect to it
    pub async fn start(path: &Path) -> Result<Self> {
        tracing::debug!("Starting plugin {}", path.display());

        let mut child = Command::new(path)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .env("PLUGIN_PROTOCOL_VERSIONS", PLUGIN_PROTOCOL_VERSION)
            .env("PLUGIN_MIN_PORT", "10000")
            .env("PLUGIN_MAX_PORT", "25000")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Handshake("plugin stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_lines(BufReader::new(stderr).lines(), "stderr"));
        }

        let mut stdout = BufReader::new(stdout).lines();
        let line = tokio::time::timeout(HANDSHAKE_TIMEOUT, stdout.next_line())
            .await
            .map_err(|_| ProviderError::Handshake("timed out waiting for handshake".to_string()))??
            .ok_or_else(|| ProviderError::Handshake("plugin exited before handshake".to_string()))?;
        let address = parse_handshake(&line)?;
        tracing::debug!("Plugin handshake complete: {}", line.trim());
        tokio::spawn(log_lines(stdout, "stdout"));

        let channel = connect(&address).await?;
        Ok(Self::from_parts(channel, Some(child)))
    }

    fn from_parts(channel: Channel, child: Option<Child>) -> Self {
        Self {
            grpc: Mutex::new(Some(Grpc::new(channel))),
            child: tokio::sync::Mutex::new(child),
        }
    }

    /// Each call works on its own clone of the channel handle, so dropping a
    /// call midway leaves the connection usable for the others.
    fn handle(&self) -> Result<Grpc<Channel>> {
        self.grpc
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ProviderError::Closed)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.handle()?;
        call(&mut grpc, path, request).await
    }
}

#[async_trait]
impl ProviderClient for GrpcPluginClient {
    async fn get_schema(&self) -> Result<ProviderSchema> {
        let response: proto::GetProviderSchemaResponse = self
            .unary(GET_SCHEMA, proto::GetProviderSchemaRequest {})
            .await?;
        if let Some(err) = diagnostics_from_proto(response.diagnostics).err() {
            return Err(err);
        }

        let provider = schema_from_proto(response.provider)?;
        let resource_types = response
            .resource_schemas
            .into_iter()
            .map(|(name, schema)| Ok((name, schema_from_proto(Some(schema))?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(ProviderSchema {
            provider,
            resource_types,
        })
    }

    async fn configure(&self, config: &TypedValue, ty: &AttrType) -> Result<Diagnostics> {
        let request = proto::ConfigureRequest {
            terraform_version: TERRAFORM_VERSION.to_string(),
            config: Some(dynamic_value(config, ty)?),
        };
        let response: proto::ConfigureResponse = self.unary(CONFIGURE, request).await?;
        Ok(diagnostics_from_proto(response.diagnostics))
    }

    async fn read_resource(&self, request: &ReadResourceRequest) -> Result<ReadResourceResponse> {
        let wire = proto::ReadResourceRequest {
            type_name: request.type_name.clone(),
            current_state: Some(dynamic_value(&request.prior_state, &request.state_type)?),
            private: request.private.clone(),
            provider_meta: Some(dynamic_value(&TypedValue::Null, &AttrType::Dynamic)?),
        };
        let response: proto::ReadResourceResponse = self.unary(READ_RESOURCE, wire).await?;

        let new_state = match &response.new_state {
            Some(state) => typed_value(state, &request.state_type)?,
            None => TypedValue::Null,
        };
        Ok(ReadResourceResponse {
            new_state,
            diagnostics: diagnostics_from_proto(response.diagnostics),
            private: response.private,
        })
    }

    async fn close(&self) {
        let handle = self.grpc.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(mut grpc) = handle else {
            return;
        };

        let shutdown = call::<_, proto::Empty>(&mut grpc, SHUTDOWN, proto::Empty {});
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::debug!("Plugin shutdown call failed: {}", err),
            Err(_) => tracing::debug!("Plugin shutdown call timed out"),
        }

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(STOP_GRACE_PERIOD, child.wait()).await.is_err() {
            tracing::debug!("Plugin did not stop in time, killing it");
            let _ = child.kill().await;
        }
    }
}

fn dynamic_value(value: &TypedValue, ty: &AttrType) -> Result<proto::DynamicValue> {
    Ok(proto::DynamicValue {
        msgpack: msgpack::encode(value, ty)?,
        json: Vec::new(),
    })
}

fn typed_value(raw: &proto::DynamicValue, ty: &AttrType) -> Result<TypedValue> {
    if !raw.msgpack.is_empty() {
        return Ok(msgpack::decode(&raw.msgpack, ty)?);
    }
    if raw.json.is_empty() {
        return Ok(TypedValue::Null);
    }
    let json: serde_json::Value = serde_json::from_slice(&raw.json)
        .map_err(|e| ProviderError::Protocol(format!("invalid JSON state: {e}")))?;
    Ok(TypedValue::from_json(&json, ty)?)
}

fn diagnostics_from_proto(raw: Vec<proto::Diagnostic>) -> Diagnostics {
    Diagnostics(
        raw.into_iter()
            .map(|d| Diagnostic {
                severity: match proto::DiagnosticSeverity::try_from(d.severity) {
                    Ok(proto::DiagnosticSeverity::Warning) => Severity::Warning,
                    _ => Severity::Error,
                },
                summary: d.summary,
                detail: d.detail,
            })
            .collect(),
    )
}

fn schema_from_proto(raw: Option<proto::Schema>) -> Result<Schema> {
    let Some(raw) = raw else {
        return Ok(Schema::default());
    };
    Ok(Schema {
        version: raw.version,
        block: block_from_proto(raw.block.unwrap_or_default())?,
    })
}

fn block_from_proto(raw: proto::SchemaBlock) -> Result<Block> {
    let mut block = Block::default();

    for attr in raw.attributes {
        let type_json: serde_json::Value = serde_json::from_slice(&attr.r#type).map_err(|e| {
            ProviderError::Protocol(format!("invalid type for attribute {}: {e}", attr.name))
        })?;
        let attribute = Attribute {
            ty: AttrType::from_cty_json(&type_json)?,
            required: attr.required,
            optional: attr.optional,
            computed: attr.computed,
            sensitive: attr.sensitive,
        };
        block.attributes.insert(attr.name, attribute);
    }

    for nested in raw.block_types {
        let nesting = match proto::NestingMode::try_from(nested.nesting) {
            Ok(proto::NestingMode::Single) => NestingMode::Single,
            Ok(proto::NestingMode::Group) => NestingMode::Group,
            Ok(proto::NestingMode::List) => NestingMode::List,
            Ok(proto::NestingMode::Set) => NestingMode::Set,
            Ok(proto::NestingMode::Map) => NestingMode::Map,
            _ => {
                return Err(ProviderError::Protocol(format!(
                    "invalid nesting mode {} for block {}",
                    nested.nesting, nested.type_name
                )))
            }
        };
        let nested_block = NestedBlock {
            nesting,
            block: block_from_proto(nested.block.unwrap_or_default())?,
            min_items: u32::try_from(nested.min_items).unwrap_or(0),
            max_items: u32::try_from(nested.max_items).unwrap_or(0),
        };
        block.block_types.insert(nested.type_name, nested_block);
    }

    Ok(block)
}
