// gRPC adapter
//
// The tool's FQN is `pkg.Service.Method`; the adapter holds the
// reflection method descriptor and marshals the JSON inputs into a
// dynamic message matching the method's input type. The wire path is
// `/pkg.Service/Method`. Upstream error messages are redacted and
// truncated before they reach the caller.

use std::sync::Arc;

use async_trait::async_trait;
use prost::Message;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use serde_json::Value;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tracing::warn;

use super::{decode_inputs, CacheConfig, ToolExecutor};
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::pool::{Pool, PoolManager};
use crate::registry::ToolDef;
use crate::security;

/// Pooled gRPC channel. `tonic::transport::Channel` is cheap to clone;
/// pooling still bounds concurrent upstream use per service.
pub type GrpcChannel = tonic::transport::Channel;

/// Codec over descriptor-typed dynamic messages.
#[derive(Clone)]
struct DynamicCodec {
	method: MethodDescriptor,
}

struct DynamicEncoder;

struct DynamicDecoder {
	method: MethodDescriptor,
}

impl Codec for DynamicCodec {
	type Encode = DynamicMessage;
	type Decode = DynamicMessage;
	type Encoder = DynamicEncoder;
	type Decoder = DynamicDecoder;

	fn encoder(&mut self) -> Self::Encoder {
		DynamicEncoder
	}

	fn decoder(&mut self) -> Self::Decoder {
		DynamicDecoder {
			method: self.method.clone(),
		}
	}
}

impl Encoder for DynamicEncoder {
	type Item = DynamicMessage;
	type Error = tonic::Status;

	fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
		item
			.encode(dst)
			.map_err(|e| tonic::Status::internal(format!("failed to encode message: {e}")))
	}
}

impl Decoder for DynamicDecoder {
	type Item = DynamicMessage;
	type Error = tonic::Status;

	fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
		let message = DynamicMessage::decode(self.method.output(), src)
			.map_err(|e| tonic::Status::internal(format!("failed to decode message: {e}")))?;
		Ok(Some(message))
	}
}

pub struct GrpcTool {
	def: ToolDef,
	method: MethodDescriptor,
	pools: Arc<PoolManager>,
	cache: Option<CacheConfig>,
}

impl GrpcTool {
	/// The descriptor is obtained by the registrar (typically via server
	/// reflection) and must correspond to the FQN on the descriptor.
	pub fn new(
		def: ToolDef,
		method: MethodDescriptor,
		pools: Arc<PoolManager>,
	) -> Result<Self, GatewayError> {
		if method.is_client_streaming() || method.is_server_streaming() {
			return Err(GatewayError::InvalidTool(format!(
				"method {} is streaming; only unary methods are supported",
				method.full_name()
			)));
		}
		Ok(Self {
			def,
			method,
			pools,
			cache: None,
		})
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}

	fn grpc_path(&self) -> String {
		format!(
			"/{}/{}",
			self.method.parent_service().full_name(),
			self.method.name()
		)
	}
}

#[async_trait]
impl ToolExecutor for GrpcTool {
	fn tool(&self) -> &ToolDef {
		&self.def
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError> {
		let pool: Arc<dyn Pool<GrpcChannel>> = self
			.pools
			.get_by_type::<GrpcChannel>(&self.def.service_id)
			.ok_or_else(|| GatewayError::pool_not_found("grpc", &self.def.service_id))?;

		let inputs = decode_inputs(req)?;
		let input_json = Value::Object(inputs).to_string();
		let mut deserializer = serde_json::Deserializer::from_str(&input_json);
		let message = DynamicMessage::deserialize(self.method.input(), &mut deserializer)
			.map_err(|e| GatewayError::UnmarshalInputs(e.to_string()))?;

		let path = http::uri::PathAndQuery::try_from(self.grpc_path())
			.map_err(|e| GatewayError::Internal(format!("invalid grpc path: {e}")))?;

		let channel = pool.get(ctx.cancellation()).await?;
		let mut grpc = tonic::client::Grpc::new(channel.clone());

		let call = async {
			grpc
				.ready()
				.await
				.map_err(|e| GatewayError::GrpcInvoke(security::sanitize_upstream_error(&e.to_string())))?;
			grpc
				.unary(
					tonic::Request::new(message),
					path,
					DynamicCodec {
						method: self.method.clone(),
					},
				)
				.await
				.map_err(|status| {
					warn!(
						target: "gateway",
						method = %self.method.full_name(),
						code = ?status.code(),
						"grpc upstream error"
					);
					GatewayError::GrpcInvoke(security::sanitize_upstream_error(status.message()))
				})
		};

		let response = tokio::select! {
			r = call => r,
			_ = ctx.cancellation().cancelled() => {
				pool.put(channel);
				return Err(GatewayError::Cancelled);
			},
		};
		pool.put(channel);
		let response = response?;

		serde_json::to_value(response.into_inner())
			.map_err(|e| GatewayError::Internal(format!("failed to marshal response: {e}")))
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}
