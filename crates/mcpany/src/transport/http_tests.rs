// HTTP adapter end-to-end tests against a local mock upstream

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::auth::NoopAuthenticator;
use crate::pool::StaticPool;
use crate::registry::ParamMapping;
use crate::secret::{EnvSecretResolver, SecretRef};
use crate::template::{OutputFormat, OutputSpec};

fn pools_for(service: &str) -> Arc<PoolManager> {
	let pools = Arc::new(PoolManager::new());
	let pool: Arc<dyn Pool<HttpConn>> =
		Arc::new(StaticPool::new(service, vec![HttpConn::new()]));
	pools.register(service, pool);
	pools
}

fn http_tool(def: ToolDef, pools: Arc<PoolManager>) -> HttpTool {
	HttpTool::new(
		def,
		pools,
		Arc::new(NoopAuthenticator),
		Arc::new(EnvSecretResolver),
	)
	.unwrap()
}

// Wiremock listens on loopback; opt in once (never unset, so parallel
// tests agree on the value).
fn allow_loopback() {
	std::env::set_var(crate::config::ENV_ALLOW_LOOPBACK, "true");
}

#[tokio::test]
async fn test_get_with_path_and_query() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/users/123"))
		.and(query_param("q", "test"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "123", "name": "test"})))
		.mount(&server)
		.await;

	let def = ToolDef::new(
		"get_user",
		"users",
		format!("GET {}/users/{{{{userId}}}}", server.uri()),
	)
	.with_parameter(ParamMapping::new("userId", ParamLocation::Path).required())
	.with_parameter(ParamMapping::new("q", ParamLocation::Query));

	let tool = http_tool(def, pools_for("users"));
	let ctx = CallContext::new();
	let req = ExecutionRequest::new("get_user", json!({"userId": "123", "q": "test"}));
	let out = tool.execute(&ctx, &req).await.unwrap();
	assert_eq!(out, json!({"id": "123", "name": "test"}));
}

#[tokio::test]
async fn test_path_traversal_blocked_before_request() {
	allow_loopback();
	// No mock server mounted: a request would fail loudly anyway.
	let def = ToolDef::new("get_user", "users", "GET http://srv/users/{{userId}}")
		.with_parameter(ParamMapping::new("userId", ParamLocation::Path).required());

	let tool = http_tool(def, pools_for("users"));
	let ctx = CallContext::new();
	let req = ExecutionRequest::new("get_user", json!({"userId": "../admin"}));
	let err = tool.execute(&ctx, &req).await.unwrap_err();
	assert_eq!(err.to_string(), "path traversal attempt detected");
}

#[tokio::test]
async fn test_secret_query_param_encoded_and_masked() {
	allow_loopback();
	std::env::set_var("MCPANY_TEST_API_KEY", "super_secret_value");

	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(query_param("api_key", "super_secret_value"))
		.respond_with(ResponseTemplate::new(500).set_body_string("internal"))
		.mount(&server)
		.await;

	let def = ToolDef::new(
		"lookup",
		"srv",
		format!("GET {}?api_key={{{{api_key}}}}", server.uri()),
	)
	.with_parameter(
		ParamMapping::new("api_key", ParamLocation::Query).with_secret(SecretRef::Env {
			name: "MCPANY_TEST_API_KEY".into(),
		}),
	);

	let tool = http_tool(def, pools_for("srv"));
	let ctx = CallContext::new();
	let req = ExecutionRequest::new("lookup", json!({}));
	let err = tool.execute(&ctx, &req).await.unwrap_err();

	// Non-2xx with debug off: masked body, no secret anywhere.
	let message = err.to_string();
	assert!(
		message.contains("[Body hidden for security. Enable debug mode to view.]"),
		"{message}"
	);
	assert!(!message.contains("super_secret_value"));
	std::env::remove_var("MCPANY_TEST_API_KEY");
}

#[tokio::test]
async fn test_post_marshals_leftover_params_into_body() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(path("/users"))
		.and(body_json(json!({"name": "Ada", "role": "admin"})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
		.mount(&server)
		.await;

	let def = ToolDef::new("create_user", "users", format!("POST {}/users", server.uri()))
		.with_parameter(ParamMapping::new("name", ParamLocation::Body).required());

	let tool = http_tool(def, pools_for("users"));
	let ctx = CallContext::new();
	// "role" is undeclared; body verbs carry it through.
	let req = ExecutionRequest::new("create_user", json!({"name": "Ada", "role": "admin"}));
	let out = tool.execute(&ctx, &req).await.unwrap();
	assert_eq!(out, json!({"created": true}));
}

#[tokio::test]
async fn test_get_drops_loose_body_params() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/ping"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!("pong")))
		.mount(&server)
		.await;

	let def = ToolDef::new("ping", "svc", format!("GET {}/ping", server.uri()));
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let req = ExecutionRequest::new("ping", json!({"stray": 1}));
	let out = tool.execute(&ctx, &req).await.unwrap();
	assert_eq!(out, json!("pong"));
}

#[tokio::test]
async fn test_input_template_body() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("POST"))
		.and(body_json(json!({"message": "say \"hi\""})))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
		.mount(&server)
		.await;

	let def = ToolDef::new("notify", "svc", format!("POST {}/notify", server.uri()))
		.with_parameter(ParamMapping::new("msg", ParamLocation::Body).required())
		.with_input_template(r#"{"message": "{{msg}}"}"#);

	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	// JSON encoding makes the quoted value safe inside the template.
	let req = ExecutionRequest::new("notify", json!({"msg": "say \"hi\""}));
	let out = tool.execute(&ctx, &req).await.unwrap();
	assert_eq!(out, json!({"ok": true}));
}

#[tokio::test]
async fn test_input_template_render_failure() {
	allow_loopback();
	// With escaping disabled, a raw quote in the value breaks the
	// template's JSON shape; the failure happens before any request.
	let def = ToolDef::new("notify", "svc", "POST http://upstream.test/notify")
		.with_parameter(
			ParamMapping::new("msg", ParamLocation::Body)
				.required()
				.with_disable_escape(),
		)
		.with_input_template(r#"{"message": "{{msg}}"}"#);

	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let err = tool
		.execute(&ctx, &ExecutionRequest::new("notify", json!({"msg": "a\"b"})))
		.await
		.unwrap_err();
	assert!(
		err.to_string().starts_with("failed to render input template"),
		"{err}"
	);
}

#[tokio::test]
async fn test_missing_required_parameter() {
	allow_loopback();
	let def = ToolDef::new("get_user", "users", "GET http://srv/users/{{userId}}")
		.with_parameter(ParamMapping::new("userId", ParamLocation::Path).required());
	let tool = http_tool(def, pools_for("users"));
	let ctx = CallContext::new();
	let err = tool
		.execute(&ctx, &ExecutionRequest::new("get_user", json!({})))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "missing required parameter: userId");
}

#[tokio::test]
async fn test_missing_optional_path_param_renders_empty() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/users/"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
		.mount(&server)
		.await;

	let def = ToolDef::new("list", "svc", format!("GET {}/users/{{{{id}}}}", server.uri()))
		.with_parameter(ParamMapping::new("id", ParamLocation::Path));
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let out = tool
		.execute(&ctx, &ExecutionRequest::new("list", json!({})))
		.await
		.unwrap();
	assert_eq!(out, json!([]));
}

#[tokio::test]
async fn test_no_pool_for_service() {
	allow_loopback();
	let def = ToolDef::new("t", "unpooled", "GET http://srv/");
	let tool = http_tool(def, Arc::new(PoolManager::new()));
	let ctx = CallContext::new();
	let err = tool
		.execute(&ctx, &ExecutionRequest::new("t", json!({})))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "no http pool found for service: unpooled");
}

#[tokio::test]
async fn test_dry_run_returns_request_without_issuing() {
	allow_loopback();
	// No server at all: issuing would fail.
	let def = ToolDef::new("create", "svc", "POST http://upstream.test/users")
		.with_parameter(ParamMapping::new("name", ParamLocation::Body).required());
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let req = ExecutionRequest::new("create", json!({"name": "Ada"})).with_dry_run();
	let out = tool.execute(&ctx, &req).await.unwrap();

	assert_eq!(out["dry_run"], json!(true));
	assert_eq!(out["request"]["method"], json!("POST"));
	assert_eq!(out["request"]["url"], json!("http://upstream.test/users"));
	let body: serde_json::Value =
		serde_json::from_str(out["request"]["body"].as_str().unwrap()).unwrap();
	assert_eq!(body, json!({"name": "Ada"}));
}

#[tokio::test]
async fn test_unsafe_url_rejected() {
	allow_loopback();
	// Private ranges stay blocked regardless of the loopback override.
	let def = ToolDef::new("t", "svc", "GET http://10.255.0.1/admin");
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let err = tool
		.execute(&ctx, &ExecutionRequest::new("t", json!({})))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "unsafe url: http://10.255.0.1/admin");
}

#[tokio::test]
async fn test_disable_escape_screens_forbidden_characters() {
	allow_loopback();
	let def = ToolDef::new("t", "svc", "GET http://srv/{{seg}}")
		.with_parameter(ParamMapping::new("seg", ParamLocation::Path).with_disable_escape());
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let err = tool
		.execute(&ctx, &ExecutionRequest::new("t", json!({"seg": "a?b=c"})))
		.await
		.unwrap_err();
	assert_eq!(
		err.to_string(),
		"parameter \"seg\": contains forbidden characters"
	);
}

#[tokio::test]
async fn test_response_body_cap() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
		.mount(&server)
		.await;

	let def = ToolDef::new("big", "svc", format!("GET {}/big", server.uri()));
	let tool = http_tool(def, pools_for("svc")).with_max_response_bytes(16);
	let ctx = CallContext::new();
	let err = tool
		.execute(&ctx, &ExecutionRequest::new("big", json!({})))
		.await
		.unwrap_err();
	assert_eq!(err.to_string(), "response body exceeds maximum size");
}

#[tokio::test]
async fn test_header_param_and_raw_bytes_output() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(header("X-Tenant", "acme"))
		.respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xde, 0xad]))
		.mount(&server)
		.await;

	let def = ToolDef::new("fetch", "svc", format!("GET {}/blob", server.uri()))
		.with_parameter(ParamMapping::new("X-Tenant", ParamLocation::Header))
		.with_output(OutputSpec {
			format: OutputFormat::RawBytes,
			..Default::default()
		});
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let out = tool
		.execute(&ctx, &ExecutionRequest::new("fetch", json!({"X-Tenant": "acme"})))
		.await
		.unwrap();
	assert_eq!(out, json!({"raw": "3q0="}));
}

#[tokio::test]
async fn test_double_slash_preserved() {
	allow_loopback();
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/users//profile"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
		.mount(&server)
		.await;

	let def = ToolDef::new(
		"profile",
		"svc",
		format!("GET {}/users/{{{{id}}}}/profile", server.uri()),
	)
	.with_parameter(ParamMapping::new("id", ParamLocation::Path));
	let tool = http_tool(def, pools_for("svc"));
	let ctx = CallContext::new();
	let out = tool
		.execute(&ctx, &ExecutionRequest::new("profile", json!({"id": ""})))
		.await
		.unwrap();
	assert_eq!(out, json!({"ok": true}));
}
