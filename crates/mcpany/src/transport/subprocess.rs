// Sub-process adapter (local / containerised)
//
// Builds argv by substituting parameter values into the argument-template
// list; `env` parameters become environment variables and a `stdin`
// parameter is written to the child's standard input. Every substituted
// value runs the full validator gauntlet before the process is spawned:
// path traversal, file-scheme, shell/interpreter screens when the command
// is shell-like, the `=`-assignment screen, and URL safety for network
// tools. Output capture is byte-capped; overflow truncates and flags.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::{check_required, decode_inputs, resolve_param_values, CacheConfig, ToolExecutor};
use crate::config;
use crate::errors::GatewayError;
use crate::pipeline::{CallContext, ExecutionRequest};
use crate::registry::{ParamLocation, ToolDef};
use crate::secret::SecretResolver;
use crate::security;
use crate::template::Template;
use std::sync::Arc;

pub struct SubprocessTool {
	def: ToolDef,
	command: String,
	arg_templates: Vec<Template>,
	container_image: Option<String>,
	secrets: Arc<dyn SecretResolver>,
	cache: Option<CacheConfig>,
	max_output_bytes: Option<usize>,
}

impl SubprocessTool {
	pub fn new(
		def: ToolDef,
		command: impl Into<String>,
		args: Vec<String>,
		secrets: Arc<dyn SecretResolver>,
	) -> Result<Self, GatewayError> {
		let arg_templates = args
			.iter()
			.map(|a| Template::parse(a))
			.collect::<Result<Vec<_>, _>>()
			.map_err(GatewayError::InputTemplateParse)?;
		Ok(Self {
			def,
			command: command.into(),
			arg_templates,
			container_image: None,
			secrets,
			cache: None,
			max_output_bytes: None,
		})
	}

	/// Run the command inside a container instead of directly on the host.
	pub fn with_container_image(mut self, image: impl Into<String>) -> Self {
		self.container_image = Some(image.into());
		self
	}

	pub fn with_cache_config(mut self, cache: CacheConfig) -> Self {
		self.cache = Some(cache);
		self
	}

	/// Override the environment-configured output cap.
	pub fn with_max_output_bytes(mut self, cap: usize) -> Self {
		self.max_output_bytes = Some(cap);
		self
	}

	/// The validator gauntlet for one substituted value at one insertion
	/// point.
	fn screen_value(
		&self,
		template: &Template,
		placeholder: &str,
		value: &str,
	) -> Result<(), GatewayError> {
		security::check_path_traversal(value)?;
		security::check_no_file_scheme(value)?;
		security::check_argument_assignment(value)?;
		if security::is_shell_like(&self.command) {
			let idx = template
				.raw()
				.find(&format!("{{{{{placeholder}}}}}"))
				.unwrap_or_default();
			let quote_ctx = security::quote_context_at(template.raw(), idx);
			security::check_shell_injection(value, quote_ctx)?;
			security::check_interpreter_injection(&self.command, value)?;
		}
		if security::is_network_tool(&self.command)
			&& (value.starts_with("http://") || value.starts_with("https://"))
		{
			security::is_safe_url(value)?;
		}
		Ok(())
	}

	fn render_args(&self, resolved: &HashMap<String, String>) -> Result<Vec<String>, GatewayError> {
		let mut required = HashSet::new();
		for mapping in &self.def.parameters {
			if mapping.schema.required {
				required.insert(mapping.name().to_string());
			}
		}

		let mut argv = Vec::with_capacity(self.arg_templates.len());
		for template in &self.arg_templates {
			for placeholder in template.placeholders() {
				if let Some(value) = resolved.get(placeholder) {
					self.screen_value(template, placeholder, value)?;
				}
			}
			argv.push(template.render(resolved, &required)?);
		}
		Ok(argv)
	}

	fn env_vars(&self, resolved: &HashMap<String, String>) -> Result<Vec<(String, String)>, GatewayError> {
		let mut out = Vec::new();
		for mapping in &self.def.parameters {
			if mapping.location != ParamLocation::Env {
				continue;
			}
			if let Some(value) = resolved.get(mapping.name()) {
				security::check_path_traversal(value)?;
				out.push((mapping.name().to_string(), value.clone()));
			}
		}
		Ok(out)
	}

	fn stdin_value(&self, resolved: &HashMap<String, String>) -> Option<String> {
		self
			.def
			.parameters
			.iter()
			.find(|m| m.location == ParamLocation::Stdin)
			.and_then(|m| resolved.get(m.name()))
			.cloned()
	}

	/// Host argv: direct for local commands, wrapped in the container
	/// runtime when an image is configured.
	fn spawn_plan(&self, argv: Vec<String>) -> (String, Vec<String>) {
		match &self.container_image {
			Some(image) => {
				let mut full = vec![
					"run".to_string(),
					"--rm".to_string(),
					"-i".to_string(),
					image.clone(),
					self.command.clone(),
				];
				full.extend(argv);
				("docker".to_string(), full)
			},
			None => (self.command.clone(), argv),
		}
	}
}

async fn read_capped<R: tokio::io::AsyncRead + Unpin>(
	reader: &mut R,
	cap: usize,
) -> std::io::Result<(String, bool)> {
	let mut buf = Vec::new();
	let mut limited = reader.take(cap as u64 + 1);
	limited.read_to_end(&mut buf).await?;
	let truncated = buf.len() > cap;
	buf.truncate(cap);
	Ok((String::from_utf8_lossy(&buf).into_owned(), truncated))
}

#[async_trait]
impl ToolExecutor for SubprocessTool {
	fn tool(&self) -> &ToolDef {
		&self.def
	}

	async fn execute(
		&self,
		ctx: &CallContext,
		req: &ExecutionRequest,
	) -> Result<Value, GatewayError> {
		// Absolute command paths are required on the host; container
		// images resolve the command themselves.
		if self.container_image.is_none() && !Path::new(&self.command).is_absolute() {
			return Err(GatewayError::InvalidTool(format!(
				"command must be an absolute path, got {:?}",
				self.command
			)));
		}

		let inputs = decode_inputs(req)?;
		check_required(&self.def, &inputs)?;
		let resolved = resolve_param_values(&self.def, &inputs, self.secrets.as_ref()).await?;

		let argv = self.render_args(&resolved)?;
		let env_vars = self.env_vars(&resolved)?;
		let stdin_value = self.stdin_value(&resolved);
		let (program, full_argv) = self.spawn_plan(argv);

		if req.dry_run {
			return Ok(json!({
				"dry_run": true,
				"request": {"command": program, "args": full_argv},
			}));
		}

		debug!(target: "gateway", command = %program, "spawning subprocess");
		let mut child = tokio::process::Command::new(&program)
			.args(&full_argv)
			.envs(env_vars)
			.stdin(if stdin_value.is_some() {
				Stdio::piped()
			} else {
				Stdio::null()
			})
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()
			.map_err(|e| GatewayError::Subprocess(format!("failed to spawn {program:?}: {e}")))?;

		if let Some(text) = stdin_value {
			if let Some(mut stdin) = child.stdin.take() {
				stdin
					.write_all(text.as_bytes())
					.await
					.map_err(|e| GatewayError::Subprocess(format!("failed to write stdin: {e}")))?;
				drop(stdin);
			}
		}

		let cap = self
			.max_output_bytes
			.unwrap_or_else(config::max_command_output_size);
		let mut stdout_pipe = child.stdout.take().expect("stdout piped");
		let mut stderr_pipe = child.stderr.take().expect("stderr piped");

		let wait = async {
			let (stdout, stderr) = tokio::join!(
				read_capped(&mut stdout_pipe, cap),
				read_capped(&mut stderr_pipe, cap),
			);
			let status = child
				.wait()
				.await
				.map_err(|e| GatewayError::Subprocess(format!("wait failed: {e}")))?;
			let (stdout, stdout_truncated) =
				stdout.map_err(|e| GatewayError::Subprocess(format!("stdout read failed: {e}")))?;
			let (stderr, stderr_truncated) =
				stderr.map_err(|e| GatewayError::Subprocess(format!("stderr read failed: {e}")))?;
			Ok::<_, GatewayError>((status, stdout, stdout_truncated, stderr, stderr_truncated))
		};

		let (status, stdout, stdout_truncated, stderr, stderr_truncated) = tokio::select! {
			r = wait => r?,
			_ = ctx.cancellation().cancelled() => {
				// kill_on_drop reaps the child.
				return Err(GatewayError::Cancelled);
			},
		};

		if stdout_truncated || stderr_truncated {
			warn!(
				target: "gateway",
				command = %program,
				cap,
				"subprocess output truncated"
			);
		}

		let mut result = json!({
			"stdout": stdout,
			"stderr": stderr,
			"exit_code": status.code().unwrap_or(-1),
		});
		if stdout_truncated {
			result["stdout_truncated"] = json!(true);
		}
		if stderr_truncated {
			result["stderr_truncated"] = json!(true);
		}
		Ok(result)
	}

	fn cache_config(&self) -> Option<CacheConfig> {
		self.cache
	}
}
